//! Relationship writes. Every function runs on the caller's transaction.

use super::crud::CrudService;
use crate::config::{RelationInfo, RelationKind, ResolvedModel, Schema};
use crate::error::ApiError;
use crate::registry::Identities;
use crate::sql::{
    attach_by_foreign_key, detach_by_foreign_key, link_secondary, related, set_column, unlink_secondary, Selection,
};
use serde_json::Value;
use sqlx::PgConnection;

/// Relationship writes for one owner row, identified by its table primary key.
pub struct RelationWriter<'a> {
    pub schema: &'a Schema,
    pub ids: &'a Identities,
    pub model: &'a ResolvedModel,
    pub owner: &'a Value,
}

impl<'a> RelationWriter<'a> {
    /// Table primary keys for the related resource ids.
    pub async fn target_keys(
        &self,
        conn: &mut PgConnection,
        rel: &RelationInfo,
        related_ids: &[String],
    ) -> Result<Vec<Value>, ApiError> {
        let target = related(self.schema, rel)?;
        CrudService::resolve_keys(conn, target, self.ids.type_name(target), self.ids.key(target), related_ids).await
    }

    /// Point a to-one relationship at `related_id`, or clear it.
    pub async fn set_to_one(
        &self,
        conn: &mut PgConnection,
        rel: &RelationInfo,
        related_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let RelationKind::ToOne { foreign_key } = &rel.kind else {
            return Err(ApiError::BadRequest(format!("{} is not a to-one relationship", rel.name)));
        };
        let value = match related_id {
            Some(id) => self
                .target_keys(&mut *conn, rel, &[id.to_string()])
                .await?
                .into_iter()
                .next()
                .unwrap_or(Value::Null),
            None => Value::Null,
        };
        let column = self.column(self.model, foreign_key)?;
        CrudService::execute(conn, &set_column(self.model, column, &value, self.owner)).await?;
        Ok(())
    }

    /// Add resources to a to-many relationship; ones already present are left alone.
    pub async fn add(&self, conn: &mut PgConnection, rel: &RelationInfo, related_ids: &[String]) -> Result<(), ApiError> {
        let keys = self.target_keys(&mut *conn, rel, related_ids).await?;
        self.attach(conn, rel, &keys).await
    }

    /// Remove resources from a to-many relationship.
    pub async fn remove(
        &self,
        conn: &mut PgConnection,
        rel: &RelationInfo,
        related_ids: &[String],
    ) -> Result<(), ApiError> {
        let keys = self.target_keys(&mut *conn, rel, related_ids).await?;
        self.detach(conn, rel, &keys, Selection::Only).await
    }

    /// Make a to-many relationship hold exactly `related_ids`.
    pub async fn replace(
        &self,
        conn: &mut PgConnection,
        rel: &RelationInfo,
        related_ids: &[String],
    ) -> Result<(), ApiError> {
        let keys = self.target_keys(&mut *conn, rel, related_ids).await?;
        self.detach(&mut *conn, rel, &keys, Selection::AllExcept).await?;
        self.attach(conn, rel, &keys).await
    }

    async fn attach(&self, conn: &mut PgConnection, rel: &RelationInfo, keys: &[Value]) -> Result<(), ApiError> {
        if keys.is_empty() {
            return Ok(());
        }
        let target = related(self.schema, rel)?;
        match &rel.kind {
            RelationKind::ToMany { foreign_key } => {
                let fk = self.column(target, foreign_key)?;
                CrudService::execute(conn, &attach_by_foreign_key(target, fk, self.owner, keys)).await?;
            }
            RelationKind::ManyToMany {
                table,
                local_column,
                remote_column,
            } => {
                let owner_pk = self.model.primary_key_column();
                let target_pk = target.primary_key_column();
                for key in keys {
                    let q = link_secondary(table, local_column, remote_column, owner_pk, self.owner, target_pk, key);
                    CrudService::execute(&mut *conn, &q).await?;
                }
            }
            RelationKind::ToOne { .. } => return Err(to_one_forbidden(rel)),
        }
        Ok(())
    }

    async fn detach(
        &self,
        conn: &mut PgConnection,
        rel: &RelationInfo,
        keys: &[Value],
        selection: Selection,
    ) -> Result<(), ApiError> {
        let target = related(self.schema, rel)?;
        let q = match &rel.kind {
            RelationKind::ToMany { foreign_key } => {
                let fk = self.column(target, foreign_key)?;
                detach_by_foreign_key(target, fk, self.owner, keys, selection)
            }
            RelationKind::ManyToMany {
                table,
                local_column,
                remote_column,
            } => unlink_secondary(
                table,
                local_column,
                remote_column,
                self.model.primary_key_column(),
                self.owner,
                target.primary_key_column(),
                keys,
                selection,
            ),
            RelationKind::ToOne { .. } => return Err(to_one_forbidden(rel)),
        };
        CrudService::execute(conn, &q).await?;
        Ok(())
    }

    fn column<'m>(&self, model: &'m ResolvedModel, name: &str) -> Result<&'m crate::config::ColumnInfo, ApiError> {
        model
            .column(name)
            .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", name, model.name)))
    }
}

pub fn to_one_forbidden(rel: &RelationInfo) -> ApiError {
    ApiError::Forbidden(format!(
        "Cannot add to or remove from the to-one relationship {}",
        rel.name
    ))
}
