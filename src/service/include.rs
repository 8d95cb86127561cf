//! Loading of `included` resources for compound documents.

use super::crud::CrudService;
use crate::config::{ResolvedModel, Schema};
use crate::error::ApiError;
use crate::query::IncludeTree;
use crate::registry::Identities;
use crate::serialization::Instance;
use crate::sql::select_by_column_in;
use serde_json::Value;
use sqlx::PgConnection;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// One resource to put in `included`.
#[derive(Clone, Debug)]
pub struct Included {
    pub model: Arc<ResolvedModel>,
    pub instance: Instance,
}

/// Walk `tree` from `instances` (whose linkage must be loaded) and return every related
/// resource once. Resources in `exclude` (usually the primary data) are skipped; null
/// to-one links simply contribute nothing.
pub async fn load_included(
    conn: &mut PgConnection,
    schema: &Schema,
    ids: &Identities,
    model: &Arc<ResolvedModel>,
    instances: &[Instance],
    tree: &IncludeTree,
    exclude: &HashSet<(String, String)>,
) -> Result<Vec<Included>, ApiError> {
    let mut seen = exclude.clone();
    let mut out = Vec::new();
    let mut pending: Vec<(Arc<ResolvedModel>, Vec<Instance>, &IncludeTree)> =
        vec![(model.clone(), instances.to_vec(), tree)];

    while let Some((owner, owners, node)) = pending.pop() {
        for (name, child) in &node.children {
            let rel = owner
                .relation(name)
                .ok_or_else(|| ApiError::BadRequest(format!("Invalid include path: {}", name)))?;
            let target = schema
                .related_model(rel)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown model {}", rel.target)))?
                .clone();
            let keys: BTreeSet<String> = owners
                .iter()
                .filter_map(|i| i.links.get(name))
                .flat_map(|l| l.ids().into_iter().map(|r| r.id.clone()))
                .collect();
            if keys.is_empty() {
                continue;
            }
            let key_name = ids.key(&target).to_string();
            let type_name = ids.type_name(&target).to_string();
            let key_column = target
                .column(&key_name)
                .ok_or_else(|| ApiError::BadRequest(format!("no column {} on {}", key_name, target.name)))?;
            let values: Vec<Value> = keys.into_iter().map(Value::String).collect();
            let q = select_by_column_in(&target, key_column, &values);
            let mut fetched: Vec<Instance> = CrudService::fetch_all(&mut *conn, &q)
                .await?
                .into_iter()
                .map(Instance::new)
                .collect();
            CrudService::load_linkage(&mut *conn, schema, ids, &target, &mut fetched).await?;

            for instance in &fetched {
                if let Some(id) = instance.key_string(&key_name) {
                    if seen.insert((type_name.clone(), id)) {
                        out.push(Included {
                            model: target.clone(),
                            instance: instance.clone(),
                        });
                    }
                }
            }
            if !child.is_empty() {
                pending.push((target, fetched, child));
            }
        }
    }
    Ok(out)
}
