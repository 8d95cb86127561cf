//! Convert serde_json::Value to values that sqlx can bind.
//!
//! Scalars are sent as text and converted by the `$n::type` cast in the statement, so a
//! malformed value surfaces as a PostgreSQL data exception instead of a bind failure.

use crate::config::ColumnKind;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Text(String),
    Json(Value),
}

impl PgBindValue {
    /// Bind form of `v` for a column of the given kind.
    pub fn for_kind(kind: ColumnKind, v: &Value) -> Self {
        match (kind, v) {
            (_, Value::Null) => PgBindValue::Null,
            (ColumnKind::Json, v) => PgBindValue::Json(v.clone()),
            (_, Value::String(s)) => PgBindValue::Text(s.clone()),
            (_, Value::Bool(b)) => PgBindValue::Text(b.to_string()),
            (_, Value::Number(n)) => PgBindValue::Text(n.to_string()),
            (_, other) => PgBindValue::Text(other.to_string()),
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        PgBindValue::Text(s.into())
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<&str> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Text(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        match self {
            PgBindValue::Json(_) => Some(<Value as Type<Postgres>>::type_info()),
            _ => Some(<String as Type<Postgres>>::type_info()),
        }
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        <String as Type<Postgres>>::compatible(ty) || <Value as Type<Postgres>>::compatible(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_bind_as_text() {
        assert_eq!(PgBindValue::for_kind(ColumnKind::Integer, &json!(5)), PgBindValue::text("5"));
        assert_eq!(PgBindValue::for_kind(ColumnKind::Boolean, &json!(true)), PgBindValue::text("true"));
        assert_eq!(PgBindValue::for_kind(ColumnKind::Text, &Value::Null), PgBindValue::Null);
    }

    #[test]
    fn json_columns_keep_structure() {
        let v = json!({"a": [1, 2]});
        assert_eq!(PgBindValue::for_kind(ColumnKind::Json, &v), PgBindValue::Json(v.clone()));
        assert_eq!(
            PgBindValue::for_kind(ColumnKind::Json, &v).produces(),
            Some(<Value as Type<Postgres>>::type_info())
        );
    }
}
