//! Raw model configuration types, deserialized from JSON model files or built in code.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    /// Base type name without parameters (e.g. "varchar" for varchar(40)).
    pub fn base_name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.split('(').next().unwrap_or(s).trim(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// Full DDL type (e.g. "varchar(40)").
    pub fn ddl(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params } => {
                let p = params
                    .as_ref()
                    .map(|v| v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                if p.is_empty() {
                    name.clone()
                } else {
                    format!("{}({})", name, p)
                }
            }
        }
    }
}

impl From<&str> for ColumnTypeConfig {
    fn from(s: &str) -> Self {
        ColumnTypeConfig::Simple(s.to_string())
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl ColumnDefaultConfig {
    pub fn sql(&self) -> &str {
        match self {
            ColumnDefaultConfig::Literal(s) => s,
            ColumnDefaultConfig::Expression { expression } => expression,
        }
    }
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Number(n) => Ok(ColumnDefaultConfig::Literal(n.to_string())),
            serde_json::Value::Bool(b) => Ok(ColumnDefaultConfig::Literal(b.to_string())),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(serde_json::Value::String(s)) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(s));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a string, {{ \"expression\": \"...\" }}, or {{ \"value\": \"...\" }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(serde::de::Error::custom(format!(
                "column default must be a scalar or {{ \"expression\": \"...\" }}; got {}",
                type_name_of_json(&other)
            ))),
        }
    }
}

fn type_name_of_json(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    /// SQL expression assigned on every UPDATE (e.g. "NOW()").
    #[serde(default)]
    pub on_update: Option<String>,
    /// Read-only columns are serialized but rejected in request documents.
    #[serde(default = "default_true")]
    pub writable: bool,
}

impl ColumnConfig {
    pub fn new(name: &str, type_: &str) -> Self {
        ColumnConfig {
            name: name.to_string(),
            type_: type_.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            on_update: None,
            writable: true,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKindConfig {
    ToOne,
    ToMany,
}

/// Association table for many-to-many relationships.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecondaryConfig {
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    /// Column referencing the owning model's primary key.
    pub local_column: String,
    /// Column referencing the target model's primary key.
    pub remote_column: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationshipConfig {
    pub name: String,
    /// Name of the related model.
    pub target: String,
    pub kind: RelationshipKindConfig,
    /// to_one: column on this model; to_many: column on the target model.
    #[serde(default)]
    pub foreign_key: Option<String>,
    #[serde(default)]
    pub secondary: Option<SecondaryConfig>,
}

impl RelationshipConfig {
    pub fn to_one(name: &str, target: &str, foreign_key: &str) -> Self {
        RelationshipConfig {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationshipKindConfig::ToOne,
            foreign_key: Some(foreign_key.to_string()),
            secondary: None,
        }
    }

    pub fn to_many(name: &str, target: &str, foreign_key: &str) -> Self {
        RelationshipConfig {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationshipKindConfig::ToMany,
            foreign_key: Some(foreign_key.to_string()),
            secondary: None,
        }
    }

    pub fn many_to_many(name: &str, target: &str, secondary: SecondaryConfig) -> Self {
        RelationshipConfig {
            name: name.to_string(),
            target: target.to_string(),
            kind: RelationshipKindConfig::ToMany,
            foreign_key: None,
            secondary: Some(secondary),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Table name; defaults to the model name.
    #[serde(default)]
    pub table: Option<String>,
    /// Schema override; defaults to the config's schema.
    #[serde(default)]
    pub schema: Option<String>,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
    /// Multi-column unique constraints.
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub validation: HashMap<String, ValidationRule>,
}

impl ModelConfig {
    pub fn new(name: &str) -> Self {
        ModelConfig {
            name: name.to_string(),
            table: None,
            schema: None,
            columns: Vec::new(),
            relationships: Vec::new(),
            unique: Vec::new(),
            validation: HashMap::new(),
        }
    }

    pub fn column(mut self, column: ColumnConfig) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipConfig) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

/// All models in one struct for in-memory loading.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
    pub models: Vec<ModelConfig>,
}

impl Default for FullConfig {
    fn default() -> Self {
        FullConfig {
            schema: default_schema(),
            models: Vec::new(),
        }
    }
}

fn default_schema() -> String {
    "public".into()
}
