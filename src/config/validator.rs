//! Config validation: referential integrity between models, columns and relationships.

use crate::config::{FullConfig, ModelConfig, RelationshipKindConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Primary key column names declared on a model.
pub fn primary_key_names(model: &ModelConfig) -> Vec<&str> {
    model
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect()
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut models_by_name: HashMap<&str, &ModelConfig> = HashMap::new();
    for m in &config.models {
        if m.name.is_empty() {
            return Err(ConfigError::Validation("model name must be nonempty".into()));
        }
        if models_by_name.insert(m.name.as_str(), m).is_some() {
            return Err(ConfigError::DuplicateModel(m.name.clone()));
        }
    }

    for m in &config.models {
        let column_names: HashSet<&str> = m.columns.iter().map(|c| c.name.as_str()).collect();
        if column_names.len() != m.columns.len() {
            return Err(ConfigError::Validation(format!("model {} has duplicate columns", m.name)));
        }
        let pks = primary_key_names(m);
        if pks.len() != 1 {
            return Err(ConfigError::InvalidPrimaryKey {
                model: m.name.clone(),
                column: pks.join(","),
            });
        }
        for u in &m.unique {
            for col in u {
                if !column_names.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "column",
                        id: format!("{}.{}", m.name, col),
                    });
                }
            }
        }
        for col in m.validation.keys() {
            if !column_names.contains(col.as_str()) {
                return Err(ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", m.name, col),
                });
            }
        }

        let mut relation_names = HashSet::new();
        for r in &m.relationships {
            if column_names.contains(r.name.as_str()) || !relation_names.insert(r.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "relationship {}.{} collides with another field",
                    m.name, r.name
                )));
            }
            let target = models_by_name.get(r.target.as_str()).ok_or_else(|| ConfigError::MissingReference {
                kind: "model",
                id: r.target.clone(),
            })?;
            match (r.kind, &r.foreign_key, &r.secondary) {
                (RelationshipKindConfig::ToOne, Some(fk), None) => {
                    if !column_names.contains(fk.as_str()) {
                        return Err(ConfigError::MissingReference {
                            kind: "column",
                            id: format!("{}.{}", m.name, fk),
                        });
                    }
                }
                (RelationshipKindConfig::ToMany, Some(fk), None) => {
                    if !target.columns.iter().any(|c| &c.name == fk) {
                        return Err(ConfigError::MissingReference {
                            kind: "column",
                            id: format!("{}.{}", target.name, fk),
                        });
                    }
                }
                (RelationshipKindConfig::ToMany, None, Some(_)) => {}
                _ => {
                    return Err(ConfigError::Validation(format!(
                        "relationship {}.{} needs a foreign_key (to_one, to_many) or a secondary table (to_many)",
                        m.name, r.name
                    )))
                }
            }
        }
    }

    Ok(())
}
