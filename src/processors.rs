//! Pre- and postprocessing hooks, keyed by endpoint kind.

use crate::error::ApiError;
pub use crate::error::ProcessingError;
use crate::query::{Filter, SortKey};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcessorKey {
    GetCollection,
    GetResource,
    GetRelation,
    GetRelatedResource,
    GetRelationship,
    PostResource,
    PatchResource,
    DeleteResource,
    PostRelationship,
    PatchRelationship,
    DeleteRelationship,
}

impl ProcessorKey {
    pub const ALL: [ProcessorKey; 11] = [
        ProcessorKey::GetCollection,
        ProcessorKey::GetResource,
        ProcessorKey::GetRelation,
        ProcessorKey::GetRelatedResource,
        ProcessorKey::GetRelationship,
        ProcessorKey::PostResource,
        ProcessorKey::PatchResource,
        ProcessorKey::DeleteResource,
        ProcessorKey::PostRelationship,
        ProcessorKey::PatchRelationship,
        ProcessorKey::DeleteRelationship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKey::GetCollection => "GET_COLLECTION",
            ProcessorKey::GetResource => "GET_RESOURCE",
            ProcessorKey::GetRelation => "GET_RELATION",
            ProcessorKey::GetRelatedResource => "GET_RELATED_RESOURCE",
            ProcessorKey::GetRelationship => "GET_RELATIONSHIP",
            ProcessorKey::PostResource => "POST_RESOURCE",
            ProcessorKey::PatchResource => "PATCH_RESOURCE",
            ProcessorKey::DeleteResource => "DELETE_RESOURCE",
            ProcessorKey::PostRelationship => "POST_RELATIONSHIP",
            ProcessorKey::PatchRelationship => "PATCH_RELATIONSHIP",
            ProcessorKey::DeleteRelationship => "DELETE_RELATIONSHIP",
        }
    }
}

impl fmt::Display for ProcessorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessorKey {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessorKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ApiError::IllegalArgument(format!("unknown processor key {}", s)))
    }
}

/// Request state handed to processors. Preprocessors may rewrite ids, the request
/// document, filters and sort; postprocessors see and may rewrite `result`.
#[derive(Clone, Debug, Default)]
pub struct ProcessorArgs {
    pub resource_id: Option<String>,
    pub relation_name: Option<String>,
    pub related_resource_id: Option<String>,
    pub data: Option<Value>,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
    pub result: Option<Value>,
}

pub type Processor = Arc<dyn Fn(&mut ProcessorArgs) -> Result<(), ProcessingError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Processors {
    by_key: HashMap<ProcessorKey, Vec<Processor>>,
}

impl Processors {
    pub fn add<F>(&mut self, key: ProcessorKey, f: F) -> &mut Self
    where
        F: Fn(&mut ProcessorArgs) -> Result<(), ProcessingError> + Send + Sync + 'static,
    {
        self.by_key.entry(key).or_default().push(Arc::new(f));
        self
    }

    pub fn get(&self, key: ProcessorKey) -> &[Processor] {
        self.by_key.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Processors of `global` run before our own for every key.
    pub fn with_global(&self, global: &Processors) -> Processors {
        let mut merged = Processors::default();
        for key in ProcessorKey::ALL {
            let list: Vec<Processor> = global.get(key).iter().chain(self.get(key)).cloned().collect();
            if !list.is_empty() {
                merged.by_key.insert(key, list);
            }
        }
        merged
    }

    /// Run every processor for `key` in order; the first error aborts the request.
    pub fn run(&self, key: ProcessorKey, args: &mut ProcessorArgs) -> Result<(), ApiError> {
        for p in self.get(key) {
            if let Err(e) = p(args) {
                tracing::warn!(processor = %key, status = %e.status, detail = ?e.detail, "processor aborted request");
                return Err(ApiError::Processing(e));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Processors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self.by_key.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("Processors").field("by_key", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn keys_round_trip_names() {
        for key in ProcessorKey::ALL {
            assert_eq!(key.as_str().parse::<ProcessorKey>().unwrap(), key);
        }
        assert!("GET_EVERYTHING".parse::<ProcessorKey>().is_err());
    }

    #[test]
    fn global_processors_run_first() {
        let mut global = Processors::default();
        global.add(ProcessorKey::GetResource, |args| {
            args.resource_id = Some("global".into());
            Ok(())
        });
        let mut local = Processors::default();
        local.add(ProcessorKey::GetResource, |args| {
            let seen = args.resource_id.clone().unwrap_or_default();
            args.resource_id = Some(format!("{}+local", seen));
            Ok(())
        });
        let merged = local.with_global(&global);
        let mut args = ProcessorArgs::default();
        merged.run(ProcessorKey::GetResource, &mut args).unwrap();
        assert_eq!(args.resource_id.as_deref(), Some("global+local"));
    }

    #[test]
    fn errors_short_circuit() {
        let mut p = Processors::default();
        p.add(ProcessorKey::DeleteResource, |_| {
            Err(ProcessingError::new(StatusCode::FORBIDDEN, "no deleting"))
        });
        p.add(ProcessorKey::DeleteResource, |_| panic!("must not run"));
        let err = p.run(ProcessorKey::DeleteResource, &mut ProcessorArgs::default()).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
