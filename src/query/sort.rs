//! `sort=a,-b,rel.c`

use crate::error::ApiError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    /// To-one relation whose attribute is sorted on.
    pub relation: Option<String>,
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn parse_list(raw: &str) -> Result<Vec<SortKey>, ApiError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse_one)
            .collect()
    }

    fn parse_one(s: &str) -> Result<SortKey, ApiError> {
        let (descending, path) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let mut parts = path.split('.');
        let (relation, field) = match (parts.next(), parts.next(), parts.next()) {
            (Some(f), None, None) if !f.is_empty() => (None, f),
            (Some(r), Some(f), None) if !r.is_empty() && !f.is_empty() => (Some(r.to_string()), f),
            _ => return Err(ApiError::BadRequest(format!("invalid sort field \"{}\"", s))),
        };
        Ok(SortKey {
            relation,
            field: field.to_string(),
            descending,
        })
    }
}
