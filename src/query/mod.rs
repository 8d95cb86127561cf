//! Query parameters accepted by fetch requests.

pub mod filter;
pub mod include;
pub mod pagination;
pub mod sort;

pub use filter::{Argument, Filter, Operator};
pub use include::IncludeTree;
pub use pagination::{encode_query, PageLinks, PageRequest, Pagination};
pub use sort::SortKey;

use crate::error::ApiError;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchParams {
    pub filters: Vec<Filter>,
    /// `filter[single]`: respond with exactly one resource.
    pub single: bool,
    pub sort: Vec<SortKey>,
    pub page: PageRequest,
    /// `None` when the client sent no `include`, so API defaults apply.
    pub include: Option<Vec<String>>,
    /// Sparse fieldsets by collection name.
    pub fields: HashMap<String, HashSet<String>>,
    /// All pairs as received, used to rebuild pagination links.
    pub raw: Vec<(String, String)>,
}

impl FetchParams {
    pub fn parse(query: Option<&str>) -> Result<Self, ApiError> {
        let raw: Vec<(String, String)> = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        let mut params = FetchParams::default();
        for (key, value) in &raw {
            match key.as_str() {
                "filter[objects]" => params.filters = Filter::parse_objects(value)?,
                "filter[single]" => params.single = parse_flag(value)?,
                "sort" => params.sort = SortKey::parse_list(value)?,
                "page[number]" => params.page.number = Some(parse_page_value(key, value)?),
                "page[size]" => params.page.size = Some(parse_page_value(key, value)?),
                "include" => {
                    params.include = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                k => {
                    if let Some(type_name) = k.strip_prefix("fields[").and_then(|r| r.strip_suffix(']')) {
                        let names = value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect();
                        params.fields.insert(type_name.to_string(), names);
                    }
                }
            }
        }
        params.raw = raw;
        Ok(params)
    }

    /// Query pairs to carry into pagination links.
    pub fn link_params(&self) -> Vec<(String, String)> {
        self.raw.clone()
    }

    pub fn fields_for(&self, collection: &str) -> Option<&HashSet<String>> {
        self.fields.get(collection)
    }
}

fn parse_flag(value: &str) -> Result<bool, ApiError> {
    match value {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(ApiError::BadRequest(format!("Invalid format for filter[single] query parameter: {}", other))),
    }
}

fn parse_page_value(key: &str, value: &str) -> Result<u64, ApiError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ApiError::BadRequest(format!("{} must be a nonnegative integer, got \"{}\"", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_everything() {
        let q = "filter%5Bobjects%5D=%5B%7B%22name%22%3A%22age%22%2C%22op%22%3A%22gt%22%2C%22val%22%3A3%7D%5D\
                 &filter[single]=1&sort=-age&page[number]=2&page[size]=5&include=articles.author\
                 &fields[person]=name,age";
        let p = FetchParams::parse(Some(q)).unwrap();
        assert_eq!(p.filters, vec![Filter::compare("age", Operator::Gt, serde_json::json!(3))]);
        assert!(p.single);
        assert_eq!(p.sort[0].field, "age");
        assert_eq!(p.page, PageRequest { number: Some(2), size: Some(5) });
        assert_eq!(p.include, Some(vec!["articles.author".to_string()]));
        let fields = p.fields_for("person").unwrap();
        assert!(fields.contains("name") && fields.contains("age"));
        assert_eq!(p.raw.len(), 7);
    }

    #[test]
    fn empty_query_uses_defaults() {
        let p = FetchParams::parse(None).unwrap();
        assert_eq!(p, FetchParams::default());
    }

    #[test]
    fn rejects_negative_page_values() {
        assert!(FetchParams::parse(Some("page[size]=-1")).is_err());
        assert!(FetchParams::parse(Some("page[number]=-1")).is_err());
        assert!(FetchParams::parse(Some("page[number]=abc")).is_err());
    }

    #[test]
    fn rejects_bad_single_flag() {
        assert!(FetchParams::parse(Some("filter[single]=maybe")).is_err());
    }
}
