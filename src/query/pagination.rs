//! Page resolution, pagination links and the `Link` header.

use crate::error::ApiError;

/// Client page parameters as given in `page[number]` / `page[size]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub number: Option<u64>,
    pub size: Option<u64>,
}

/// A page that will actually be fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number.
    pub number: u64,
    pub size: u64,
}

impl Pagination {
    /// Combine client parameters with the API's page sizes. `None` means unpaginated.
    pub fn resolve(req: PageRequest, page_size: u64, max_page_size: u64) -> Result<Option<Self>, ApiError> {
        if page_size == 0 {
            return Ok(None);
        }
        let size = req.size.unwrap_or(page_size);
        if size > max_page_size {
            return Err(ApiError::BadRequest(format!(
                "Page size must not exceed the server's maximum: {}",
                max_page_size
            )));
        }
        if size == 0 {
            return Ok(None);
        }
        let number = req.number.unwrap_or(1);
        if number == 0 {
            return Err(ApiError::BadRequest("Page number must be a positive integer".into()));
        }
        Ok(Some(Pagination { number, size }))
    }

    pub fn limit(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        (self.number - 1).saturating_mul(self.size)
    }

    pub fn last_page(&self, total: u64) -> u64 {
        total.div_ceil(self.size).max(1)
    }

    /// first/last/prev/next URLs; `base` is the request path, `params` the other query parameters.
    pub fn links(&self, base: &str, params: &[(String, String)], total: u64) -> PageLinks {
        let last = self.last_page(total);
        let url = |n: u64| page_url(base, params, n, self.size);
        PageLinks {
            first: url(1),
            last: url(last),
            prev: (self.number > 1).then(|| url((self.number - 1).min(last))),
            next: (self.number < last).then(|| url(self.number + 1)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLinks {
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl PageLinks {
    /// RFC 8288 `Link` header value.
    pub fn header_value(&self) -> String {
        let mut parts = vec![
            format!("<{}>; rel=\"first\"", self.first),
            format!("<{}>; rel=\"last\"", self.last),
        ];
        if let Some(prev) = &self.prev {
            parts.push(format!("<{}>; rel=\"prev\"", prev));
        }
        if let Some(next) = &self.next {
            parts.push(format!("<{}>; rel=\"next\"", next));
        }
        parts.join(", ")
    }
}

fn page_url(base: &str, params: &[(String, String)], number: u64, size: u64) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .filter(|(k, _)| k != "page[number]" && k != "page[size]")
        .cloned()
        .collect();
    pairs.push(("page[number]".into(), number.to_string()));
    pairs.push(("page[size]".into(), size.to_string()));
    format!("{}?{}", base, encode_query(&pairs))
}

/// Form-encode query pairs, leaving the brackets of `page[number]`-style keys readable.
pub fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| {
            let key: String = url::form_urlencoded::byte_serialize(k.as_bytes()).collect();
            let value: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
            format!("{}={}", key.replace("%5B", "[").replace("%5D", "]"), value)
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: Option<u64>, size: Option<u64>) -> PageRequest {
        PageRequest { number, size }
    }

    #[test]
    fn defaults_to_first_server_page() {
        let p = Pagination::resolve(page(None, None), 10, 100).unwrap().unwrap();
        assert_eq!((p.number, p.size, p.offset()), (1, 10, 0));
    }

    #[test]
    fn server_page_size_zero_ignores_client() {
        assert_eq!(Pagination::resolve(page(Some(2), Some(5)), 0, 100).unwrap(), None);
    }

    #[test]
    fn client_size_zero_disables() {
        assert_eq!(Pagination::resolve(page(None, Some(0)), 10, 100).unwrap(), None);
    }

    #[test]
    fn rejects_oversized_and_zero_number() {
        assert!(Pagination::resolve(page(None, Some(20)), 10, 15).is_err());
        assert!(Pagination::resolve(page(Some(0), None), 10, 100).is_err());
    }

    #[test]
    fn links_for_middle_page() {
        let p = Pagination { number: 2, size: 3 };
        let links = p.links("/api/person", &[("sort".into(), "-age".into())], 25);
        assert_eq!(links.first, "/api/person?sort=-age&page[number]=1&page[size]=3");
        assert_eq!(links.last, "/api/person?sort=-age&page[number]=9&page[size]=3");
        assert_eq!(links.prev.as_deref(), Some("/api/person?sort=-age&page[number]=1&page[size]=3"));
        assert_eq!(links.next.as_deref(), Some("/api/person?sort=-age&page[number]=3&page[size]=3"));
    }

    #[test]
    fn first_and_last_pages_have_null_neighbours() {
        let p = Pagination { number: 1, size: 10 };
        let links = p.links("/api/person", &[], 0);
        assert_eq!(links.prev, None);
        assert_eq!(links.next, None);
        assert_eq!(links.last, "/api/person?page[number]=1&page[size]=10");
    }

    #[test]
    fn link_header_lists_relations() {
        let p = Pagination { number: 4, size: 3 };
        let header = p.links("/api/person", &[], 25).header_value();
        assert!(header.contains("</api/person?page[number]=1&page[size]=3>; rel=\"first\""));
        assert!(header.contains("page[number]=9&page[size]=3>; rel=\"last\""));
        assert!(header.contains("page[number]=3&page[size]=3>; rel=\"prev\""));
        assert!(header.contains("page[number]=5&page[size]=3>; rel=\"next\""));
    }

    #[test]
    fn encodes_filter_values() {
        let q = encode_query(&[("filter[objects]".into(), "[{\"name\":\"a\"}]".into())]);
        assert_eq!(q, "filter[objects]=%5B%7B%22name%22%3A%22a%22%7D%5D");
    }
}
