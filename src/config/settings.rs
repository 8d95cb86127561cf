//! Manager-wide settings, overridable from the environment.

/// Defaults applied to every API created by a manager.
#[derive(Clone, Debug, PartialEq)]
pub struct ManagerSettings {
    /// Prefix for every API URL unless overridden per API (e.g. "/api").
    pub url_prefix: String,
    /// Emit `links` objects on resources and relationships.
    pub include_links: bool,
    pub default_page_size: u64,
    pub default_max_page_size: u64,
    /// Maximum accepted request body in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings {
            url_prefix: "/api".into(),
            include_links: false,
            default_page_size: 10,
            default_max_page_size: 100,
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ManagerSettings {
    /// Defaults overridden by `RESTLESS_*` environment variables (a `.env` file is read first).
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut s = ManagerSettings::default();
        if let Some(v) = lookup("RESTLESS_URL_PREFIX") {
            s.url_prefix = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("RESTLESS_INCLUDE_LINKS") {
            s.include_links = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(n) = lookup("RESTLESS_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            s.default_page_size = n;
        }
        if let Some(n) = lookup("RESTLESS_MAX_PAGE_SIZE").and_then(|v| v.parse().ok()) {
            s.default_max_page_size = n;
        }
        if let Some(n) = lookup("RESTLESS_BODY_LIMIT").and_then(|v| v.parse().ok()) {
            s.body_limit_bytes = n;
        }
        s
    }
}
