use std::env::VarError;

use serde::{Deserialize, Serialize};

use crate::config::SiteConfig;

/// CGI environment of the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnv {
    pub http_cookie: Option<String>,
    pub request_method: Option<String>,
    pub query_string: Option<String>,
    pub http_referer: Option<String>,
    pub path_info: Option<String>,
    pub http_host: Option<String>,
    pub https: Option<String>,
    pub http_remote_user: Option<String>,
}

impl RequestEnv {
    /// Build from an arbitrary variable lookup, keyed by CGI variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            http_cookie: lookup("HTTP_COOKIE"),
            request_method: lookup("REQUEST_METHOD"),
            query_string: lookup("QUERY_STRING"),
            http_referer: lookup("HTTP_REFERER"),
            path_info: lookup("PATH_INFO"),
            http_host: lookup("HTTP_HOST"),
            https: lookup("HTTPS"),
            http_remote_user: lookup("REMOTE_USER"),
        }
    }

    pub fn from_process_env() -> Self {
        Self::from_lookup(|name| env_value(name, std::env::var(name)))
    }
}

/// A variable that is set but not UTF-8 is kept, lossily decoded. Dropping it
/// would tell the policy program the header was never sent.
fn env_value(name: &str, value: Result<String, VarError>) -> Option<String> {
    match value {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(raw)) => {
            tracing::warn!(variable = name, "CGI variable is not valid UTF-8, decoding lossily");
            Some(raw.to_string_lossy().into_owned())
        }
    }
}

/// Parsed query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub repo: Option<String>,
    pub head: Option<String>,
    pub page: Option<String>,
    pub url: Option<String>,
    pub sha1: Option<String>,
    pub sha2: Option<String>,
    pub path: Option<String>,
    pub ofs: usize,
    pub grep: Option<String>,
    pub search: Option<String>,
}

impl Query {
    /// Decode a form-urlencoded query string.
    ///
    /// Keys are the browser's short forms (`r`, `h`, `p`, `id`, `id2`, `qt`, `q`, ...).
    /// Unknown keys are ignored and empty values count as absent, except `p`:
    /// an empty `p=` names the empty page, which dispatch rejects as unknown
    /// instead of falling back to the default. A later occurrence of a key
    /// overrides an earlier one.
    pub fn parse(query_string: &str) -> Self {
        let mut query = Self::default();

        for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
            if value.is_empty() && key != "p" {
                continue;
            }
            let value = value.into_owned();
            match key.as_ref() {
                "r" => query.repo = Some(value),
                "h" => query.head = Some(value),
                "p" => query.page = Some(value),
                "url" => query.url = Some(value),
                "id" => query.sha1 = Some(value),
                "id2" => query.sha2 = Some(value),
                "path" => query.path = Some(value),
                "ofs" => query.ofs = value.parse().unwrap_or(0),
                "qt" => query.grep = Some(value),
                "q" => query.search = Some(value),
                other => tracing::trace!(key = other, "Ignoring unknown query parameter"),
            }
        }

        query
    }
}

/// A repository resolved by the router.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Identifier used in URLs and passed to the policy program.
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub enable_remote_branches: bool,
    /// Archive suffixes offered on the snapshot page (e.g. `.tar.gz`).
    #[serde(default)]
    pub snapshots: Vec<String>,
}

/// Everything known about one request. Never mutated once built.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub env: RequestEnv,
    pub query: Query,
    pub site: SiteConfig,
    pub repo: Option<Repository>,
}

impl RequestContext {
    /// Build a context from a CGI environment, parsing its query string.
    pub fn from_env(env: RequestEnv, site: SiteConfig) -> Self {
        let query = env
            .query_string
            .as_deref()
            .map(Query::parse)
            .unwrap_or_default();
        Self {
            env,
            query,
            site,
            repo: None,
        }
    }

    pub fn with_repo(mut self, repo: Repository) -> Self {
        self.repo = Some(repo);
        self
    }
}
