//! Blocking client for the realtime key-value store's REST surface.
//!
//! - Every path is readable as `GET {base}/{path}.json`; a JSON `null` body
//!   means nothing is stored at that path.
//! - Optional database secret / ID token is sent as the `auth` query parameter.
//! - No timeouts are imposed here; the store's own limits apply.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Read access to the realtime store. The sensor feed only ever needs point
/// reads; change detection is done by the feed itself.
pub trait RealtimeStore {
    /// Current value at `path`, or `None` when the path is empty.
    fn get_once(&self, path: &str) -> Result<Option<Value>, FeedError>;
}

#[derive(Debug)]
pub enum FeedError {
    Transport(String),
    Http { status: u16, message: String },
    Json { path: String, source: serde_json::Error },
    /// An auxiliary field could not be read after a status change.
    FieldRead { path: String, source: Box<FeedError> },
}

impl core::fmt::Display for FeedError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FeedError::Transport(s) => write!(f, "transport error: {}", s),
            FeedError::Http { status, message } => write!(f, "http {}: {}", status, message),
            FeedError::Json { path, source } => write!(f, "json error at {}: {}", path, source),
            FeedError::FieldRead { path, source } => write!(f, "reading {} failed: {}", path, source),
        }
    }
}

impl std::error::Error for FeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeedError::Json { source, .. } => Some(source),
            FeedError::FieldRead { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_path_to_error::Error<serde_json::Error>> for FeedError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        let path = value.path().to_string();
        FeedError::Json {
            path,
            source: value.into_inner(),
        }
    }
}

pub struct FeedClient {
    agent: ureq::Agent,
    base_url: String,
    auth_token: Option<String>,
}

impl FeedClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        // Status codes are inspected by hand so error bodies reach the logs.
        let config = ureq::Agent::config_builder().http_status_as_error(false).build();
        FeedClient {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into(),
            auth_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}.json",
            self.base_url.trim_end_matches('/'),
            path.trim_matches('/')
        )
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FeedError> {
        let url = self.url(path);
        let mut req = self.agent.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.auth_token {
            req = req.query("auth", token);
        }

        let mut res = req.call().map_err(|e| FeedError::Transport(e.to_string()))?;
        let status = res.status();
        let body = res
            .body_mut()
            .read_to_string()
            .map_err(|e| FeedError::Transport(e.to_string()))?;
        if status != http::StatusCode::OK {
            return Err(FeedError::Http {
                status: status.as_u16(),
                message: if body.is_empty() { String::from("<no body>") } else { body },
            });
        }
        decode(&body)
    }
}

impl RealtimeStore for FeedClient {
    fn get_once(&self, path: &str) -> Result<Option<Value>, FeedError> {
        self.get_json(path)
    }
}

/// Decode a JSON body, reporting the failing field by path.
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, FeedError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(FeedError::from)
}

/// Decode an already parsed JSON value, reporting the failing field by path.
pub fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, FeedError> {
    serde_path_to_error::deserialize(value).map_err(FeedError::from)
}
