//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Application error that can be serialized for the web layer.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instance not found
    InstanceNotFound,
    /// Instance is currently running
    InstanceRunning,
    /// Operation requires a live server process
    NotRunning,
    /// RCON disabled or missing credential
    NotConfigured,
    /// External process or network call exceeded its bound
    Timeout,
    /// Non-zero exit or launch failure
    Process,
    /// RCON auth rejected or malformed response
    Protocol,
    /// Port range exhausted
    NoPortAvailable,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// Template catalog error
    Template,
    /// Backup error
    Backup,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::InstanceNotFound => 1001,
            Self::InstanceRunning => 1002,
            Self::NotRunning => 1003,
            Self::NotConfigured => 1004,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::Process => 3001,
            Self::Timeout => 3002,
            Self::NoPortAvailable => 3003,
            Self::Protocol => 3004,
            Self::Backup => 4001,
            Self::Template => 4002,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn instance_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn instance_running() -> Self {
        Self::new(ErrorKind::InstanceRunning, HashMap::new())
    }

    pub fn not_running() -> Self {
        Self::new(ErrorKind::NotRunning, HashMap::new())
    }

    pub fn not_configured(id: &str) -> Self {
        Self::new(
            ErrorKind::NotConfigured,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Timeout, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Protocol, message)
    }

    pub fn auth_rejected(id: &str) -> Self {
        Self::new(
            ErrorKind::Protocol,
            HashMap::from([
                ("id".to_string(), id.to_string()),
                ("reason".to_string(), "auth_rejected".to_string()),
            ]),
        )
    }

    pub fn no_port_available(start: u16, end: u16) -> Self {
        Self::new(
            ErrorKind::NoPortAvailable,
            HashMap::from([("range".to_string(), format!("{}-{}", start, end))]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn template_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::Template,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Template, message)
    }

    pub fn backup(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Backup, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_auth_rejected(&self) -> bool {
        self.kind == ErrorKind::Protocol
            && self.payload.get("reason").map(String::as_str) == Some("auth_rejected")
    }

    /// The human readable detail, falling back to the kind name.
    pub fn message(&self) -> String {
        match self.payload.get("detail") {
            Some(detail) => detail.clone(),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
