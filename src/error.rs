use thiserror::Error;

#[derive(Error, Debug)]
pub enum KageError {
    #[error("Fetch error: {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Contract violation in {source_name}::{function}: {message}")]
    ContractViolation {
        source_name: String,
        function: String,
        message: String,
    },

    #[error("Missing entry point in {source_name}: {function} is not defined")]
    MissingEntryPoint { source_name: String, function: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Script error in {source_name}: {message}")]
    Script { source_name: String, message: String },

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

impl KageError {
    pub fn fetch(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn contract(
        source_name: impl Into<String>,
        function: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ContractViolation {
            source_name: source_name.into(),
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn missing_entry_point(source_name: impl Into<String>, function: impl Into<String>) -> Self {
        Self::MissingEntryPoint {
            source_name: source_name.into(),
            function: function.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn script(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Script {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(context: impl Into<String>) -> Self {
        Self::Timeout(context.into())
    }

    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled(context.into())
    }

    pub fn source_not_found(name: impl Into<String>) -> Self {
        Self::SourceNotFound(name.into())
    }

    /// Stable, machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Parse(_) => "parse",
            Self::ContractViolation { .. } => "contract_violation",
            Self::MissingEntryPoint { .. } => "missing_entry_point",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::Script { .. } => "script",
            Self::SourceNotFound(_) => "source_not_found",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Url(_) => "url",
        }
    }

    /// Network failures are worth retrying by the caller; nothing else is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Timeout(_))
    }
}

impl From<reqwest::Error> for KageError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            return Self::Timeout(format!("request to {url}"));
        }
        Self::fetch(url, err)
    }
}

pub type Result<T> = std::result::Result<T, KageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_message_names_function() {
        let err = KageError::contract("mysource", "SearchManga", "got string as a key");
        assert_eq!(
            err.to_string(),
            "Contract violation in mysource::SearchManga: got string as a key"
        );
        assert_eq!(err.kind(), "contract_violation");
    }

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(KageError::fetch("https://x", "503").is_retryable());
        assert!(!KageError::not_found("chapters").is_retryable());
        assert!(!KageError::missing_entry_point("s", "ChapterPages").is_retryable());
    }
}
