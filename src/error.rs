use std::fmt;

use thiserror::Error;

/// Failure taxonomy of a pipeline run.
///
/// Only [`ErrorKind::Configuration`] is fatal; every other kind is caught at
/// the stage boundary and means "no data for this unit of work".
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream answered {status} for {url}")]
    UpstreamStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("malformed upstream document: {0}")]
    UpstreamFormat(#[from] quick_xml::DeError),

    #[error("can't parse {field} from {value:?}: {reason}")]
    Parse {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("database write failed: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NetworkFailure,
    UpstreamFormatError,
    ParseFailure,
    PersistenceFailure,
    ConfigurationError,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Network(_) | EtlError::UpstreamStatus { .. } => ErrorKind::NetworkFailure,
            EtlError::UpstreamFormat(_) => ErrorKind::UpstreamFormatError,
            EtlError::Parse { .. } => ErrorKind::ParseFailure,
            EtlError::Persistence(_) => ErrorKind::PersistenceFailure,
            EtlError::Configuration(_) => ErrorKind::ConfigurationError,
        }
    }

    pub(crate) fn parse(field: &'static str, value: &str, reason: impl fmt::Display) -> Self {
        EtlError::Parse {
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        EtlError::Configuration(message.into())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NetworkFailure => "NetworkFailure",
            ErrorKind::UpstreamFormatError => "UpstreamFormatError",
            ErrorKind::ParseFailure => "ParseFailure",
            ErrorKind::PersistenceFailure => "PersistenceFailure",
            ErrorKind::ConfigurationError => "ConfigurationError",
        };
        f.write_str(name)
    }
}
