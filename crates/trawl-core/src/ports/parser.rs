//! ParserRegistry port - turns fetched bytes into structure plus links.

use thiserror::Error;
use url::Url;

use super::FetchedContent;
use crate::domain::{Failure, FailureKind};

/// Parsed form of a fetched document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Structured extraction result, opaque to the runtime.
    pub data: serde_json::Value,

    /// Absolute links found in the document.
    pub links: Vec<Url>,
}

#[derive(Debug, Clone, Error)]
#[error("parse failure ({kind:?}): {reason}")]
pub struct ParseError {
    pub kind: FailureKind,
    pub reason: String,
}

impl ParseError {
    pub fn recoverable(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: reason.into(),
        }
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: reason.into(),
        }
    }
}

impl From<ParseError> for Failure {
    fn from(err: ParseError) -> Self {
        Failure {
            kind: err.kind,
            reason: format!("parse: {}", err.reason),
        }
    }
}

/// Picks a parser for the content and runs it.
pub trait ParserRegistry: Send + Sync {
    fn parse(&self, content: &FetchedContent) -> Result<ParsedDocument, ParseError>;
}
