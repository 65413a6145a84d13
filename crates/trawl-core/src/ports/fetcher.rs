//! Fetcher port - transport is someone else's job.

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::domain::{Failure, FailureKind};

/// Raw content returned by a fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    /// Final URI after redirects (may equal the requested one).
    pub uri: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedContent {
    pub fn ok(uri: Url, body: impl Into<Vec<u8>>) -> Self {
        Self {
            uri,
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Timeouts, connection resets, 5xx, 429.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// 4xx, invalid target, blocked by policy.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transient(_) => FailureKind::Transient,
            FetchError::Permanent(_) => FailureKind::Permanent,
        }
    }
}

impl From<FetchError> for Failure {
    fn from(err: FetchError) -> Self {
        let kind = err.kind();
        let reason = match err {
            FetchError::Transient(reason) | FetchError::Permanent(reason) => {
                format!("fetch: {reason}")
            }
        };
        Failure { kind, reason }
    }
}

/// Retrieves the content behind a URI.
///
/// Called without any runtime lock held; may take as long as it needs.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, uri: &Url) -> Result<FetchedContent, FetchError>;
}
