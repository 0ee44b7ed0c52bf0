//! Media Gateway - an HTTP service that streams transcoded media from supported platforms
//!
//! This library turns an inbound media URL and a requested quality into an execution plan for
//! an external extraction/transcode tool (yt-dlp), runs that tool as a child process, and relays
//! its output to the HTTP client as a live byte stream.

use axum::http::StatusCode;

pub mod catalog;
pub mod cli;
pub mod config;
pub mod extractors;
pub mod gate;
pub mod output;
pub mod pipeline;
pub mod platform;
pub mod selector;
pub mod server;
pub mod utils;

pub use catalog::{build_catalog, MediaCatalog, MediaEncoding};
pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use extractors::{ExtractorMetadata, MediaExtractor};
pub use pipeline::{MediaStream, PipelineOutcome, PipelineRunner};
pub use platform::{classify, Classification, Platform};
pub use selector::{select, StreamPlan};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Why a request failed admission on credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No `Authorization: Bearer ...` header was sent
    MissingBearer,
    /// A bearer token was sent but is unknown
    InvalidToken,
    /// The API key header was missing or did not match
    InvalidApiKey,
}

/// Error types surfaced to HTTP callers
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Domain not allowed")]
    DomainRejected,

    #[error("{0}")]
    ExtractionFailed(String),

    #[error("{}", auth_detail(.0))]
    AuthRejected(AuthFailure),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Streaming pipeline failed: {0}")]
    PipelineAborted(String),
}

fn auth_detail(failure: &AuthFailure) -> &'static str {
    match failure {
        AuthFailure::MissingBearer => "Missing or invalid Authorization header",
        AuthFailure::InvalidToken => "Invalid token",
        AuthFailure::InvalidApiKey => "Could not validate credentials",
    }
}

impl GatewayError {
    /// HTTP status this error maps to when it happens before the response starts
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput(_)
            | GatewayError::DomainRejected
            | GatewayError::ExtractionFailed(_) => StatusCode::BAD_REQUEST,
            GatewayError::AuthRejected(AuthFailure::InvalidApiKey) => StatusCode::FORBIDDEN,
            GatewayError::AuthRejected(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PipelineAborted(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short message safe to show to callers
    pub fn detail(&self) -> String {
        match self {
            // Spawn errors carry OS details that stay in the logs
            GatewayError::PipelineAborted(_) => "Streaming pipeline failed".to_string(),
            other => other.to_string(),
        }
    }
}
