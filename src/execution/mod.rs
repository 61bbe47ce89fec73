pub mod clob_auth;
pub mod clob_client;
pub mod order_builder;

use thiserror::Error;

/// Execution-layer failures. These never escape as panics — the scanner
/// converts them into failed order outcomes or skipped ticks.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("signing: {0}")]
    Signing(String),
    #[error("auth: {0}")]
    Auth(String),
    #[error("order rejected (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("parse: {0}")]
    Parse(String),
    #[error("invalid order: {0}")]
    InvalidOrder(String),
}
