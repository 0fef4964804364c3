use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid experiment accession: {0}")]
    InvalidAccession(String),

    #[error("missing config file kira-dcc.json in current directory")]
    MissingConfig,

    #[error("no experiment accessions given and none configured for {0}")]
    NoAccessions(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("DCC request failed: {0}")]
    DccHttp(String),

    #[error("DCC returned status {status}: {message}")]
    DccStatus { status: u16, message: String },

    #[error("DCC requires credentials; set ENCODE_ACCESS_KEY/ENCODE_SECRET_KEY or create {0}")]
    MissingCredentials(PathBuf),

    #[error("malformed experiment metadata: {0}")]
    MetadataParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("md5 mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("external tool failed: {0}")]
    ToolFailed(String),

    #[error("no chromosome sizes configured for assembly {0}")]
    MissingChromSizes(String),

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),
}
