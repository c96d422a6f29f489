use std::path::PathBuf;

use chrono::NaiveDate;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SummaryError {
    #[error("required environment variable(s) not set: {}", .0.join(", "))]
    #[diagnostic(help("set them in the environment or pass --env-file"))]
    MissingConfig(Vec<String>),

    #[error("env file does not exist: {0}")]
    EnvFileMissing(PathBuf),

    #[error("failed to read env file {path}: {message}")]
    EnvFileRead { path: PathBuf, message: String },

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search index returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("search shards failed: {0}")]
    ShardFailure(String),

    #[error("aggregation `{level}` truncated, {other_docs} documents fell outside the returned buckets")]
    #[diagnostic(help("raise the bucket size or narrow the time window"))]
    TruncatedAggregation { level: String, other_docs: u64 },

    #[error("failed to index documents: {0}")]
    BulkIndex(String),

    #[error("failed to delete documents: {0}")]
    DeleteByQuery(String),

    #[error("unexpected search response: {0}")]
    MalformedResponse(String),

    #[error("failed to serialize summary document: {0}")]
    Serialization(String),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("failed to parse registry response from {url}: {message}")]
    RegistryParse { url: String, message: String },

    #[error("{count} documents already exist for {date}")]
    #[diagnostic(help("delete the date first (`ospool-summary delete {date}`), existing summaries are never overwritten"))]
    DocumentsExist { date: NaiveDate, count: u64 },

    #[error("data for {date} is off the daily report by {max_difference:.2}%")]
    #[diagnostic(help("re-run with --force to index anyway"))]
    ToleranceExceeded { date: NaiveDate, max_difference: f64 },

    #[error("{0}")]
    Declined(String),

    #[error("invalid field of science table: {0}")]
    #[diagnostic(help("point FOS_TABLE at the SED-CIP crosswalk saved as tab separated text"))]
    FieldOfScienceTable(String),

    #[error("invalid access point map: {0}")]
    AccessPointMap(String),

    #[error("terminal error: {0}")]
    Terminal(String),
}
