use std::path::PathBuf;

use snafu::Snafu;

use crate::ids::{ExchangeId, JobId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("job '{job_id}' was not found"))]
    JobNotFound { stage: &'static str, job_id: JobId },
    #[snafu(display("job '{job_id}' already exists"))]
    JobAlreadyExists { stage: &'static str, job_id: JobId },
    #[snafu(display("job '{job_id}' already reached a terminal state: {details}"))]
    JobConflict {
        stage: &'static str,
        job_id: JobId,
        details: String,
    },
    #[snafu(display("job store failed on `{stage}`: {details}"))]
    JobStoreUnavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("exchange '{active}' is still live; refusing to start '{attempted}'"))]
    ExchangeInFlight {
        stage: &'static str,
        active: ExchangeId,
        attempted: ExchangeId,
    },
    #[snafu(display("exchange '{exchange_id}' is not live in this transcript"))]
    UnknownExchange {
        stage: &'static str,
        exchange_id: ExchangeId,
    },
    #[snafu(display("exchange '{exchange_id}' has not reached a terminal state"))]
    ExchangeNotFinished {
        stage: &'static str,
        exchange_id: ExchangeId,
    },
    #[snafu(display("extracted document does not match the requested shape: {source}"))]
    DocumentShape {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("no structured document could be recovered from the text"))]
    DocumentNotFound { stage: &'static str },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateSettingsDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeSettings {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteSettings {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameSettings {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub type EngineResult<T> = Result<T, EngineError>;
