#![deny(unsafe_code)]

//! Streaming response assembly and structured extraction for grant drafting.
//!
//! Raw model output arrives either as push frames over a persistent
//! connection or as one text blob. This crate turns the former into a
//! citation-annotated transcript and the latter into one JSON document,
//! degrading to soft failures instead of losing generated text.

pub mod assembler;
pub mod citation;
pub mod error;
pub mod exchange;
/// Structured document recovery from noisy text.
pub mod extract;
pub mod frame;
pub mod ids;
/// Durable job records and the store contract.
pub mod job;
pub mod poller;
pub mod settings;
pub mod transcript;
pub mod transport;

pub use assembler::{AssemblerOptions, DEFAULT_NO_DATA_TIMEOUT, Disposition, TranscriptAssembler};
pub use citation::{Citation, RawCitation, decode_metadata_frame, normalize};
pub use error::{EngineError, EngineResult};
pub use exchange::{
    Exchange, ExchangeFailure, ExchangeState, FailureKind, TIMEOUT_FALLBACK_MESSAGE,
    UPSTREAM_FALLBACK_MESSAGE,
};
pub use extract::{
    ExtractionResult, Strategy, extract, extract_as, extract_or_placeholder, placeholder_document,
};
pub use frame::{DEFAULT_END_OF_CONTENT, DEFAULT_ERROR_PREFIX, Frame, Sentinels, classify};
pub use ids::{ExchangeId, JobId};
pub use job::{InMemoryJobStore, Job, JobFailure, JobFailureKind, JobStatus, JobStore};
pub use poller::{JobPoller, PollHandle, PollOptions, PollOutcome, PollProgress};
pub use settings::{
    EngineSettings, ExtractionSettings, JobSettings, ProviderSettings, SettingsStore,
    StreamSettings,
};
pub use transcript::{HistoryTurn, Transcript};
pub use transport::{
    BoxFuture, CancelSignal, ChannelTransport, FrameSender, FrameTransport, channel_transport,
};
