use std::future::Future;
use std::pin::Pin;

use grantscribe_engine::{
    BoxFuture, ChannelTransport, EngineError, HistoryTurn, ProviderSettings, RawCitation,
};
use snafu::Snafu;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub default_model: Option<String>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        default_model: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            default_model,
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self::new(
            &settings.provider_id,
            &settings.api_key,
            &settings.endpoint,
            Some(settings.model.clone()),
        )
    }
}

/// Speaker role at the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Instruction text plus conversation history for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    /// Retrieval results to send back as the citation metadata frame.
    pub sources: Vec<RawCitation>,
}

impl GenerationRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<ProviderMessage>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            preamble: None,
            temperature: None,
            max_tokens: None,
            sources: Vec::new(),
        }
    }

    /// Replays prior turns, then asks `prompt`.
    pub fn for_turn<'a, I>(model_id: impl Into<String>, history: I, prompt: &str) -> Self
    where
        I: IntoIterator<Item = HistoryTurn<'a>>,
    {
        let mut messages = Vec::new();
        for turn in history {
            messages.push(ProviderMessage::new(Role::User, turn.user_text));
            messages.push(ProviderMessage::new(Role::Assistant, turn.assistant_text));
        }
        messages.push(ProviderMessage::new(Role::User, prompt));
        Self::new(model_id, messages)
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_sources(mut self, sources: Vec<RawCitation>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_settings(mut self, settings: &ProviderSettings) -> Self {
        self.temperature = settings.temperature.or(self.temperature);
        self.max_tokens = settings.max_tokens.or(self.max_tokens);
        self
    }
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("generation request for model '{model_id}' has no messages"))]
    EmptyMessageSet {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    #[snafu(display("transcript rejected exchange on `{stage}`, {source}"))]
    Transcript {
        stage: &'static str,
        source: EngineError,
    },
    #[snafu(display("job store failed on `{stage}`, {source}"))]
    JobStore {
        stage: &'static str,
        source: EngineError,
    },
}

/// Live push stream for one exchange plus the worker that feeds it.
///
/// The worker must be spawned by the caller; closing or dropping the
/// transport stops it.
pub struct ProviderFrameHandle {
    pub transport: ChannelTransport,
    pub worker: ProviderWorker,
}

pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn default_model(&self) -> &str;
    fn stream_exchange(&self, request: GenerationRequest) -> ProviderResult<ProviderFrameHandle>;
    /// Single request/response call; returns the whole text blob.
    fn complete<'a>(&'a self, request: GenerationRequest) -> BoxFuture<'a, ProviderResult<String>>;
}
