use std::sync::Arc;

use grantscribe_engine::{
    AssemblerOptions, Exchange, ExchangeFailure, ExchangeState, ProviderSettings, RawCitation,
    Transcript, TranscriptAssembler,
};
use snafu::ResultExt;

use crate::provider::{GenerationRequest, LlmProvider, ProviderResult, TranscriptSnafu};

type ExchangeObserver = Arc<dyn Fn(&Exchange) + Send + Sync>;

/// One conversation over one provider: a transcript plus the settings
/// each new exchange is opened with.
pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    transcript: Transcript,
    options: AssemblerOptions,
    model_id: String,
    preamble: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u64>,
    observer: Option<ExchangeObserver>,
}

impl ChatSession {
    pub fn new(provider: Arc<dyn LlmProvider>, options: AssemblerOptions) -> Self {
        let model_id = provider.default_model().to_string();
        Self {
            provider,
            transcript: Transcript::new(),
            options,
            model_id,
            preamble: None,
            temperature: None,
            max_tokens: None,
            observer: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    /// Sampling parameters applied to every request; unset values stay provider defaults.
    pub fn with_sampling(mut self, settings: &ProviderSettings) -> Self {
        self.temperature = settings.temperature.or(self.temperature);
        self.max_tokens = settings.max_tokens.or(self.max_tokens);
        self
    }

    /// Called with the live exchange after every frame that changes it.
    pub fn on_update<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Exchange) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Streams one exchange to a terminal state and records it.
    ///
    /// Provider failures come back as a failed exchange, not an `Err`.
    pub async fn ask(
        &mut self,
        prompt: &str,
        sources: Vec<RawCitation>,
    ) -> ProviderResult<&Exchange> {
        let mut request =
            GenerationRequest::for_turn(&self.model_id, self.transcript.history(), prompt)
                .with_sources(sources);
        if let Some(preamble) = &self.preamble {
            request = request.with_preamble(preamble.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let mut exchange = self
            .transcript
            .begin_exchange(prompt)
            .context(TranscriptSnafu {
                stage: "session-begin-exchange",
            })?;

        match self.provider.stream_exchange(request) {
            Ok(handle) => {
                let worker = tokio::spawn(handle.worker);
                let mut assembler = TranscriptAssembler::new(
                    exchange,
                    Box::new(handle.transport),
                    self.options.clone(),
                );
                if let Some(observer) = &self.observer {
                    let observer = Arc::clone(observer);
                    assembler.subscribe(move |exchange| observer(exchange));
                }
                assembler.run().await;

                let (finished, mut transport) = assembler.into_parts();
                transport.close();
                if let Err(error) = worker.await {
                    tracing::warn!(
                        exchange_id = %finished.id,
                        error = %error,
                        "provider worker did not shut down cleanly"
                    );
                }
                exchange = finished;
            }
            Err(error) => {
                tracing::warn!(
                    exchange_id = %exchange.id,
                    error = %error,
                    "provider refused to open a stream"
                );
                exchange.state = ExchangeState::Failed;
                exchange.failure = Some(ExchangeFailure::upstream(error.to_string()));
            }
        }

        self.transcript
            .finish_exchange(exchange)
            .context(TranscriptSnafu {
                stage: "session-finish-exchange",
            })
    }
}
