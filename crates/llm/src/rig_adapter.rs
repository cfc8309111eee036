use futures::StreamExt;
use grantscribe_engine::{BoxFuture, CancelSignal, FrameSender, Sentinels, channel_transport};
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};

use crate::provider::{
    CompletionsFailedSnafu, EmptyMessageSetSnafu, GenerationRequest, HttpClientSnafu, LlmProvider,
    MissingApiKeySnafu, ProviderConfig, ProviderError, ProviderFrameHandle, ProviderMessage,
    ProviderResult, ProviderWorker, Role,
};
use crate::wire::closing_frames;

pub const RIG_OPENAI_PROVIDER_ID: &str = "openai";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

pub struct RigProviderAdapter {
    config: ProviderConfig,
    sentinels: Sentinels,
}

impl RigProviderAdapter {
    pub fn new(config: ProviderConfig, sentinels: Sentinels) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        Ok(Self { config, sentinels })
    }

    fn build_client(config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let mut builder = openai::Client::builder().api_key(config.api_key.as_str());
        if !config.endpoint.is_empty() {
            builder = builder.base_url(config.endpoint.as_str());
        }
        builder.build().context(HttpClientSnafu {
            stage: "build-client",
        })
    }

    fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &GenerationRequest) -> Option<String> {
        let mut preamble_parts = Vec::new();

        if let Some(preamble) = &request.preamble
            && !preamble.trim().is_empty()
        {
            preamble_parts.push(preamble.clone());
        }

        // Rig takes a single preamble, so system turns fold into it.
        for message in &request.messages {
            if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
                preamble_parts.push(message.content.clone());
            }
        }

        if preamble_parts.is_empty() {
            None
        } else {
            Some(preamble_parts.join("\n\n"))
        }
    }

    async fn open_stream(
        config: &ProviderConfig,
        request: &GenerationRequest,
    ) -> ProviderResult<RigStreamingResponse> {
        let client = Self::build_client(config)?;
        let model = client.completion_model(request.model_id.clone());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %request.model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-filter-messages",
                model_id: request.model_id.clone(),
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn emit_error_frame(frame_tx: &FrameSender, sentinels: &Sentinels, error: ProviderError) {
        let _ = frame_tx.send(sentinels.encode_error(&error.to_string()));
    }

    /// Only answer text reaches the wire; reasoning and tool traffic are dropped.
    fn text_delta<R>(item: StreamedAssistantContent<R>) -> Option<String>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => Some(text.text),
            _ => None,
        }
    }

    async fn run_stream_worker(
        config: ProviderConfig,
        request: GenerationRequest,
        sentinels: Sentinels,
        frame_tx: FrameSender,
        mut cancel_rx: CancelSignal,
    ) {
        let mut stream = match Self::open_stream(&config, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    provider_id = %config.provider_id,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open provider stream"
                );
                Self::emit_error_frame(&frame_tx, &sentinels, error);
                return;
            }
        };

        let mut delta_count = 0_usize;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(model_id = %request.model_id, delta_count, "provider stream cancelled");
                    stream.cancel();
                    return;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(delta) = Self::text_delta(item) {
                                delta_count += 1;
                                if frame_tx.send(delta).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                model_id = %request.model_id,
                                delta_count,
                                error = %source,
                                "provider stream emitted an error chunk"
                            );
                            let error = ProviderError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            Self::emit_error_frame(&frame_tx, &sentinels, error);
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::debug!(
            model_id = %request.model_id,
            delta_count,
            source_count = request.sources.len(),
            "provider stream finished"
        );
        for frame in closing_frames(&sentinels, &request.sources) {
            if frame_tx.send(frame).is_err() {
                return;
            }
        }
    }
}

impl LlmProvider for RigProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Rig OpenAI"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_MODEL)
    }

    fn stream_exchange(&self, request: GenerationRequest) -> ProviderResult<ProviderFrameHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-exchange",
                model_id: request.model_id.clone(),
            }
        );

        let (frame_tx, transport, cancel_rx) = channel_transport();
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            request,
            self.sentinels.clone(),
            frame_tx,
            cancel_rx,
        ));

        Ok(ProviderFrameHandle { transport, worker })
    }

    fn complete<'a>(&'a self, request: GenerationRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let mut stream = Self::open_stream(&self.config, &request).await?;
            let mut text = String::new();
            while let Some(item) = stream.next().await {
                let item = item.context(CompletionsFailedSnafu {
                    stage: "complete-chunk",
                })?;
                if let Some(delta) = Self::text_delta(item) {
                    text.push_str(&delta);
                }
            }
            tracing::debug!(
                model_id = %request.model_id,
                char_count = text.chars().count(),
                "provider completion collected"
            );
            Ok(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProviderConfig {
        ProviderConfig::new("openai", "sk-test", "", None)
    }

    #[test]
    fn new_requires_api_key() {
        let config = ProviderConfig::new("openai", "  ", "", None);
        let result = RigProviderAdapter::new(config, Sentinels::default());
        assert!(matches!(result, Err(ProviderError::MissingApiKey { .. })));
    }

    #[test]
    fn merged_preamble_folds_system_turns() {
        let request = GenerationRequest::new(
            "gpt-4o-mini",
            vec![
                ProviderMessage::new(Role::System, "Cite the RFP."),
                ProviderMessage::new(Role::User, "Draft the summary."),
            ],
        )
        .with_preamble("You write grant proposals.");

        assert_eq!(
            RigProviderAdapter::merged_preamble(&request).as_deref(),
            Some("You write grant proposals.\n\nCite the RFP.")
        );
    }

    #[test]
    fn merged_preamble_is_none_without_instructions() {
        let request = GenerationRequest::new(
            "gpt-4o-mini",
            vec![ProviderMessage::new(Role::User, "Hi")],
        )
        .with_preamble("   ");
        assert_eq!(RigProviderAdapter::merged_preamble(&request), None);
    }

    #[test]
    fn stream_exchange_rejects_empty_requests() {
        let adapter = RigProviderAdapter::new(config(), Sentinels::default()).expect("adapter");
        let result = adapter.stream_exchange(GenerationRequest::new("gpt-4o-mini", Vec::new()));
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }

    #[test]
    fn default_model_prefers_configured_value() {
        let configured = ProviderConfig::new("openai", "sk-test", "", Some("gpt-4.1".to_string()));
        let adapter = RigProviderAdapter::new(configured, Sentinels::default()).expect("adapter");
        assert_eq!(adapter.default_model(), "gpt-4.1");

        let adapter = RigProviderAdapter::new(config(), Sentinels::default()).expect("adapter");
        assert_eq!(adapter.default_model(), DEFAULT_OPENAI_MODEL);
    }
}
