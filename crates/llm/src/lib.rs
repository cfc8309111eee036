//! Model provider plumbing: the rig-backed adapter, chat sessions that
//! stream into a transcript, and background draft jobs.

use std::sync::Arc;

mod draft;
mod provider;
mod rig_adapter;
mod session;
mod wire;

use grantscribe_engine::Sentinels;

pub use draft::{DispatchedJob, dispatch_generation_job, draft_preamble, run_generation_job};
pub use provider::{
    GenerationRequest, LlmProvider, ProviderConfig, ProviderError, ProviderFrameHandle,
    ProviderMessage, ProviderResult, ProviderWorker, Role,
};
pub use rig_adapter::{DEFAULT_OPENAI_MODEL, RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};
pub use session::ChatSession;
pub use wire::closing_frames;

pub fn create_provider(
    mut config: ProviderConfig,
    sentinels: Sentinels,
) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config, sentinels)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_id_defaults_to_openai() {
        let config = ProviderConfig::new("", "sk-test", "", None);
        let provider = create_provider(config, Sentinels::default()).expect("provider");
        assert_eq!(provider.id(), RIG_OPENAI_PROVIDER_ID);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = ProviderConfig::new("anthropic", "sk-test", "", None);
        let result = create_provider(config, Sentinels::default());
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedProvider { provider_id, .. }) if provider_id == "anthropic"
        ));
    }
}
