use serde::{Deserialize, Serialize};

use crate::citation::Citation;
use crate::ids::ExchangeId;

pub const UPSTREAM_FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong while generating a response. Please try again.";
pub const TIMEOUT_FALLBACK_MESSAGE: &str =
    "The response is taking too long to start. Please try again in a moment.";

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeState {
    Streaming,
    /// End of content seen; the next content frame carries citations.
    AwaitingMetadata,
    Complete,
    Failed,
}

impl ExchangeState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Streaming | Self::AwaitingMetadata)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

/// Why an exchange failed. Callers may retry on `Timeout` specifically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Upstream sent an explicit error or dropped the connection mid-stream.
    Upstream,
    /// No content arrived before the no-data deadline.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeFailure {
    pub kind: FailureKind,
    /// Upstream detail, kept for logs and diagnostics.
    pub detail: String,
    /// Text shown to the user in place of a reply.
    pub fallback_message: String,
}

impl ExchangeFailure {
    pub fn upstream(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Upstream,
            detail: detail.into(),
            fallback_message: UPSTREAM_FALLBACK_MESSAGE.to_string(),
        }
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Timeout,
            detail: detail.into(),
            fallback_message: TIMEOUT_FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// One user turn and the assistant turn assembled for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub user_text: String,
    /// Append-only until end of content. Survives failure.
    pub assistant_text: String,
    /// Empty until the metadata frame is decoded.
    pub citations: Vec<Citation>,
    pub state: ExchangeState,
    pub failure: Option<ExchangeFailure>,
}

impl Exchange {
    pub fn new(id: ExchangeId, user_text: impl Into<String>) -> Self {
        Self {
            id,
            user_text: user_text.into(),
            assistant_text: String::new(),
            citations: Vec::new(),
            state: ExchangeState::Streaming,
            failure: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|failure| failure.kind)
    }

    /// Text a transcript view should render for the assistant turn.
    pub fn display_text(&self) -> &str {
        match &self.failure {
            Some(failure) if self.assistant_text.trim().is_empty() => &failure.fallback_message,
            _ => &self.assistant_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_states_are_not_terminal() {
        assert!(ExchangeState::Streaming.is_live());
        assert!(ExchangeState::AwaitingMetadata.is_live());
        assert!(ExchangeState::Complete.is_terminal());
        assert!(ExchangeState::Failed.is_terminal());
    }

    #[test]
    fn display_text_prefers_collected_text_over_fallback() {
        let mut exchange = Exchange::new(ExchangeId::new_v7(), "hi");
        exchange.state = ExchangeState::Failed;
        exchange.failure = Some(ExchangeFailure::upstream("boom"));
        assert_eq!(exchange.display_text(), UPSTREAM_FALLBACK_MESSAGE);

        exchange.assistant_text.push_str("partial answer");
        assert_eq!(exchange.display_text(), "partial answer");
    }
}
