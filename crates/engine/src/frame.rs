//! Classification of raw push-stream frames.
//!
//! The wire multiplexes control signals onto the content channel with two
//! reserved literals. Nothing outside this module inspects raw frame text.

use serde::{Deserialize, Serialize};

pub const DEFAULT_ERROR_PREFIX: &str = "!<|ERROR|>!";
pub const DEFAULT_END_OF_CONTENT: &str = "!<|EOF_STREAM|>!";

/// One classified unit of the push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Literal delta to append. May be empty.
    Content(String),
    EndOfContent,
    /// Upstream-signaled failure with the sentinel stripped.
    Error(String),
}

impl Frame {
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Reserved sentinel literals of the push-stream protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinels {
    #[serde(default = "default_error_prefix")]
    pub error_prefix: String,
    #[serde(default = "default_end_of_content")]
    pub end_of_content: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            error_prefix: default_error_prefix(),
            end_of_content: default_end_of_content(),
        }
    }
}

impl Sentinels {
    pub fn new(error_prefix: impl Into<String>, end_of_content: impl Into<String>) -> Self {
        Self {
            error_prefix: error_prefix.into(),
            end_of_content: end_of_content.into(),
        }
    }

    pub(crate) fn normalized(mut self) -> Self {
        if self.error_prefix.is_empty() {
            self.error_prefix = default_error_prefix();
        }
        if self.end_of_content.is_empty() {
            self.end_of_content = default_end_of_content();
        }
        self
    }

    /// Classifies one raw frame. Pure; the error check wins over the end marker.
    pub fn classify(&self, raw: &str) -> Frame {
        if raw.contains(self.error_prefix.as_str()) {
            return Frame::Error(raw.replacen(self.error_prefix.as_str(), "", 1));
        }

        if raw == self.end_of_content {
            return Frame::EndOfContent;
        }

        Frame::Content(raw.to_string())
    }

    /// Wire form of an upstream error, the inverse of the error branch of [`Self::classify`].
    pub fn encode_error(&self, message: &str) -> String {
        format!("{}{}", self.error_prefix, message)
    }
}

/// Classifies with the default sentinels.
pub fn classify(raw: &str) -> Frame {
    Sentinels::default().classify(raw)
}

fn default_error_prefix() -> String {
    DEFAULT_ERROR_PREFIX.to_string()
}

fn default_end_of_content() -> String {
    DEFAULT_END_OF_CONTENT.to_string()
}
