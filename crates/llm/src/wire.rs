//! Frames a provider worker writes after the last content delta.

use grantscribe_engine::{RawCitation, Sentinels};

/// End-of-content marker followed by the JSON citation array.
pub fn closing_frames(sentinels: &Sentinels, sources: &[RawCitation]) -> [String; 2] {
    let metadata = serde_json::to_string(sources).unwrap_or_else(|error| {
        tracing::warn!(error = %error, "failed to encode citation metadata; sending empty list");
        "[]".to_string()
    });
    [sentinels.end_of_content.clone(), metadata]
}
