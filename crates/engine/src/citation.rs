use serde::{Deserialize, Serialize};

/// Source record as delivered by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub uri: String,
}

impl RawCitation {
    pub fn new(title: Option<String>, uri: impl Into<String>) -> Self {
        Self {
            title,
            uri: uri.into(),
        }
    }
}

/// Normalized source attached to a finished exchange. `title` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

impl From<Citation> for RawCitation {
    fn from(citation: Citation) -> Self {
        Self {
            title: Some(citation.title),
            uri: citation.uri,
        }
    }
}

/// Derives missing titles from the final path segment of each uri.
///
/// Order is preserved and duplicates pass through untouched.
pub fn normalize<I>(records: I) -> Vec<Citation>
where
    I: IntoIterator<Item = RawCitation>,
{
    records
        .into_iter()
        .map(|record| {
            let title = match record.title {
                Some(title) if !title.trim().is_empty() => title,
                _ => title_from_uri(&record.uri),
            };
            Citation {
                title,
                uri: record.uri,
            }
        })
        .collect()
}

/// Decodes the metadata frame that follows the end-of-content marker.
pub fn decode_metadata_frame(raw: &str) -> Result<Vec<Citation>, serde_json::Error> {
    let records = serde_json::from_str::<Vec<RawCitation>>(raw)?;
    Ok(normalize(records))
}

fn title_from_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_end_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or_default();
    if !segment.is_empty() {
        return segment.to_string();
    }
    // A bare "/" or empty uri has no segment to offer.
    if uri.trim().is_empty() {
        "Untitled source".to_string()
    } else {
        uri.trim().to_string()
    }
}
