use crate::recognition::{MatchResult, RecognitionError};
use std::fmt;

/// Outcome of one search, as shown on the frame it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Match { external_id: String, similarity: f32 },
    LowMatch { external_id: String, similarity: f32 },
    NoMatch,
    SearchError { cause: String },
}

impl Decision {
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Match { .. } => "match",
            Decision::LowMatch { .. } => "low_match",
            Decision::NoMatch => "no_match",
            Decision::SearchError { .. } => "search_error",
        }
    }

    /// Overlay text drawn on the frame.
    pub fn label(&self) -> String {
        match self {
            Decision::Match {
                external_id,
                similarity,
            } => format!("Match: {} ({:.1}%)", external_id, similarity),
            Decision::LowMatch {
                external_id,
                similarity,
            } => format!("Low Match: {} ({:.1}%)", external_id, similarity),
            Decision::NoMatch => "No Match".to_string(),
            Decision::SearchError { .. } => "Search Error".to_string(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Maps a search outcome onto a decision. `threshold` is inclusive.
pub fn decide(result: &Result<MatchResult, RecognitionError>, threshold: f32) -> Decision {
    let result = match result {
        Ok(result) => result,
        Err(e) => {
            return Decision::SearchError {
                cause: e.to_string(),
            }
        }
    };

    match (result.found, &result.external_id, result.similarity) {
        (true, Some(external_id), Some(similarity)) => {
            if similarity >= threshold {
                Decision::Match {
                    external_id: external_id.clone(),
                    similarity,
                }
            } else {
                Decision::LowMatch {
                    external_id: external_id.clone(),
                    similarity,
                }
            }
        }
        _ => Decision::NoMatch,
    }
}
