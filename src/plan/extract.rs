//! Resilient structure recovery from completion output.
//!
//! Extraction runs as a fixed sequence of tiers:
//!
//! 1. **direct** - the whole (trimmed) text parses as a JSON object
//! 2. **extracted** - the first `{` and its depth-matched `}` enclose a JSON
//!    object somewhere inside prose or a fenced block
//! 3. **lenient** - both tiers failed; [`resolve_plan`] substitutes the
//!    caller's deterministic fallback plan
//!
//! A JSON object that parses but does not deserialize into the target type
//! (or fails [`Plan::validate`]) is a `ValidationFailed` and also falls
//! through to the fallback. Extraction errors never leave this module's
//! callers; they are recorded as evidence and replaced by a usable plan.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{Plan, PlanProvenance};

/// Extraction tier that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseOutcome {
    Direct,
    Extracted,
    Lenient,
}

impl ParseOutcome {
    /// Only output that parsed without any text surgery is trusted.
    pub fn is_trusted(&self) -> bool {
        matches!(self, ParseOutcome::Direct)
    }
}

impl std::fmt::Display for ParseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::Extracted => "extracted",
            Self::Lenient => "lenient",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("completion output is empty")]
    Empty,
    #[error("no JSON object found in completion output")]
    NoObject,
    #[error("JSON object starting at byte {start} is never closed")]
    Unbalanced { start: usize },
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("structure does not match the expected schema: {0}")]
    ValidationFailed(String),
}

/// A value recovered from text, tagged with the tier that recovered it.
#[derive(Debug, Clone)]
pub struct Extraction<T> {
    pub value: T,
    pub outcome: ParseOutcome,
}

/// Locate the first `{` and its matching `}`.
///
/// Braces inside JSON strings (including escaped quotes) are ignored.
/// Returns the byte range of the object, end exclusive.
pub fn find_balanced_object(text: &str) -> Result<(usize, usize), ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoObject)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Ok((start, end));
                }
            }
            _ => {}
        }
    }

    Err(ExtractError::Unbalanced { start })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ExtractError> {
    serde_json::from_value(value).map_err(|e| ExtractError::ValidationFailed(e.to_string()))
}

/// Recover a `T` from free text using the direct and extracted tiers.
pub fn extract_structured<T: DeserializeOwned>(text: &str) -> Result<Extraction<T>, ExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Ok(Extraction {
            value: decode(value)?,
            outcome: ParseOutcome::Direct,
        });
    }

    let (start, end) = find_balanced_object(trimmed)?;
    let value: Value = serde_json::from_str(&trimmed[start..end])
        .map_err(|e| ExtractError::Malformed(e.to_string()))?;
    Ok(Extraction {
        value: decode(value)?,
        outcome: ParseOutcome::Extracted,
    })
}

/// Recover a [`Plan`] and check its invariants.
pub fn extract_plan(text: &str) -> Result<Extraction<Plan>, ExtractError> {
    let extraction = extract_structured::<Plan>(text)?;
    extraction
        .value
        .validate()
        .map_err(|e| ExtractError::ValidationFailed(e.to_string()))?;
    Ok(extraction)
}

/// Final plan after all three tiers.
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub plan: Plan,
    pub outcome: ParseOutcome,
    pub provenance: PlanProvenance,
    /// Why the generated plan was discarded, when it was.
    pub extraction_error: Option<ExtractError>,
}

/// Run the full tier sequence, substituting `fallback` when extraction fails.
pub fn resolve_plan(text: &str, fallback: impl FnOnce() -> Plan) -> ResolvedPlan {
    match extract_plan(text) {
        Ok(extraction) => ResolvedPlan {
            plan: extraction.value,
            outcome: extraction.outcome,
            provenance: PlanProvenance::Generated,
            extraction_error: None,
        },
        Err(err) => {
            tracing::warn!("Plan extraction failed ({}), using synthesized fallback", err);
            ResolvedPlan {
                plan: fallback(),
                outcome: ParseOutcome::Lenient,
                provenance: PlanProvenance::Synthesized,
                extraction_error: Some(err),
            }
        }
    }
}
