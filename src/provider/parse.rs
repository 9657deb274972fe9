//! Shared parsing of model classification replies.
//!
//! Every provider is instructed to answer with a single JSON object
//! carrying `folder` and `confidence`. Models occasionally wrap it in
//! prose or code fences anyway, so the first balanced object is extracted
//! before parsing. No folder correction happens here: whatever string the
//! model produced is returned verbatim for the orchestrator to validate.

use super::ProviderError;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawDecision {
    folder: Option<String>,
    confidence: Option<f64>,
}

/// Extract the first balanced JSON object from free-form text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `(folder, confidence)` out of a model reply.
///
/// Missing confidence falls back to the adapter's calibrated constant;
/// out-of-range confidence is clamped into [0.0, 1.0].
pub(crate) fn parse_decision(
    text: &str,
    default_confidence: f64,
) -> Result<(String, f64), ProviderError> {
    let object = extract_json_object(text).ok_or_else(|| {
        ProviderError::InvalidResponse("no JSON object in model reply".to_string())
    })?;

    let raw: RawDecision = serde_json::from_str(object)
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed decision object: {}", e)))?;

    let folder = raw
        .folder
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| {
            ProviderError::InvalidResponse("decision object is missing 'folder'".to_string())
        })?;

    let confidence = raw
        .confidence
        .unwrap_or(default_confidence)
        .clamp(0.0, 1.0);

    Ok((folder, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_plain_object() {
        let (folder, confidence) =
            parse_decision(r#"{"folder": "Invoices", "confidence": 0.91}"#, 0.5).unwrap();
        assert_eq!(folder, "Invoices");
        assert!((confidence - 0.91).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parses_object_wrapped_in_prose() {
        let reply = "Sure! Here is the answer:\n{\"folder\": \"Personal\", \"confidence\": 0.7}\nHope that helps.";
        let (folder, confidence) = parse_decision(reply, 0.5).unwrap();
        assert_eq!(folder, "Personal");
        assert!((confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parses_object_in_code_fence() {
        let reply = "```json\n{\"folder\": \"Newsletters\", \"confidence\": 0.8}\n```";
        let (folder, _) = parse_decision(reply, 0.5).unwrap();
        assert_eq!(folder, "Newsletters");
    }

    #[test]
    fn test_missing_confidence_uses_default() {
        let (_, confidence) = parse_decision(r#"{"folder": "Invoices"}"#, 0.65).unwrap();
        assert!((confidence - 0.65).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_clamped() {
        let (_, high) = parse_decision(r#"{"folder": "A", "confidence": 1.7}"#, 0.5).unwrap();
        assert!((high - 1.0).abs() < f64::EPSILON);
        let (_, low) = parse_decision(r#"{"folder": "A", "confidence": -0.2}"#, 0.5).unwrap();
        assert_eq!(low, 0.0);
    }

    #[test]
    fn test_folder_whitespace_trimmed_but_not_corrected() {
        let (folder, _) = parse_decision(r#"{"folder": "  invoices "}"#, 0.5).unwrap();
        // Trimmed, but case is untouched: validation happens downstream.
        assert_eq!(folder, "invoices");
    }

    #[test]
    fn test_no_object_is_error() {
        let result = parse_decision("I think it belongs in Invoices.", 0.5);
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_missing_folder_is_error() {
        let result = parse_decision(r#"{"confidence": 0.9}"#, 0.5);
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_empty_folder_is_error() {
        let result = parse_decision(r#"{"folder": "   "}"#, 0.5);
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_nested_braces_in_strings() {
        let reply = r#"{"folder": "Inv{oi}ces", "confidence": 0.9}"#;
        let (folder, _) = parse_decision(reply, 0.5).unwrap();
        assert_eq!(folder, "Inv{oi}ces");
    }

    #[test]
    fn test_unbalanced_object_is_error() {
        let result = parse_decision(r#"{"folder": "Invoices""#, 0.5);
        assert!(matches!(result, Err(ProviderError::InvalidResponse(_))));
    }
}
