//! Privacy guard: PII redaction and data minimization.
//!
//! Pure string pipeline applied to every message before any content is
//! handed to a provider. Order is fixed: redact, strip control characters,
//! collapse whitespace, truncate. Applying the guard twice yields the same
//! string, which keeps cached and re-sanitized inputs interchangeable.

use crate::orchestrator::types::AttachmentMeta;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum body length in characters after sanitization.
pub const MAX_BODY_CHARS: usize = 2000;

/// Inputs larger than this (bytes, pre-truncation) are rejected outright.
pub const MAX_INPUT_BYTES: usize = 1024 * 1024;

/// Appended when the body was truncated.
pub const ELLIPSIS: char = '\u{2026}';

pub const EMAIL_TOKEN: &str = "<EMAIL_REDACTED>";
pub const PHONE_TOKEN: &str = "<PHONE_REDACTED>";
pub const IP_TOKEN: &str = "<IP_REDACTED>";
pub const CC_TOKEN: &str = "<CC_REDACTED>";

/// How much of a message leaves the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Subject, sender and (sanitized, truncated) body.
    #[default]
    Full,
    /// Subject and sender only; the body never enters the pipeline.
    HeadersOnly,
}

/// Errors from the privacy guard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrivacyError {
    #[error("input of {0} bytes exceeds the 1 MiB sanitization limit")]
    SanitizationOverflow(usize),
}

/// Sanitized view of a classification request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedInput {
    pub subject: String,
    pub sender: String,
    pub body: String,
    /// MIME-category summary only; filenames never survive.
    pub attachment_hints: Vec<String>,
    /// ISO-639-1 code, filled in by the prompt engine (best effort).
    pub detected_language: Option<String>,
}

// Conservative RFC-5322 subset.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

// Card-shaped digit runs, 13-19 digits with optional space/dash grouping.
// Candidates are confirmed with a Luhn check before replacement.
static CC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap());

// E.164 plus common national forms (e.g. 415-555-0123, +1 415 555 0123).
// The leading group is capped at 3 digits so card-shaped 4-4-4-4 runs
// that failed the Luhn check are not swallowed as phone numbers.
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+\d{7,15}\b|\+?\(?\b\d{1,3}\)?[-. ]\d{3,4}[-. ]\d{3,4}(?:[-. ]\d{2,4}){0,1}\b")
        .unwrap()
});

static IPV4_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

// Full 8-group form, or a compressed form containing `::`. Short forms
// like `::1` are left alone so timestamps never get redacted.
static IPV6_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:[0-9A-Fa-f]{1,4}:){7}[0-9A-Fa-f]{1,4}\b|\b(?:[0-9A-Fa-f]{1,4}:){1,6}:(?:[0-9A-Fa-f]{1,4}:){0,5}[0-9A-Fa-f]{1,4}\b",
    )
    .unwrap()
});

static SPACE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static NEWLINE_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Luhn checksum over the digits of a candidate card number.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Stateless PII scrubber. One instance per engine snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrivacyGuard;

impl PrivacyGuard {
    pub fn new() -> Self {
        Self
    }

    /// Sanitize one request in the given analysis mode.
    ///
    /// In headers-only mode the body is dropped before any pattern runs;
    /// only subject and sender pass through redaction. The sender is kept
    /// in both modes: it is the strongest classification signal and is
    /// already user-visible in the client.
    pub fn sanitize(
        &self,
        subject: &str,
        sender: &str,
        body: &str,
        attachments: &[AttachmentMeta],
        mode: AnalysisMode,
    ) -> Result<SanitizedInput, PrivacyError> {
        for field in [subject, sender, body] {
            if field.len() > MAX_INPUT_BYTES {
                return Err(PrivacyError::SanitizationOverflow(field.len()));
            }
        }

        let body = match mode {
            AnalysisMode::Full => self.sanitize_body(body),
            AnalysisMode::HeadersOnly => String::new(),
        };

        Ok(SanitizedInput {
            subject: self.sanitize_text(subject),
            sender: self.sanitize_text(sender),
            body,
            attachment_hints: attachment_hints(attachments),
            detected_language: None,
        })
    }

    /// Redact, strip and collapse without truncation (subject, sender).
    ///
    /// The pass runs to a fixpoint: stripping a control character or
    /// replacing one span can expose text that now matches a pattern
    /// (e.g. an address smuggled around an embedded NUL). Every
    /// replacement consumes an `@` or a digit run, so the loop is
    /// bounded; the cap is a backstop.
    pub fn sanitize_text(&self, text: &str) -> String {
        let mut current = text.to_string();
        for _ in 0..5 {
            let next = sanitize_pass(&current);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    /// Full pipeline for the body, including the character-count cap.
    pub fn sanitize_body(&self, body: &str) -> String {
        let clean = self.sanitize_text(body);
        if clean.chars().count() > MAX_BODY_CHARS {
            let mut truncated: String = clean.chars().take(MAX_BODY_CHARS).collect();
            truncated.push(ELLIPSIS);
            truncated
        } else {
            clean
        }
    }
}

/// One pipeline pass: redact, strip control characters, collapse
/// whitespace runs.
fn sanitize_pass(text: &str) -> String {
    let redacted = redact(text);
    let stripped: String = redacted
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let collapsed = SPACE_RUN_RE.replace_all(&stripped, " ");
    NEWLINE_RUN_RE.replace_all(&collapsed, "\n\n").into_owned()
}

/// Apply the redaction patterns in the fixed order: email, card (with
/// Luhn confirmation), phone, IP.
fn redact(text: &str) -> String {
    let text = EMAIL_RE.replace_all(text, EMAIL_TOKEN);
    let text = CC_RE.replace_all(&text, |caps: &regex::Captures| {
        let candidate = &caps[0];
        if luhn_valid(candidate) {
            Cow::Borrowed(CC_TOKEN)
        } else {
            Cow::Owned(candidate.to_string())
        }
    });
    let text = PHONE_RE.replace_all(&text, PHONE_TOKEN);
    let text = IPV4_RE.replace_all(&text, IP_TOKEN);
    IPV6_RE.replace_all(&text, IP_TOKEN).into_owned()
}

/// Summarize attachments as MIME-category counts, e.g. `["2 documents",
/// "1 image"]`. Filenames may themselves contain PII and are dropped.
pub fn attachment_hints(attachments: &[AttachmentMeta]) -> Vec<String> {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for attachment in attachments {
        *counts.entry(mime_category(&attachment.mime_type)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(category, count)| {
            if count == 1 {
                format!("1 {}", category)
            } else {
                format!("{} {}s", count, category)
            }
        })
        .collect()
}

fn mime_category(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.starts_with("image/") {
        "image"
    } else if mime.starts_with("audio/") || mime.starts_with("video/") {
        "media"
    } else if mime.contains("spreadsheet") || mime.contains("excel") || mime.ends_with("csv") {
        "spreadsheet"
    } else if mime.contains("zip")
        || mime.contains("compressed")
        || mime.contains("x-tar")
        || mime.contains("x-7z")
    {
        "archive"
    } else if mime.starts_with("text/")
        || mime.contains("pdf")
        || mime.contains("msword")
        || mime.contains("wordprocessing")
        || mime.contains("opendocument.text")
    {
        "document"
    } else if mime == "message/rfc822" {
        "message"
    } else {
        "other"
    }
}
