//! Property tests for the privacy guard: redaction coverage, idempotence
//! and the truncation boundary.

use mailwarden::privacy::{AnalysisMode, PrivacyGuard, ELLIPSIS, MAX_BODY_CHARS};
use proptest::prelude::*;

fn guard() -> PrivacyGuard {
    PrivacyGuard::new()
}

/// Plain text fragments that must never trip the redactors.
fn benign_text() -> impl Strategy<Value = String> {
    "[a-zA-Z ,.!?]{0,80}"
}

fn email_address() -> impl Strategy<Value = String> {
    ("[a-z]{1,12}", "[a-z]{1,10}", "[a-z]{2,6}")
        .prop_map(|(user, domain, tld)| format!("{}@{}.{}", user, domain, tld))
}

fn phone_number() -> impl Strategy<Value = String> {
    (100u32..999, 100u32..999, 1000u32..9999)
        .prop_map(|(a, b, c)| format!("{}-{}-{}", a, b, c))
}

fn ipv4_literal() -> impl Strategy<Value = String> {
    (1u8..255, 0u8..255, 0u8..255, 1u8..255)
        .prop_map(|(a, b, c, d)| format!("{}.{}.{}.{}", a, b, c, d))
}

proptest! {
    #[test]
    fn no_email_survives_sanitization(
        prefix in benign_text(),
        email in email_address(),
        suffix in benign_text(),
    ) {
        let input = format!("{} {} {}", prefix, email, suffix);
        let output = guard().sanitize_body(&input);
        prop_assert!(!output.contains('@'), "email survived: {}", output);
    }

    #[test]
    fn no_phone_survives_sanitization(
        prefix in benign_text(),
        phone in phone_number(),
        suffix in benign_text(),
    ) {
        let input = format!("{} {} {}", prefix, phone, suffix);
        let output = guard().sanitize_body(&input);
        prop_assert!(!output.contains(&phone), "phone survived: {}", output);
    }

    #[test]
    fn no_ipv4_survives_sanitization(
        prefix in benign_text(),
        ip in ipv4_literal(),
        suffix in benign_text(),
    ) {
        let input = format!("{} {} {}", prefix, ip, suffix);
        let output = guard().sanitize_body(&input);
        prop_assert!(!output.contains(&ip), "ip survived: {}", output);
    }

    #[test]
    fn sanitization_is_idempotent(input in ".{0,500}") {
        let once = guard().sanitize_body(&input);
        let twice = guard().sanitize_body(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_text_is_idempotent(input in ".{0,300}") {
        let once = guard().sanitize_text(&input);
        let twice = guard().sanitize_text(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn body_never_exceeds_limit_plus_ellipsis(input in ".{0,4000}") {
        let output = guard().sanitize_body(&input);
        prop_assert!(output.chars().count() <= MAX_BODY_CHARS + 1);
    }

    #[test]
    fn headers_only_always_empties_body(body in ".{0,500}") {
        let sanitized = guard()
            .sanitize("subject", "sender@example.com", &body, &[], AnalysisMode::HeadersOnly)
            .unwrap();
        prop_assert_eq!(sanitized.body, "");
    }

    #[test]
    fn output_has_no_control_chars(input in ".{0,500}") {
        let output = guard().sanitize_body(&input);
        prop_assert!(output
            .chars()
            .all(|c| !c.is_control() || c == '\n' || c == '\t'));
    }
}

#[test]
fn body_at_exactly_2000_chars_is_untouched() {
    let body = "word ".repeat(400); // 2000 chars
    assert_eq!(body.chars().count(), 2000);
    let output = guard().sanitize_body(body.trim_end());
    assert!(!output.ends_with(ELLIPSIS));
}

#[test]
fn body_at_2001_chars_gets_ellipsis() {
    let body = "a".repeat(2001);
    let output = guard().sanitize_body(&body);
    assert_eq!(output.chars().count(), 2001);
    assert!(output.ends_with(ELLIPSIS));
    assert_eq!(output.chars().filter(|c| *c == ELLIPSIS).count(), 1);
}
