//! Claim and reject markers.
//!
//! An agent claims a case by reacting to its control message with 👍 or by
//! replying to it with a message containing 👍. Any Fitzpatrick skin tone
//! modifier and a trailing variation selector are accepted. 👎 is a reject
//! and carries no state change.

use regex::Regex;

fn claim_key_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\x{1F44D}[\x{1F3FB}-\x{1F3FF}]?\x{FE0F}?$").expect("valid regex")
    })
}

fn claim_marker_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x{1F44D}").expect("valid regex"))
}

fn reject_key_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\x{1F44E}[\x{1F3FB}-\x{1F3FF}]?\x{FE0F}?$").expect("valid regex")
    })
}

/// Whether a reaction key is the claim marker.
pub fn is_claim_key(key: &str) -> bool {
    claim_key_re().is_match(key.trim())
}

/// Whether a reply body contains the claim marker anywhere.
pub fn contains_claim_marker(body: &str) -> bool {
    claim_marker_re().is_match(body)
}

/// Whether a reaction key is the reject marker.
pub fn is_reject_key(key: &str) -> bool {
    reject_key_re().is_match(key.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_keys() {
        assert!(is_claim_key("\u{1F44D}"));
        assert!(is_claim_key("\u{1F44D}\u{1F3FD}"));
        assert!(is_claim_key("\u{1F44D}\u{FE0F}"));
        assert!(!is_claim_key("\u{1F44D}\u{1F44D}"));
        assert!(!is_claim_key("\u{1F44E}"));
        assert!(!is_claim_key("ok"));
    }

    #[test]
    fn test_reply_marker() {
        assert!(contains_claim_marker("mine \u{1F44D}\u{1F3FF}"));
        assert!(!contains_claim_marker("not mine"));
    }

    #[test]
    fn test_reject_keys() {
        assert!(is_reject_key("\u{1F44E}"));
        assert!(is_reject_key("\u{1F44E}\u{1F3FB}"));
        assert!(!is_reject_key("\u{1F44D}"));
    }
}
