//! Redaction of secret-looking values in diagnostics.
//!
//! Error messages carry a snapshot of the value context, and HTTP command logs
//! carry response bodies. Both pass through [`redact_sensitive`] first.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replacement token for redacted values.
pub const REDACTED: &str = "[REDACTED]";

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization:\s*(?:bearer\s+|basic\s+)?)([^\s,]+)",
        r"(?i)\b([A-Z0-9_]*(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s,]+)",
        r#"(?i)("[a-z0-9_]*(?:token|secret|password|apikey|api_key)"\s*:\s*")([^"]*)"#,
        r"(?i)\b((?:token|secret|password)\s*:\s*)([^\s,]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string, keeping the key names.
///
/// ```rust
/// use castor_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("API_KEY=abc123 TOKEN=xyz789"), "API_KEY=[REDACTED] TOKEN=[REDACTED]");
/// assert_eq!(redact_sensitive("Authorization: Bearer secret123"), "Authorization: Bearer [REDACTED]");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}{}", prefix, REDACTED)
            })
            .to_string();
    }
    redacted
}
