use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::ResearchError;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)(api[_-]?key"?\s*[:=]\s*"?)([A-Za-z0-9\-_.+/]+)"#)
            .expect("invalid api_key regex"),
        Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        Regex::new(r"(sk-[A-Za-z0-9\-_]{16,})").expect("invalid sk_token regex"),
        Regex::new(r"(tvly-[A-Za-z0-9\-_]{8,})").expect("invalid tvly_token regex"),
    ]
});

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, ResearchError> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretValue(value)),
        _ => Err(ResearchError::MissingSecret(var.to_string())),
    }
}

/// Mask credentials in provider-supplied text before it reaches errors or logs.
pub fn redact(input: &str) -> String {
    let mut output = input.to_string();
    for regex in REDACTION_PATTERNS.iter() {
        output = regex
            .replace_all(&output, |caps: &Captures| {
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_missing() {
        let err = require_env("AUTORESEARCH_TEST_SECRET_MISSING").unwrap_err();
        assert!(matches!(err, ResearchError::MissingSecret(_)));
    }

    #[test]
    fn secret_debug_is_masked() {
        let secret = SecretValue("sk-live".to_string());
        assert_eq!(format!("{secret:?}"), "***redacted***");
        assert_eq!(secret.expose(), "sk-live");
    }

    #[test]
    fn redact_masks_known_token_shapes() {
        let text = r#"{"api_key": "tvly-abcdef123456", "auth": "Bearer abc.def"} sk-0123456789abcdefXYZ"#;
        let cleaned = redact(text);
        assert!(!cleaned.contains("tvly-abcdef123456"));
        assert!(!cleaned.contains("abc.def"));
        assert!(!cleaned.contains("sk-0123456789abcdefXYZ"));
        assert!(cleaned.contains("[REDACTED]"));
    }

    #[test]
    fn redact_leaves_plain_text_alone() {
        assert_eq!(redact("rate limit exceeded"), "rate limit exceeded");
    }
}
