//! API key lookup

use scrapegen_core::{Result, ScrapegenError};
use std::env;

/// Read a provider key from the named environment variable
///
/// Blank values count as missing.
pub fn resolve_api_key(env_var: &str) -> Result<String> {
    match env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => {
            tracing::debug!("Using API key from {}", env_var);
            Ok(key.trim().to_string())
        }
        _ => Err(ScrapegenError::Auth(format!(
            "No API key found. Set {}=... in the environment",
            env_var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_present() {
        env::set_var("SCRAPEGEN_TEST_KEY_PRESENT", " sk-test \n");
        assert_eq!(
            resolve_api_key("SCRAPEGEN_TEST_KEY_PRESENT").unwrap(),
            "sk-test"
        );
    }

    #[test]
    fn test_key_blank_is_missing() {
        env::set_var("SCRAPEGEN_TEST_KEY_BLANK", "   ");
        let err = resolve_api_key("SCRAPEGEN_TEST_KEY_BLANK").unwrap_err();
        assert!(matches!(err, ScrapegenError::Auth(_)));
    }

    #[test]
    fn test_key_absent() {
        env::remove_var("SCRAPEGEN_TEST_KEY_ABSENT");
        let err = resolve_api_key("SCRAPEGEN_TEST_KEY_ABSENT").unwrap_err();
        assert!(err.to_string().contains("SCRAPEGEN_TEST_KEY_ABSENT"));
    }
}
