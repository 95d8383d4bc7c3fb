//! Authentication for the reasoning API
//!
//! The key is read from the environment variable named in
//! `[models].api_key_env`, falling back to `ANTHROPIC_API_KEY`.

use arbor_core::{ArborError, Result};
use std::env;

const FALLBACK_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Resolve the API key from `key_env`, then from `ANTHROPIC_API_KEY`
pub fn get_auth_token(key_env: &str) -> Result<String> {
    for var in [key_env, FALLBACK_KEY_ENV] {
        match env::var(var) {
            Ok(value) if !value.trim().is_empty() => {
                tracing::debug!(env = var, "Using API key from environment");
                return Ok(value.trim().to_string());
            }
            _ => continue,
        }
    }

    Err(ArborError::Auth(format!(
        "No API key found. Set {} (or {}) to an Anthropic API key.",
        key_env, FALLBACK_KEY_ENV
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_custom_env_wins() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ARBOR_TEST_KEY", "sk-custom");
        env::set_var(FALLBACK_KEY_ENV, "sk-fallback");

        assert_eq!(get_auth_token("ARBOR_TEST_KEY").unwrap(), "sk-custom");

        env::remove_var("ARBOR_TEST_KEY");
        env::remove_var(FALLBACK_KEY_ENV);
    }

    #[test]
    fn test_falls_back_and_ignores_blank() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("ARBOR_TEST_KEY_BLANK", "   ");
        env::set_var(FALLBACK_KEY_ENV, "sk-fallback");

        assert_eq!(get_auth_token("ARBOR_TEST_KEY_BLANK").unwrap(), "sk-fallback");

        env::remove_var("ARBOR_TEST_KEY_BLANK");
        env::remove_var(FALLBACK_KEY_ENV);
    }

    #[test]
    fn test_missing_key_errors() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("ARBOR_TEST_KEY_MISSING");
        env::remove_var(FALLBACK_KEY_ENV);

        let err = get_auth_token("ARBOR_TEST_KEY_MISSING").unwrap_err();
        assert!(matches!(err, ArborError::Auth(_)));
    }
}
