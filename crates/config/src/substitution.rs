use anyhow::Result;
use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;
use tracing::{debug, warn};

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{(\w+)\}|\$([A-Za-z_]\w*)").expect("env var pattern is valid")
    })
}

/// Substitute environment variables in the format ${VAR_NAME} or $VAR_NAME.
///
/// Unset variables keep their placeholder so that the provider key check can
/// later recognise them as unconfigured.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let mut missing_vars = Vec::new();

    let result = env_var_pattern().replace_all(content, |caps: &Captures| {
        let var_name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                caps[0].to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (left as placeholders): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Get environment variable with a default value
pub fn get_env_or_default(var_name: &str, default: &str) -> String {
    match env::var(var_name) {
        Ok(value) => value,
        Err(_) => {
            debug!(
                "Environment variable '{}' not set, using default: \"{}\"",
                var_name, default
            );
            default.to_string()
        }
    }
}

/// Check if a string contains unresolved environment variable placeholders
pub fn has_unresolved_env_vars(content: &str) -> bool {
    env_var_pattern().is_match(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_set_variable() {
        env::set_var("CHAINSYNC_TEST_KEY", "abc123");
        let out = substitute_env_vars("api_key: \"${CHAINSYNC_TEST_KEY}\"").unwrap();
        assert_eq!(out, "api_key: \"abc123\"");
    }

    #[test]
    fn test_keeps_missing_variable_placeholder() {
        let out = substitute_env_vars("api_key: ${CHAINSYNC_DEFINITELY_UNSET}").unwrap();
        assert_eq!(out, "api_key: ${CHAINSYNC_DEFINITELY_UNSET}");
        assert!(has_unresolved_env_vars(&out));
    }

    #[test]
    fn test_plain_values_are_resolved() {
        assert!(!has_unresolved_env_vars("pk_live_123"));
        assert!(has_unresolved_env_vars("$POLYGON_API_KEY"));
    }
}
