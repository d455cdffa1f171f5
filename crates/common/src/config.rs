//! File and environment configuration loading

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::{debug, warn};

/// Prefix for every environment override
pub const ENV_PREFIX: &str = "SK_";

/// Parse a TOML or JSON configuration file.
///
/// The format follows the extension; unknown extensions try TOML first.
pub async fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&content, path.extension().and_then(|ext| ext.to_str()))?;
    debug!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parse configuration text given the file extension it came from
pub fn parse_config<T: DeserializeOwned>(content: &str, extension: Option<&str>) -> Result<T> {
    match extension.unwrap_or("") {
        "toml" | "" => toml::from_str(content).context("Failed to parse TOML config"),
        "json" => serde_json::from_str(content).context("Failed to parse JSON config"),
        _ => toml::from_str(content)
            .or_else(|_| serde_json::from_str(content))
            .context("Failed to parse config file"),
    }
}

/// Value of `SK_<name>` parsed as `T`.
///
/// Unset variables yield `None`; unparsable ones are logged and ignored.
pub fn env_override<T: FromStr>(name: &str) -> Option<T> {
    let key = format!("{ENV_PREFIX}{name}");
    let raw = env::var(&key).ok()?;
    match raw.parse() {
        Ok(value) => {
            debug!(key = %key, "Applied environment override");
            Some(value)
        }
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

/// Overwrite `target` with `SK_<name>` when it is set and numeric
pub fn env_override_u64(target: &mut u64, name: &str) {
    if let Some(value) = env_override(name) {
        *target = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        timeout_ms: u64,
        name: String,
    }

    #[tokio::test]
    async fn test_load_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("sample.toml");
        std::fs::File::create(&toml_path)
            .unwrap()
            .write_all(b"timeout_ms = 250\nname = \"t\"\n")
            .unwrap();
        let json_path = dir.path().join("sample.json");
        std::fs::write(&json_path, r#"{"timeout_ms": 7, "name": "j"}"#).unwrap();

        let from_toml: Sample = load_config(&toml_path).await.unwrap();
        let from_json: Sample = load_config(&json_path).await.unwrap();
        assert_eq!(from_toml, Sample { timeout_ms: 250, name: "t".into() });
        assert_eq!(from_json.timeout_ms, 7);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result: Result<Sample> = load_config("/nonexistent/sample.toml").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_unknown_extension_falls_back() {
        let parsed: Sample = parse_config(r#"{"timeout_ms": 1, "name": "x"}"#, Some("conf")).unwrap();
        assert_eq!(parsed.timeout_ms, 1);
    }

    #[test]
    fn test_env_override_u64() {
        env::set_var("SK_COMMON_TEST_TIMEOUT", "1500");
        env::set_var("SK_COMMON_TEST_BROKEN", "soon");

        let mut value = 10;
        env_override_u64(&mut value, "COMMON_TEST_TIMEOUT");
        assert_eq!(value, 1500);

        env_override_u64(&mut value, "COMMON_TEST_BROKEN");
        assert_eq!(value, 1500);

        env_override_u64(&mut value, "COMMON_TEST_UNSET");
        assert_eq!(value, 1500);
    }
}
