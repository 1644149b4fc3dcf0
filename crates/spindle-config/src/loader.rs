//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::ConfigError;
use crate::schema::Config;

/// Environment variable naming a config file for [`ConfigLoader::from_env`].
pub const CONFIG_ENV_VAR: &str = "SPINDLE_CONFIG";

const ENV_VAR_PATTERN: &str = r"\$\{([^}]+)\}";

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let mut config: Config = toml::from_str(&expanded)?;
        if let Some(directory) = config.logging.directory.take() {
            let expanded = Self::expand_path(&directory.to_string_lossy());
            config.logging.directory = Some(PathBuf::from(expanded));
        }
        Ok(config)
    }

    /// Load the file named by `SPINDLE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Config, ConfigError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&Self::expand_path(&path))),
            Err(_) => Ok(Config::default()),
        }
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = Regex::new(ENV_VAR_PATTERN)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.spindle`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EscapePolicy, LogFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
            [driver]
            max_block_ms = 250
            escape_policy = "error"
            queue_capacity = 16

            [logging]
            filter = "spindle_runloop=debug"
            format = "json"
            ansi = false
            file_prefix = "worker"
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.driver.max_block_ms, Some(250));
        assert_eq!(config.driver.escape_policy, EscapePolicy::Error);
        assert_eq!(config.driver.queue_capacity, 16);
        assert_eq!(config.logging.filter, "spindle_runloop=debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(!config.logging.ansi);
        assert_eq!(config.logging.file_prefix, "worker");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[driver]").unwrap();
        writeln!(file, "max_block_ms = 5").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.driver.max_block_ms, Some(5));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/spindle.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("driver = [unclosed");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_unknown_escape_policy_is_rejected() {
        let result = ConfigLoader::load_str("[driver]\nescape_policy = \"panic\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: This test sets a unique test-only env var
        unsafe {
            std::env::set_var("SPINDLE_TEST_FILTER", "debug");
        }
        let config = ConfigLoader::load_str("[logging]\nfilter = \"${SPINDLE_TEST_FILTER}\"").unwrap();
        assert_eq!(config.logging.filter, "debug");
        unsafe {
            std::env::remove_var("SPINDLE_TEST_FILTER");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${NONEXISTENT_SPINDLE_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(name)) if name == "NONEXISTENT_SPINDLE_VAR_12345"));
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let content = "value = \"no variables here\"";
        let expanded = ConfigLoader::expand_env_vars(content).unwrap();
        assert_eq!(expanded, content);
    }

    #[test]
    fn test_log_directory_tilde_is_expanded() {
        let config = ConfigLoader::load_str("[logging]\ndirectory = \"~/spindle-logs\"").unwrap();
        let directory = config.logging.directory.unwrap();
        assert!(!directory.starts_with("~"));
        assert!(directory.ends_with("spindle-logs"));
    }

    #[test]
    fn test_expand_path_no_tilde() {
        let path = "/var/log/spindle";
        assert_eq!(ConfigLoader::expand_path(path), path);
    }
}
