use std::path::Path;

use crate::config::schema::SyncSettings;
use crate::error::ConfigError;
use crate::paths::expand_tilde;

pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<SyncSettings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    log::debug!("Loaded settings from {}", path.display());
    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<SyncSettings, ConfigError> {
    // An empty settings file means "all defaults".
    if content.trim().is_empty() {
        return Ok(SyncSettings::default());
    }

    let mut settings: SyncSettings = serde_yaml::from_str(content)?;

    if let Some(raw) = settings.kubeconfig_directory.to_str() {
        settings.kubeconfig_directory = expand_tilde(raw);
    }

    validate_settings(&settings)?;

    Ok(settings)
}

fn validate_settings(settings: &SyncSettings) -> Result<(), ConfigError> {
    if settings.quiet_period_ms == 0 {
        return Err(ConfigError::Validation {
            message: "quietPeriodMs must be greater than zero".to_string(),
        });
    }

    if settings.directory_max_file_size == 0 || settings.file_max_file_size == 0 {
        return Err(ConfigError::Validation {
            message: "file size limits must be greater than zero".to_string(),
        });
    }

    if settings.event_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "eventCapacity must be greater than zero".to_string(),
        });
    }

    if settings.kubeconfig_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation {
            message: "kubeconfigDirectory must not be empty".to_string(),
        });
    }

    for pattern in &settings.ignore {
        if let Err(e) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DIRECTORY_MAX_FILE_SIZE, FILE_MAX_FILE_SIZE};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_load_full_settings() {
        let yaml = r#"
kubeconfigDirectory: /var/lib/kubesync/kubeconfigs
quietPeriodMs: 250
directoryMaxFileSize: 1024
fileMaxFileSize: 4096
ignore: ["*.bak"]
eventCapacity: 32
"#;

        let settings = load_settings_from_str(yaml).unwrap();
        assert_eq!(
            settings.kubeconfig_directory,
            PathBuf::from("/var/lib/kubesync/kubeconfigs")
        );
        assert_eq!(settings.quiet_period_ms, 250);
        assert_eq!(settings.max_file_size(true), 1024);
        assert_eq!(settings.max_file_size(false), 4096);
        assert_eq!(settings.ignore, vec!["*.bak".to_string()]);
        assert_eq!(settings.event_capacity, 32);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let settings = load_settings_from_str("quietPeriodMs: 500\n").unwrap();

        assert_eq!(settings.quiet_period_ms, 500);
        assert_eq!(settings.directory_max_file_size, DIRECTORY_MAX_FILE_SIZE);
        assert_eq!(settings.file_max_file_size, FILE_MAX_FILE_SIZE);
        assert!(settings.ignore.contains(&".DS_Store".to_string()));
    }

    #[test]
    fn test_empty_content_is_default() {
        let settings = load_settings_from_str("  \n").unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_zero_quiet_period_rejected() {
        let result = load_settings_from_str("quietPeriodMs: 0\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = load_settings_from_str("directoryMaxFileSize: 0\n");
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_glob_rejected() {
        let result = load_settings_from_str("ignore: [\"[unclosed\"]\n");
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = load_settings_from_str("quietPeriodMs: [not, a, number]\n");
        assert!(matches!(result, Err(ConfigError::ParseYaml(_))));
    }

    #[test]
    fn test_tilde_expanded() {
        let settings = load_settings_from_str("kubeconfigDirectory: ~/kubeconfigs\n").unwrap();
        if let Some(home) = dirs::home_dir() {
            assert_eq!(settings.kubeconfig_directory, home.join("kubeconfigs"));
        }
    }

    #[test]
    fn test_load_settings_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "quietPeriodMs: 42\n").unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.quiet_period_ms, 42);
    }

    #[test]
    fn test_load_settings_missing_file() {
        let result = load_settings("/nonexistent/settings.yaml");
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
