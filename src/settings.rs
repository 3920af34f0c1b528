use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub probe: Probe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Probe {
    /// Directory scanned for `.kdl` handler policies. Default: policies
    pub policies_dir: PathBuf,
    /// Derive each handler descriptor once and reuse it
    #[serde(default = "default_cache_descriptors")]
    pub cache_descriptors: bool,
}

fn default_cache_descriptors() -> bool {
    true
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            policies_dir: PathBuf::from("policies"),
            cache_descriptors: default_cache_descriptors(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default(
                "probe.policies_dir",
                Probe::default().policies_dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?
            .set_default("probe.cache_descriptors", default_cache_descriptors())
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: ACTIONGATE__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("ACTIONGATE").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        if s.probe.policies_dir.is_relative() {
            s.probe.policies_dir = std::env::current_dir()
                .into_diagnostic()?
                .join(&s.probe.policies_dir);
        }

        Ok(s)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_settings_load_defaults() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nonexistent.toml");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.port, 8090);
        assert!(settings.probe.cache_descriptors);
        assert!(settings.probe.policies_dir.is_absolute());
    }

    #[test]
    fn test_settings_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
port = 9191

[probe]
policies_dir = "/etc/actiongate/policies"
cache_descriptors = false
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.port, 9191);
        assert_eq!(
            settings.probe.policies_dir,
            PathBuf::from("/etc/actiongate/policies")
        );
        assert!(!settings.probe.cache_descriptors);
    }

    #[test]
    fn test_settings_env_override() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");

        let config_content = r#"
[server]
host = "127.0.0.1"
"#;
        fs::write(&config_path, config_content).expect("Failed to write config");

        env::set_var("ACTIONGATE__SERVER__HOST", "192.168.1.1");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert_eq!(settings.server.host, "192.168.1.1");

        env::remove_var("ACTIONGATE__SERVER__HOST");
    }

    #[test]
    fn test_relative_policies_dir_is_normalized() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("test_config.toml");
        fs::write(&config_path, "[probe]\npolicies_dir = \"relative/policies\"\n")
            .expect("Failed to write config");

        let settings = Settings::load(config_path.to_str().unwrap())
            .expect("Failed to load settings");

        assert!(settings.probe.policies_dir.is_absolute());
        assert!(settings.probe.policies_dir.ends_with("relative/policies"));
    }

    #[test]
    fn test_bind_addr() {
        let mut settings = Settings::default();
        settings.server.host = "localhost".to_string();
        assert_eq!(settings.bind_addr(), "localhost:8090");
    }
}
