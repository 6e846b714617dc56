//! Service settings: defaults, then an optional JSON file named by
//! `PERIMETER_CONFIG`, then `PERIMETER_*` environment overrides.

use perim_aws::AwsRegion;
use perim_core::{PerimeterError, PerimeterResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "PERIMETER_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Listen address of the HTTP API.
    pub bind: String,
    /// Region used when a request does not name one.
    pub region: String,
    /// Send every AWS call here instead of the regional endpoint.
    pub endpoint_url: Option<String>,
    /// Persist the perimeter flag to this JSON file; in memory when unset.
    pub state_path: Option<PathBuf>,
    pub cli_program: String,
    pub cli_timeout_secs: u64,
    pub log_level: String,
    pub log_json: bool,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            state_path: None,
            cli_program: "aws".to_string(),
            cli_timeout_secs: 30,
            log_level: "info".to_string(),
            log_json: false,
            max_upload_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load from the process environment.
    pub fn load() -> PerimeterResult<Self> {
        let config = std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty());
        Self::from_sources(config.as_deref().map(Path::new), |key| std::env::var(key).ok())
    }

    /// Build settings from an optional file and an environment lookup.
    pub fn from_sources<F>(config_path: Option<&Path>, env: F) -> PerimeterResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_file(path: &Path) -> PerimeterResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PerimeterError::io(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| PerimeterError::parse(format!("invalid settings in {}: {}", path.display(), e)))
    }

    fn apply_env<F>(&mut self, env: F) -> PerimeterResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| env(&format!("PERIMETER_{}", name)).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BIND") {
            self.bind = v;
        }
        if let Some(v) = var("REGION") {
            self.region = v;
        }
        if let Some(v) = var("ENDPOINT_URL") {
            self.endpoint_url = Some(v);
        }
        if let Some(v) = var("STATE_PATH") {
            self.state_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("CLI_PROGRAM") {
            self.cli_program = v;
        }
        if let Some(v) = var("CLI_TIMEOUT_SECS") {
            self.cli_timeout_secs = v
                .trim()
                .parse()
                .map_err(|_| PerimeterError::validation(format!("PERIMETER_CLI_TIMEOUT_SECS is not a number: {}", v)))?;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.log_json = matches!(v.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> PerimeterResult<()> {
        self.bind_addr()?;
        self.default_region()?;
        if self.cli_program.trim().is_empty() {
            return Err(PerimeterError::validation("cli_program must not be empty"));
        }
        if self.cli_timeout_secs == 0 {
            return Err(PerimeterError::validation("cli_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> PerimeterResult<SocketAddr> {
        self.bind
            .parse()
            .map_err(|_| PerimeterError::validation(format!("bind address '{}' is invalid", self.bind)))
    }

    pub fn default_region(&self) -> PerimeterResult<AwsRegion> {
        AwsRegion::parse(&self.region).ok_or_else(|| PerimeterError::invalid_region(&self.region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perim_core::PerimeterErrorKind;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::from_sources(None, env(&[])).unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.bind_addr().unwrap().port(), 5000);
    }

    #[test]
    fn env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"bind":"0.0.0.0:8080","region":"eu-west-1","log_json":true}}"#).unwrap();

        let s = Settings::from_sources(
            Some(file.path()),
            env(&[("PERIMETER_REGION", "us-west-2"), ("PERIMETER_STATE_PATH", "/tmp/flag.json")]),
        )
        .unwrap();
        assert_eq!(s.bind, "0.0.0.0:8080");
        assert_eq!(s.region, "us-west-2");
        assert!(s.log_json);
        assert_eq!(s.state_path, Some(PathBuf::from("/tmp/flag.json")));
        assert_eq!(s.cli_program, "aws");
    }

    #[test]
    fn rejects_miscapitalized_region() {
        let err = Settings::from_sources(None, env(&[("PERIMETER_REGION", "US-East-1")])).unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::InvalidRegion);
    }

    #[test]
    fn rejects_bad_bind_and_timeout() {
        assert!(Settings::from_sources(None, env(&[("PERIMETER_BIND", "localhost")])).is_err());
        assert!(Settings::from_sources(None, env(&[("PERIMETER_CLI_TIMEOUT_SECS", "soon")])).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Settings::from_sources(Some(Path::new("/nonexistent/perimeter.json")), env(&[])).unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Io);
    }
}
