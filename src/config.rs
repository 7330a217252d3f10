// Project configuration (uapi-registry.toml)
//
// Every field can be overridden on the command line. Relative paths are
// taken relative to the directory holding the config file.

use crate::manifest::{DomainError, Manifest};
use crate::target::{Target, TargetError};
use crate::validate::VariancePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default snapshot store directory
pub const DEFAULT_OUT_DIR: &str = "snapshots";

/// # Example
/// ```
/// use uapi_registry::config::RegistryConfig;
///
/// let config: RegistryConfig = toml::from_str(r#"
///     headers = "headers_install"
///     targets = ["x86_64-unknown-linux-gnu"]
/// "#).unwrap();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.out.to_str(), Some("snapshots"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Root of the per-architecture header trees (`<headers>/<arch>/include`)
    #[serde(default)]
    pub headers: Option<PathBuf>,

    /// Snapshot store directory
    #[serde(default = "default_out")]
    pub out: PathBuf,

    /// Target triples to extract for
    #[serde(default)]
    pub targets: Vec<String>,

    /// Domains to extract; all of them when absent
    #[serde(default)]
    pub domains: Option<Vec<String>>,

    /// Variance policy file; the embedded default when absent
    #[serde(default)]
    pub policy: Option<PathBuf>,
}

fn default_out() -> PathBuf {
    PathBuf::from(DEFAULT_OUT_DIR)
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            headers: None,
            out: default_out(),
            targets: Vec::new(),
            domains: None,
            policy: None,
        }
    }
}

impl RegistryConfig {
    /// Load a config file; relative paths are resolved against its directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: RegistryConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.headers = config.headers.map(|p| base.join(p));
            config.out = base.join(&config.out);
            config.policy = config.policy.map(|p| base.join(p));
        }
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.targets.is_empty() {
            return Err("targets must list at least one target triple".to_string());
        }
        self.parsed_targets().map_err(|e| e.to_string())?;
        if let Some(domains) = &self.domains {
            if domains.is_empty() {
                return Err("domains must not be empty when given".to_string());
            }
            self.manifest().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn parsed_targets(&self) -> Result<Vec<Target>, TargetError> {
        self.targets.iter().map(|t| Target::parse(t)).collect()
    }

    pub fn manifest(&self) -> Result<Manifest, DomainError> {
        match &self.domains {
            Some(names) => Manifest::from_names(names),
            None => Ok(Manifest::default()),
        }
    }

    pub fn variance_policy(&self) -> Result<VariancePolicy> {
        match &self.policy {
            Some(path) => VariancePolicy::from_toml(path),
            None => VariancePolicy::default_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Domain;
    use tempfile::TempDir;

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uapi-registry.toml");
        fs::write(
            &path,
            r#"
headers = "headers_install"
targets = ["x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu"]
domains = ["errno", "fcntl"]
policy = "variance.toml"
"#,
        )
        .unwrap();

        let config = RegistryConfig::load(&path).unwrap();
        assert_eq!(config.headers, Some(dir.path().join("headers_install")));
        assert_eq!(config.out, dir.path().join("snapshots"));
        assert_eq!(config.policy, Some(dir.path().join("variance.toml")));
        assert!(config.validate().is_ok());
        assert_eq!(
            config.manifest().unwrap().domains(),
            &[Domain::Errno, Domain::Fcntl]
        );
        assert_eq!(config.parsed_targets().unwrap().len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RegistryConfig::default();
        assert!(config.validate().unwrap_err().contains("at least one target"));

        let config = RegistryConfig {
            targets: vec!["wasm32-unknown-unknown".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RegistryConfig {
            targets: vec!["x86_64".into()],
            domains: Some(vec!["ioctl".into()]),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("Unknown domain 'ioctl'"));

        let config = RegistryConfig {
            targets: vec!["x86_64".into()],
            domains: Some(Vec::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "target = [\"x86_64\"]\n").unwrap();
        assert!(RegistryConfig::load(&path).is_err());
        assert!(RegistryConfig::load(dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_default_policy_when_unset() {
        let config = RegistryConfig::default();
        let policy = config.variance_policy().unwrap();
        assert!(policy.is_expected(Domain::Fcntl, "O_LARGEFILE"));
    }
}
