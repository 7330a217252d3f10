use crate::manifest::Domain;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Symbols of one domain that may differ by platform
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VarianceRule {
    pub domain: Domain,

    /// Why these symbols vary (shown in reports)
    #[serde(default)]
    pub reason: Option<String>,

    /// Exact names or `PREFIX*` patterns
    pub symbols: Vec<String>,
}

#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    variance: Vec<VarianceRule>,
}

/// Which cross-target differences are expected
///
/// # Example TOML
/// ```toml
/// [[variance]]
/// domain = "fcntl"
/// reason = "open flags are per-architecture"
/// symbols = ["O_LARGEFILE", "O_DIRECT*"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct VariancePolicy {
    rules: Vec<VarianceRule>,

    /// (domain, exact name) → rule index
    exact: HashMap<(Domain, String), usize>,

    /// (domain, prefix, rule index), longest prefix first
    prefixes: Vec<(Domain, String, usize)>,
}

impl VariancePolicy {
    /// A policy that expects nothing to vary
    pub fn strict() -> Self {
        Self::default()
    }

    /// Load a policy from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read variance policy: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid variance policy: {}", path.as_ref().display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PolicyFile =
            toml::from_str(content).context("Failed to parse TOML variance policy")?;
        Self::from_rules(file.variance)
    }

    /// The policy compiled into the binary
    pub fn default_policy() -> Result<Self> {
        const DEFAULT_TOML: &str = include_str!("../../variance-default.toml");
        Self::from_toml_str(DEFAULT_TOML).context("Failed to parse embedded variance-default.toml")
    }

    pub fn from_rules(rules: Vec<VarianceRule>) -> Result<Self> {
        let mut policy = Self::default();
        for rule in rules {
            policy.add_rule(rule)?;
        }
        Ok(policy)
    }

    /// Allow one more pattern; convenient for building policies in code
    pub fn allow(mut self, domain: Domain, pattern: &str) -> Result<Self> {
        self.add_rule(VarianceRule {
            domain,
            reason: None,
            symbols: vec![pattern.to_string()],
        })?;
        Ok(self)
    }

    fn add_rule(&mut self, rule: VarianceRule) -> Result<()> {
        let index = self.rules.len();
        for pattern in &rule.symbols {
            match pattern.split_once('*') {
                Some((prefix, "")) => {
                    if self
                        .prefixes
                        .iter()
                        .any(|(d, p, _)| *d == rule.domain && p == prefix)
                    {
                        anyhow::bail!("Duplicate pattern '{}' in domain {}", pattern, rule.domain);
                    }
                    self.prefixes.push((rule.domain, prefix.to_string(), index));
                }
                Some(_) => anyhow::bail!(
                    "Invalid pattern '{}' in domain {}: '*' is only allowed at the end",
                    pattern,
                    rule.domain
                ),
                None => {
                    if pattern.is_empty() {
                        anyhow::bail!("Empty symbol name in domain {}", rule.domain);
                    }
                    if self
                        .exact
                        .insert((rule.domain, pattern.clone()), index)
                        .is_some()
                    {
                        anyhow::bail!("Duplicate symbol '{}' in domain {}", pattern, rule.domain);
                    }
                }
            }
        }
        self.prefixes.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        self.rules.push(rule);
        Ok(())
    }

    fn rule_for(&self, domain: Domain, symbol: &str) -> Option<&VarianceRule> {
        let index = self
            .exact
            .get(&(domain, symbol.to_string()))
            .copied()
            .or_else(|| {
                self.prefixes
                    .iter()
                    .find(|(d, prefix, _)| *d == domain && symbol.starts_with(prefix.as_str()))
                    .map(|(_, _, index)| *index)
            })?;
        self.rules.get(index)
    }

    /// Whether `symbol` is allowed to differ between platforms
    pub fn is_expected(&self, domain: Domain, symbol: &str) -> bool {
        self.rule_for(domain, symbol).is_some()
    }

    pub fn reason(&self, domain: Domain, symbol: &str) -> Option<&str> {
        self.rule_for(domain, symbol)?.reason.as_deref()
    }

    pub fn rules(&self) -> &[VarianceRule] {
        &self.rules
    }
}
