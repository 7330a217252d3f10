use crate::manifest::Domain;
use crate::snapshot::SnapshotId;
use crate::target::Target;
use crate::value::Value;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    /// Allowed by the variance policy
    ExpectedPlatformVariant,
    UnexpectedDivergence,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::ExpectedPlatformVariant => write!(f, "expected-platform-variant"),
            Classification::UnexpectedDivergence => write!(f, "unexpected-divergence"),
        }
    }
}

/// One distinct value and the targets carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueGroup {
    pub value: Value,
    pub targets: Vec<Target>,
}

/// A symbol with more than one distinct value across targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Divergence {
    pub domain: Domain,
    pub symbol: String,
    pub classification: Classification,
    pub values: Vec<ValueGroup>,

    /// Targets whose value changed between the two snapshots
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<Target>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Divergence {
    pub fn is_unexpected(&self) -> bool {
        self.classification == Classification::UnexpectedDivergence
    }

    fn summary_line(&self) -> String {
        let values: Vec<String> = self
            .values
            .iter()
            .map(|group| {
                let targets: Vec<&str> = group.targets.iter().map(Target::triple).collect();
                format!("{} [{}]", group.value, targets.join(", "))
            })
            .collect();
        format!("{}/{}: {}", self.domain, self.symbol, values.join("; "))
    }
}

/// Outcome of comparing two snapshots
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub baseline: SnapshotId,
    pub candidate: SnapshotId,

    /// Distinct (domain, symbol) pairs seen in either snapshot
    pub symbols_compared: usize,

    pub divergences: Vec<Divergence>,
}

impl ValidationReport {
    pub fn expected(&self) -> impl Iterator<Item = &Divergence> {
        self.divergences.iter().filter(|d| !d.is_unexpected())
    }

    pub fn unexpected(&self) -> impl Iterator<Item = &Divergence> {
        self.divergences.iter().filter(|d| d.is_unexpected())
    }

    pub fn has_unexpected(&self) -> bool {
        self.unexpected().next().is_some()
    }

    /// (domain, symbol) of every divergence
    pub fn symbols(&self) -> BTreeSet<(Domain, &str)> {
        self.divergences
            .iter()
            .map(|d| (d.domain, d.symbol.as_str()))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Fail with every unexpected divergence at once
    pub fn into_result(self) -> Result<Self, DivergenceError> {
        let unexpected: Vec<Divergence> = self.unexpected().cloned().collect();
        if unexpected.is_empty() {
            Ok(self)
        } else {
            Err(DivergenceError {
                divergences: unexpected,
            })
        }
    }

    /// Human-readable report
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        let unexpected: Vec<&Divergence> = self.unexpected().collect();
        let expected: Vec<&Divergence> = self.expected().collect();

        if unexpected.is_empty() {
            report.push_str("✅ NO UNEXPECTED DIVERGENCES\n");
        } else {
            report.push_str(&format!(
                "❌ {} UNEXPECTED DIVERGENCE(S)\n",
                unexpected.len()
            ));
        }

        if self.baseline == self.candidate {
            report.push_str(&format!("Snapshot: {}\n", self.baseline));
        } else {
            report.push_str(&format!(
                "Snapshots: {} vs {}\n",
                self.baseline, self.candidate
            ));
        }
        report.push_str(&format!("Symbols compared: {}\n", self.symbols_compared));

        if !unexpected.is_empty() {
            report.push_str("\n❌ Unexpected divergences:\n");
            for divergence in &unexpected {
                report.push_str(&format!("  - {}\n", divergence.summary_line()));
                if !divergence.drift.is_empty() {
                    let targets: Vec<&str> =
                        divergence.drift.iter().map(Target::triple).collect();
                    report.push_str(&format!(
                        "    ⚠️  changed between snapshots on {}\n",
                        targets.join(", ")
                    ));
                }
            }
        }

        if !expected.is_empty() {
            report.push_str(&format!(
                "\n📊 Expected platform variants ({}):\n",
                expected.len()
            ));
            for divergence in &expected {
                report.push_str(&format!("  - {}\n", divergence.summary_line()));
            }
        }

        report
    }
}

/// Every unexpected divergence of a comparison
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} unexpected divergence(s): {}", .divergences.len(), symbol_list(.divergences))]
pub struct DivergenceError {
    pub divergences: Vec<Divergence>,
}

fn symbol_list(divergences: &[Divergence]) -> String {
    divergences
        .iter()
        .map(|d| format!("{}/{}", d.domain, d.symbol))
        .collect::<Vec<_>>()
        .join(", ")
}
