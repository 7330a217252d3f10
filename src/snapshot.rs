//! Immutable, versioned binding snapshots
//!
//! A snapshot is the output of one extraction run: every
//! (domain, symbol, target) → value binding it produced, under a format
//! tag and an id. Maps are ordered throughout, so the JSON form is
//! canonical: serializing, parsing and serializing again yields the same
//! bytes, and identical runs produce identical content ids.

use crate::extract::Extraction;
use crate::manifest::Domain;
use crate::registry::RegistryError;
use crate::target::Target;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Format tag written into every snapshot
pub const SNAPSHOT_FORMAT: &str = "uapi-registry-snapshot-v1";

/// symbol → target → value
pub type DomainTable = BTreeMap<String, BTreeMap<Target, Value>>;

/// Snapshot identifier, safe to use as a file stem
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Result<Self, RegistryError> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= 128
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(id))
        } else {
            Err(RegistryError::InvalidId(id))
        }
    }

    /// Content id: hex of the first 16 bytes of SHA-256 over `bytes`
    fn from_content(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SnapshotId {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SnapshotId> for String {
    fn from(id: SnapshotId) -> Self {
        id.0
    }
}

/// One extraction run's bindings; never mutated once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    format: String,
    id: SnapshotId,
    /// Crate name and version that produced the snapshot
    generator: String,
    bindings: BTreeMap<Domain, DomainTable>,
}

impl Snapshot {
    pub fn id(&self) -> &SnapshotId {
        &self.id
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn get(&self, domain: Domain, symbol: &str, target: &Target) -> Option<&Value> {
        self.bindings.get(&domain)?.get(symbol)?.get(target)
    }

    /// Whether the symbol is bound for any target in this domain
    pub fn has_symbol(&self, domain: Domain, symbol: &str) -> bool {
        self.bindings
            .get(&domain)
            .is_some_and(|table| table.contains_key(symbol))
    }

    pub fn domain_table(&self, domain: Domain) -> Option<&DomainTable> {
        self.bindings.get(&domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.bindings.keys().copied()
    }

    /// Every target that has at least one binding
    pub fn targets(&self) -> BTreeSet<&Target> {
        self.bindings
            .values()
            .flat_map(|table| table.values())
            .flat_map(|per_target| per_target.keys())
            .collect()
    }

    /// Symbols bound for `target` in `domain`, sorted
    pub fn symbols(&self, domain: Domain, target: &Target) -> Vec<&str> {
        self.bindings
            .get(&domain)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, per_target)| per_target.contains_key(target))
                    .map(|(symbol, _)| symbol.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Flattened (domain, symbol, target, value) bindings in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (Domain, &str, &Target, &Value)> {
        self.bindings.iter().flat_map(|(domain, table)| {
            table.iter().flat_map(move |(symbol, per_target)| {
                per_target
                    .iter()
                    .map(move |(target, value)| (*domain, symbol.as_str(), target, value))
            })
        })
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings
            .values()
            .flat_map(|table| table.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot, rejecting unknown format tags
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.format != SNAPSHOT_FORMAT {
            return Err(RegistryError::UnsupportedFormat(snapshot.format));
        }
        Ok(snapshot)
    }
}

/// Accumulates bindings, then freezes them into a [`Snapshot`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    id: Option<SnapshotId>,
    bindings: BTreeMap<Domain, DomainTable>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen id instead of the content id
    pub fn with_id(mut self, id: SnapshotId) -> Self {
        self.id = Some(id);
        self
    }

    /// Add one binding
    ///
    /// Re-inserting an identical value is a no-op; a different value for
    /// the same (domain, symbol, target) is a `DuplicateBinding` error.
    pub fn insert(
        &mut self,
        domain: Domain,
        symbol: &str,
        target: &Target,
        value: Value,
    ) -> Result<(), RegistryError> {
        let per_target = self
            .bindings
            .entry(domain)
            .or_default()
            .entry(symbol.to_string())
            .or_default();
        match per_target.get(target) {
            Some(existing) if *existing == value => Ok(()),
            Some(existing) => Err(RegistryError::DuplicateBinding {
                domain,
                symbol: symbol.to_string(),
                target: target.clone(),
                existing: existing.to_string(),
                new: value.to_string(),
            }),
            None => {
                per_target.insert(target.clone(), value);
                Ok(())
            }
        }
    }

    /// Builder holding every binding of the given extractions
    pub fn from_extractions<'a, I>(extractions: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'a Extraction>,
    {
        let mut builder = Self::new();
        for extraction in extractions {
            builder.add_extraction(extraction)?;
        }
        Ok(builder)
    }

    pub fn add_extraction(&mut self, extraction: &Extraction) -> Result<(), RegistryError> {
        for (symbol, value) in &extraction.bindings {
            self.insert(extraction.domain, symbol, &extraction.target, value.clone())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings
            .values()
            .flat_map(|table| table.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(self) -> Result<Snapshot, RegistryError> {
        let id = match self.id {
            Some(id) => id,
            None => SnapshotId::from_content(&serde_json::to_vec(&self.bindings)?),
        };
        Ok(Snapshot {
            format: SNAPSHOT_FORMAT.to_string(),
            id,
            generator: concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION")).to_string(),
            bindings: self.bindings,
        })
    }
}
