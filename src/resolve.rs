//! Consumer API: strict lookups against one snapshot
//!
//! There is no fallback path. A symbol that was not extracted for a
//! target is a [`NotFoundError`], never a default value.

use crate::manifest::Domain;
use crate::snapshot::{Snapshot, SnapshotId};
use crate::target::Target;
use crate::value::{StructLayout, Value, ValueKind};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Snapshot {0} is not registered")]
    Snapshot(SnapshotId),

    #[error("{domain}/{symbol} has no binding for target {target}")]
    Symbol {
        domain: Domain,
        symbol: String,
        target: Target,
    },

    #[error("{domain}/{symbol}: expected {expected}, found {actual}")]
    KindMismatch {
        domain: Domain,
        symbol: String,
        expected: ValueKind,
        actual: ValueKind,
    },
}

/// Read-only view of a registered snapshot
#[derive(Debug, Clone)]
pub struct Resolver {
    snapshot: Arc<Snapshot>,
}

impl Resolver {
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn resolve(
        &self,
        domain: Domain,
        symbol: &str,
        target: &Target,
    ) -> Result<&Value, NotFoundError> {
        self.snapshot
            .get(domain, symbol, target)
            .ok_or_else(|| NotFoundError::Symbol {
                domain,
                symbol: symbol.to_string(),
                target: target.clone(),
            })
    }

    pub fn resolve_int(&self, domain: Domain, symbol: &str, target: &Target) -> Result<i64, NotFoundError> {
        let value = self.resolve(domain, symbol, target)?;
        value
            .as_integer()
            .ok_or_else(|| mismatch(domain, symbol, ValueKind::Integer, value))
    }

    pub fn resolve_layout(
        &self,
        domain: Domain,
        symbol: &str,
        target: &Target,
    ) -> Result<&StructLayout, NotFoundError> {
        let value = self.resolve(domain, symbol, target)?;
        value
            .as_layout()
            .ok_or_else(|| mismatch(domain, symbol, ValueKind::Layout, value))
    }

    /// Symbols bound for `target` in `domain`, sorted
    pub fn symbols(&self, domain: Domain, target: &Target) -> Vec<&str> {
        self.snapshot.symbols(domain, target)
    }
}

impl From<Snapshot> for Resolver {
    fn from(snapshot: Snapshot) -> Self {
        Self::new(Arc::new(snapshot))
    }
}

fn mismatch(domain: Domain, symbol: &str, expected: ValueKind, value: &Value) -> NotFoundError {
    NotFoundError::KindMismatch {
        domain,
        symbol: symbol.to_string(),
        expected,
        actual: value.kind(),
    }
}
