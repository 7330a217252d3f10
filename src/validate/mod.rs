// Cross-target validation of snapshots
//
// Two snapshots are merged per (domain, symbol, target). A symbol whose
// merged values are not all equal diverges; the variance policy decides
// whether that is a known platform difference. A target whose value
// changed between the snapshots is always unexpected.

mod policy;
mod report;

pub use policy::{VariancePolicy, VarianceRule};
pub use report::{Classification, Divergence, DivergenceError, ValidationReport, ValueGroup};

use crate::snapshot::Snapshot;
use crate::target::Target;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Compare `baseline` and `candidate`, classifying every divergent symbol
///
/// The reported symbol set does not depend on argument order. Passing the
/// same snapshot twice checks it for cross-target differences alone.
pub fn compare(baseline: &Snapshot, candidate: &Snapshot, policy: &VariancePolicy) -> ValidationReport {
    let domains: BTreeSet<_> = baseline.domains().chain(candidate.domains()).collect();
    let mut symbols_compared = 0;
    let mut divergences = Vec::new();

    for domain in domains {
        let tables: Vec<_> = [baseline, candidate]
            .into_iter()
            .filter_map(|snapshot| snapshot.domain_table(domain))
            .collect();
        let symbols: BTreeSet<&str> = tables
            .iter()
            .flat_map(|table| table.keys().map(String::as_str))
            .collect();

        for symbol in symbols {
            symbols_compared += 1;

            let mut per_target: BTreeMap<&Target, Vec<&Value>> = BTreeMap::new();
            for table in &tables {
                for (target, value) in table.get(symbol).into_iter().flatten() {
                    let values = per_target.entry(target).or_default();
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }

            let drift: Vec<Target> = per_target
                .iter()
                .filter(|(_, values)| values.len() > 1)
                .map(|(target, _)| (*target).clone())
                .collect();
            let values = group_values(&per_target);
            if values.len() < 2 {
                continue;
            }

            let classification = if drift.is_empty() && policy.is_expected(domain, symbol) {
                Classification::ExpectedPlatformVariant
            } else {
                Classification::UnexpectedDivergence
            };
            divergences.push(Divergence {
                domain,
                symbol: symbol.to_string(),
                classification,
                values,
                drift,
                reason: policy.reason(domain, symbol).map(str::to_string),
            });
        }
    }

    let report = ValidationReport {
        baseline: baseline.id().clone(),
        candidate: candidate.id().clone(),
        symbols_compared,
        divergences,
    };
    tracing::info!(
        "Compared {} symbols: {} expected variants, {} unexpected",
        report.symbols_compared,
        report.expected().count(),
        report.unexpected().count()
    );
    report
}

/// Check one snapshot for cross-target differences
pub fn check(snapshot: &Snapshot, policy: &VariancePolicy) -> ValidationReport {
    compare(snapshot, snapshot, policy)
}

// Groups are ordered by their first target, then by rendered value, so
// the result is the same whichever snapshot came first.
fn group_values(per_target: &BTreeMap<&Target, Vec<&Value>>) -> Vec<ValueGroup> {
    let mut groups: Vec<ValueGroup> = Vec::new();
    for (target, values) in per_target {
        for value in values {
            match groups.iter_mut().find(|group| group.value == **value) {
                Some(group) => group.targets.push((*target).clone()),
                None => groups.push(ValueGroup {
                    value: (*value).clone(),
                    targets: vec![(*target).clone()],
                }),
            }
        }
    }
    groups.sort_by(|a, b| {
        a.targets[0]
            .cmp(&b.targets[0])
            .then_with(|| a.value.to_string().cmp(&b.value.to_string()))
    });
    groups
}

#[cfg(test)]
mod tests;
