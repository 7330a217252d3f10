// Tests for snapshot comparison and variance policies

use super::*;
use crate::manifest::Domain;
use crate::snapshot::{SnapshotBuilder, SnapshotId};
use crate::value::{FieldLayout, StructLayout};
use std::io::Write;
use tempfile::NamedTempFile;

fn t(triple: &str) -> Target {
    Target::parse(triple).unwrap()
}

fn snapshot(id: &str, bindings: &[(Domain, &str, &str, i64)]) -> Snapshot {
    let mut builder = SnapshotBuilder::new();
    for (domain, symbol, target, value) in bindings {
        builder
            .insert(*domain, symbol, &t(target), Value::Integer(*value))
            .unwrap();
    }
    builder.with_id(SnapshotId::new(id).unwrap()).build().unwrap()
}

fn fcntl_snapshot(id: &str) -> Snapshot {
    snapshot(
        id,
        &[
            (Domain::Fcntl, "O_LARGEFILE", "x86_64", 0o100000),
            (Domain::Fcntl, "O_LARGEFILE", "aarch64", 0o400000),
            (Domain::Fcntl, "O_CREAT", "x86_64", 0o100),
            (Domain::Fcntl, "O_CREAT", "aarch64", 0o100),
            (Domain::Errno, "EINTR", "x86_64", 4),
            (Domain::Errno, "EINTR", "aarch64", 4),
        ],
    )
}

#[test]
fn test_whitelisted_variant_is_expected() {
    let snap = fcntl_snapshot("a");
    let policy = VariancePolicy::strict()
        .allow(Domain::Fcntl, "O_LARGEFILE")
        .unwrap();
    let report = check(&snap, &policy);

    assert_eq!(report.symbols_compared, 3);
    assert_eq!(report.divergences.len(), 1);
    let d = &report.divergences[0];
    assert_eq!(d.symbol, "O_LARGEFILE");
    assert_eq!(d.classification, Classification::ExpectedPlatformVariant);
    assert!(d.drift.is_empty());
    assert_eq!(d.values.len(), 2);
    assert_eq!(d.values[0].targets, vec![t("aarch64")]);
    assert_eq!(d.values[0].value, Value::Integer(0o400000));
    assert!(!report.has_unexpected());
    assert!(report.into_result().is_ok());
}

#[test]
fn test_unlisted_variant_is_unexpected() {
    let snap = fcntl_snapshot("a");
    let report = check(&snap, &VariancePolicy::strict());

    assert_eq!(report.divergences.len(), 1);
    assert_eq!(
        report.divergences[0].classification,
        Classification::UnexpectedDivergence
    );
    let err = report.into_result().unwrap_err();
    assert_eq!(err.divergences.len(), 1);
    assert_eq!(
        err.to_string(),
        "1 unexpected divergence(s): fcntl/O_LARGEFILE"
    );
}

#[test]
fn test_drift_between_snapshots_is_always_unexpected() {
    let a = fcntl_snapshot("a");
    let b = snapshot(
        "b",
        &[
            (Domain::Fcntl, "O_LARGEFILE", "x86_64", 0o100000),
            (Domain::Fcntl, "O_LARGEFILE", "aarch64", 0o200000),
            (Domain::Errno, "EINTR", "x86_64", 4),
            (Domain::Errno, "EINTR", "aarch64", 5),
        ],
    );
    let policy = VariancePolicy::strict()
        .allow(Domain::Fcntl, "O_*")
        .unwrap();
    let report = compare(&a, &b, &policy);

    let largefile = report
        .divergences
        .iter()
        .find(|d| d.symbol == "O_LARGEFILE")
        .unwrap();
    assert_eq!(largefile.classification, Classification::UnexpectedDivergence);
    assert_eq!(largefile.drift, vec![t("aarch64")]);
    assert_eq!(largefile.values.len(), 3);

    let eintr = report
        .divergences
        .iter()
        .find(|d| d.symbol == "EINTR")
        .unwrap();
    assert_eq!(eintr.drift, vec![t("aarch64")]);

    // Aggregated, not fail-fast
    assert_eq!(report.into_result().unwrap_err().divergences.len(), 2);
}

#[test]
fn test_missing_on_some_targets_is_not_divergence() {
    let a = snapshot("a", &[(Domain::Fcntl, "F_GETLK64", "i686", 12)]);
    let b = snapshot("b", &[(Domain::Fcntl, "F_GETLK", "x86_64", 5)]);
    let report = compare(&a, &b, &VariancePolicy::strict());
    assert_eq!(report.symbols_compared, 2);
    assert!(report.divergences.is_empty());
}

#[test]
fn test_compare_is_symmetric() {
    let a = fcntl_snapshot("a");
    let b = snapshot(
        "b",
        &[
            (Domain::Fcntl, "O_CREAT", "x86_64", 0o100),
            (Domain::Fcntl, "O_CREAT", "mips", 0o400),
            (Domain::Errno, "EINTR", "aarch64", 5),
        ],
    );
    let policy = VariancePolicy::default_policy().unwrap();
    let ab = compare(&a, &b, &policy);
    let ba = compare(&b, &a, &policy);
    assert_eq!(ab.symbols(), ba.symbols());
    assert_eq!(ab.divergences, ba.divergences);
    assert_eq!(ab.symbols_compared, ba.symbols_compared);
}

#[test]
fn test_layout_divergence() {
    let layout = |size: u64, align: u64| {
        Value::Layout(StructLayout {
            size,
            align,
            fields: vec![FieldLayout {
                name: "tv_sec".into(),
                offset: 0,
                size: size / 2,
            }],
        })
    };
    let mut builder = SnapshotBuilder::new();
    builder
        .insert(Domain::Time, "struct timespec", &t("x86_64"), layout(16, 8))
        .unwrap();
    builder
        .insert(Domain::Time, "struct timespec", &t("i686"), layout(8, 4))
        .unwrap();
    builder
        .insert(Domain::Time, "struct timezone", &t("x86_64"), layout(8, 4))
        .unwrap();
    builder
        .insert(Domain::Time, "struct timezone", &t("i686"), layout(8, 4))
        .unwrap();
    let snap = builder.build().unwrap();

    let report = check(&snap, &VariancePolicy::default_policy().unwrap());
    assert_eq!(report.divergences.len(), 1);
    let d = &report.divergences[0];
    assert_eq!(d.symbol, "struct timespec");
    assert_eq!(d.classification, Classification::ExpectedPlatformVariant);
    assert_eq!(
        d.reason.as_deref(),
        Some("layouts built from C long follow the data model")
    );
}

#[test]
fn test_report_string() {
    let snap = fcntl_snapshot("linux-6.9");
    let report = check(&snap, &VariancePolicy::strict());
    let text = report.to_report_string();
    assert!(text.starts_with("❌ 1 UNEXPECTED DIVERGENCE(S)"));
    assert!(text.contains("Snapshot: linux-6.9"));
    assert!(text.contains("Symbols compared: 3"));
    assert!(text.contains("  - fcntl/O_LARGEFILE: 131072 [aarch64]; 32768 [x86_64]"));

    let policy = VariancePolicy::default_policy().unwrap();
    let text = check(&snap, &policy).to_report_string();
    assert!(text.starts_with("✅ NO UNEXPECTED DIVERGENCES"));
    assert!(text.contains("📊 Expected platform variants (1):"));
}

#[test]
fn test_report_json() {
    let report = check(&fcntl_snapshot("a"), &VariancePolicy::strict());
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["baseline"], "a");
    assert_eq!(
        json["divergences"][0]["classification"],
        "unexpected-divergence"
    );
    assert_eq!(json["divergences"][0]["values"][1]["targets"][0], "x86_64");
    assert!(json["divergences"][0].get("drift").is_none());
}

#[test]
fn test_default_policy_loads() {
    let policy = VariancePolicy::default_policy().expect("embedded policy");
    assert!(policy.is_expected(Domain::Fcntl, "O_LARGEFILE"));
    assert!(policy.is_expected(Domain::Fcntl, "F_GETLK64"));
    assert!(policy.is_expected(Domain::Signal, "SIGPOLL"));
    assert!(!policy.is_expected(Domain::Signal, "O_LARGEFILE"));
    assert!(!policy.is_expected(Domain::In, "INADDR_ANY"));
}

#[test]
fn test_policy_from_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[[variance]]
domain = "socket"
reason = "renumbered on mips"
symbols = ["SO_*", "SOL_SOCKET"]

[[variance]]
domain = "socket"
symbols = ["SO_RCVTIMEO_NEW"]
"#
    )
    .unwrap();

    let policy = VariancePolicy::from_toml(file.path()).unwrap();
    assert_eq!(policy.rules().len(), 2);
    assert!(policy.is_expected(Domain::Socket, "SOL_SOCKET"));
    assert!(!policy.is_expected(Domain::Socket, "SOL_IP"));
    // Exact names win over prefixes
    assert_eq!(policy.reason(Domain::Socket, "SO_RCVTIMEO_NEW"), None);
    assert_eq!(
        policy.reason(Domain::Socket, "SO_REUSEADDR"),
        Some("renumbered on mips")
    );
}

#[test]
fn test_policy_rejects_bad_input() {
    let duplicate = r#"
[[variance]]
domain = "errno"
symbols = ["EAGAIN", "EAGAIN"]
"#;
    let err = VariancePolicy::from_toml_str(duplicate).unwrap_err();
    assert!(err.to_string().contains("Duplicate symbol 'EAGAIN'"));

    let misplaced = r#"
[[variance]]
domain = "errno"
symbols = ["E*AGAIN"]
"#;
    assert!(VariancePolicy::from_toml_str(misplaced).is_err());

    let unknown_domain = r#"
[[variance]]
domain = "ioctl"
symbols = ["FIONREAD"]
"#;
    assert!(VariancePolicy::from_toml_str(unknown_domain).is_err());

    assert!(VariancePolicy::from_toml("/nonexistent/variance.toml").is_err());
}
