//! End-to-end tests: fixture header trees → snapshot → registry → resolve/validate
//!
//! The fixture tree under tests/fixtures/headers mirrors
//! `make headers_install` output for x86 and arm64, trimmed to the
//! errno, fcntl and time domains.

use std::path::PathBuf;
use tempfile::TempDir;
use uapi_registry::extract::{extract_all, ExtractionError, HeaderTree};
use uapi_registry::manifest::{Domain, Manifest};
use uapi_registry::registry::{Registry, SnapshotStore};
use uapi_registry::resolve::NotFoundError;
use uapi_registry::snapshot::{SnapshotBuilder, SnapshotId};
use uapi_registry::target::Target;
use uapi_registry::validate::{self, Classification, VariancePolicy};
use uapi_registry::value::Value;

fn headers() -> HeaderTree {
    HeaderTree::new(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/headers"))
}

fn t(triple: &str) -> Target {
    Target::parse(triple).unwrap()
}

fn manifest() -> Manifest {
    Manifest::with_domains([Domain::Errno, Domain::Fcntl, Domain::Time])
}

fn targets() -> Vec<Target> {
    vec![
        t("x86_64-unknown-linux-gnu"),
        t("aarch64-unknown-linux-gnu"),
        t("i686-unknown-linux-gnu"),
    ]
}

fn build(id: &str) -> uapi_registry::snapshot::Snapshot {
    let extractions = extract_all(&headers(), &manifest(), &targets()).unwrap();
    SnapshotBuilder::from_extractions(&extractions)
        .unwrap()
        .with_id(SnapshotId::new(id).unwrap())
        .build()
        .unwrap()
}

#[test]
fn test_extract_and_resolve_per_target() {
    let registry = Registry::new();
    let snapshot = registry
        .put(
            SnapshotId::new("fixture").unwrap(),
            SnapshotBuilder::from_extractions(
                &extract_all(&headers(), &manifest(), &targets()).unwrap(),
            )
            .unwrap(),
        )
        .unwrap();
    assert_eq!(snapshot.targets().len(), 3);

    let resolver = registry.resolver(snapshot.id()).unwrap();
    let x86_64 = t("x86_64-unknown-linux-gnu");
    let aarch64 = t("aarch64-unknown-linux-gnu");
    let i686 = t("i686-unknown-linux-gnu");

    // errno is shared
    for target in [&x86_64, &aarch64, &i686] {
        assert_eq!(resolver.resolve_int(Domain::Errno, "EINTR", target), Ok(4));
        assert_eq!(resolver.resolve_int(Domain::Errno, "EWOULDBLOCK", target), Ok(11));
        assert_eq!(resolver.resolve_int(Domain::Errno, "EDEADLOCK", target), Ok(35));
        assert_eq!(resolver.resolve_int(Domain::Fcntl, "AT_FDCWD", target), Ok(-100));
        assert_eq!(resolver.resolve_int(Domain::Fcntl, "F_DUPFD_CLOEXEC", target), Ok(1030));
        assert_eq!(resolver.resolve_int(Domain::Time, "CLOCK_BOOTTIME", target), Ok(7));
    }

    // arm64 overrides four open flags
    assert_eq!(resolver.resolve_int(Domain::Fcntl, "O_LARGEFILE", &x86_64), Ok(0o100000));
    assert_eq!(resolver.resolve_int(Domain::Fcntl, "O_LARGEFILE", &aarch64), Ok(0o400000));
    assert_eq!(resolver.resolve_int(Domain::Fcntl, "O_DIRECT", &x86_64), Ok(0o40000));
    assert_eq!(resolver.resolve_int(Domain::Fcntl, "O_DIRECT", &aarch64), Ok(0o200000));
    assert_eq!(resolver.resolve_int(Domain::Fcntl, "O_CLOEXEC", &aarch64), Ok(0o2000000));

    // Layouts follow each target's data model
    let timespec = |target: &Target| {
        let l = resolver
            .resolve_layout(Domain::Time, "struct timespec", target)
            .unwrap();
        (l.size, l.align)
    };
    assert_eq!(timespec(&x86_64), (16, 8));
    assert_eq!(timespec(&aarch64), (16, 8));
    assert_eq!(timespec(&i686), (8, 4));

    let flock64 = resolver
        .resolve_layout(Domain::Fcntl, "struct flock64", &i686)
        .unwrap();
    assert_eq!((flock64.size, flock64.align), (24, 4));
    assert_eq!(flock64.field("l_pid").map(|f| f.offset), Some(20));

    let itimerspec = resolver
        .resolve_layout(Domain::Time, "struct itimerspec", &x86_64)
        .unwrap();
    assert_eq!(itimerspec.size, 32);
    assert_eq!(itimerspec.field("it_value").map(|f| f.offset), Some(16));
}

#[test]
fn test_guards_and_foreign_symbols_are_not_bound() {
    let snapshot = build("guards");
    let x86_64 = t("x86_64-unknown-linux-gnu");
    let fcntl = snapshot.symbols(Domain::Fcntl, &x86_64);
    assert!(!fcntl.contains(&"_UAPI_LINUX_FCNTL_H"));
    assert!(!fcntl.contains(&"_ASM_GENERIC_FCNTL_H"));
    // typedefs and includes come from linux/types.h, which no domain owns
    assert!(!fcntl.iter().any(|s| s.starts_with("__kernel")));
    // Guarded by #ifndef __KERNEL__ and still bound
    assert!(snapshot.has_symbol(Domain::Time, "struct timeval"));
    assert!(snapshot.has_symbol(Domain::Time, "struct __kernel_timespec"));
}

#[test]
fn test_absent_symbol_is_not_found() {
    let snapshot = build("absent");
    let resolver = uapi_registry::resolve::Resolver::from(snapshot);
    let err = resolver
        .resolve(Domain::Errno, "EHWPOISON", &t("x86_64-unknown-linux-gnu"))
        .unwrap_err();
    assert!(matches!(err, NotFoundError::Symbol { .. }));
    assert!(resolver
        .resolve(Domain::Errno, "EINTR", &t("riscv64gc-unknown-linux-gnu"))
        .is_err());
}

#[test]
fn test_missing_domain_header_fails_extraction() {
    let err = extract_all(
        &headers(),
        &Manifest::with_domains([Domain::Errno, Domain::Socket]),
        &[t("x86_64-unknown-linux-gnu")],
    )
    .unwrap_err();
    match err {
        ExtractionError::HeaderUnavailable { domain, header, .. } => {
            assert_eq!(domain, Domain::Socket);
            assert_eq!(header, "linux/socket.h");
        }
        other => panic!("unexpected error: {other}"),
    }

    // No tree for riscv at all
    assert!(matches!(
        extract_all(&headers(), &manifest(), &[t("riscv64gc-unknown-linux-gnu")]),
        Err(ExtractionError::HeaderUnavailable { .. })
    ));
}

#[test]
fn test_extraction_is_deterministic() {
    let extractions = || extract_all(&headers(), &manifest(), &targets()).unwrap();
    let a = SnapshotBuilder::from_extractions(&extractions())
        .unwrap()
        .build()
        .unwrap();
    let b = SnapshotBuilder::from_extractions(&extractions())
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

#[test]
fn test_validate_fixture_snapshot() {
    let snapshot = build("validate");
    let report = validate::check(&snapshot, &VariancePolicy::default_policy().unwrap());

    let classification = |symbol: &str| {
        report
            .divergences
            .iter()
            .find(|d| d.symbol == symbol)
            .map(|d| d.classification)
    };
    assert_eq!(
        classification("O_LARGEFILE"),
        Some(Classification::ExpectedPlatformVariant)
    );
    assert_eq!(
        classification("struct flock"),
        Some(Classification::ExpectedPlatformVariant)
    );
    assert_eq!(
        classification("struct timespec"),
        Some(Classification::ExpectedPlatformVariant)
    );
    // Same size everywhere, but 4-byte aligned on i686
    assert_eq!(
        classification("struct __kernel_timespec"),
        Some(Classification::UnexpectedDivergence)
    );
    assert_eq!(classification("EINTR"), None);
    assert_eq!(classification("struct timezone"), None);

    let err = report.into_result().unwrap_err();
    assert!(err
        .divergences
        .iter()
        .all(|d| d.domain == Domain::Time && d.symbol.starts_with("struct __kernel_")));
}

#[test]
fn test_store_then_compare_against_drifted_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = SnapshotStore::open(dir.path()).unwrap();
    let baseline = build("baseline");
    store.save(&baseline).unwrap();

    let registry = Registry::new();
    assert_eq!(store.load_into(&registry).unwrap(), 1);
    let loaded = registry.snapshot(baseline.id()).unwrap();
    assert_eq!(*loaded, baseline);

    // A later run where EINTR moved on aarch64
    let mut drifted = SnapshotBuilder::new();
    for (domain, symbol, target, value) in baseline.iter() {
        let value = if symbol == "EINTR" && target.kernel_dir() == "arm64" {
            Value::Integer(99)
        } else {
            value.clone()
        };
        drifted.insert(domain, symbol, target, value).unwrap();
    }
    let drifted = drifted
        .with_id(SnapshotId::new("drifted").unwrap())
        .build()
        .unwrap();

    let policy = VariancePolicy::default_policy().unwrap();
    let report = validate::compare(&baseline, &drifted, &policy);
    let eintr = report
        .divergences
        .iter()
        .find(|d| d.symbol == "EINTR")
        .unwrap();
    assert_eq!(eintr.classification, Classification::UnexpectedDivergence);
    assert_eq!(eintr.drift, vec![t("aarch64-unknown-linux-gnu")]);
    assert_eq!(
        report.symbols(),
        validate::compare(&drifted, &baseline, &policy).symbols()
    );
}
