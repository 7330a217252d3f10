//! Cross-check a snapshot against the host C library
//!
//! The `libc` crate carries hand-maintained copies of many kernel
//! constants. For the host target, a snapshot should agree with them;
//! a disagreement points at either an extraction bug or a libc bug.

use crate::manifest::Domain;
use crate::snapshot::Snapshot;
use crate::target::Target;
use crate::value::Value;
use serde::Serialize;
use std::mem::{align_of, size_of};

/// Value the host expects for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostValue {
    Integer(i64),
    /// Struct size and alignment
    Layout { size: u64, align: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostMismatch {
    pub domain: Domain,
    pub symbol: String,
    pub host: String,
    pub snapshot: String,
}

/// Result of [`cross_check`]
#[derive(Debug, Clone, Serialize)]
pub struct CrossCheck {
    pub target: Target,
    pub checked: usize,
    pub mismatches: Vec<HostMismatch>,
    /// Known symbols with no binding for the target
    pub missing: Vec<String>,
}

impl CrossCheck {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        if self.is_clean() {
            report.push_str(&format!(
                "✅ {} symbols agree with the host libc ({})\n",
                self.checked, self.target
            ));
        } else {
            report.push_str(&format!(
                "❌ {} of {} symbols disagree with the host libc ({})\n",
                self.mismatches.len(),
                self.checked,
                self.target
            ));
            for m in &self.mismatches {
                report.push_str(&format!(
                    "  - {}/{}: libc {} vs snapshot {}\n",
                    m.domain, m.symbol, m.host, m.snapshot
                ));
            }
        }
        if !self.missing.is_empty() {
            report.push_str(&format!("\n⚠️  Not in snapshot ({}):\n", self.missing.len()));
            for symbol in &self.missing {
                report.push_str(&format!("  - {}\n", symbol));
            }
        }
        report
    }
}

macro_rules! ints {
    ($domain:expr; $($name:ident),* $(,)?) => {
        [$(($domain, stringify!($name), HostValue::Integer(libc::$name as i64))),*]
    };
}

fn layout<T>() -> HostValue {
    HostValue::Layout {
        size: size_of::<T>() as u64,
        align: align_of::<T>() as u64,
    }
}

/// Symbols whose host values are known through `libc`
pub fn known_symbols() -> Vec<(Domain, &'static str, HostValue)> {
    let mut symbols = Vec::new();
    symbols.extend(ints![Domain::Errno;
        EPERM, ENOENT, EINTR, EIO, EBADF, EAGAIN, ENOMEM, EACCES, EEXIST,
        EINVAL, EPIPE, ERANGE, ENOSYS, ELOOP, ETIMEDOUT, EINPROGRESS,
    ]);
    symbols.extend(ints![Domain::Fcntl;
        O_RDONLY, O_WRONLY, O_RDWR, O_CREAT, O_EXCL, O_TRUNC, O_APPEND,
        O_NONBLOCK, O_DIRECTORY, O_NOFOLLOW, O_CLOEXEC,
        F_DUPFD, F_GETFD, F_SETFD, F_GETFL, F_SETFL, FD_CLOEXEC,
    ]);
    symbols.extend(ints![Domain::Signal;
        SIGHUP, SIGINT, SIGQUIT, SIGKILL, SIGSEGV, SIGPIPE, SIGALRM,
        SIGTERM, SIGCHLD, SIGUSR1, SIGUSR2, SIG_BLOCK, SIG_UNBLOCK, SIG_SETMASK,
    ]);
    symbols.extend(ints![Domain::Socket;
        SOL_SOCKET, SO_REUSEADDR, SO_KEEPALIVE, SO_SNDBUF, SO_RCVBUF, SO_ERROR,
    ]);
    symbols.extend(ints![Domain::In;
        IPPROTO_IP, IPPROTO_TCP, IPPROTO_UDP, IPPROTO_ICMP, IPPROTO_IPV6,
        IP_TOS, IP_TTL, IP_MULTICAST_TTL, IP_ADD_MEMBERSHIP,
    ]);
    symbols.extend(ints![Domain::Time;
        CLOCK_REALTIME, CLOCK_MONOTONIC, CLOCK_PROCESS_CPUTIME_ID, CLOCK_BOOTTIME,
        TIMER_ABSTIME,
    ]);
    symbols.push((Domain::In, "struct in_addr", layout::<libc::in_addr>()));
    symbols.push((Domain::In, "struct sockaddr_in", layout::<libc::sockaddr_in>()));
    symbols.push((Domain::In, "struct ip_mreq", layout::<libc::ip_mreq>()));
    symbols.push((Domain::Time, "struct timeval", layout::<libc::timeval>()));
    symbols
}

/// Compare `snapshot`'s bindings for `target` with the host values
///
/// `target` should be [`Target::host`]; other targets will mismatch.
pub fn cross_check(snapshot: &Snapshot, target: &Target) -> CrossCheck {
    check_against(snapshot, target, &known_symbols())
}

fn check_against(
    snapshot: &Snapshot,
    target: &Target,
    known: &[(Domain, &'static str, HostValue)],
) -> CrossCheck {
    let mut result = CrossCheck {
        target: target.clone(),
        checked: 0,
        mismatches: Vec::new(),
        missing: Vec::new(),
    };

    for (domain, symbol, host) in known {
        let Some(value) = snapshot.get(*domain, symbol, target) else {
            result.missing.push(format!("{}/{}", domain, symbol));
            continue;
        };
        result.checked += 1;
        let agrees = match (host, value) {
            (HostValue::Integer(expected), Value::Integer(actual)) => expected == actual,
            (HostValue::Layout { size, align }, Value::Layout(layout)) => {
                layout.size == *size && layout.align == *align
            }
            _ => false,
        };
        if !agrees {
            result.mismatches.push(HostMismatch {
                domain: *domain,
                symbol: symbol.to_string(),
                host: match host {
                    HostValue::Integer(v) => v.to_string(),
                    HostValue::Layout { size, align } => format!("size={} align={}", size, align),
                },
                snapshot: value.to_string(),
            });
        }
    }

    if !result.mismatches.is_empty() {
        tracing::warn!(
            "{} symbols disagree with libc on {}",
            result.mismatches.len(),
            target
        );
    }
    result
}
