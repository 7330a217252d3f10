//! Source manifest: the fixed set of kernel UAPI header domains
//!
//! Each domain owns a primary header (`linux/<name>.h`) and a set of
//! surface stems. Only definitions from files with a surface stem are
//! emitted as bindings for that domain; everything else reached through
//! `#include` is visible for evaluation only.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Include guard used by the rendered wrapper header
const WRAPPER_GUARD: &str = "UAPI_REGISTRY_WRAPPER_H";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown domain '{0}' (expected one of: errno, fcntl, fs, in, net, random, signal, socket, time)")]
pub struct DomainError(pub String);

/// A category of kernel-facing constants and structures
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Errno,
    Fcntl,
    Fs,
    In,
    Net,
    Random,
    Signal,
    Socket,
    Time,
}

impl Domain {
    /// All domains, in wrapper-header order
    pub const ALL: [Domain; 9] = [
        Domain::Errno,
        Domain::Fcntl,
        Domain::Fs,
        Domain::In,
        Domain::Net,
        Domain::Random,
        Domain::Signal,
        Domain::Socket,
        Domain::Time,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Domain::Errno => "errno",
            Domain::Fcntl => "fcntl",
            Domain::Fs => "fs",
            Domain::In => "in",
            Domain::Net => "net",
            Domain::Random => "random",
            Domain::Signal => "signal",
            Domain::Socket => "socket",
            Domain::Time => "time",
        }
    }

    /// Primary header path, relative to the tree's `include/` directory
    pub fn header(self) -> String {
        format!("linux/{}.h", self.name())
    }

    /// File stems (basename without `.h`) whose definitions belong to this domain
    ///
    /// `linux/fcntl.h`, `asm/fcntl.h` and `asm-generic/fcntl.h` all share
    /// the `fcntl` stem. Extra stems cover the split-out helper headers.
    pub fn surface_stems(self) -> &'static [&'static str] {
        match self {
            Domain::Errno => &["errno", "errno-base"],
            Domain::Fcntl => &["fcntl"],
            Domain::Fs => &["fs"],
            Domain::In => &["in"],
            Domain::Net => &["net"],
            Domain::Random => &["random"],
            Domain::Signal => &["signal", "signal-defs"],
            Domain::Socket => &["socket", "sockios"],
            Domain::Time => &["time", "time_types"],
        }
    }

    /// Whether a header path (e.g. `asm-generic/errno-base.h`) is on this domain's surface
    pub fn owns_header(self, path: &str) -> bool {
        let file = path.rsplit('/').next().unwrap_or(path);
        let stem = file.strip_suffix(".h").unwrap_or(file);
        self.surface_stems().contains(&stem)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .iter()
            .copied()
            .find(|d| d.name() == s.trim())
            .ok_or_else(|| DomainError(s.to_string()))
    }
}

/// The set of domains in scope for an extraction run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    domains: Vec<Domain>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            domains: Domain::ALL.to_vec(),
        }
    }
}

impl Manifest {
    /// Manifest restricted to the given domains (kept in canonical order, deduplicated)
    pub fn with_domains<I: IntoIterator<Item = Domain>>(domains: I) -> Self {
        let mut domains: Vec<Domain> = domains.into_iter().collect();
        domains.sort();
        domains.dedup();
        Self { domains }
    }

    /// Parse a manifest from domain names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, DomainError> {
        let domains = names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Domain>, _>>()?;
        Ok(Self::with_domains(domains))
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn contains(&self, domain: Domain) -> bool {
        self.domains.contains(&domain)
    }

    /// Render the aggregate wrapper header fed to binding generators
    pub fn render_wrapper_header(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("#ifndef {}\n", WRAPPER_GUARD));
        out.push_str(&format!("#define {}\n\n", WRAPPER_GUARD));
        for domain in &self.domains {
            out.push_str(&format!("#include <{}>\n", domain.header()));
        }
        out.push_str(&format!("\n#endif // {}\n", WRAPPER_GUARD));
        out
    }
}
