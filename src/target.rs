//! Target triples and the per-architecture data needed to read kernel headers
//!
//! The architecture component of a triple selects the `headers_install`
//! directory, the C data model used for struct layouts, and the compiler
//! predefines seen by the preprocessor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kernel `ARCH=` directories produced by `make headers_install`
pub const KERNEL_ARCH_DIRS: [&str; 9] = [
    "arm", "arm64", "hexagon", "mips", "powerpc", "riscv", "s390", "sparc", "x86",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Empty target triple")]
    Empty,

    #[error("Unrecognized architecture '{arch}' in target '{triple}'")]
    UnknownArch { triple: String, arch: String },

    #[error("Architecture '{arch}' in target '{triple}' has no Linux UAPI headers")]
    Unsupported { triple: String, arch: String },
}

/// CPU architecture as far as UAPI headers are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Mips,
    Mips64,
    PowerPc,
    PowerPc64,
    RiscV32,
    RiscV64,
    S390x,
    Sparc,
    Sparc64,
    Hexagon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Endian {
    Little,
    Big,
}

/// Sizes and alignments of C scalar types for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataModel {
    pub pointer_width: u64,
    pub long_width: u64,
    /// Alignment of `long long` inside structs (4 on i386)
    pub long_long_align: u64,
    /// Alignment of `double` inside structs (4 on i386)
    pub double_align: u64,
}

impl Arch {
    /// Map a triple's first component onto an architecture
    ///
    /// Every Rust arch spelling that ships Linux UAPI headers resolves to
    /// one of the kernel directories in [`KERNEL_ARCH_DIRS`].
    fn from_triple_component(triple: &str, arch: &str) -> Result<(Arch, Endian), TargetError> {
        use Endian::{Big, Little};
        let parsed = match arch {
            "x86_64" | "amd64" => (Arch::X86_64, Little),
            "i386" | "i586" | "i686" | "x86" => (Arch::X86, Little),
            "aarch64" | "arm64" => (Arch::Aarch64, Little),
            "aarch64_be" => (Arch::Aarch64, Big),
            "arm" | "armv5te" | "armv7" | "armv4t" | "thumbv7neon" | "armv6" | "armv7a" => {
                (Arch::Arm, Little)
            }
            "armeb" | "armebv7r" => (Arch::Arm, Big),
            "mips" | "mipsisa32r6" => (Arch::Mips, Big),
            "mipsel" | "mipsisa32r6el" => (Arch::Mips, Little),
            "mips64" | "mipsisa64r6" => (Arch::Mips64, Big),
            "mips64el" | "mipsisa64r6el" => (Arch::Mips64, Little),
            "powerpc" => (Arch::PowerPc, Big),
            "powerpc64" => (Arch::PowerPc64, Big),
            "powerpc64le" => (Arch::PowerPc64, Little),
            "riscv32i" | "riscv32imc" | "riscv32imac" | "riscv32gc" | "riscv32" => {
                (Arch::RiscV32, Little)
            }
            "riscv64gc" | "riscv64imac" | "riscv64" => (Arch::RiscV64, Little),
            "s390x" => (Arch::S390x, Big),
            "sparc" => (Arch::Sparc, Big),
            "sparc64" | "sparcv9" => (Arch::Sparc64, Big),
            "hexagon" => (Arch::Hexagon, Little),
            "asmjs" | "wasm32" | "wasm64" | "msp430" | "nvptx64" | "thumbv6m" | "thumbv7em"
            | "thumbv7m" | "thumbv8m" => {
                return Err(TargetError::Unsupported {
                    triple: triple.to_string(),
                    arch: arch.to_string(),
                })
            }
            _ => {
                return Err(TargetError::UnknownArch {
                    triple: triple.to_string(),
                    arch: arch.to_string(),
                })
            }
        };
        Ok(parsed)
    }

    /// Kernel header directory (`ARCH=` value) for this architecture
    pub fn kernel_dir(self) -> &'static str {
        match self {
            Arch::X86 | Arch::X86_64 => "x86",
            Arch::Arm => "arm",
            Arch::Aarch64 => "arm64",
            Arch::Mips | Arch::Mips64 => "mips",
            Arch::PowerPc | Arch::PowerPc64 => "powerpc",
            Arch::RiscV32 | Arch::RiscV64 => "riscv",
            Arch::S390x => "s390",
            Arch::Sparc | Arch::Sparc64 => "sparc",
            Arch::Hexagon => "hexagon",
        }
    }

    pub fn is_64bit(self) -> bool {
        matches!(
            self,
            Arch::X86_64
                | Arch::Aarch64
                | Arch::Mips64
                | Arch::PowerPc64
                | Arch::RiscV64
                | Arch::S390x
                | Arch::Sparc64
        )
    }

    pub fn data_model(self) -> DataModel {
        let width = if self.is_64bit() { 8 } else { 4 };
        let legacy_align = if self == Arch::X86 { 4 } else { 8 };
        DataModel {
            pointer_width: width,
            long_width: width,
            long_long_align: legacy_align,
            double_align: legacy_align,
        }
    }

    /// Architecture-specific compiler predefines
    fn predefines(self) -> &'static [(&'static str, i64)] {
        match self {
            Arch::X86_64 => &[("__x86_64__", 1), ("__x86_64", 1), ("__amd64__", 1)],
            Arch::X86 => &[("__i386__", 1), ("__i386", 1)],
            Arch::Aarch64 => &[("__aarch64__", 1)],
            Arch::Arm => &[("__arm__", 1)],
            Arch::Mips => &[
                ("__mips__", 1),
                ("__mips", 32),
                ("_MIPS_SIM", 1),
                ("_MIPS_SZLONG", 32),
            ],
            Arch::Mips64 => &[
                ("__mips__", 1),
                ("__mips", 64),
                ("__mips64", 1),
                ("_MIPS_SIM", 3),
                ("_MIPS_SZLONG", 64),
            ],
            Arch::PowerPc => &[("__powerpc__", 1), ("__PPC__", 1)],
            Arch::PowerPc64 => &[
                ("__powerpc__", 1),
                ("__powerpc64__", 1),
                ("__PPC__", 1),
                ("__PPC64__", 1),
            ],
            Arch::RiscV32 => &[("__riscv", 1), ("__riscv_xlen", 32)],
            Arch::RiscV64 => &[("__riscv", 1), ("__riscv_xlen", 64)],
            Arch::S390x => &[("__s390__", 1), ("__s390x__", 1)],
            Arch::Sparc => &[("__sparc__", 1), ("__sparc", 1)],
            Arch::Sparc64 => &[("__sparc__", 1), ("__sparc_v9__", 1), ("__arch64__", 1)],
            Arch::Hexagon => &[("__hexagon__", 1)],
        }
    }
}

/// Platform identifier under which an extraction was performed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    triple: String,
    arch: Arch,
    endian: Endian,
}

impl Target {
    pub fn parse(triple: &str) -> Result<Self, TargetError> {
        let triple = triple.trim();
        if triple.is_empty() {
            return Err(TargetError::Empty);
        }
        let arch_part = triple.split('-').next().unwrap_or(triple);
        let (arch, endian) = Arch::from_triple_component(triple, arch_part)?;
        Ok(Self {
            triple: triple.to_string(),
            arch,
            endian,
        })
    }

    /// Target the current process was compiled for
    pub fn host() -> Result<Self, TargetError> {
        let arch = match (std::env::consts::ARCH, cfg!(target_endian = "little")) {
            ("powerpc64", true) => "powerpc64le",
            ("mips", true) => "mipsel",
            ("mips64", true) => "mips64el",
            ("aarch64", false) => "aarch64_be",
            (arch, _) => arch,
        };
        Self::parse(&format!("{}-unknown-linux-gnu", arch))
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn data_model(&self) -> DataModel {
        self.arch.data_model()
    }

    pub fn kernel_dir(&self) -> &'static str {
        self.arch.kernel_dir()
    }

    /// Object-like macros the compiler would predefine for this target
    pub fn predefined_macros(&self) -> Vec<(String, i64)> {
        let model = self.data_model();
        let mut macros: Vec<(String, i64)> = vec![
            ("__linux__".to_string(), 1),
            ("__linux".to_string(), 1),
            ("__unix__".to_string(), 1),
            ("__CHAR_BIT__".to_string(), 8),
            ("__SIZEOF_INT__".to_string(), 4),
            ("__SIZEOF_LONG__".to_string(), model.long_width as i64),
            ("__SIZEOF_LONG_LONG__".to_string(), 8),
            ("__SIZEOF_POINTER__".to_string(), model.pointer_width as i64),
            ("__ORDER_LITTLE_ENDIAN__".to_string(), 1234),
            ("__ORDER_BIG_ENDIAN__".to_string(), 4321),
        ];
        let byte_order = match self.endian {
            Endian::Little => 1234,
            Endian::Big => 4321,
        };
        macros.push(("__BYTE_ORDER__".to_string(), byte_order));
        if self.arch.is_64bit() {
            macros.push(("__LP64__".to_string(), 1));
            macros.push(("_LP64".to_string(), 1));
        }
        match (self.arch, self.endian) {
            (Arch::Mips | Arch::Mips64, Endian::Little) => macros.push(("__MIPSEL__".into(), 1)),
            (Arch::Mips | Arch::Mips64, Endian::Big) => macros.push(("__MIPSEB__".into(), 1)),
            (Arch::Aarch64, Endian::Little) => macros.push(("__AARCH64EL__".into(), 1)),
            (Arch::Aarch64, Endian::Big) => macros.push(("__AARCH64EB__".into(), 1)),
            (Arch::Arm, Endian::Little) => macros.push(("__ARMEL__".into(), 1)),
            (Arch::Arm, Endian::Big) => macros.push(("__ARMEB__".into(), 1)),
            _ => {}
        }
        macros.extend(
            self.arch
                .predefines()
                .iter()
                .map(|(name, value)| (name.to_string(), *value)),
        );
        macros
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Target {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.triple
    }
}
