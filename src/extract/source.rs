//! Where header text comes from

use crate::target::Target;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Provider of installed UAPI headers, one tree per kernel architecture
pub trait HeaderSource: Sync {
    /// Read `include/<path>` for the target's architecture
    ///
    /// Returns `Ok(None)` when the file is not part of the tree.
    fn read(&self, target: &Target, path: &str) -> io::Result<Option<String>>;

    /// Whether a header tree exists for the target at all
    fn has_target(&self, target: &Target) -> bool;
}

/// Output of `make headers_install ARCH=<arch> INSTALL_HDR_PATH=<root>/<arch>`
///
/// Layout: `<root>/<kernel-arch>/include/{linux,asm,asm-generic}/...`
#[derive(Debug, Clone)]
pub struct HeaderTree {
    root: PathBuf,
}

impl HeaderTree {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn include_dir(&self, target: &Target) -> PathBuf {
        self.root.join(target.kernel_dir()).join("include")
    }
}

/// Include paths must stay inside the tree
fn is_contained(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl HeaderSource for HeaderTree {
    fn read(&self, target: &Target, path: &str) -> io::Result<Option<String>> {
        if !is_contained(path) {
            return Ok(None);
        }
        let full = self.include_dir(target).join(path);
        match std::fs::read_to_string(&full) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn has_target(&self, target: &Target) -> bool {
        self.include_dir(target).is_dir()
    }
}

/// In-memory header trees keyed by kernel architecture directory
#[derive(Debug, Clone, Default)]
pub struct MemoryHeaders {
    files: HashMap<(String, String), String>,
}

impl MemoryHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `include/<path>` for a kernel architecture (e.g. `"x86"`, `"arm64"`)
    pub fn with(mut self, kernel_arch: &str, path: &str, text: &str) -> Self {
        self.insert(kernel_arch, path, text);
        self
    }

    pub fn insert(&mut self, kernel_arch: &str, path: &str, text: &str) {
        self.files
            .insert((kernel_arch.to_string(), path.to_string()), text.to_string());
    }
}

impl HeaderSource for MemoryHeaders {
    fn read(&self, target: &Target, path: &str) -> io::Result<Option<String>> {
        Ok(self
            .files
            .get(&(target.kernel_dir().to_string(), path.to_string()))
            .cloned())
    }

    fn has_target(&self, target: &Target) -> bool {
        self.files.keys().any(|(arch, _)| arch == target.kernel_dir())
    }
}
