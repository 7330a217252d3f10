// Header extraction: kernel UAPI header trees → per-target bindings
//
// A small C preprocessor walks `linux/<domain>.h` for one target, with
// three-valued conditionals so that anything it cannot decide is tracked
// instead of guessed. Macro and enumerator values are evaluated with the
// target's C data model; struct/union layouts are computed from the
// declarations that survive preprocessing.
//
// Only definitions from the domain's surface files are emitted. A
// surface symbol with conflicting definitions fails the extraction.

mod decl;
mod expr;
mod extractor;
mod preprocess;
mod source;

pub use extractor::{extract, extract_all, extract_target, Bindings, ExtractionError, Extraction};
pub use source::{HeaderSource, HeaderTree, MemoryHeaders};

/// Preprocess and parse arbitrary header text; used by the fuzz target
#[doc(hidden)]
pub fn scan_header(text: &str, target: &crate::target::Target) -> usize {
    let headers = MemoryHeaders::new().with(target.kernel_dir(), "linux/fuzz.h", text);
    match preprocess::Preprocessor::new(&headers, target).run("linux/fuzz.h") {
        Ok(Some(mut pp)) => {
            let decls = decl::parse_declarations(&pp.files, &mut pp.macros, target.data_model());
            decls.enumerators.len() + decls.records.len()
        }
        _ => 0,
    }
}
