//! Per-domain, per-target extraction

use super::decl::parse_declarations;
use super::expr::{evaluate, EvalError, EvalMode, Token};
use super::preprocess::{MacroBody, MacroState, Preprocessor};
use super::source::HeaderSource;
use crate::manifest::{Domain, Manifest};
use crate::target::Target;
use crate::value::Value;
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;

/// Symbol → value for one (domain, target)
pub type Bindings = BTreeMap<String, Value>;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Header {header} unavailable for target {target} (domain {domain})")]
    HeaderUnavailable {
        domain: Domain,
        target: Target,
        header: String,
    },

    #[error("Ambiguous definitions in domain {domain} for target {target}: {}", symbols.join(", "))]
    AmbiguousSymbols {
        domain: Domain,
        target: Target,
        symbols: Vec<String>,
    },

    #[error("Failed to read headers for target {target}: {source}")]
    Io {
        target: Target,
        #[source]
        source: io::Error,
    },
}

/// Bindings of one domain for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub domain: Domain,
    pub target: Target,
    pub bindings: Bindings,
}

/// Collects emitted values, turning disagreements into ambiguity
struct Emitter<'a> {
    domain: Domain,
    target: &'a Target,
    bindings: Bindings,
    ambiguous: Vec<String>,
}

impl Emitter<'_> {
    fn integer(&mut self, name: &str, value: Result<i128, EvalError>) {
        match value {
            Ok(v) => match i64::try_from(v) {
                Ok(v) => self.insert(name, Value::Integer(v)),
                Err(_) => tracing::warn!(
                    "{}/{} on {}: value {} does not fit in i64, omitted",
                    self.domain,
                    name,
                    self.target,
                    v
                ),
            },
            Err(EvalError::Ambiguous(dep)) => {
                tracing::debug!("{}/{} depends on ambiguous macro {}", self.domain, name, dep);
                self.ambiguous.push(name.to_string());
            }
            Err(e) => tracing::debug!(
                "{}/{} on {}: omitted ({})",
                self.domain,
                name,
                self.target,
                e
            ),
        }
    }

    fn insert(&mut self, name: &str, value: Value) {
        match self.bindings.get(name) {
            Some(existing) if *existing != value => {
                tracing::debug!(
                    "{}/{} bound to both {} and {}",
                    self.domain,
                    name,
                    existing,
                    value
                );
                self.ambiguous.push(name.to_string());
            }
            Some(_) => {}
            None => {
                self.bindings.insert(name.to_string(), value);
            }
        }
    }
}

/// Extract the bindings visible on `domain`'s header surface for `target`
pub fn extract<S: HeaderSource + ?Sized>(
    source: &S,
    domain: Domain,
    target: &Target,
) -> Result<Bindings, ExtractionError> {
    let header = domain.header();
    let unavailable = || ExtractionError::HeaderUnavailable {
        domain,
        target: target.clone(),
        header: header.clone(),
    };
    if !source.has_target(target) {
        return Err(unavailable());
    }
    let preprocessed = Preprocessor::new(source, target)
        .run(&header)
        .map_err(|source| ExtractionError::Io {
            target: target.clone(),
            source,
        })?
        .ok_or_else(unavailable)?;

    let mut macros = preprocessed.macros;
    let model = target.data_model();
    let decls = parse_declarations(&preprocessed.files, &mut macros, model);
    let mode = EvalMode::Constant {
        long_bits: (model.long_width * 8) as u32,
    };

    let mut emitter = Emitter {
        domain,
        target,
        bindings: Bindings::new(),
        ambiguous: Vec::new(),
    };

    let mut names: Vec<&String> = macros
        .entries()
        .filter(|(_, entry)| entry.origins.iter().any(|o| domain.owns_header(o)))
        .map(|(name, _)| name)
        .collect();
    names.sort();
    for name in names {
        let Some(entry) = macros.get(name) else {
            continue;
        };
        match &entry.state {
            MacroState::Ambiguous => emitter.ambiguous.push(name.clone()),
            MacroState::Defined {
                body: MacroBody::Function(_),
                ..
            } => tracing::trace!("{}/{}: function-like macro skipped", domain, name),
            MacroState::Defined {
                body: MacroBody::Object(body),
                ..
            } if body.is_empty() => {}
            MacroState::Defined { .. } => {
                let value = evaluate(&[Token::Ident(name.clone())], &macros, mode);
                emitter.integer(name, value);
            }
        }
    }

    for constant in decls
        .enumerators
        .into_iter()
        .filter(|e| domain.owns_header(&e.origin))
    {
        emitter.integer(&constant.name, constant.value);
    }

    for record in decls
        .records
        .into_iter()
        .filter(|r| domain.owns_header(&r.origin))
    {
        if record.ambiguous {
            emitter.ambiguous.push(record.name);
            continue;
        }
        match record.layout {
            Ok(layout) => emitter.insert(&record.name, Value::Layout(layout)),
            Err(e) => tracing::debug!("{}/{} on {}: no layout ({})", domain, record.name, target, e),
        }
    }

    if !emitter.ambiguous.is_empty() {
        let mut symbols = emitter.ambiguous;
        symbols.sort();
        symbols.dedup();
        return Err(ExtractionError::AmbiguousSymbols {
            domain,
            target: target.clone(),
            symbols,
        });
    }
    tracing::debug!(
        "{} on {}: {} bindings",
        domain,
        target,
        emitter.bindings.len()
    );
    Ok(emitter.bindings)
}

/// Extract every manifest domain for one target, in manifest order
pub fn extract_target<S: HeaderSource + ?Sized>(
    source: &S,
    manifest: &Manifest,
    target: &Target,
) -> Result<Vec<Extraction>, ExtractionError> {
    tracing::info!("Extracting {} domain(s) for {}", manifest.domains().len(), target);
    manifest
        .domains()
        .iter()
        .map(|&domain| {
            extract(source, domain, target).map(|bindings| Extraction {
                domain,
                target: target.clone(),
                bindings,
            })
        })
        .collect()
}

/// Extract all targets concurrently, one scoped worker per target
///
/// Results come back in target order, then manifest order. The first
/// failing target (in that order) determines the error.
pub fn extract_all<S: HeaderSource + ?Sized>(
    source: &S,
    manifest: &Manifest,
    targets: &[Target],
) -> Result<Vec<Extraction>, ExtractionError> {
    let per_target: Vec<Result<Vec<Extraction>, ExtractionError>> = crossbeam::scope(|scope| {
        let handles: Vec<_> = targets
            .iter()
            .map(|target| scope.spawn(move |_| extract_target(source, manifest, target)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

    let mut extractions = Vec::new();
    for result in per_target {
        extractions.extend(result?);
    }
    Ok(extractions)
}
