//! Minimal C preprocessor over an installed header tree
//!
//! Conditionals are three-valued. Anything under a condition we cannot
//! decide is recorded as *uncertain*; a macro whose possible definitions
//! disagree becomes ambiguous rather than being resolved by precedence.

use super::expr::{evaluate, tokenize, EvalMode, MacroRef, Scope, Token};
use super::source::HeaderSource;
use crate::target::Target;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::OnceLock;

/// Marks code lines that sit under an undecidable conditional
pub(crate) const UNCERTAIN_MARKER: &str = "__uapi_registry_uncertain__";

/// Origin recorded for compiler predefines
pub(crate) const BUILTIN_ORIGIN: &str = "<built-in>";

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#\s*([A-Za-z_]+)\s*(.*)$").expect("valid regex"))
}

fn define_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)(\(?)(.*)$").expect("valid regex"))
}

fn include_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^([<"])([^>"]+)[>"]"#).expect("valid regex"))
}

/// Three-valued condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cond {
    True,
    False,
    Unknown,
}

impl Cond {
    fn from_bool(b: bool) -> Self {
        if b {
            Cond::True
        } else {
            Cond::False
        }
    }

    fn not(self) -> Self {
        match self {
            Cond::True => Cond::False,
            Cond::False => Cond::True,
            Cond::Unknown => Cond::Unknown,
        }
    }

    fn and(self, other: Cond) -> Self {
        match (self, other) {
            (Cond::False, _) | (_, Cond::False) => Cond::False,
            (Cond::True, Cond::True) => Cond::True,
            _ => Cond::Unknown,
        }
    }

    fn or(self, other: Cond) -> Self {
        match (self, other) {
            (Cond::True, _) | (_, Cond::True) => Cond::True,
            (Cond::False, Cond::False) => Cond::False,
            _ => Cond::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MacroBody {
    Object(Vec<Token>),
    /// Parameter list and body, kept only for redefinition checks
    Function(Vec<Token>),
}

#[derive(Debug, Clone)]
pub(crate) enum MacroState {
    Defined { body: MacroBody, certain: bool },
    Ambiguous,
}

#[derive(Debug, Clone)]
pub(crate) struct MacroEntry {
    pub state: MacroState,
    /// Header paths that defined (or tried to define) the macro
    pub origins: Vec<String>,
}

/// Macro definitions plus the enumerators found by declaration parsing
#[derive(Debug, Default)]
pub(crate) struct MacroTable {
    entries: HashMap<String, MacroEntry>,
    enumerators: HashMap<String, i64>,
}

impl MacroTable {
    pub fn define(&mut self, name: &str, body: MacroBody, certain: bool, origin: &str) {
        match self.entries.get_mut(name) {
            None => {
                self.entries.insert(
                    name.to_string(),
                    MacroEntry {
                        state: MacroState::Defined { body, certain },
                        origins: vec![origin.to_string()],
                    },
                );
            }
            Some(entry) => {
                if !entry.origins.iter().any(|o| o == origin) {
                    entry.origins.push(origin.to_string());
                }
                match &mut entry.state {
                    MacroState::Defined {
                        body: old,
                        certain: was_certain,
                    } if *old == body => *was_certain |= certain,
                    MacroState::Defined { .. } => {
                        tracing::debug!("conflicting definitions of {} (last in {})", name, origin);
                        entry.state = MacroState::Ambiguous;
                    }
                    MacroState::Ambiguous => {}
                }
            }
        }
    }

    pub fn undef(&mut self, name: &str, certain: bool) {
        if certain {
            self.entries.remove(name);
        } else if let Some(entry) = self.entries.get_mut(name) {
            tracing::debug!("{} undefined under an undecidable condition", name);
            entry.state = MacroState::Ambiguous;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &MacroEntry)> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&MacroEntry> {
        self.entries.get(name)
    }

    pub fn set_enumerator(&mut self, name: &str, value: i64) {
        self.enumerators.insert(name.to_string(), value);
    }
}

impl Scope for MacroTable {
    fn macro_ref(&self, name: &str) -> MacroRef<'_> {
        match self.entries.get(name).map(|e| &e.state) {
            Some(MacroState::Defined {
                body: MacroBody::Object(tokens),
                certain,
            }) => MacroRef::Object {
                body: tokens,
                certain: *certain,
            },
            Some(MacroState::Defined {
                body: MacroBody::Function(_),
                ..
            }) => MacroRef::Function,
            Some(MacroState::Ambiguous) => MacroRef::Ambiguous,
            None => MacroRef::Undefined,
        }
    }

    fn is_defined(&self, name: &str) -> Option<bool> {
        match self.entries.get(name).map(|e| &e.state) {
            None => Some(false),
            Some(MacroState::Defined { certain: true, .. }) => Some(true),
            Some(_) => None,
        }
    }

    fn enumerator(&self, name: &str) -> Option<i64> {
        self.enumerators.get(name).copied()
    }
}

/// Declaration text of one header, with directives removed
#[derive(Debug, Clone)]
pub(crate) struct FileCode {
    pub path: String,
    pub code: String,
}

#[derive(Debug)]
pub(crate) struct Preprocessed {
    pub macros: MacroTable,
    /// Files in completion order: includes before their includer
    pub files: Vec<FileCode>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    branch: Cond,
    taken: Cond,
    /// Enclosing region is inactive; nothing in this frame is evaluated
    skipping: bool,
}

fn effective(base: Cond, frames: &[Frame]) -> Cond {
    frames.iter().fold(base, |acc, f| {
        if f.skipping {
            Cond::False
        } else {
            acc.and(f.branch)
        }
    })
}

/// Join backslash-newline continuations
pub(crate) fn splice_lines(text: &str) -> String {
    text.replace("\\\r\n", "").replace("\\\n", "")
}

/// Replace comments with whitespace, keeping line breaks
pub(crate) fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push(' ');
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '"' | '\'' => {
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == c || inner == '\n' {
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

pub(crate) struct Preprocessor<'a, S: HeaderSource + ?Sized> {
    source: &'a S,
    target: &'a Target,
    macros: MacroTable,
    visited: HashSet<String>,
    files: Vec<FileCode>,
}

impl<'a, S: HeaderSource + ?Sized> Preprocessor<'a, S> {
    pub fn new(source: &'a S, target: &'a Target) -> Self {
        let mut macros = MacroTable::default();
        for (name, value) in target.predefined_macros() {
            macros.define(
                &name,
                MacroBody::Object(tokenize(&value.to_string())),
                true,
                BUILTIN_ORIGIN,
            );
        }
        Self {
            source,
            target,
            macros,
            visited: HashSet::new(),
            files: Vec::new(),
        }
    }

    /// Preprocess starting from `primary`; `Ok(None)` if that header is missing
    pub fn run(mut self, primary: &str) -> io::Result<Option<Preprocessed>> {
        if !self.process_file(primary, Cond::True)? {
            return Ok(None);
        }
        Ok(Some(Preprocessed {
            macros: self.macros,
            files: self.files,
        }))
    }

    /// Returns whether the file exists in the tree
    fn process_file(&mut self, path: &str, base: Cond) -> io::Result<bool> {
        if !self.visited.insert(path.to_string()) {
            return Ok(true);
        }
        let Some(text) = self.source.read(self.target, path)? else {
            return Ok(false);
        };
        tracing::trace!("preprocessing {} for {}", path, self.target);

        let text = strip_comments(&splice_lines(&text));
        let mut frames: Vec<Frame> = Vec::new();
        let mut code = String::new();

        for line in text.lines() {
            let state = effective(base, &frames);
            let Some(caps) = directive_re().captures(line) else {
                if state != Cond::False {
                    if state == Cond::Unknown {
                        code.push_str(UNCERTAIN_MARKER);
                        code.push(' ');
                    }
                    code.push_str(line);
                    code.push('\n');
                }
                continue;
            };
            let name = caps.get(1).map_or("", |m| m.as_str());
            let rest = caps.get(2).map_or("", |m| m.as_str()).trim();

            match name {
                "if" | "ifdef" | "ifndef" => {
                    if state == Cond::False {
                        frames.push(Frame {
                            branch: Cond::False,
                            taken: Cond::True,
                            skipping: true,
                        });
                        continue;
                    }
                    let cond = match name {
                        "if" => self.eval_condition(rest, path),
                        "ifdef" => self.defined_condition(rest),
                        _ => self.defined_condition(rest).not(),
                    };
                    frames.push(Frame {
                        branch: cond,
                        taken: cond,
                        skipping: false,
                    });
                }
                "elif" => {
                    let Some(mut frame) = frames.pop() else {
                        tracing::warn!("{}: #elif without #if", path);
                        continue;
                    };
                    if !frame.skipping {
                        let cond = if frame.taken == Cond::True {
                            Cond::False
                        } else {
                            self.eval_condition(rest, path)
                        };
                        frame.branch = frame.taken.not().and(cond);
                        frame.taken = frame.taken.or(cond);
                    }
                    frames.push(frame);
                }
                "else" => match frames.last_mut() {
                    Some(frame) if !frame.skipping => {
                        frame.branch = frame.taken.not();
                        frame.taken = Cond::True;
                    }
                    Some(_) => {}
                    None => tracing::warn!("{}: #else without #if", path),
                },
                "endif" => {
                    if frames.pop().is_none() {
                        tracing::warn!("{}: unbalanced #endif", path);
                    }
                }
                _ if state == Cond::False => {}
                "define" => self.handle_define(rest, state == Cond::True, path),
                "undef" => {
                    let macro_name = rest.split_whitespace().next().unwrap_or("");
                    self.macros.undef(macro_name, state == Cond::True);
                }
                "include" | "include_next" => {
                    self.handle_include(rest, path, state)?;
                }
                _ => {}
            }
        }

        if !frames.is_empty() {
            tracing::warn!("{}: {} unterminated conditional(s)", path, frames.len());
        }
        self.files.push(FileCode {
            path: path.to_string(),
            code,
        });
        Ok(true)
    }

    fn eval_condition(&self, expr: &str, path: &str) -> Cond {
        match evaluate(&tokenize(expr), &self.macros, EvalMode::Preprocessor) {
            Ok(v) => Cond::from_bool(v != 0),
            Err(e) => {
                tracing::debug!("{}: undecidable #if {} ({})", path, expr, e);
                Cond::Unknown
            }
        }
    }

    fn defined_condition(&self, rest: &str) -> Cond {
        let name = rest.split_whitespace().next().unwrap_or("");
        match self.macros.is_defined(name) {
            Some(b) => Cond::from_bool(b),
            None => Cond::Unknown,
        }
    }

    fn handle_define(&mut self, rest: &str, certain: bool, path: &str) {
        let Some(caps) = define_re().captures(rest) else {
            tracing::debug!("{}: malformed #define {}", path, rest);
            return;
        };
        let name = caps.get(1).map_or("", |m| m.as_str());
        let function_like = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
        let body = tokenize(caps.get(3).map_or("", |m| m.as_str()));
        let body = if function_like {
            MacroBody::Function(body)
        } else {
            MacroBody::Object(body)
        };
        self.macros.define(name, body, certain, path);
    }

    fn handle_include(&mut self, rest: &str, current: &str, state: Cond) -> io::Result<()> {
        let Some(caps) = include_re().captures(rest) else {
            tracing::debug!("{}: computed #include {} not followed", current, rest);
            return Ok(());
        };
        let quoted = caps.get(1).is_some_and(|m| m.as_str() == "\"");
        let target = caps.get(2).map_or("", |m| m.as_str());
        if quoted {
            if let Some((dir, _)) = current.rsplit_once('/') {
                if self.process_file(&format!("{}/{}", dir, target), state)? {
                    return Ok(());
                }
            }
        }
        if !self.process_file(target, state)? {
            tracing::debug!("{}: <{}> is outside the header tree, skipped", current, target);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::source::MemoryHeaders;

    fn run(files: &[(&str, &str)]) -> Preprocessed {
        let mut headers = MemoryHeaders::new();
        for (path, text) in files {
            headers.insert("x86", path, text);
        }
        let target = Target::parse("x86_64-unknown-linux-gnu").unwrap();
        Preprocessor::new(&headers, &target)
            .run(files[0].0)
            .unwrap()
            .expect("primary header present")
    }

    fn state(pp: &Preprocessed, name: &str) -> Option<(String, bool)> {
        match &pp.macros.get(name)?.state {
            MacroState::Defined {
                body: MacroBody::Object(tokens),
                certain,
            } => Some((
                tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" "),
                *certain,
            )),
            MacroState::Defined { .. } => Some(("<function>".into(), true)),
            MacroState::Ambiguous => Some(("<ambiguous>".into(), false)),
        }
    }

    #[test]
    fn test_strip_comments_keeps_lines() {
        let text = "a /* one\ntwo */ b // tail\nc \"/* not */\"";
        let stripped = strip_comments(text);
        assert_eq!(stripped.lines().count(), 3);
        assert!(!stripped.contains("one"));
        assert!(!stripped.contains("tail"));
        assert!(stripped.contains("\"/* not */\""));
    }

    #[test]
    fn test_ifndef_guard_respects_arch_override() {
        let pp = run(&[
            ("linux/fcntl.h", "#include <asm/fcntl.h>\n"),
            (
                "asm/fcntl.h",
                "#define O_DIRECT 0200000\n#include <asm-generic/fcntl.h>\n",
            ),
            (
                "asm-generic/fcntl.h",
                "#ifndef O_DIRECT\n#define O_DIRECT 00040000\n#endif\n#define O_RDONLY 0\n",
            ),
        ]);
        assert_eq!(state(&pp, "O_DIRECT"), Some(("65536".into(), true)));
        assert_eq!(state(&pp, "O_RDONLY"), Some(("0".into(), true)));
        let order: Vec<&str> = pp.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            order,
            vec!["asm-generic/fcntl.h", "asm/fcntl.h", "linux/fcntl.h"]
        );
    }

    #[test]
    fn test_arch_predefines_select_branch() {
        let pp = run(&[(
            "asm/bitsperlong.h",
            "#if defined(__x86_64__) && !defined(__ILP32__)\n# define __BITS_PER_LONG 64\n#else\n# define __BITS_PER_LONG 32\n#endif\n",
        )]);
        assert_eq!(state(&pp, "__BITS_PER_LONG"), Some(("64".into(), true)));
    }

    #[test]
    fn test_elif_chain() {
        let pp = run(&[(
            "linux/x.h",
            "#if 0\n#define V 1\n#elif 1\n#define V 2\n#elif 1\n#define V 3\n#else\n#define V 4\n#endif\n",
        )]);
        assert_eq!(state(&pp, "V"), Some(("2".into(), true)));
    }

    #[test]
    fn test_unknown_condition_with_disagreeing_branches_is_ambiguous() {
        let pp = run(&[(
            "linux/x.h",
            "#if __has_feature(foo)\n#define V 1\n#else\n#define V 2\n#endif\n",
        )]);
        assert_eq!(state(&pp, "V"), Some(("<ambiguous>".into(), false)));
    }

    #[test]
    fn test_unknown_condition_with_single_definition_is_uncertain() {
        let pp = run(&[(
            "linux/x.h",
            "#if __has_feature(foo)\n#define V 1\nstruct s { int a; };\n#endif\n",
        )]);
        assert_eq!(state(&pp, "V"), Some(("1".into(), false)));
        assert!(pp.files[0].code.contains(UNCERTAIN_MARKER));
    }

    #[test]
    fn test_condition_on_uncertain_macro_is_unknown() {
        let pp = run(&[(
            "linux/x.h",
            "#if __has_feature(x)\n#define EV 2\n#endif\n\
             #if EV == 2\n#define EW 1\n#else\n#define EW 0\n#endif\n\
             #ifdef EV\n#define EX 1\n#endif\n",
        )]);
        assert_eq!(state(&pp, "EV"), Some(("2".into(), false)));
        assert_eq!(state(&pp, "EW"), Some(("<ambiguous>".into(), false)));
        assert_eq!(state(&pp, "EX"), Some(("1".into(), false)));
    }

    #[test]
    fn test_redefinition_with_different_body_is_ambiguous() {
        let pp = run(&[("linux/x.h", "#define V 1\n#define V 2\n#define W 3\n#define W 3\n")]);
        assert_eq!(state(&pp, "V"), Some(("<ambiguous>".into(), false)));
        assert_eq!(state(&pp, "W"), Some(("3".into(), true)));
    }

    #[test]
    fn test_undef_then_redefine_is_clean() {
        let pp = run(&[("linux/x.h", "#define V 1\n#undef V\n#define V 2\n")]);
        assert_eq!(state(&pp, "V"), Some(("2".into(), true)));
    }

    #[test]
    fn test_function_like_macro_and_continuation() {
        let pp = run(&[(
            "linux/x.h",
            "#define _IOC(dir,type,nr,size) \\\n  (((dir) << 30) | (nr))\n#define LONG \\\n  (1 + \\\n   2)\n",
        )]);
        assert_eq!(state(&pp, "_IOC"), Some(("<function>".into(), true)));
        assert_eq!(state(&pp, "LONG"), Some(("( 1 + 2 )".into(), true)));
    }

    #[test]
    fn test_skipped_region_ignores_nested_conditionals() {
        let pp = run(&[(
            "linux/x.h",
            "#ifdef __KERNEL__\n#if 1\n#define K 1\n#else\n#define K 2\n#endif\n#endif\n",
        )]);
        assert!(pp.macros.get("K").is_none());
    }

    #[test]
    fn test_quoted_include_is_relative_first() {
        let pp = run(&[
            ("linux/x.h", "#include \"y.h\"\n"),
            ("linux/y.h", "#define FROM_RELATIVE 1\n"),
            ("y.h", "#define FROM_ROOT 1\n"),
        ]);
        assert!(pp.macros.get("FROM_RELATIVE").is_some());
        assert!(pp.macros.get("FROM_ROOT").is_none());
    }

    #[test]
    fn test_missing_primary_is_none() {
        let headers = MemoryHeaders::new();
        let target = Target::parse("x86_64").unwrap();
        let result = Preprocessor::new(&headers, &target).run("linux/errno.h").unwrap();
        assert!(result.is_none());
    }
}
