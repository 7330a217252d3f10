//! Typedefs, enumerators and struct/union layouts from preprocessed header code

use super::expr::{evaluate, tokenize, EvalError, EvalMode, MacroRef, Scope, Token};
use super::preprocess::{FileCode, MacroTable, UNCERTAIN_MARKER};
use crate::target::DataModel;
use crate::value::{FieldLayout, StructLayout};
use std::collections::{HashMap, HashSet};
use std::fmt;

const QUALIFIERS: [&str; 14] = [
    "const", "volatile", "__volatile__", "__const", "__extension__", "extern", "static",
    "inline", "__inline", "__inline__", "register", "restrict", "__restrict", "__user",
];

const BASE_WORDS: [&str; 13] = [
    "void", "char", "short", "int", "long", "signed", "unsigned", "__signed__", "__signed",
    "float", "double", "_Bool", "__int128",
];

/// Why a type could not be laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeclError {
    Unsupported(String),
    UnknownType(String),
    Incomplete(String),
    Syntax(String),
    Eval(EvalError),
}

impl fmt::Display for DeclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclError::Unsupported(what) => write!(f, "unsupported {}", what),
            DeclError::UnknownType(name) => write!(f, "unknown type '{}'", name),
            DeclError::Incomplete(name) => write!(f, "incomplete type '{}'", name),
            DeclError::Syntax(msg) => write!(f, "syntax error: {}", msg),
            DeclError::Eval(e) => write!(f, "array bound: {}", e),
        }
    }
}

impl From<EvalError> for DeclError {
    fn from(e: EvalError) -> Self {
        DeclError::Eval(e)
    }
}

#[derive(Debug, Clone)]
enum CType {
    Scalar { size: u64, align: u64 },
    Void,
    Function,
    Record(String),
    /// `None` length is a flexible array member
    Array(Box<CType>, Option<u64>),
}

#[derive(Debug, Clone)]
pub(crate) struct EnumConst {
    pub name: String,
    pub value: Result<i128, EvalError>,
    pub origin: String,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordDef {
    /// `"struct tag"` or `"union tag"`
    pub name: String,
    pub layout: Result<StructLayout, DeclError>,
    pub origin: String,
    /// Defined again with a different layout
    pub ambiguous: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Declarations {
    pub enumerators: Vec<EnumConst>,
    pub records: Vec<RecordDef>,
}

/// Parse every file in order, registering enumerators in `macros` as they appear
pub(crate) fn parse_declarations(
    files: &[FileCode],
    macros: &mut MacroTable,
    model: DataModel,
) -> Declarations {
    let mut parser = DeclParser::new(macros, model);
    for file in files {
        parser.origin = file.path.clone();
        let tokens = tokenize(&file.code);
        for decl in split_top_level(&tokens) {
            parser.declaration(decl);
        }
    }
    parser.finish()
}

/// Split file-scope code at `;`, dropping function definitions
fn split_top_level(tokens: &[Token]) -> Vec<&[Token]> {
    let mut decls = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Punct("(" | "[") => depth += 1,
            Token::Punct(")" | "]") => depth = depth.saturating_sub(1),
            Token::Punct("{") if depth == 0 && i > 0 && tokens[i - 1] == Token::Punct(")") => {
                let mut braces = 0usize;
                while i < tokens.len() {
                    match tokens[i] {
                        Token::Punct("{") => braces += 1,
                        Token::Punct("}") => {
                            braces -= 1;
                            if braces == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                start = i + 1;
            }
            Token::Punct("{") => depth += 1,
            Token::Punct("}") => depth = depth.saturating_sub(1),
            Token::Punct(";") if depth == 0 => {
                if i > start {
                    decls.push(&tokens[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    decls
}

/// Split on `sep` outside any brackets
fn split_nested<'t>(tokens: &'t [Token], sep: &str) -> Vec<&'t [Token]> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Punct("(" | "[" | "{") => depth += 1,
            Token::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
            Token::Punct(p) if depth == 0 && *p == sep => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts.retain(|p| !p.is_empty());
    parts
}

fn is_attribute(token: &Token) -> bool {
    matches!(token, Token::Ident(n) if n == "__attribute__" || n == "__attribute")
}

/// Two definitions agree if they lay out identically or neither can be laid out
fn same_layout(a: &Result<StructLayout, DeclError>, b: &Result<StructLayout, DeclError>) -> bool {
    match (a, b) {
        (Ok(a), Ok(b)) => a == b,
        (Err(_), Err(_)) => true,
        _ => false,
    }
}

/// Struct records nested inside one another
const MAX_RECORD_NESTING: usize = 32;

const MAX_ARRAY_RANK: usize = 8;

fn overflow() -> DeclError {
    DeclError::Unsupported("layout overflows u64".into())
}

fn align_up(offset: u64, align: u64) -> Result<u64, DeclError> {
    let align = align.max(1);
    offset.div_ceil(align).checked_mul(align).ok_or_else(overflow)
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_ident(&self) -> Option<&'t str> {
        match self.peek() {
            Some(Token::Ident(name)) => Some(name),
            _ => None,
        }
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        let hit = self.is_punct(punct);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        let hit = self.peek_ident() == Some(word);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Consume `open ... close` and return what is between
    fn group(&mut self, open: &str, close: &str) -> Result<&'t [Token], DeclError> {
        if !self.eat(open) {
            return Err(DeclError::Syntax(format!("expected '{}'", open)));
        }
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(token) = self.tokens.get(self.pos) {
            self.pos += 1;
            match token {
                Token::Punct(p) if *p == open => depth += 1,
                Token::Punct(p) if *p == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(&self.tokens[start..self.pos - 1]);
                    }
                }
                _ => {}
            }
        }
        Err(DeclError::Syntax(format!("unbalanced '{}'", open)))
    }
}

struct DeclParser<'m> {
    macros: &'m mut MacroTable,
    model: DataModel,
    typedefs: HashMap<String, Result<CType, DeclError>>,
    records: HashMap<String, Result<StructLayout, DeclError>>,
    /// Tagged records in definition order, with their origin file
    record_order: Vec<(String, String)>,
    redefined: HashSet<String>,
    enumerators: Vec<EnumConst>,
    anonymous: usize,
    nesting: usize,
    origin: String,
}

impl<'m> DeclParser<'m> {
    fn new(macros: &'m mut MacroTable, model: DataModel) -> Self {
        let word = CType::Scalar {
            size: model.long_width,
            align: model.long_width,
        };
        let mut typedefs = HashMap::new();
        // stddef.h / stdint.h names the headers may use without including
        for name in ["size_t", "ssize_t", "ptrdiff_t", "intptr_t", "uintptr_t"] {
            typedefs.insert(name.to_string(), Ok(word.clone()));
        }
        for (bits, size, align) in [
            (8, 1, 1),
            (16, 2, 2),
            (32, 4, 4),
            (64, 8, model.long_long_align),
        ] {
            for sign in ["", "u"] {
                typedefs.insert(format!("{}int{}_t", sign, bits), Ok(CType::Scalar { size, align }));
            }
        }
        Self {
            macros,
            model,
            typedefs,
            records: HashMap::new(),
            record_order: Vec::new(),
            redefined: HashSet::new(),
            enumerators: Vec::new(),
            anonymous: 0,
            nesting: 0,
            origin: String::new(),
        }
    }

    fn finish(self) -> Declarations {
        let mut records = Vec::with_capacity(self.record_order.len());
        for (name, origin) in self.record_order {
            if let Some(layout) = self.records.get(&name) {
                records.push(RecordDef {
                    ambiguous: self.redefined.contains(&name),
                    name,
                    layout: layout.clone(),
                    origin,
                });
            }
        }
        Declarations {
            enumerators: self.enumerators,
            records,
        }
    }

    fn long_bits(&self) -> u32 {
        (self.model.long_width * 8) as u32
    }

    fn pointer(&self) -> CType {
        CType::Scalar {
            size: self.model.pointer_width,
            align: self.model.pointer_width,
        }
    }

    fn declaration(&mut self, decl: &[Token]) {
        if decl
            .iter()
            .any(|t| matches!(t, Token::Ident(n) if n == UNCERTAIN_MARKER))
        {
            tracing::debug!("{}: skipping conditionally compiled declaration", self.origin);
            return;
        }
        let mut cur = Cursor::new(decl);
        while cur.eat_ident("__extension__") {}
        let is_typedef = cur.eat_ident("typedef");
        if let Err(e) = self.declare(&mut cur, is_typedef) {
            if is_typedef {
                if let Some(name) = declared_name(decl) {
                    tracing::debug!("{}: typedef {} unusable: {}", self.origin, name, e);
                    self.typedefs.insert(name, Err(e));
                }
            } else {
                tracing::trace!("{}: ignoring declaration: {}", self.origin, e);
            }
        }
    }

    fn declare(&mut self, cur: &mut Cursor<'_>, is_typedef: bool) -> Result<(), DeclError> {
        let base = self.parse_specifier(cur)?;
        if !is_typedef {
            return Ok(());
        }
        loop {
            let (name, ty) = self.parse_declarator(cur, base.clone())?;
            self.typedefs.insert(name, Ok(ty));
            if !cur.eat(",") {
                return Ok(());
            }
        }
    }

    fn parse_specifier(&mut self, cur: &mut Cursor<'_>) -> Result<CType, DeclError> {
        let mut words: Vec<&str> = Vec::new();
        let mut ty: Option<CType> = None;
        while let Some(token) = cur.peek() {
            if is_attribute(token) {
                return Err(DeclError::Unsupported("attribute".into()));
            }
            let Token::Ident(name) = token else {
                break;
            };
            let name = name.as_str();
            if QUALIFIERS.contains(&name) {
                cur.pos += 1;
            } else if BASE_WORDS.contains(&name) && ty.is_none() {
                words.push(name);
                cur.pos += 1;
            } else if ty.is_some() || !words.is_empty() {
                break;
            } else if name == "struct" || name == "union" {
                ty = Some(self.parse_record(cur)?);
            } else if name == "enum" {
                ty = Some(self.parse_enum(cur)?);
            } else if let Some(found) = self.typedefs.get(name) {
                ty = Some(found.clone()?);
                cur.pos += 1;
            } else {
                return Err(DeclError::UnknownType(name.to_string()));
            }
        }
        match ty {
            Some(ty) => Ok(ty),
            None if !words.is_empty() => self.scalar(&words),
            None => Err(DeclError::Syntax("missing type specifier".into())),
        }
    }

    fn scalar(&self, words: &[&str]) -> Result<CType, DeclError> {
        let has = |w: &str| words.contains(&w);
        let longs = words.iter().filter(|w| **w == "long").count();
        let m = self.model;
        let (size, align) = if has("void") {
            return Ok(CType::Void);
        } else if has("__int128") {
            return Err(DeclError::Unsupported("__int128".into()));
        } else if has("double") {
            if longs > 0 {
                return Err(DeclError::Unsupported("long double".into()));
            }
            (8, m.double_align)
        } else if has("float") {
            (4, 4)
        } else if has("char") || has("_Bool") {
            (1, 1)
        } else if has("short") {
            (2, 2)
        } else if longs >= 2 {
            (8, m.long_long_align)
        } else if longs == 1 {
            (m.long_width, m.long_width)
        } else {
            (4, 4)
        };
        Ok(CType::Scalar { size, align })
    }

    fn parse_record(&mut self, cur: &mut Cursor<'_>) -> Result<CType, DeclError> {
        let keyword = match cur.peek_ident() {
            Some(k @ ("struct" | "union")) => k,
            _ => return Err(DeclError::Syntax("expected struct or union".into())),
        };
        cur.pos += 1;
        if cur.peek().is_some_and(is_attribute) {
            return Err(DeclError::Unsupported("attribute".into()));
        }
        let tag = cur.peek_ident().map(|t| t.to_string());
        if tag.is_some() {
            cur.pos += 1;
        }
        if !cur.is_punct("{") {
            return match tag {
                Some(tag) => Ok(CType::Record(format!("{} {}", keyword, tag))),
                None => Err(DeclError::Syntax(format!("{} without tag or body", keyword))),
            };
        }
        let body = cur.group("{", "}")?;
        let mut layout = if self.nesting >= MAX_RECORD_NESTING {
            Err(DeclError::Unsupported("record nesting".into()))
        } else {
            self.nesting += 1;
            let layout = self.layout_record(keyword == "union", body);
            self.nesting -= 1;
            layout
        };
        if cur.peek().is_some_and(is_attribute) {
            layout = Err(DeclError::Unsupported("attribute".into()));
        }
        let name = match &tag {
            Some(tag) => format!("{} {}", keyword, tag),
            None => {
                self.anonymous += 1;
                format!("{} <anonymous {}>", keyword, self.anonymous)
            }
        };
        if let Err(e) = &layout {
            tracing::debug!("{}: no layout for {}: {}", self.origin, name, e);
        }
        match self.records.get(&name) {
            None => {
                self.records.insert(name.clone(), layout);
                if tag.is_some() {
                    self.record_order.push((name.clone(), self.origin.clone()));
                }
            }
            Some(existing) if !same_layout(existing, &layout) => {
                tracing::debug!("{}: {} redefined with a different layout", self.origin, name);
                self.redefined.insert(name.clone());
            }
            Some(_) => {}
        }
        Ok(CType::Record(name))
    }

    fn layout_record(&mut self, is_union: bool, body: &[Token]) -> Result<StructLayout, DeclError> {
        let mut fields = Vec::new();
        let mut offset = 0u64;
        let mut align = 1u64;
        for member in split_nested(body, ";") {
            if member.iter().any(is_attribute) {
                return Err(DeclError::Unsupported("attribute".into()));
            }
            let mut cur = Cursor::new(member);
            let base = self.parse_specifier(&mut cur)?;
            if cur.at_end() {
                return Err(DeclError::Unsupported("anonymous member".into()));
            }
            loop {
                let (name, ty) = self.parse_declarator(&mut cur, base.clone())?;
                if cur.is_punct(":") {
                    return Err(DeclError::Unsupported("bitfield".into()));
                }
                let (size, field_align) = self.size_align(&ty)?;
                align = align.max(field_align);
                let field_offset = if is_union {
                    offset = offset.max(size);
                    0
                } else {
                    let at = align_up(offset, field_align)?;
                    offset = at.checked_add(size).ok_or_else(overflow)?;
                    at
                };
                fields.push(FieldLayout {
                    name,
                    offset: field_offset,
                    size,
                });
                if !cur.eat(",") {
                    break;
                }
            }
            if !cur.at_end() {
                return Err(DeclError::Syntax("unexpected tokens after member".into()));
            }
        }
        Ok(StructLayout {
            size: align_up(offset, align)?,
            align,
            fields,
        })
    }

    fn parse_enum(&mut self, cur: &mut Cursor<'_>) -> Result<CType, DeclError> {
        cur.pos += 1;
        if cur.peek_ident().is_some() {
            cur.pos += 1;
        }
        if cur.is_punct("{") {
            let body = cur.group("{", "}")?;
            self.define_enumerators(body);
        }
        Ok(CType::Scalar { size: 4, align: 4 })
    }

    fn define_enumerators(&mut self, body: &[Token]) {
        let mode = EvalMode::Constant {
            long_bits: self.long_bits(),
        };
        let mut next: Result<i128, EvalError> = Ok(0);
        for item in split_nested(body, ",") {
            let Some(Token::Ident(name)) = item.first() else {
                continue;
            };
            let value = match item.get(1) {
                Some(Token::Punct("=")) => evaluate(&item[2..], &*self, mode),
                _ => next.clone(),
            };
            next = value.clone().map(|v| v + 1);
            if let Ok(v) = value {
                if let Ok(v) = i64::try_from(v) {
                    self.macros.set_enumerator(name, v);
                }
            }
            self.enumerators.push(EnumConst {
                name: name.clone(),
                value,
                origin: self.origin.clone(),
            });
        }
    }

    fn parse_declarator(&mut self, cur: &mut Cursor<'_>, base: CType) -> Result<(String, CType), DeclError> {
        let mut ty = base;
        while cur.eat("*") {
            ty = self.pointer();
            while cur.peek_ident().is_some_and(|w| QUALIFIERS.contains(&w)) {
                cur.pos += 1;
            }
        }
        let name = if cur.is_punct("(") {
            // (*name)(params) or (name)
            cur.pos += 1;
            let mut indirect = false;
            while cur.eat("*") {
                indirect = true;
            }
            let name = match cur.peek_ident() {
                Some(name) => name.to_string(),
                None => return Err(DeclError::Syntax("expected declarator name".into())),
            };
            cur.pos += 1;
            if !cur.eat(")") {
                return Err(DeclError::Unsupported("complex declarator".into()));
            }
            if cur.is_punct("(") {
                cur.group("(", ")")?;
                ty = if indirect { self.pointer() } else { CType::Function };
            } else if indirect {
                ty = self.pointer();
            }
            name
        } else {
            match cur.peek() {
                Some(token) if is_attribute(token) => {
                    return Err(DeclError::Unsupported("attribute".into()))
                }
                Some(Token::Ident(name)) => {
                    cur.pos += 1;
                    name.clone()
                }
                _ => return Err(DeclError::Syntax("expected declarator name".into())),
            }
        };
        if cur.is_punct("(") {
            cur.group("(", ")")?;
            ty = CType::Function;
        }
        let mut dims = Vec::new();
        while cur.is_punct("[") {
            if dims.len() >= MAX_ARRAY_RANK {
                return Err(DeclError::Unsupported("array rank".into()));
            }
            let bound = cur.group("[", "]")?;
            dims.push(if bound.is_empty() {
                None
            } else {
                Some(self.array_bound(bound)?)
            });
        }
        for dim in dims.into_iter().rev() {
            ty = CType::Array(Box::new(ty), dim);
        }
        if cur.peek().is_some_and(is_attribute) {
            return Err(DeclError::Unsupported("attribute".into()));
        }
        Ok((name, ty))
    }

    fn array_bound(&self, tokens: &[Token]) -> Result<u64, DeclError> {
        let mode = EvalMode::Constant {
            long_bits: self.long_bits(),
        };
        let value = evaluate(tokens, self, mode)?;
        u64::try_from(value).map_err(|_| DeclError::Syntax(format!("array bound {} out of range", value)))
    }

    fn size_align(&self, ty: &CType) -> Result<(u64, u64), DeclError> {
        match ty {
            CType::Scalar { size, align } => Ok((*size, *align)),
            CType::Void => Err(DeclError::Incomplete("void".into())),
            CType::Function => Err(DeclError::Unsupported("function type".into())),
            CType::Record(name) => match self.records.get(name) {
                Some(Ok(layout)) => Ok((layout.size, layout.align)),
                Some(Err(e)) => Err(e.clone()),
                None => Err(DeclError::Incomplete(name.clone())),
            },
            CType::Array(elem, len) => {
                let (size, align) = self.size_align(elem)?;
                let size = size.checked_mul(len.unwrap_or(0)).ok_or_else(overflow)?;
                Ok((size, align))
            }
        }
    }

    /// Size of a `sizeof` operand naming a type: specifiers followed by `*`s
    fn type_name_size(&self, tokens: &[Token]) -> Result<u64, DeclError> {
        if tokens.last() == Some(&Token::Punct("*")) {
            return Ok(self.model.pointer_width);
        }
        let mut words = Vec::new();
        let mut ty = None;
        let mut i = 0;
        while i < tokens.len() {
            let Token::Ident(name) = &tokens[i] else {
                return Err(DeclError::Unsupported("sizeof expression".into()));
            };
            match name.as_str() {
                word if QUALIFIERS.contains(&word) => {}
                word if BASE_WORDS.contains(&word) => words.push(word),
                keyword @ ("struct" | "union") => {
                    let Some(Token::Ident(tag)) = tokens.get(i + 1) else {
                        return Err(DeclError::Syntax(format!("{} without tag", keyword)));
                    };
                    ty = Some(CType::Record(format!("{} {}", keyword, tag)));
                    i += 1;
                }
                other => match self.typedefs.get(other) {
                    Some(found) => ty = Some(found.clone()?),
                    None => return Err(DeclError::UnknownType(other.to_string())),
                },
            }
            i += 1;
        }
        let ty = match ty {
            Some(ty) => ty,
            None => self.scalar(&words)?,
        };
        self.size_align(&ty).map(|(size, _)| size)
    }
}

impl Scope for DeclParser<'_> {
    fn macro_ref(&self, name: &str) -> MacroRef<'_> {
        self.macros.macro_ref(name)
    }

    fn is_defined(&self, name: &str) -> Option<bool> {
        self.macros.is_defined(name)
    }

    fn enumerator(&self, name: &str) -> Option<i64> {
        self.macros.enumerator(name)
    }

    fn size_of(&self, type_name: &[Token]) -> Option<u64> {
        self.type_name_size(type_name).ok()
    }
}

/// Best guess at the name a failed typedef declares
fn declared_name(decl: &[Token]) -> Option<String> {
    let mut depth = 0usize;
    let mut last = None;
    for token in decl {
        match token {
            Token::Punct("(" | "[" | "{") => depth += 1,
            Token::Punct(")" | "]" | "}") => depth = depth.saturating_sub(1),
            Token::Ident(name) if depth == 0 && !is_attribute(token) => last = Some(name.clone()),
            _ => {}
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::preprocess::MacroBody;
    use crate::target::Target;

    fn model(triple: &str) -> DataModel {
        Target::parse(triple).unwrap().data_model()
    }

    fn parse_with(code: &str, macros: &mut MacroTable, triple: &str) -> Declarations {
        let files = vec![FileCode {
            path: "linux/test.h".to_string(),
            code: code.to_string(),
        }];
        parse_declarations(&files, macros, model(triple))
    }

    fn parse(code: &str, triple: &str) -> Declarations {
        parse_with(code, &mut MacroTable::default(), triple)
    }

    fn layout<'d>(decls: &'d Declarations, name: &str) -> &'d Result<StructLayout, DeclError> {
        &decls
            .records
            .iter()
            .find(|r| r.name == name)
            .unwrap_or_else(|| panic!("{} not declared", name))
            .layout
    }

    const TIMESPEC: &str = "
        typedef long __kernel_long_t;
        typedef __kernel_long_t __kernel_old_time_t;
        struct timespec { __kernel_old_time_t tv_sec; long tv_nsec; };
        struct itimerspec { struct timespec it_interval; struct timespec it_value; };
    ";

    #[test]
    fn test_timespec_follows_data_model() {
        let decls = parse(TIMESPEC, "x86_64-unknown-linux-gnu");
        let ts = layout(&decls, "struct timespec").as_ref().unwrap();
        assert_eq!((ts.size, ts.align), (16, 8));
        assert_eq!(ts.field("tv_nsec").map(|f| f.offset), Some(8));
        let its = layout(&decls, "struct itimerspec").as_ref().unwrap();
        assert_eq!(its.size, 32);
        assert_eq!(its.field("it_value").map(|f| f.offset), Some(16));

        let decls = parse(TIMESPEC, "i686-unknown-linux-gnu");
        assert_eq!(layout(&decls, "struct timespec").as_ref().unwrap().size, 8);
    }

    #[test]
    fn test_long_long_alignment_on_i386() {
        let code = "struct s { int a; long long b; };";
        let x86 = parse(code, "i686-unknown-linux-gnu");
        assert_eq!(layout(&x86, "struct s").as_ref().unwrap().size, 12);
        let arm = parse(code, "armv7-unknown-linux-gnueabihf");
        assert_eq!(layout(&arm, "struct s").as_ref().unwrap().size, 16);
    }

    #[test]
    fn test_union_and_sizeof_bound() {
        let mut macros = MacroTable::default();
        macros.define("_K_SS_MAXSIZE", MacroBody::Object(tokenize("128")), true, "t");
        let code = "
            struct sockaddr_storage_like {
                unsigned short ss_family;
                char __data[_K_SS_MAXSIZE - sizeof(unsigned short)];
            };
            union sigval { int sival_int; void *sival_ptr; };
        ";
        let decls = parse_with(code, &mut macros, "x86_64-unknown-linux-gnu");
        let ss = layout(&decls, "struct sockaddr_storage_like").as_ref().unwrap();
        assert_eq!((ss.size, ss.align), (128, 2));
        let sv = layout(&decls, "union sigval").as_ref().unwrap();
        assert_eq!((sv.size, sv.align), (8, 8));
        assert!(sv.fields.iter().all(|f| f.offset == 0));
    }

    #[test]
    fn test_enumerators_number_sequentially() {
        let mut macros = MacroTable::default();
        let decls = parse_with(
            "enum { IPPROTO_IP = 0, IPPROTO_ICMP = 1, IPPROTO_TCP = 6, NEXT, LATER = NEXT + 10, };",
            &mut macros,
            "x86_64",
        );
        let values: Vec<(&str, i128)> = decls
            .enumerators
            .iter()
            .map(|e| (e.name.as_str(), *e.value.as_ref().unwrap()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("IPPROTO_IP", 0),
                ("IPPROTO_ICMP", 1),
                ("IPPROTO_TCP", 6),
                ("NEXT", 7),
                ("LATER", 17)
            ]
        );
        assert_eq!(macros.enumerator("IPPROTO_TCP"), Some(6));
    }

    #[test]
    fn test_unsupported_constructs_have_no_layout() {
        let code = "
            struct bits { unsigned int a : 3; };
            struct anon { union { int x; long y; }; };
            struct packed { int a; } __attribute__((packed));
            struct unknown { mystery_t m; };
            struct uses_bad { struct bits b; };
        ";
        let decls = parse(code, "x86_64");
        assert_eq!(
            layout(&decls, "struct bits"),
            &Err(DeclError::Unsupported("bitfield".into()))
        );
        assert_eq!(
            layout(&decls, "struct anon"),
            &Err(DeclError::Unsupported("anonymous member".into()))
        );
        assert!(layout(&decls, "struct packed").is_err());
        assert_eq!(
            layout(&decls, "struct unknown"),
            &Err(DeclError::UnknownType("mystery_t".into()))
        );
        assert!(layout(&decls, "struct uses_bad").is_err());
    }

    #[test]
    fn test_oversized_arrays_have_no_layout() {
        let code = "
            struct big { int a[0x4000000000000000]; };
            struct big2 { char a[0xffffffffffffffff]; int b; };
            struct big3 { char a[0xfffffffffffffff0]; char b[0x10]; };
            struct fits { char a[0x10]; };
        ";
        let decls = parse(code, "x86_64");
        let overflow = Err(DeclError::Unsupported("layout overflows u64".into()));
        assert_eq!(layout(&decls, "struct big"), &overflow);
        assert_eq!(layout(&decls, "struct big2"), &overflow);
        assert_eq!(layout(&decls, "struct big3"), &overflow);
        assert_eq!(layout(&decls, "struct fits").as_ref().unwrap().size, 16);
    }

    #[test]
    fn test_deep_records_and_arrays_have_no_layout() {
        let depth = 40;
        let mut code = String::new();
        for i in 0..depth {
            code.push_str(&format!("struct n{} {{ ", i));
        }
        code.push_str("int leaf;");
        for i in (0..depth).rev() {
            code.push_str(&format!(" }} m{};", i));
        }
        let decls = parse(&code, "x86_64");
        assert!(layout(&decls, "struct n0").is_err());

        let decls = parse("struct cube { char a[1][1][1][1][1][1][1][1][1]; };", "x86_64");
        assert_eq!(
            layout(&decls, "struct cube"),
            &Err(DeclError::Unsupported("array rank".into()))
        );
    }

    #[test]
    fn test_redefined_record_is_ambiguous_only_when_layout_differs() {
        let code = "
            struct same { int a; };
            struct same { int a; };
            struct changed { int a; };
            struct changed { long a; };
        ";
        let decls = parse(code, "x86_64");
        let ambiguous = |name: &str| decls.records.iter().find(|r| r.name == name).map(|r| r.ambiguous);
        assert_eq!(ambiguous("struct same"), Some(false));
        assert_eq!(ambiguous("struct changed"), Some(true));
    }

    #[test]
    fn test_function_pointers_and_bodies() {
        let code = "
            typedef void __signalfn_t(int);
            typedef __signalfn_t *__sighandler_t;
            static __inline__ int helper(int x) { if (x) { return 1; } return 0; }
            struct sigaction_like { __sighandler_t sa_handler; void (*sa_restorer)(void); unsigned long sa_flags; };
        ";
        let decls = parse(code, "x86_64");
        let sa = layout(&decls, "struct sigaction_like").as_ref().unwrap();
        assert_eq!(sa.size, 24);
        assert_eq!(sa.field("sa_flags").map(|f| f.offset), Some(16));
    }

    #[test]
    fn test_flexible_array_and_builtin_types() {
        let code = "struct buf { size_t len; uint32_t flags; char data[]; };";
        let decls = parse(code, "x86_64");
        let buf = layout(&decls, "struct buf").as_ref().unwrap();
        assert_eq!((buf.size, buf.align), (16, 8));
        assert_eq!(buf.field("data").map(|f| (f.offset, f.size)), Some((12, 0)));
    }

    #[test]
    fn test_uncertain_declarations_are_skipped() {
        let code = format!("{} struct maybe {{ int a; }};\nstruct sure {{ int a; }};", UNCERTAIN_MARKER);
        let decls = parse(&code, "x86_64");
        assert!(decls.records.iter().all(|r| r.name != "struct maybe"));
        assert!(layout(&decls, "struct sure").is_ok());
    }
}
