//! C tokenizer and integer constant-expression evaluator
//!
//! Used for `#if` conditions (preprocessor arithmetic, 64-bit intmax)
//! and for macro/enumerator values (C arithmetic with the target's
//! `long` width). Literal typing and the usual arithmetic conversions
//! follow C so that `~0UL` or `1U << 31` come out right per target.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Token {
    Ident(String),
    /// Integer literal: value, unsigned suffix, long suffix count, non-decimal base
    Int {
        value: u128,
        unsigned: bool,
        longs: u8,
        decimal: bool,
    },
    Char(i64),
    Str,
    Punct(&'static str),
    /// Literal that did not parse (e.g. floating point)
    Invalid(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) | Token::Invalid(s) => f.write_str(s),
            Token::Int { value, .. } => write!(f, "{}", value),
            Token::Char(c) => write!(f, "'{}'", c),
            Token::Str => f.write_str("\"...\""),
            Token::Punct(p) => f.write_str(p),
        }
    }
}

const PUNCTS: [&str; 47] = [
    "<<=", ">>=", "...", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "->", "++", "--", "##",
    "+=", "-=", "*=", "/=", "|=", "&=", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&",
    "|", "^", "?", ":", "(", ")", "[", "]", "{", "}", ";", ",", ".", "#", "@",
];

/// Split C source text (comments already removed) into tokens
pub(crate) fn tokenize(src: &str) -> Vec<Token> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
        } else if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(src[start..i].to_string()));
        } else if c.is_ascii_digit() || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                i += 1;
            }
            tokens.push(parse_number(&src[start..i]));
        } else if c == b'\'' {
            let (token, next) = parse_char(bytes, i);
            tokens.push(token);
            i = next;
        } else if c == b'"' {
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            tokens.push(Token::Str);
        } else {
            let rest = &src[i..];
            match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
                Some(p) => {
                    tokens.push(Token::Punct(*p));
                    i += p.len();
                }
                None => {
                    let ch = rest.chars().next().map_or(1, char::len_utf8);
                    tokens.push(Token::Invalid(rest[..ch].to_string()));
                    i += ch;
                }
            }
        }
    }
    tokens
}

fn parse_number(text: &str) -> Token {
    let lower = text.to_ascii_lowercase();
    let digits_end = lower
        .char_indices()
        .rev()
        .take_while(|(_, c)| *c == 'u' || *c == 'l')
        .last()
        .map_or(lower.len(), |(idx, _)| idx);
    let (digits, suffix) = lower.split_at(digits_end);
    // Hex digits may end in letters but never in 'u'/'l', so the split above is safe
    let unsigned = suffix.contains('u');
    let longs = suffix.matches('l').count() as u8;
    if suffix.len() != usize::from(unsigned) + usize::from(longs) || longs > 2 {
        return Token::Invalid(text.to_string());
    }
    let (radix, body, decimal) = if let Some(hex) = digits.strip_prefix("0x") {
        (16, hex, false)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        (2, bin, false)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..], false)
    } else {
        (10, digits, true)
    };
    match u128::from_str_radix(body, radix) {
        Ok(value) if !body.is_empty() => Token::Int {
            value,
            unsigned,
            longs,
            decimal,
        },
        _ => Token::Invalid(text.to_string()),
    }
}

fn parse_char(bytes: &[u8], start: usize) -> (Token, usize) {
    let mut i = start + 1;
    let value = match bytes.get(i) {
        Some(b'\\') => {
            i += 1;
            match bytes.get(i) {
                Some(b'n') => 10,
                Some(b't') => 9,
                Some(b'r') => 13,
                Some(b'0') => 0,
                Some(b'a') => 7,
                Some(b'b') => 8,
                Some(b'f') => 12,
                Some(b'v') => 11,
                Some(b'x') => {
                    let hex_start = i + 1;
                    let mut end = hex_start;
                    while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
                        end += 1;
                    }
                    let text = std::str::from_utf8(&bytes[hex_start..end]).unwrap_or("");
                    i = end - 1;
                    i64::from_str_radix(text, 16).unwrap_or(0)
                }
                Some(other) => i64::from(*other),
                None => 0,
            }
        }
        Some(other) => i64::from(*other),
        None => 0,
    };
    i += 1;
    if bytes.get(i) == Some(&b'\'') {
        (Token::Char(value), i + 1)
    } else {
        while i < bytes.len() && bytes[i] != b'\'' {
            i += 1;
        }
        (Token::Invalid("char".to_string()), i + 1)
    }
}

/// Why an expression could not be evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EvalError {
    Syntax(String),
    /// Identifier with no macro or enumerator value
    Unresolved(String),
    /// Needs a function-like macro, `sizeof`, or another construct we do not expand
    Unevaluable(String),
    DivideByZero,
    BadShift,
    /// Depends on a macro whose definition is ambiguous
    Ambiguous(String),
    /// `#if` test of a macro that may or may not be defined
    Uncertain(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Syntax(msg) => write!(f, "syntax error: {}", msg),
            EvalError::Unresolved(name) => write!(f, "unresolved identifier '{}'", name),
            EvalError::Unevaluable(what) => write!(f, "cannot evaluate {}", what),
            EvalError::DivideByZero => f.write_str("division by zero"),
            EvalError::BadShift => f.write_str("shift count out of range"),
            EvalError::Ambiguous(name) => write!(f, "depends on ambiguous macro '{}'", name),
            EvalError::Uncertain(name) => write!(f, "'{}' is conditionally defined", name),
        }
    }
}

/// A macro as seen by the evaluator
pub(crate) enum MacroRef<'a> {
    /// `certain` is false when the definition sits under an undecidable condition
    Object { body: &'a [Token], certain: bool },
    Function,
    Ambiguous,
    Undefined,
}

/// Name lookup for evaluation
pub(crate) trait Scope {
    fn macro_ref(&self, name: &str) -> MacroRef<'_>;

    /// `Some(defined?)`, or `None` when it depends on an unknown condition
    fn is_defined(&self, name: &str) -> Option<bool>;

    fn enumerator(&self, name: &str) -> Option<i64>;

    /// Size in bytes of a parenthesized type name, when the scope knows types
    fn size_of(&self, _type_name: &[Token]) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalMode {
    /// `#if` arithmetic: everything is intmax_t/uintmax_t, unknown names are 0
    Preprocessor,
    /// C constant arithmetic with the given `long` width in bits
    Constant { long_bits: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntType {
    bits: u32,
    unsigned: bool,
    rank: u8,
}

const INT: IntType = IntType {
    bits: 32,
    unsigned: false,
    rank: 1,
};

#[derive(Debug, Clone, Copy)]
struct CInt {
    value: i128,
    ty: IntType,
}

impl CInt {
    fn new(value: i128, ty: IntType) -> Self {
        Self {
            value: normalize(value, ty),
            ty,
        }
    }

    fn truth(self) -> bool {
        self.value != 0
    }
}

fn normalize(value: i128, ty: IntType) -> i128 {
    let modulus = 1i128 << ty.bits;
    let mut v = value.rem_euclid(modulus);
    if !ty.unsigned && v >= modulus >> 1 {
        v -= modulus;
    }
    v
}

fn fits(value: u128, ty: IntType) -> bool {
    let max = if ty.unsigned {
        (1u128 << ty.bits) - 1
    } else {
        (1u128 << (ty.bits - 1)) - 1
    };
    value <= max
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    fn from_punct(p: &str) -> Option<(BinOp, u8)> {
        let op = match p {
            "*" => (BinOp::Mul, 10),
            "/" => (BinOp::Div, 10),
            "%" => (BinOp::Rem, 10),
            "+" => (BinOp::Add, 9),
            "-" => (BinOp::Sub, 9),
            "<<" => (BinOp::Shl, 8),
            ">>" => (BinOp::Shr, 8),
            "<" => (BinOp::Lt, 7),
            "<=" => (BinOp::Le, 7),
            ">" => (BinOp::Gt, 7),
            ">=" => (BinOp::Ge, 7),
            "==" => (BinOp::Eq, 6),
            "!=" => (BinOp::Ne, 6),
            "&" => (BinOp::BitAnd, 5),
            "^" => (BinOp::BitXor, 4),
            "|" => (BinOp::BitOr, 3),
            "&&" => (BinOp::And, 2),
            "||" => (BinOp::Or, 1),
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Lit(Token),
    Ident(String),
    Defined(String),
    Call(String),
    /// Operand of `sizeof`; `None` for `__alignof__` or an unparenthesized operand
    Sizeof(Option<Vec<Token>>),
    Cast(Option<CastType>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// Integer type named by a cast; `long_count` is resolved against the mode
#[derive(Debug, Clone, Copy)]
struct CastType {
    unsigned: bool,
    base: CastBase,
}

#[derive(Debug, Clone, Copy)]
enum CastBase {
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

const TYPE_WORDS: [&str; 12] = [
    "unsigned", "signed", "__signed__", "int", "long", "short", "char", "const", "volatile",
    "void", "struct", "union",
];

fn is_type_word(name: &str) -> bool {
    TYPE_WORDS.contains(&name)
        || name.ends_with("_t")
        || matches!(
            name,
            "__u8" | "__u16" | "__u32" | "__u64" | "__s8" | "__s16" | "__s32" | "__s64"
                | "__le16" | "__le32" | "__le64" | "__be16" | "__be32" | "__be64"
        )
}

/// Parenthesis and operator nesting accepted in one expression
const MAX_NESTING: usize = 256;

/// Longest token sequence parsed as one expression
const MAX_EXPRESSION_TOKENS: usize = 4096;

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    mode: EvalMode,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_punct(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Punct(p)) => Some(p),
            _ => None,
        }
    }

    fn bump(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, punct: &str) -> Result<(), EvalError> {
        match self.bump() {
            Some(Token::Punct(p)) if *p == punct => Ok(()),
            other => Err(EvalError::Syntax(format!(
                "expected '{}', found {}",
                punct,
                other.map_or("end of input".to_string(), |t| format!("'{}'", t))
            ))),
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::Unevaluable("expression nesting too deep".into()));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr, EvalError> {
        let cond = self.parse_binary(1)?;
        if self.peek_punct() == Some("?") {
            self.pos += 1;
            let then = self.parse_expr()?;
            self.expect(":")?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Cond(
                Box::new(cond),
                Box::new(then),
                Box::new(otherwise),
            ));
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec)) = self.peek_punct().and_then(BinOp::from_punct) {
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        self.nested(Self::parse_prefixed)
    }

    fn parse_prefixed(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek_punct() {
            Some("-") => Some(UnOp::Neg),
            Some("+") => Some(UnOp::Plus),
            Some("!") => Some(UnOp::Not),
            Some("~") => Some(UnOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        if self.peek_punct() == Some("(") {
            if let Some(cast) = self.try_cast() {
                let operand = self.parse_unary()?;
                return Ok(Expr::Cast(cast, Box::new(operand)));
            }
        }
        self.parse_primary()
    }

    /// Recognize `( type-words )` and consume it; returns the integer cast type if known
    fn try_cast(&mut self) -> Option<Option<CastType>> {
        let mut end = self.pos + 1;
        let mut words = Vec::new();
        loop {
            match self.tokens.get(end) {
                Some(Token::Ident(name)) if is_type_word(name) => words.push(name.as_str()),
                Some(Token::Ident(name)) if words.first() == Some(&"struct") || words.first() == Some(&"union") => {
                    words.push(name.as_str())
                }
                Some(Token::Punct("*")) if !words.is_empty() => words.push("*"),
                Some(Token::Punct(")")) if !words.is_empty() => break,
                _ => return None,
            }
            end += 1;
        }
        // A cast must be followed by an operand, not an operator or the end
        match self.tokens.get(end + 1) {
            Some(Token::Punct(p)) if !matches!(*p, "(" | "-" | "+" | "~" | "!") => return None,
            None => return None,
            _ => {}
        }
        self.pos = end + 1;
        Some(cast_type(&words))
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.bump() {
            Some(token @ (Token::Int { .. } | Token::Char(_))) => Ok(Expr::Lit(token.clone())),
            Some(Token::Punct("(")) => {
                let inner = self.parse_expr()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "defined" && self.mode == EvalMode::Preprocessor => {
                let parenthesized = self.peek_punct() == Some("(");
                if parenthesized {
                    self.pos += 1;
                }
                let target = match self.bump() {
                    Some(Token::Ident(target)) => target.clone(),
                    _ => return Err(EvalError::Syntax("defined without identifier".into())),
                };
                if parenthesized {
                    self.expect(")")?;
                }
                Ok(Expr::Defined(target))
            }
            Some(Token::Ident(name)) if name == "sizeof" || name == "__alignof__" => {
                let operand = self.group();
                Ok(Expr::Sizeof(operand.filter(|_| name == "sizeof")))
            }
            Some(Token::Ident(name)) => {
                if self.peek_punct() == Some("(") {
                    self.group();
                    return Ok(Expr::Call(name.clone()));
                }
                Ok(Expr::Ident(name.clone()))
            }
            Some(Token::Invalid(text)) => Err(EvalError::Syntax(format!("invalid literal '{}'", text))),
            Some(other) => Err(EvalError::Syntax(format!("unexpected '{}'", other))),
            None => Err(EvalError::Syntax("unexpected end of expression".into())),
        }
    }

    /// Consume a balanced parenthesized group if one starts here, returning its contents
    fn group(&mut self) -> Option<Vec<Token>> {
        if self.peek_punct() != Some("(") {
            return None;
        }
        let start = self.pos + 1;
        let mut depth = 0usize;
        while let Some(token) = self.bump() {
            match token {
                Token::Punct("(") => depth += 1,
                Token::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(self.tokens[start..self.pos - 1].to_vec());
                    }
                }
                _ => {}
            }
        }
        None
    }
}

fn cast_type(words: &[&str]) -> Option<CastType> {
    if words.contains(&"*") || words.iter().any(|w| matches!(*w, "void" | "struct" | "union")) {
        return None;
    }
    let unsigned = words.contains(&"unsigned");
    let longs = words.iter().filter(|w| **w == "long").count();
    let base = if words.contains(&"char") {
        CastBase::Char
    } else if words.contains(&"short") {
        CastBase::Short
    } else if longs >= 2 {
        CastBase::LongLong
    } else if longs == 1 {
        CastBase::Long
    } else if words
        .iter()
        .all(|w| matches!(*w, "unsigned" | "signed" | "__signed__" | "int" | "const" | "volatile"))
    {
        CastBase::Int
    } else {
        return None;
    };
    Some(CastType { unsigned, base })
}

struct Evaluator<'s, S: Scope + ?Sized> {
    scope: &'s S,
    mode: EvalMode,
    expanding: Vec<String>,
    /// Expression nodes being evaluated, across macro expansions
    depth: usize,
}

const MAX_EXPANSION_DEPTH: usize = 64;

const MAX_EVAL_DEPTH: usize = 512;

impl<'s, S: Scope + ?Sized> Evaluator<'s, S> {
    fn long_bits(&self) -> u32 {
        match self.mode {
            EvalMode::Preprocessor => 64,
            EvalMode::Constant { long_bits } => long_bits,
        }
    }

    fn ty(&self, bits: u32, unsigned: bool, rank: u8) -> IntType {
        match self.mode {
            EvalMode::Preprocessor => IntType {
                bits: 64,
                unsigned,
                rank: 3,
            },
            EvalMode::Constant { .. } => IntType {
                bits,
                unsigned,
                rank,
            },
        }
    }

    fn literal(&self, token: &Token) -> Result<CInt, EvalError> {
        let (value, unsigned, longs, decimal) = match token {
            Token::Int {
                value,
                unsigned,
                longs,
                decimal,
            } => (*value, *unsigned, *longs, *decimal),
            Token::Char(c) => return Ok(CInt::new(i128::from(*c), self.ty(32, false, 1))),
            other => return Err(EvalError::Syntax(format!("not a literal: {}", other))),
        };
        let lb = self.long_bits();
        let int = self.ty(32, false, 1);
        let uint = self.ty(32, true, 1);
        let long = self.ty(lb, false, 2);
        let ulong = self.ty(lb, true, 2);
        let llong = self.ty(64, false, 3);
        let ullong = self.ty(64, true, 3);
        let candidates: Vec<IntType> = match (unsigned, longs, decimal) {
            (false, 0, true) => vec![int, long, llong],
            (false, 0, false) => vec![int, uint, long, ulong, llong, ullong],
            (true, 0, _) => vec![uint, ulong, ullong],
            (false, 1, true) => vec![long, llong],
            (false, 1, false) => vec![long, ulong, llong, ullong],
            (true, 1, _) => vec![ulong, ullong],
            (false, _, true) => vec![llong],
            (false, _, false) => vec![llong, ullong],
            (true, _, _) => vec![ullong],
        };
        let ty = candidates
            .into_iter()
            .find(|ty| fits(value, *ty))
            .or_else(|| (self.mode == EvalMode::Preprocessor).then_some(ullong))
            .ok_or_else(|| EvalError::Syntax(format!("integer literal {} too large", value)))?;
        if !fits(value, ty) {
            return Err(EvalError::Syntax(format!("integer literal {} too large", value)));
        }
        Ok(CInt::new(value as i128, ty))
    }

    fn common(&self, a: IntType, b: IntType) -> IntType {
        if a.unsigned == b.unsigned {
            return if a.rank >= b.rank { a } else { b };
        }
        let (u, s) = if a.unsigned { (a, b) } else { (b, a) };
        if u.rank >= s.rank {
            u
        } else if s.bits > u.bits {
            s
        } else {
            IntType {
                unsigned: true,
                ..s
            }
        }
    }

    fn bool_int(&self, b: bool) -> CInt {
        CInt::new(i128::from(b), self.ty(32, false, 1))
    }

    fn eval(&mut self, expr: &Expr) -> Result<CInt, EvalError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::Unevaluable("expression nesting too deep".into()));
        }
        self.depth += 1;
        let result = self.eval_node(expr);
        self.depth -= 1;
        result
    }

    fn eval_node(&mut self, expr: &Expr) -> Result<CInt, EvalError> {
        match expr {
            Expr::Lit(token) => self.literal(token),
            Expr::Ident(name) => self.ident(name),
            Expr::Defined(name) => match self.scope.is_defined(name) {
                Some(defined) => Ok(self.bool_int(defined)),
                None => Err(EvalError::Uncertain(name.clone())),
            },
            Expr::Call(name) => match self.scope.macro_ref(name) {
                MacroRef::Ambiguous => Err(EvalError::Ambiguous(name.clone())),
                _ => Err(EvalError::Unevaluable(format!("call to '{}'", name))),
            },
            Expr::Sizeof(Some(type_name)) => match self.scope.size_of(type_name) {
                Some(size) => {
                    let size_t = self.ty(self.long_bits(), true, 2);
                    Ok(CInt::new(i128::from(size), size_t))
                }
                None => Err(EvalError::Unevaluable("sizeof".into())),
            },
            Expr::Sizeof(None) => Err(EvalError::Unevaluable("sizeof".into())),
            Expr::Cast(cast, inner) => {
                let value = self.eval(inner)?;
                let Some(cast) = cast else {
                    return Ok(value);
                };
                let lb = self.long_bits();
                let ty = match cast.base {
                    CastBase::Char => self.ty(8, cast.unsigned, 0),
                    CastBase::Short => self.ty(16, cast.unsigned, 0),
                    CastBase::Int => self.ty(32, cast.unsigned, 1),
                    CastBase::Long => self.ty(lb, cast.unsigned, 2),
                    CastBase::LongLong => self.ty(64, cast.unsigned, 3),
                };
                let converted = CInt::new(value.value, ty);
                // Narrow types promote to int after the conversion
                if ty.rank == 0 {
                    Ok(CInt::new(converted.value, self.ty(32, false, 1)))
                } else {
                    Ok(converted)
                }
            }
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                Ok(match op {
                    UnOp::Plus => v,
                    UnOp::Neg => CInt::new(v.value.wrapping_neg(), v.ty),
                    UnOp::BitNot => CInt::new(!v.value, v.ty),
                    UnOp::Not => self.bool_int(!v.truth()),
                })
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                if !self.eval(lhs)?.truth() {
                    return Ok(self.bool_int(false));
                }
                let r = self.eval(rhs)?.truth();
                Ok(self.bool_int(r))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                if self.eval(lhs)?.truth() {
                    return Ok(self.bool_int(true));
                }
                let r = self.eval(rhs)?.truth();
                Ok(self.bool_int(r))
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                self.binary(*op, a, b)
            }
            Expr::Cond(cond, then, otherwise) => {
                let c = self.eval(cond)?;
                let t = self.eval(then);
                let o = self.eval(otherwise);
                let (chosen, other) = if c.truth() { (t?, o) } else { (o?, t) };
                match other {
                    Ok(other) => Ok(CInt::new(chosen.value, self.common(chosen.ty, other.ty))),
                    Err(_) => Ok(chosen),
                }
            }
        }
    }

    fn binary(&self, op: BinOp, a: CInt, b: CInt) -> Result<CInt, EvalError> {
        if matches!(op, BinOp::Shl | BinOp::Shr) {
            if b.value < 0 || b.value >= i128::from(a.ty.bits) {
                return Err(EvalError::BadShift);
            }
            let n = b.value as u32;
            let value = match op {
                BinOp::Shl => a.value << n,
                _ => a.value >> n,
            };
            return Ok(CInt::new(value, a.ty));
        }
        let ty = self.common(a.ty, b.ty);
        let x = normalize(a.value, ty);
        let y = normalize(b.value, ty);
        let value = match op {
            BinOp::Mul => x.wrapping_mul(y),
            BinOp::Div | BinOp::Rem if y == 0 => return Err(EvalError::DivideByZero),
            BinOp::Div => x / y,
            BinOp::Rem => x % y,
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::BitAnd => x & y,
            BinOp::BitXor => x ^ y,
            BinOp::BitOr => x | y,
            BinOp::Lt => return Ok(self.bool_int(x < y)),
            BinOp::Le => return Ok(self.bool_int(x <= y)),
            BinOp::Gt => return Ok(self.bool_int(x > y)),
            BinOp::Ge => return Ok(self.bool_int(x >= y)),
            BinOp::Eq => return Ok(self.bool_int(x == y)),
            BinOp::Ne => return Ok(self.bool_int(x != y)),
            BinOp::Shl | BinOp::Shr | BinOp::And | BinOp::Or => {
                return Err(EvalError::Syntax(format!("operator {:?} out of place", op)))
            }
        };
        Ok(CInt::new(value, ty))
    }

    fn ident(&mut self, name: &str) -> Result<CInt, EvalError> {
        let scope = self.scope;
        let expanding = self.expanding.iter().any(|n| n == name);
        if !expanding {
            match scope.macro_ref(name) {
                MacroRef::Object { certain: false, .. } if self.mode == EvalMode::Preprocessor => {
                    return Err(EvalError::Uncertain(name.to_string()))
                }
                MacroRef::Object { body, .. } => {
                    if self.expanding.len() >= MAX_EXPANSION_DEPTH {
                        return Err(EvalError::Unevaluable(format!(
                            "macro nesting deeper than {}",
                            MAX_EXPANSION_DEPTH
                        )));
                    }
                    self.expanding.push(name.to_string());
                    let result = self.eval_tokens(body);
                    self.expanding.pop();
                    return result;
                }
                MacroRef::Function => {
                    return Err(EvalError::Unevaluable(format!(
                        "function-like macro '{}' used as a value",
                        name
                    )))
                }
                MacroRef::Ambiguous => return Err(EvalError::Ambiguous(name.to_string())),
                MacroRef::Undefined => {}
            }
        }
        if let Some(value) = scope.enumerator(name) {
            return Ok(CInt::new(i128::from(value), self.ty(32, false, 1)));
        }
        match self.mode {
            EvalMode::Preprocessor => Ok(self.bool_int(false)),
            EvalMode::Constant { .. } => Err(EvalError::Unresolved(name.to_string())),
        }
    }

    fn eval_tokens(&mut self, tokens: &[Token]) -> Result<CInt, EvalError> {
        if tokens.len() > MAX_EXPRESSION_TOKENS {
            return Err(EvalError::Unevaluable(format!(
                "expression of {} tokens",
                tokens.len()
            )));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            mode: self.mode,
            depth: 0,
        };
        let expr = parser.parse_expr()?;
        if let Some(extra) = parser.peek() {
            return Err(EvalError::Syntax(format!("trailing token '{}'", extra)));
        }
        self.eval(&expr)
    }
}

/// Evaluate a token sequence as a C integer expression
pub(crate) fn evaluate<S: Scope + ?Sized>(
    tokens: &[Token],
    scope: &S,
    mode: EvalMode,
) -> Result<i128, EvalError> {
    let mut evaluator = Evaluator {
        scope,
        mode,
        expanding: Vec::new(),
        depth: 0,
    };
    evaluator.eval_tokens(tokens).map(|v| v.value)
}
