//! Tokenizer for formula expressions.
//!
//! The raw text is checked against the character allow-list and the
//! denylist before any token is produced, and every identifier, property
//! name and string literal is checked against the denylist again. All of
//! this runs before parsing or evaluation.

use crate::error::ExprError;

/// Characters formulas may contain besides ASCII alphanumerics and whitespace.
const ALLOWED_PUNCTUATION: &str = "+-*/%.()[],<>=!&|?:'\"";

/// Names that must never appear in an identifier.
pub const DENYLIST: [&str; 11] = [
    "eval",
    "Function",
    "this",
    "window",
    "global",
    "process",
    "require",
    "import",
    "export",
    "__proto__",
    "constructor",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    Bang,
    AndAnd,
    OrOr,
    Question,
    Colon,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Op(Op),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

/// Reject characters outside the allow-list.
pub fn check_allowed_chars(source: &str) -> Result<(), ExprError> {
    let disallowed = source.char_indices().find(|(_, c)| {
        !(c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(*c))
    });
    match disallowed {
        Some((position, c)) => Err(ExprError::unsafe_expr(format!(
            "character '{}' at {} is not allowed",
            c, position
        ))),
        None => Ok(()),
    }
}

/// Reject raw text containing a denylisted word anywhere.
pub fn check_denylist(source: &str) -> Result<(), ExprError> {
    match DENYLIST.iter().find(|denied| source.contains(*denied)) {
        Some(denied) => Err(ExprError::unsafe_expr(format!(
            "expression contains forbidden name '{}'",
            denied
        ))),
        None => Ok(()),
    }
}

/// Reject names that contain a denylisted word.
pub fn check_identifier(name: &str) -> Result<(), ExprError> {
    match DENYLIST.iter().find(|denied| name.contains(*denied)) {
        Some(denied) => Err(ExprError::unsafe_expr(format!(
            "identifier '{}' contains forbidden name '{}'",
            name, denied
        ))),
        None => Ok(()),
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    check_allowed_chars(source)?;
    check_denylist(source)?;

    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next_is_digit(bytes, pos)) {
            let (number, end) = lex_number(source, pos)?;
            tokens.push(Token {
                kind: TokenKind::Number(number),
                position: pos,
            });
            pos = end;
            continue;
        }

        if c.is_ascii_alphabetic() {
            let start = pos;
            while pos < bytes.len() && (bytes[pos] as char).is_ascii_alphanumeric() {
                pos += 1;
            }
            let name = &source[start..pos];
            check_identifier(name)?;
            tokens.push(Token {
                kind: TokenKind::Ident(name.to_string()),
                position: start,
            });
            continue;
        }

        if c == '\'' || c == '"' {
            let start = pos;
            pos += 1;
            while pos < bytes.len() && bytes[pos] as char != c {
                pos += 1;
            }
            if pos >= bytes.len() {
                return Err(ExprError::syntax(start, "unterminated string literal"));
            }
            let text = &source[start + 1..pos];
            check_identifier(text)?;
            tokens.push(Token {
                kind: TokenKind::Str(text.to_string()),
                position: start,
            });
            pos += 1;
            continue;
        }

        let (op, len) = lex_operator(bytes, pos)?;
        tokens.push(Token {
            kind: TokenKind::Op(op),
            position: pos,
        });
        pos += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: source.len(),
    });
    Ok(tokens)
}

fn next_is_digit(bytes: &[u8], pos: usize) -> bool {
    bytes
        .get(pos + 1)
        .map(|b| (*b as char).is_ascii_digit())
        .unwrap_or(false)
}

fn lex_number(source: &str, start: usize) -> Result<(f64, usize), ExprError> {
    let bytes = source.as_bytes();
    let mut pos = start;
    let digits = |pos: &mut usize| {
        while *pos < bytes.len() && (bytes[*pos] as char).is_ascii_digit() {
            *pos += 1;
        }
    };

    digits(&mut pos);
    if pos < bytes.len() && bytes[pos] == b'.' {
        pos += 1;
        digits(&mut pos);
    }
    if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
        let mut exp = pos + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && (bytes[exp] as char).is_ascii_digit() {
            pos = exp;
            digits(&mut pos);
        }
    }
    if pos < bytes.len() && (bytes[pos] as char).is_ascii_alphabetic() {
        return Err(ExprError::syntax(pos, "identifier directly after number"));
    }

    source[start..pos]
        .parse::<f64>()
        .map(|n| (n, pos))
        .map_err(|_| ExprError::syntax(start, "invalid number literal"))
}

fn lex_operator(bytes: &[u8], pos: usize) -> Result<(Op, usize), ExprError> {
    let at = |offset: usize| bytes.get(pos + offset).copied().unwrap_or(0);

    let matched = match (at(0), at(1), at(2)) {
        (b'=', b'=', b'=') => (Op::EqEqEq, 3),
        (b'!', b'=', b'=') => (Op::NotEqEq, 3),
        (b'=', b'=', _) => (Op::EqEq, 2),
        (b'!', b'=', _) => (Op::NotEq, 2),
        (b'<', b'=', _) => (Op::Le, 2),
        (b'>', b'=', _) => (Op::Ge, 2),
        (b'&', b'&', _) => (Op::AndAnd, 2),
        (b'|', b'|', _) => (Op::OrOr, 2),
        (b'+', _, _) => (Op::Plus, 1),
        (b'-', _, _) => (Op::Minus, 1),
        (b'*', _, _) => (Op::Star, 1),
        (b'/', _, _) => (Op::Slash, 1),
        (b'%', _, _) => (Op::Percent, 1),
        (b'.', _, _) => (Op::Dot, 1),
        (b'(', _, _) => (Op::LParen, 1),
        (b')', _, _) => (Op::RParen, 1),
        (b'[', _, _) => (Op::LBracket, 1),
        (b']', _, _) => (Op::RBracket, 1),
        (b',', _, _) => (Op::Comma, 1),
        (b'<', _, _) => (Op::Lt, 1),
        (b'>', _, _) => (Op::Gt, 1),
        (b'!', _, _) => (Op::Bang, 1),
        (b'?', _, _) => (Op::Question, 1),
        (b':', _, _) => (Op::Colon, 1),
        (b'=', _, _) => return Err(ExprError::syntax(pos, "assignment is not supported")),
        (b'&', _, _) | (b'|', _, _) => {
            return Err(ExprError::syntax(pos, "bitwise operators are not supported"))
        }
        (other, _, _) => {
            return Err(ExprError::syntax(
                pos,
                format!("unexpected character '{}'", other as char),
            ))
        }
    };
    Ok(matched)
}
