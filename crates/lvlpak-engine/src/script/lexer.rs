//! Lexer for section script lines.
//!
//! Scripts are line oriented, so the reader hands one (already substituted)
//! line at a time to [`tokenize`]. Comments start with `#` or `;` and run to
//! the end of the line.

use logos::Logos;
use std::ops::Range;
use thiserror::Error;

/// Script tokens
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"[#;][^\n]*")]
pub enum Token {
    /// `[`
    #[token("[")]
    LBracket,

    /// `]`
    #[token("]")]
    RBracket,

    /// `,` (optional argument separator)
    #[token(",")]
    Comma,

    /// `=`
    #[token("=")]
    Equals,

    /// Floating point literal
    #[regex(r"-?[0-9]+\.[0-9]+([eE][-+]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    /// Integer literal (decimal or `0x` hex)
    #[regex(r"-?[0-9]+", parse_decimal)]
    #[regex(r"-?0[xX][0-9a-fA-F]+", parse_hex)]
    Int(i64),

    /// Double-quoted string
    #[regex(r#""([^"\\\n]|\\.)*""#, lex_string)]
    Str(String),

    /// Bare word: keyword, section name or unquoted path
    #[regex(r"[A-Za-z_./\\][A-Za-z0-9_./\\-]*", |lex| lex.slice().to_string())]
    Word(String),
}

fn parse_decimal(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_hex(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    let slice = lex.slice();
    let (negative, digits) = match slice.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, slice),
    };
    let value = i64::from_str_radix(&digits[2..], 16).ok()?;
    Some(if negative { -value } else { value })
}

fn lex_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    unescape(&slice[1..slice.len() - 1])
}

/// Resolve backslash escapes; `None` on a malformed escape
fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            'x' => {
                // ASCII only; strings are emitted as UTF-8
                let hi = chars.next()?.to_digit(8)?;
                let lo = chars.next()?.to_digit(16)?;
                out.push(char::from((hi * 16 + lo) as u8));
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Unlexable input on a line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected input '{text}' at column {column}")]
pub struct LexError {
    /// Offending text
    pub text: String,
    /// 1-based column
    pub column: usize,
    /// Byte range within the line
    pub span: Range<usize>,
}

/// Tokenize one script line
pub fn tokenize(line: &str) -> Result<Vec<(Token, Range<usize>)>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(line);
    while let Some(result) = lexer.next() {
        let span = lexer.span();
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(LexError {
                    text: line[span.clone()].to_string(),
                    column: span.start + 1,
                    span,
                })
            }
        }
    }
    Ok(tokens)
}
