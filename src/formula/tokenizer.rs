use super::FormulaParseError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenKind {
    Number,
    /// Double-quoted string literal, quotes included.
    String,
    /// Cell references, names and function names.
    Identifier,
    /// Single-quoted sheet name, quotes included.
    QuotedName,
    /// A bracket span such as a structured reference or workbook prefix.
    Bracketed,
    /// Error literal such as `#REF!`.
    Error,
    Operator,
    Punct,
    Whitespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    /// Tokens whose spelling is case-insensitive in formulas.
    pub fn is_identifier_like(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Identifier | TokenKind::QuotedName | TokenKind::Bracketed | TokenKind::Error
        )
    }
}

/// Lexes formula text. Fails on unterminated strings, quoted names and
/// bracket spans.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, FormulaParseError> {
    let chars: Vec<char> = formula.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(&ch) = chars.get(pos) {
        let start = pos;
        let kind = match ch {
            c if c.is_whitespace() => {
                pos = scan_while(&chars, pos, char::is_whitespace);
                TokenKind::Whitespace
            }
            '"' => {
                pos = scan_quoted(&chars, pos, '"')
                    .ok_or_else(|| FormulaParseError::new(start, "unterminated string literal"))?;
                TokenKind::String
            }
            '\'' => {
                pos = scan_quoted(&chars, pos, '\'')
                    .ok_or_else(|| FormulaParseError::new(start, "unterminated quoted name"))?;
                TokenKind::QuotedName
            }
            '[' => {
                pos = scan_brackets(&chars, pos)
                    .ok_or_else(|| FormulaParseError::new(start, "unterminated bracket"))?;
                TokenKind::Bracketed
            }
            '#' => {
                pos = scan_error_literal(&chars, pos);
                TokenKind::Error
            }
            c if c.is_ascii_digit()
                || (c == '.' && chars.get(pos + 1).is_some_and(char::is_ascii_digit)) =>
            {
                pos = scan_number(&chars, pos);
                TokenKind::Number
            }
            c if is_identifier_start(c) => {
                pos = scan_while(&chars, pos, is_identifier_continue);
                TokenKind::Identifier
            }
            '<' | '>' => {
                pos += 1;
                if matches!((ch, chars.get(pos)), ('<', Some('=' | '>')) | ('>', Some('='))) {
                    pos += 1;
                }
                TokenKind::Operator
            }
            '+' | '-' | '*' | '/' | '^' | '&' | '%' | '=' => {
                pos += 1;
                TokenKind::Operator
            }
            _ => {
                pos += 1;
                TokenKind::Punct
            }
        };
        tokens.push(Token::new(kind, chars[start..pos].iter().collect::<String>()));
    }
    Ok(tokens)
}

/// Lexes formula text without ever failing. Text the strict lexer rejects is
/// split into whitespace runs, single operator characters and word runs.
pub fn tokenize_lenient(formula: &str) -> Vec<Token> {
    tokenize(formula).unwrap_or_else(|_| split_permissive(formula))
}

fn split_permissive(formula: &str) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let kind = if word.contains(['"', '\'', '[']) {
            TokenKind::String
        } else if word.chars().all(|c| c.is_ascii_digit() || c == '.') {
            TokenKind::Number
        } else {
            TokenKind::Identifier
        };
        tokens.push(Token::new(kind, std::mem::take(word)));
    };

    for ch in formula.chars() {
        if ch.is_whitespace() {
            flush(&mut word, &mut tokens);
            match tokens.last_mut() {
                Some(last) if last.kind == TokenKind::Whitespace => last.text.push(ch),
                _ => tokens.push(Token::new(TokenKind::Whitespace, ch)),
            }
        } else if "+-*/^&%=<>".contains(ch) {
            flush(&mut word, &mut tokens);
            tokens.push(Token::new(TokenKind::Operator, ch));
        } else if "(),;:!{}".contains(ch) {
            flush(&mut word, &mut tokens);
            tokens.push(Token::new(TokenKind::Punct, ch));
        } else {
            word.push(ch);
        }
    }
    flush(&mut word, &mut tokens);
    tokens
}

pub(crate) fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '\\' || ch == '$'
}

pub(crate) fn is_identifier_continue(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '.' | '$' | '\\' | '?')
}

fn scan_while(chars: &[char], mut pos: usize, pred: impl Fn(char) -> bool) -> usize {
    while chars.get(pos).is_some_and(|c| pred(*c)) {
        pos += 1;
    }
    pos
}

/// Position after the closing quote. A doubled quote is an escaped quote.
pub(crate) fn scan_quoted(chars: &[char], start: usize, quote: char) -> Option<usize> {
    let mut pos = start + 1;
    while let Some(&ch) = chars.get(pos) {
        if ch == quote {
            if chars.get(pos + 1) == Some(&quote) {
                pos += 2;
                continue;
            }
            return Some(pos + 1);
        }
        pos += 1;
    }
    None
}

/// Position after the bracket that closes the one at `start`, tracking
/// nesting and `'`-escaped characters.
fn scan_brackets(chars: &[char], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut pos = start;
    while let Some(&ch) = chars.get(pos) {
        match ch {
            '\'' => pos += 1,
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(pos + 1);
                }
            }
            _ => {}
        }
        pos += 1;
    }
    None
}

fn scan_error_literal(chars: &[char], start: usize) -> usize {
    let mut pos = start + 1;
    while let Some(&ch) = chars.get(pos) {
        pos += 1;
        if ch == '!' || ch == '?' {
            break;
        }
        if !(ch.is_ascii_alphanumeric() || ch == '/' || ch == '_') {
            pos -= 1;
            break;
        }
    }
    pos
}

fn scan_number(chars: &[char], start: usize) -> usize {
    let mut pos = scan_while(chars, start, |c| c.is_ascii_digit());
    if chars.get(pos) == Some(&'.') {
        pos = scan_while(chars, pos + 1, |c| c.is_ascii_digit());
    }
    if matches!(chars.get(pos), Some('e' | 'E')) {
        let mut exp = pos + 1;
        if matches!(chars.get(exp), Some('+' | '-')) {
            exp += 1;
        }
        if chars.get(exp).is_some_and(char::is_ascii_digit) {
            pos = scan_while(chars, exp, |c| c.is_ascii_digit());
        }
    }
    pos
}
