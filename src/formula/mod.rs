//! Formula text handling: lexing, a minimal parser, semantic normalization
//! and token-level edit scripts.

pub mod myers;
mod normalize;
mod parser;
mod token_diff;
mod tokenizer;

pub use normalize::{canonical_text, normalize_formula, serialize_expr};
pub use parser::{BinaryOp, Expr, UnaryOp, parse_formula};
pub use token_diff::{DiffOp, DiffOpKind, FormulaDiff, TokenDiffOptions, diff_formula, diff_tokens};
pub use tokenizer::{Token, TokenKind, tokenize, tokenize_lenient};

/// Formula text outside the supported grammar. Callers outside this module
/// only see it from [`parse_formula`] and [`tokenize`]; normalization and
/// diffing fall back instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("formula parse error at token {pos}: {message}")]
pub struct FormulaParseError {
    pub pos: usize,
    pub message: String,
}

impl FormulaParseError {
    pub fn new(pos: usize, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
        }
    }
}
