use super::myers::{Edit, myers_diff};
use super::normalize::normalize_formula;
use super::tokenizer::{Token, TokenKind, tokenize_lenient};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenDiffOptions {
    /// Ignore whitespace tokens and identifier case.
    pub normalize: bool,
    /// Combined token count of the trimmed middle region above which Myers
    /// is skipped in favor of a full replace.
    pub myers_token_limit: usize,
}

impl Default for TokenDiffOptions {
    fn default() -> Self {
        Self {
            normalize: false,
            myers_token_limit: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffOpKind {
    Equal,
    Delete,
    Insert,
}

/// A run of consecutive tokens sharing one edit kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOp<T = String> {
    #[serde(rename = "type")]
    pub kind: DiffOpKind,
    pub tokens: Vec<T>,
}

impl<T> DiffOp<T> {
    pub fn new(kind: DiffOpKind, tokens: Vec<T>) -> Self {
        Self { kind, tokens }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaDiff {
    pub equal: bool,
    pub ops: Vec<DiffOp>,
}

impl FormulaDiff {
    /// Number of inserted plus deleted tokens.
    pub fn change_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| op.kind != DiffOpKind::Equal)
            .map(|op| op.tokens.len())
            .sum()
    }
}

fn push_coalesced<T: Clone>(ops: &mut Vec<DiffOp<T>>, kind: DiffOpKind, token: &T) {
    match ops.last_mut() {
        Some(last) if last.kind == kind => last.tokens.push(token.clone()),
        _ => ops.push(DiffOp::new(kind, vec![token.clone()])),
    }
}

/// Edit script from `old` to `new`, with consecutive same-kind edits
/// coalesced. Equal runs carry the old side's tokens.
pub fn diff_tokens<T: Clone>(
    old: &[T],
    new: &[T],
    eq: impl Fn(&T, &T) -> bool,
    myers_token_limit: usize,
) -> Vec<DiffOp<T>> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|&(a, b)| eq(a, b))
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|&(a, b)| eq(a, b))
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut ops = Vec::new();
    for token in &old[..prefix] {
        push_coalesced(&mut ops, DiffOpKind::Equal, token);
    }

    if old_mid.len() + new_mid.len() > myers_token_limit {
        tracing::debug!(
            old = old_mid.len(),
            new = new_mid.len(),
            "token diff over limit, emitting full replace"
        );
        for token in old_mid {
            push_coalesced(&mut ops, DiffOpKind::Delete, token);
        }
        for token in new_mid {
            push_coalesced(&mut ops, DiffOpKind::Insert, token);
        }
    } else {
        for edit in myers_diff(old_mid, new_mid, &eq) {
            match edit {
                Edit::Equal(i, _) => push_coalesced(&mut ops, DiffOpKind::Equal, &old_mid[i]),
                Edit::Delete(i) => push_coalesced(&mut ops, DiffOpKind::Delete, &old_mid[i]),
                Edit::Insert(j) => push_coalesced(&mut ops, DiffOpKind::Insert, &new_mid[j]),
            }
        }
    }

    for token in &old[old.len() - suffix..] {
        push_coalesced(&mut ops, DiffOpKind::Equal, token);
    }
    ops
}

fn loose_eq(a: &Token, b: &Token) -> bool {
    a.kind == b.kind
        && if a.is_identifier_like() {
            a.text.eq_ignore_ascii_case(&b.text)
        } else {
            a.text == b.text
        }
}

/// Token-level edit script between two formulas for display. `equal` is
/// exact text equality, or canonical-form equality in normalize mode.
pub fn diff_formula(old: &str, new: &str, options: &TokenDiffOptions) -> FormulaDiff {
    let prepare = |formula: &str| -> Vec<Token> {
        let tokens = tokenize_lenient(formula);
        if options.normalize {
            tokens
                .into_iter()
                .filter(|token| token.kind != TokenKind::Whitespace)
                .collect()
        } else {
            tokens
        }
    };
    let (old_tokens, new_tokens) = (prepare(old), prepare(new));

    let ops = if options.normalize {
        diff_tokens(&old_tokens, &new_tokens, loose_eq, options.myers_token_limit)
    } else {
        diff_tokens(
            &old_tokens,
            &new_tokens,
            |a, b| a.text == b.text,
            options.myers_token_limit,
        )
    };
    let ops = ops
        .into_iter()
        .map(|op| DiffOp::new(op.kind, op.tokens.into_iter().map(|token| token.text).collect()))
        .collect();

    let equal = if options.normalize {
        normalize_formula(old) == normalize_formula(new)
    } else {
        old == new
    };
    FormulaDiff { equal, ops }
}
