//! Canonical formula text used for equivalence checks.
//!
//! Formulas inside the minimal grammar are parsed and re-serialized with
//! commutative operands sorted. Everything else goes through a text-level
//! canonicalization that only touches case and insignificant whitespace.

use super::parser::{BinaryOp, Expr, UnaryOp, parse_formula};
use super::tokenizer::{is_identifier_continue, is_identifier_start, scan_quoted};
use std::collections::HashSet;

const PREC_CONCAT: u8 = 1;
const PREC_ADD: u8 = 2;
const PREC_MUL: u8 = 3;
const PREC_POW: u8 = 4;
const PREC_UNARY: u8 = 5;
const PREC_PERCENT: u8 = 6;
const PREC_RANGE: u8 = 7;
const PREC_ATOM: u8 = 8;

/// Returns a canonical `=`-prefixed form. Two formulas are treated as the
/// same formula iff their canonical forms are equal.
pub fn normalize_formula(formula: &str) -> String {
    let Ok(expr) = parse_formula(formula) else {
        return canonical_text(formula);
    };
    let normalized = format!("={}", serialize_expr(&expr));
    // Sorting can push a nested operand deeper into a chain. The canonical
    // form has to fit the nesting budget too, or it would not map to itself.
    if parse_formula(&normalized).is_err() {
        return canonical_text(formula);
    }
    normalized
}

/// Canonical serialization of a parsed formula, without the leading `=`.
pub fn serialize_expr(expr: &Expr) -> String {
    render(expr).text
}

struct Rendered {
    text: String,
    prec: u8,
}

impl Rendered {
    fn new(text: String, prec: u8) -> Self {
        Self { text, prec }
    }

    fn atom(text: String) -> Self {
        Self::new(text, PREC_ATOM)
    }

    /// Parenthesizes when binding looser than `min`.
    fn wrap(self, min: u8) -> String {
        if self.prec < min {
            format!("({})", self.text)
        } else {
            self.text
        }
    }
}

fn render(expr: &Expr) -> Rendered {
    match expr {
        Expr::Number(value) => render_number(*value),
        Expr::String(text) => Rendered::atom(format!("\"{}\"", text.replace('"', "\"\""))),
        Expr::CellRef { sheet, address } => {
            Rendered::atom(format!("{}{}", sheet_prefix(sheet.as_deref()), address.to_uppercase()))
        }
        Expr::Name { sheet, name } => {
            Rendered::atom(format!("{}{}", sheet_prefix(sheet.as_deref()), name.to_uppercase()))
        }
        Expr::Unary { op, operand } => {
            if let (UnaryOp::Minus, Expr::Number(value)) = (op, &**operand) {
                return render_number(-value);
            }
            let sign = match op {
                UnaryOp::Plus => "+",
                UnaryOp::Minus => "-",
            };
            Rendered::new(format!("{sign}{}", render(operand).wrap(PREC_UNARY)), PREC_UNARY)
        }
        Expr::Percent(operand) => {
            Rendered::new(format!("{}%", render(operand).wrap(PREC_PERCENT)), PREC_PERCENT)
        }
        Expr::Range { start, end } => Rendered::new(
            format!(
                "{}:{}",
                render(start).wrap(PREC_RANGE),
                render(end).wrap(PREC_RANGE + 1)
            ),
            PREC_RANGE,
        ),
        Expr::Function { name, args } => {
            let name = name.to_uppercase();
            let mut rendered: Vec<String> = if is_commutative_function(&name) {
                let mut flat = Vec::new();
                flatten_call(&name, args, &mut flat);
                flat.into_iter().map(|arg| render(arg).text).collect()
            } else {
                args.iter().map(|arg| render(arg).text).collect()
            };
            if is_commutative_function(&name) {
                rendered.sort();
            }
            Rendered::atom(format!("{name}({})", rendered.join(",")))
        }
        Expr::Binary { op, left, right } => {
            let prec = binary_prec(*op);
            if matches!(op, BinaryOp::Add | BinaryOp::Mul) {
                let mut operands = Vec::new();
                flatten_chain(*op, expr, &mut operands);
                // Every operand sits on both sides of some sorted neighbor,
                // so it must bind strictly tighter than the chain.
                let mut parts: Vec<String> = operands
                    .into_iter()
                    .map(|operand| render(operand).wrap(prec + 1))
                    .collect();
                parts.sort();
                return Rendered::new(parts.join(op.symbol()), prec);
            }
            Rendered::new(
                format!(
                    "{}{}{}",
                    render(left).wrap(prec),
                    op.symbol(),
                    render(right).wrap(prec + 1)
                ),
                prec,
            )
        }
    }
}

fn render_number(value: f64) -> Rendered {
    if value == 0.0 {
        return Rendered::atom("0".to_string());
    }
    // f64 Display never switches to exponent notation.
    let text = value.to_string();
    let prec = if value < 0.0 { PREC_UNARY } else { PREC_ATOM };
    Rendered::new(text, prec)
}

fn binary_prec(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Concat => PREC_CONCAT,
        BinaryOp::Add | BinaryOp::Sub => PREC_ADD,
        BinaryOp::Mul | BinaryOp::Div => PREC_MUL,
        BinaryOp::Pow => PREC_POW,
    }
}

fn is_commutative_function(name: &str) -> bool {
    matches!(name, "SUM" | "PRODUCT" | "MAX" | "MIN" | "AND" | "OR")
}

fn flatten_chain<'a>(op: BinaryOp, expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Binary {
            op: inner,
            left,
            right,
        } if *inner == op => {
            flatten_chain(op, left, out);
            flatten_chain(op, right, out);
        }
        other => out.push(other),
    }
}

fn flatten_call<'a>(name: &str, args: &'a [Expr], out: &mut Vec<&'a Expr>) {
    for arg in args {
        match arg {
            Expr::Function {
                name: inner,
                args: inner_args,
            } if inner.eq_ignore_ascii_case(name) => flatten_call(name, inner_args, out),
            other => out.push(other),
        }
    }
}

fn sheet_prefix(sheet: Option<&str>) -> String {
    let Some(sheet) = sheet else {
        return String::new();
    };
    let upper = sheet.to_uppercase();
    let bare = upper.chars().next().is_some_and(is_identifier_start)
        && upper.chars().all(is_identifier_continue);
    if bare {
        format!("{upper}!")
    } else {
        format!("'{}'!", upper.replace('\'', "''"))
    }
}

/// Text-level canonical form for formulas outside the parser's grammar:
/// uppercases and drops insignificant whitespace, leaving string literals
/// and quoted sheet names untouched. Bracket spans keep their inner
/// whitespace.
pub fn canonical_text(formula: &str) -> String {
    let trimmed = formula.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let body = trimmed.strip_prefix('=').unwrap_or(trimmed);
    let chars: Vec<char> = body.chars().collect();
    let mut out = String::from("=");
    let mut pos = 0;

    while let Some(&ch) = chars.get(pos) {
        match ch {
            '"' | '\'' => {
                let end = scan_quoted(&chars, pos, ch).unwrap_or(chars.len());
                out.extend(&chars[pos..end]);
                pos = end;
            }
            '[' => {
                let end = bracket_span_end(&chars, pos).unwrap_or(chars.len());
                out.extend(chars[pos..end].iter().flat_map(|c| c.to_uppercase()));
                pos = end;
            }
            c if c.is_whitespace() => {
                while chars.get(pos).is_some_and(|c| c.is_whitespace()) {
                    pos += 1;
                }
                let joins_operands = out.chars().last().is_some_and(ends_operand)
                    && chars.get(pos).is_some_and(|c| starts_operand(*c));
                if joins_operands {
                    out.push(' ');
                }
            }
            _ => {
                out.extend(ch.to_uppercase());
                pos += 1;
            }
        }
    }
    out
}

fn ends_operand(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '$' | '.' | ')' | ']' | '\'' | '"')
}

fn starts_operand(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '$' | '.' | '\'' | '"' | '[')
}

/// End of the bracket span opening at `start`. A span that directly
/// precedes a sheet name with `!`, a quoted sheet name or a bare name is an
/// external workbook prefix and closes at its first `]`; anything else is a
/// structured reference.
fn bracket_span_end(chars: &[char], start: usize) -> Option<usize> {
    let follows_name = start > 0 && chars.get(start - 1).is_some_and(|c| is_identifier_continue(*c));
    if !follows_name {
        if let Some(close) = chars[start + 1..].iter().position(|c| *c == ']' || *c == '[') {
            let close = start + 1 + close;
            if chars[close] == ']' && starts_workbook_target(chars, close + 1) {
                return Some(close + 1);
            }
        }
    }
    structured_reference_end(chars, start)
}

fn starts_workbook_target(chars: &[char], pos: usize) -> bool {
    match chars.get(pos) {
        Some('\'') => true,
        Some(&c) if is_identifier_start(c) => true,
        _ => false,
    }
}

/// Matches a structured reference. Inside it `]]` is ambiguous between an
/// escaped `]` and two closing brackets, so both readings are explored
/// depth-first, remembering states that are already known to fail.
fn structured_reference_end(chars: &[char], start: usize) -> Option<usize> {
    let mut stack = vec![(start + 1, 1usize)];
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    while let Some((mut pos, mut depth)) = stack.pop() {
        if !seen.insert((pos, depth)) {
            continue;
        }
        loop {
            match chars.get(pos) {
                None => break,
                Some('[') => {
                    depth += 1;
                    pos += 1;
                }
                Some(']') => {
                    if chars.get(pos + 1) == Some(&']') {
                        stack.push((pos + 2, depth));
                    }
                    if depth == 1 {
                        if closes_cleanly(chars, pos + 1) {
                            return Some(pos + 1);
                        }
                        break;
                    }
                    stack.push((pos + 1, depth - 1));
                    break;
                }
                Some(_) => pos += 1,
            }
        }
    }
    None
}

fn closes_cleanly(chars: &[char], pos: usize) -> bool {
    match chars.get(pos) {
        None => true,
        Some(&c) => !(c.is_alphanumeric() || c == '_' || c == ']'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commutative_operands_sort() {
        assert_eq!(normalize_formula("=A1+B1"), normalize_formula("=b1 + a1"));
        assert_eq!(normalize_formula("=A1*B1*C1"), normalize_formula("=C1*(A1*B1)"));
        assert_eq!(normalize_formula("=SUM(1,2,3)"), normalize_formula("=sum(3, 1, 2)"));
        assert_eq!(normalize_formula("=SUM(SUM(1,2),3)"), "=SUM(1,2,3)");
        assert_ne!(normalize_formula("=A1-B1"), normalize_formula("=B1-A1"));
        assert_ne!(normalize_formula("=IF(A1,1,2)"), normalize_formula("=IF(A1,2,1)"));
    }

    #[test]
    fn test_parentheses_follow_precedence() {
        assert_eq!(normalize_formula("=(A1+B1)*C1"), "=(A1+B1)*C1");
        assert_eq!(normalize_formula("=A1+(B1*C1)"), "=A1+B1*C1");
        assert_eq!(normalize_formula("=A1-(B1-C1)"), "=A1-(B1-C1)");
        assert_eq!(normalize_formula("=(A1-B1)-C1"), "=A1-B1-C1");
        assert_eq!(normalize_formula("=A1&(B1&C1)"), "=A1&(B1&C1)");
    }

    #[test]
    fn test_numbers_and_strings() {
        assert_eq!(normalize_formula("=1.50"), "=1.5");
        assert_eq!(normalize_formula("=1e21"), "=1000000000000000000000");
        assert_eq!(normalize_formula("=-0"), "=0");
        assert_eq!(normalize_formula("=-2.0*A1"), "=-2*A1");
        assert_eq!(normalize_formula("=\"say \"\"hi\"\"\""), "=\"say \"\"hi\"\"\"");
        assert_ne!(
            normalize_formula("=\"Hello World\""),
            normalize_formula("=\"HelloWorld\"")
        );
        assert_ne!(normalize_formula("=\"abc\""), normalize_formula("=\"ABC\""));
    }

    #[test]
    fn test_sheet_prefixes() {
        assert_eq!(normalize_formula("='my data'!a1"), "='MY DATA'!A1");
        assert_eq!(normalize_formula("=Data!a1:b2"), "=DATA!A1:B2");
        assert_eq!(normalize_formula("='Data'!A1"), "=DATA!A1");
    }

    #[test]
    fn test_text_fallback() {
        assert_eq!(normalize_formula("=a1 > b1"), "=A1>B1");
        assert_eq!(
            normalize_formula("=IF(a1 >= 2, \"Big Value\", 'my sheet'!b2)"),
            "=IF(A1>=2,\"Big Value\",'my sheet'!B2)"
        );
        assert_ne!(
            normalize_formula("=\"Hello World\"=A1"),
            normalize_formula("=\"HelloWorld\"=A1")
        );
        assert_eq!(normalize_formula("=\"it\"\"s\" <> a1"), "=\"it\"\"s\"<>A1");
    }

    #[test]
    fn test_intersection_space_survives() {
        assert_eq!(canonical_text("= a1:a3   b1:b3 "), "=A1:A3 B1:B3");
    }

    #[test]
    fn test_structured_references() {
        assert_eq!(
            normalize_formula("=Sales[[#This Row],[Unit Price]] > 0"),
            "=SALES[[#THIS ROW],[UNIT PRICE]]>0"
        );
        assert_ne!(
            normalize_formula("=T[[Unit  Price]]>0"),
            normalize_formula("=T[[Unit Price]]>0")
        );
        // `]]` read as an escaped bracket.
        assert_eq!(canonical_text("=t[a]]b] + 1"), "=T[A]]B]+1");
    }

    #[test]
    fn test_external_workbook_prefix() {
        assert_eq!(normalize_formula("=[Book1.xlsx]Sheet1!a1 + 2"), "=[BOOK1.XLSX]SHEET1!A1+2");
        assert_eq!(
            normalize_formula("=[Budget.xlsx]'Q1 Plan'!a1"),
            "=[BUDGET.XLSX]'Q1 Plan'!A1"
        );
        assert_eq!(normalize_formula("=[1]TaxRate * 2"), "=[1]TAXRATE*2");
    }

    #[test]
    fn test_bracket_span_end() {
        let chars: Vec<char> = "[[A]],x".chars().collect();
        assert_eq!(bracket_span_end(&chars, 0), Some(5));
        let chars: Vec<char> = "[a]]b]".chars().collect();
        assert_eq!(structured_reference_end(&chars, 0), Some(6));
        let chars: Vec<char> = "[open".chars().collect();
        assert_eq!(bracket_span_end(&chars, 0), None);
    }

    #[test]
    fn test_overflowing_literal_keeps_its_text() {
        assert_eq!(normalize_formula("=1e400 + a1"), "=1E400+A1");
        assert_ne!(normalize_formula("=1e400"), normalize_formula("=1e401"));
    }

    #[test]
    fn test_deep_nesting_falls_back_to_text() {
        let formula = format!("={}a1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_eq!(normalize_formula(&formula), canonical_text(&formula));

        let chain = format!("={}", vec!["a1"; 20_000].join(" - "));
        assert_eq!(normalize_formula(&chain), canonical_text(&chain));
        assert!(!normalize_formula(&chain).contains(' '));
    }

    #[test]
    fn test_blank_formula() {
        assert_eq!(normalize_formula("   "), "");
    }
}
