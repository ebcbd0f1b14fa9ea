use super::FormulaParseError;
use super::tokenizer::{Token, TokenKind, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
        }
    }

    /// Left and right binding power.
    fn binding_power(self) -> (u8, u8) {
        match self {
            BinaryOp::Concat => (40, 41),
            BinaryOp::Add | BinaryOp::Sub => (50, 51),
            BinaryOp::Mul | BinaryOp::Div => (60, 61),
            BinaryOp::Pow => (70, 71),
        }
    }
}

const RANGE_BP: u8 = 80;
const PREFIX_BP: u8 = 90;

/// Nesting budget for one formula. Every parenthesis, call, prefix operator
/// and chained infix operator spends one level, so the depth of any tree the
/// parser returns stays within twice this bound.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Minimal formula AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// String literal contents with escapes resolved.
    String(String),
    CellRef {
        sheet: Option<String>,
        address: String,
    },
    Name {
        sheet: Option<String>,
        name: String,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Percent(Box<Expr>),
}

/// Parses formula text (leading `=` optional). Comparisons, arrays,
/// structured references and workbook prefixes are outside the grammar and
/// produce an error, as does nesting deeper than [`MAX_NESTING_DEPTH`].
pub fn parse_formula(formula: &str) -> Result<Expr, FormulaParseError> {
    let trimmed = formula.trim();
    let body = trimmed.strip_prefix('=').unwrap_or(trimmed);
    let tokens: Vec<Token> = tokenize(body)?
        .into_iter()
        .filter(|token| token.kind != TokenKind::Whitespace)
        .collect();
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expr(0)?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.err("trailing tokens"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_text(&self, offset: usize) -> Option<&str> {
        self.tokens.get(self.pos + offset).map(|token| token.text.as_str())
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned()?;
        self.pos += 1;
        Some(token)
    }

    fn expect(&mut self, text: &str) -> Result<(), FormulaParseError> {
        match self.bump() {
            Some(token) if token.text == text => Ok(()),
            _ => Err(self.err(&format!("expected `{text}`"))),
        }
    }

    fn err(&self, message: &str) -> FormulaParseError {
        FormulaParseError::new(self.pos, message)
    }

    fn descend(&mut self) -> Result<(), FormulaParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(self.err("formula nests too deeply"));
        }
        Ok(())
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, FormulaParseError> {
        let entry_depth = self.depth;
        self.descend()?;
        let mut lhs = match self.peek_text(0) {
            Some("+" | "-") => {
                let op = match self.bump().map(|token| token.text) {
                    Some(text) if text == "-" => UnaryOp::Minus,
                    _ => UnaryOp::Plus,
                };
                let operand = self.parse_expr(PREFIX_BP)?;
                Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }
            _ => self.parse_primary()?,
        };

        loop {
            while self.peek_text(0) == Some("%") {
                self.bump();
                self.descend()?;
                lhs = Expr::Percent(Box::new(lhs));
            }

            let Some(token) = self.peek() else {
                break;
            };
            let op = match (token.kind, token.text.as_str()) {
                (TokenKind::Punct, ":") => None,
                (TokenKind::Operator, "+") => Some(BinaryOp::Add),
                (TokenKind::Operator, "-") => Some(BinaryOp::Sub),
                (TokenKind::Operator, "*") => Some(BinaryOp::Mul),
                (TokenKind::Operator, "/") => Some(BinaryOp::Div),
                (TokenKind::Operator, "^") => Some(BinaryOp::Pow),
                (TokenKind::Operator, "&") => Some(BinaryOp::Concat),
                (TokenKind::Operator, _) => return Err(self.err("unsupported operator")),
                _ => break,
            };

            match op {
                None => {
                    if RANGE_BP < min_bp {
                        break;
                    }
                    self.bump();
                    self.descend()?;
                    let end = self.parse_expr(RANGE_BP + 1)?;
                    lhs = Expr::Range {
                        start: Box::new(lhs),
                        end: Box::new(end),
                    };
                }
                Some(op) => {
                    let (l_bp, r_bp) = op.binding_power();
                    if l_bp < min_bp {
                        break;
                    }
                    self.bump();
                    self.descend()?;
                    let rhs = self.parse_expr(r_bp)?;
                    lhs = Expr::Binary {
                        op,
                        left: Box::new(lhs),
                        right: Box::new(rhs),
                    };
                }
            }
        }

        self.depth = entry_depth;
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaParseError> {
        let Some(token) = self.bump() else {
            return Err(self.err("unexpected end of formula"));
        };
        match token.kind {
            TokenKind::Number => match token.text.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Expr::Number(value)),
                Ok(_) => Err(self.err("number out of range")),
                Err(_) => Err(self.err("invalid number")),
            },
            TokenKind::String => Ok(Expr::String(unquote(&token.text, '"'))),
            TokenKind::Punct if token.text == "(" => {
                let inner = self.parse_expr(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::QuotedName => {
                let sheet = unquote(&token.text, '\'');
                self.expect("!")?;
                self.parse_reference(Some(sheet))
            }
            TokenKind::Identifier => {
                if self.peek_text(0) == Some("!") {
                    self.bump();
                    return self.parse_reference(Some(token.text));
                }
                if self.peek_text(0) == Some("(") {
                    self.bump();
                    return self.parse_call(token.text);
                }
                Ok(reference(None, token.text))
            }
            TokenKind::Error => Ok(Expr::Name {
                sheet: None,
                name: token.text,
            }),
            _ => Err(FormulaParseError::new(
                self.pos.saturating_sub(1),
                format!("unsupported token `{}`", token.text),
            )),
        }
    }

    fn parse_reference(&mut self, sheet: Option<String>) -> Result<Expr, FormulaParseError> {
        match self.bump() {
            Some(token) if token.kind == TokenKind::Identifier => Ok(reference(sheet, token.text)),
            Some(token) if token.kind == TokenKind::Error => Ok(Expr::Name {
                sheet,
                name: token.text,
            }),
            _ => Err(self.err("expected a reference after `!`")),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, FormulaParseError> {
        let mut args = Vec::new();
        if self.peek_text(0) == Some(")") {
            self.bump();
            return Ok(Expr::Function { name, args });
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.bump() {
                Some(token) if token.text == "," || token.text == ";" => continue,
                Some(token) if token.text == ")" => break,
                _ => return Err(self.err("expected `,` or `)` in argument list")),
            }
        }
        Ok(Expr::Function { name, args })
    }
}

fn reference(sheet: Option<String>, text: String) -> Expr {
    if is_a1_reference(&text) {
        Expr::CellRef {
            sheet,
            address: text,
        }
    } else {
        Expr::Name { sheet, name: text }
    }
}

/// `$A$1`, `b7`, `XFD1048576`: up to three letters then digits, each part
/// optionally absolute.
pub(crate) fn is_a1_reference(text: &str) -> bool {
    let rest = text.strip_prefix('$').unwrap_or(text);
    let letters = rest.chars().take_while(char::is_ascii_alphabetic).count();
    if !(1..=3).contains(&letters) {
        return false;
    }
    let rest = &rest[letters..];
    let digits = rest.strip_prefix('$').unwrap_or(rest);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Strips surrounding quotes and resolves doubled-quote escapes.
fn unquote(text: &str, quote: char) -> String {
    let inner = text
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
        .unwrap_or(text);
    let doubled: String = [quote, quote].iter().collect();
    inner.replace(&doubled, &quote.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(value: f64) -> Box<Expr> {
        Box::new(Expr::Number(value))
    }

    fn cell(address: &str) -> Box<Expr> {
        Box::new(Expr::CellRef {
            sheet: None,
            address: address.to_string(),
        })
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse_formula("=1+2*3").unwrap(),
            Expr::Binary {
                op: BinaryOp::Add,
                left: num(1.0),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: num(2.0),
                    right: num(3.0),
                }),
            }
        );
    }

    #[test]
    fn test_ranges_sheets_and_calls() {
        let expr = parse_formula("=SUM('Q1 Data'!A1:B2, Totals!$C$3)").unwrap();
        let Expr::Function { name, args } = expr else {
            panic!("expected a function call");
        };
        assert_eq!(name, "SUM");
        assert_eq!(
            args[0],
            Expr::Range {
                start: Box::new(Expr::CellRef {
                    sheet: Some("Q1 Data".to_string()),
                    address: "A1".to_string(),
                }),
                end: cell("B2"),
            }
        );
        assert_eq!(
            args[1],
            Expr::CellRef {
                sheet: Some("Totals".to_string()),
                address: "$C$3".to_string(),
            }
        );
    }

    #[test]
    fn test_unary_and_percent() {
        assert_eq!(
            parse_formula("=-A1%").unwrap(),
            Expr::Unary {
                op: UnaryOp::Minus,
                operand: Box::new(Expr::Percent(cell("A1"))),
            }
        );
    }

    #[test]
    fn test_unsupported_syntax_is_an_error() {
        for formula in ["=A1>B1", "=Table1[Qty]", "={1,2}", "=[Book.xlsx]Sheet1!A1", "=SUM(1", "=1+"] {
            assert!(parse_formula(formula).is_err(), "{formula}");
        }
    }

    #[test]
    fn test_out_of_range_number_is_an_error() {
        assert!(parse_formula("=1e400").is_err());
        assert!(parse_formula("=1e300").is_ok());
    }

    #[test]
    fn test_nesting_budget() {
        let nested = |depth: usize| format!("={}1{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_formula(&nested(MAX_NESTING_DEPTH - 1)).is_ok());
        assert!(parse_formula(&nested(MAX_NESTING_DEPTH)).is_err());
        assert!(parse_formula(&nested(10_000)).is_err());

        let chain = |terms: usize| format!("={}", vec!["A1"; terms].join("-"));
        assert!(parse_formula(&chain(100)).is_ok());
        assert!(parse_formula(&chain(50_000)).is_err());
    }

    #[test]
    fn test_names_versus_references() {
        assert!(is_a1_reference("$a$10"));
        assert!(!is_a1_reference("TAXRATE"));
        assert!(!is_a1_reference("A"));
        assert_eq!(
            parse_formula("=TaxRate").unwrap(),
            Expr::Name {
                sheet: None,
                name: "TaxRate".to_string(),
            }
        );
    }
}
