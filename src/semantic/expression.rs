//! Restricted arithmetic evaluator for derived-metric formulas (spec §4.2).
//!
//! Accepts only numeric literals, identifiers, unary minus, and binary
//! `+ - * /` with standard precedence and parentheses. Everything else is
//! an `UnsafeExpression`. A hand-rolled recursive-descent parser is used
//! instead of a general expression crate so node-count and construct limits
//! can be enforced directly during parsing.

use std::collections::HashMap;

use crate::utils::AppError;

const MAX_FORMULA_LEN: usize = 1_000;
const MAX_NODES: usize = 100;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Ident(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn node_count(&self) -> usize {
        match self {
            Expr::Number(_) | Expr::Ident(_) => 1,
            Expr::Neg(a) => 1 + a.node_count(),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                1 + a.node_count() + b.node_count()
            },
        }
    }

    fn identifiers(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {},
            Expr::Ident(name) => out.push(name.clone()),
            Expr::Neg(a) => a.identifiers(out),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.identifiers(out);
                b.identifiers(out);
            },
        }
    }

    /// Division by zero returns the sentinel zero (spec §4.2), never NaN/inf.
    fn eval(&self, bindings: &HashMap<String, f64>) -> Result<f64, AppError> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::Ident(name) => *bindings
                .get(name)
                .ok_or_else(|| AppError::UnsafeExpression(format!("unbound identifier '{name}'")))?,
            Expr::Neg(a) => -a.eval(bindings)?,
            Expr::Add(a, b) => a.eval(bindings)? + b.eval(bindings)?,
            Expr::Sub(a, b) => a.eval(bindings)? - b.eval(bindings)?,
            Expr::Mul(a, b) => a.eval(bindings)? * b.eval(bindings)?,
            Expr::Div(a, b) => {
                let denom = b.eval(bindings)?;
                if denom == 0.0 { 0.0 } else { a.eval(bindings)? / denom }
            },
        })
    }
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Number(f64),
    Ident(&'a str),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token<'_>>, AppError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            },
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            },
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            },
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            },
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            },
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            },
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < bytes.len() {
                    let ch = bytes[i] as char;
                    if ch.is_ascii_digit() || ch == '.' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text = &src[start..i];
                let n: f64 = text
                    .parse()
                    .map_err(|_| AppError::UnsafeExpression(format!("invalid number '{text}'")))?;
                tokens.push(Token::Number(n));
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() {
                    let ch = bytes[i] as char;
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(&src[start..i]));
            },
            other => return Err(AppError::UnsafeExpression(format!("disallowed character '{other}'"))),
        }
    }
    Ok(tokens)
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token<'a>>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token<'a>> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr, AppError> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    left = Expr::Add(Box::new(left), Box::new(self.parse_term()?));
                },
                Some(Token::Minus) => {
                    self.advance();
                    left = Expr::Sub(Box::new(left), Box::new(self.parse_term()?));
                },
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, AppError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    left = Expr::Mul(Box::new(left), Box::new(self.parse_unary()?));
                },
                Some(Token::Slash) => {
                    self.advance();
                    left = Expr::Div(Box::new(left), Box::new(self.parse_unary()?));
                },
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, AppError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, AppError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => Ok(Expr::Ident(name.to_string())),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(AppError::UnsafeExpression("unbalanced parentheses".into())),
                }
            },
            other => Err(AppError::UnsafeExpression(format!("unexpected token {other:?}"))),
        }
    }
}

fn parse(formula: &str) -> Result<Expr, AppError> {
    if formula.is_empty() || formula.len() > MAX_FORMULA_LEN {
        return Err(AppError::UnsafeExpression("formula length out of bounds".into()));
    }
    let tokens = tokenize(formula)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(AppError::UnsafeExpression("trailing tokens after expression".into()));
    }
    if expr.node_count() > MAX_NODES {
        return Err(AppError::UnsafeExpression("formula exceeds node-count limit".into()));
    }
    Ok(expr)
}

/// Metric names referenced by a derived-metric formula, used for catalog-load
/// cycle detection (spec §3 invariant).
pub fn referenced_identifiers(formula: &str) -> Result<Vec<String>, AppError> {
    let expr = parse(formula)?;
    let mut out = Vec::new();
    expr.identifiers(&mut out);
    Ok(out)
}

/// Evaluates a derived-metric formula against pre-resolved scalar bindings.
pub fn evaluate(formula: &str, bindings: &HashMap<String, f64>) -> Result<f64, AppError> {
    let expr = parse(formula)?;
    expr.eval(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_simple_division() {
        let mut bindings = HashMap::new();
        bindings.insert("total_mrr".to_string(), 1000.0);
        bindings.insert("active_customers".to_string(), 10.0);
        let result = evaluate("total_mrr / active_customers", &bindings).unwrap();
        assert_eq!(result, 100.0);
    }

    #[test]
    fn division_by_zero_yields_sentinel_zero() {
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), 5.0);
        bindings.insert("b".to_string(), 0.0);
        assert_eq!(evaluate("a / b", &bindings).unwrap(), 0.0);
    }

    #[test]
    fn respects_precedence_and_parens() {
        let mut bindings = HashMap::new();
        bindings.insert("a".to_string(), 2.0);
        bindings.insert("b".to_string(), 3.0);
        bindings.insert("c".to_string(), 4.0);
        assert_eq!(evaluate("a + b * c", &bindings).unwrap(), 14.0);
        assert_eq!(evaluate("(a + b) * c", &bindings).unwrap(), 20.0);
    }

    #[test]
    fn rejects_disallowed_constructs() {
        assert!(parse("a.b").is_err());
        assert!(parse("foo(1)").is_err());
        assert!(parse("a == b").is_err());
        assert!(parse("a ** b").is_err());
        assert!(parse("'a' + 'b'").is_err());
    }

    #[test]
    fn rejects_oversized_formula() {
        let formula = "1".to_string() + &"+1".repeat(600);
        assert!(parse(&formula).is_err());
    }

    #[test]
    fn extracts_referenced_identifiers() {
        let refs = referenced_identifiers("total_mrr / active_customers").unwrap();
        assert_eq!(refs, vec!["total_mrr".to_string(), "active_customers".to_string()]);
    }
}
