//! Expression language for `condition` rules.
//!
//! Conditions are evaluated against the JSON view of a probe context
//! (see `ProbeContext::to_value`).
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=` (ordering also accepts
//!   numeric strings such as route values)
//! - Boolean operators: `&&`, `||` (short-circuiting), `!`
//! - Membership: `"Admin" in principal.roles`
//! - Dot-path access: `request.route.id`, `principal.claims.tenant`
//! - Literals: integers, floats, `"strings"`, `true`, `false`, `null`
//! - Parentheses for grouping

use crate::probe::errors::ProbeError;
use serde_json::Value;

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Path(Vec<String>),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Lit(Literal),
    Dot,
    LParen,
    RParen,
    Op(BinOp),
    Not,
    In,
}

fn invalid(msg: impl Into<String>) -> ProbeError {
    ProbeError::InvalidCondition(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, ProbeError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        // two-character operators
        let pair = match (c, next) {
            ('=', Some('=')) => Some(Token::Op(BinOp::Eq)),
            ('!', Some('=')) => Some(Token::Op(BinOp::Ne)),
            ('>', Some('=')) => Some(Token::Op(BinOp::Ge)),
            ('<', Some('=')) => Some(Token::Op(BinOp::Le)),
            ('&', Some('&')) => Some(Token::Op(BinOp::And)),
            ('|', Some('|')) => Some(Token::Op(BinOp::Or)),
            _ => None,
        };
        if let Some(tok) = pair {
            tokens.push(tok);
            i += 2;
            continue;
        }

        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' => {
                tokens.push(Token::Op(BinOp::Gt));
                i += 1;
            }
            '<' => {
                tokens.push(Token::Op(BinOp::Lt));
                i += 1;
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(invalid("unterminated string literal")),
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = chars
                                .get(i + 1)
                                .ok_or_else(|| invalid("unterminated string literal"))?;
                            s.push(*escaped);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Lit(Literal::Str(s)));
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let num: String = chars[start..i].iter().collect();
                let lit = if num.contains('.') {
                    Literal::Float(
                        num.parse()
                            .map_err(|_| invalid(format!("invalid float `{num}`")))?,
                    )
                } else {
                    Literal::Int(
                        num.parse()
                            .map_err(|_| invalid(format!("invalid integer `{num}`")))?,
                    )
                };
                tokens.push(Token::Lit(lit));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Lit(Literal::Bool(true)),
                    "false" => Token::Lit(Literal::Bool(false)),
                    "null" => Token::Lit(Literal::Null),
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(invalid(format!("unexpected character `{other}`"))),
        }
    }
    Ok(tokens)
}

// ─── Parser ─────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, ProbeError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Op(BinOp::Or)) {
            self.advance();
            let right = self.parse_and()?;
            left = binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, ProbeError> {
        let mut left = self.parse_comparison()?;
        while self.peek() == Some(&Token::Op(BinOp::And)) {
            self.advance();
            let right = self.parse_comparison()?;
            left = binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    /// comparison = unary (cmp_op unary | "in" unary)?
    fn parse_comparison(&mut self) -> Result<Expr, ProbeError> {
        let left = self.parse_unary()?;
        match self.peek() {
            Some(Token::Op(op)) if !matches!(op, BinOp::And | BinOp::Or) => {
                let op = *op;
                self.advance();
                let right = self.parse_unary()?;
                Ok(binary(op, left, right))
            }
            Some(Token::In) => {
                self.advance();
                let collection = self.parse_unary()?;
                Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(collection),
                })
            }
            _ => Ok(left),
        }
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, ProbeError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    /// primary = literal | path | "(" or_expr ")"
    fn parse_primary(&mut self) -> Result<Expr, ProbeError> {
        match self.advance() {
            Some(Token::Lit(lit)) => Ok(Expr::Literal(lit)),
            Some(Token::Ident(head)) => {
                let mut path = vec![head];
                while self.peek() == Some(&Token::Dot) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => return Err(invalid("expected identifier after `.`")),
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                if self.advance() != Some(Token::RParen) {
                    return Err(invalid("expected closing parenthesis `)`"));
                }
                Ok(expr)
            }
            other => Err(invalid(format!("unexpected token: {other:?}"))),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::BinOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Parse a condition expression string into an AST.
pub fn parse_condition(input: &str) -> Result<Expr, ProbeError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(invalid("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(invalid(format!("unexpected trailing token: {tok:?}")));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Evaluate a parsed expression against a JSON context.
/// The expression must produce a boolean.
pub fn evaluate(expr: &Expr, context: &Value) -> Result<bool, ProbeError> {
    match eval(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(invalid(format!(
            "condition must evaluate to boolean, got: {other}"
        ))),
    }
}

fn eval(expr: &Expr, context: &Value) -> Result<Value, ProbeError> {
    match expr {
        Expr::Literal(lit) => Ok(match lit {
            Literal::Int(n) => Value::from(*n),
            Literal::Float(f) => Value::from(*f),
            Literal::Str(s) => Value::from(s.as_str()),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }),
        Expr::Path(segments) => Ok(segments
            .iter()
            .try_fold(context, |current, seg| current.get(seg))
            .cloned()
            .unwrap_or(Value::Null)),
        Expr::Not(inner) => match eval(inner, context)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(invalid("`!` operator requires a boolean operand")),
        },
        Expr::In {
            element,
            collection,
        } => {
            let elem = eval(element, context)?;
            match eval(collection, context)? {
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, &elem)))),
                _ => Err(invalid("`in` operator requires an array on the right side")),
            }
        }
        Expr::BinOp {
            op: op @ (BinOp::And | BinOp::Or),
            left,
            right,
        } => {
            // The right operand is only evaluated when the left does not decide
            let Value::Bool(l) = eval(left, context)? else {
                return Err(invalid("`&&` and `||` require boolean operands"));
            };
            if l == (*op == BinOp::Or) {
                return Ok(Value::Bool(l));
            }
            match eval(right, context)? {
                Value::Bool(r) => Ok(Value::Bool(r)),
                _ => Err(invalid("`&&` and `||` require boolean operands")),
            }
        }
        Expr::BinOp { op, left, right } => {
            let l = eval(left, context)?;
            let r = eval(right, context)?;
            let result = match op {
                BinOp::Eq => loose_eq(&l, &r),
                BinOp::Ne => !loose_eq(&l, &r),
                _ => {
                    let (Some(lf), Some(rf)) = (as_number(&l), as_number(&r)) else {
                        return Err(invalid(
                            "comparison operator requires numeric operands",
                        ));
                    };
                    match op {
                        BinOp::Gt => lf > rf,
                        BinOp::Lt => lf < rf,
                        BinOp::Ge => lf >= rf,
                        _ => lf <= rf,
                    }
                }
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Numeric value of an operand. Route values arrive as strings, so
/// numeric-looking strings count as numbers.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        other => other.as_f64(),
    }
}

/// Equality that treats `1` and `1.0` as equal.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
