//! Pratt parser producing a formula [`Expr`] tree.
//!
//! Binding power, loosest first: comparisons, `&`, `+ -`, `* /`, `^`,
//! postfix `%`, prefix `- +`. All binary operators are left-associative and
//! prefix minus binds tighter than `^`, so `-2^2` is `4` as in spreadsheets.

use super::lexer::{tokenize, Spanned, Token};
use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Negate(Box<Expr>),
    Percent(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

const PREFIX_BP: u8 = 13;
const POSTFIX_BP: u8 = 11;

/// Deepest nesting accepted, counting both parser recursion and tree height.
/// Evaluating and dropping an [`Expr`] recurse, so both stay bounded.
pub const MAX_DEPTH: usize = 256;

/// An expression plus the height of its tree.
type Node = (Expr, usize);

/// Parse a formula; a single leading `=` is optional.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let body = source.trim();
    let body = body.strip_prefix('=').unwrap_or(body);
    let offset = source.len() - source.trim_start().len() + (source.trim().len() - body.len());

    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err(FormulaError::Syntax {
            position: offset,
            message: "empty formula".into(),
        });
    }

    let mut parser = Parser {
        tokens,
        index: 0,
        end: body.len(),
        offset,
        depth: 0,
    };
    let (expr, _) = parser.expression(0)?;
    if let Some(extra) = parser.peek() {
        return Err(parser.error_at(extra.pos, format!("unexpected {}", describe(&extra.token))));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
    offset: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.index).cloned();
        self.index += 1;
        token
    }

    fn error_at(&self, pos: usize, message: String) -> FormulaError {
        FormulaError::Syntax {
            position: self.offset + pos,
            message,
        }
    }

    fn unexpected_end(&self) -> FormulaError {
        self.error_at(self.end, "unexpected end of formula".into())
    }

    fn too_deep(&self) -> FormulaError {
        let pos = self.peek().map(|spanned| spanned.pos).unwrap_or(self.end);
        self.error_at(pos, "formula nested too deeply".into())
    }

    /// Height of a node wrapping a child of `height`.
    fn grow(&self, height: usize) -> Result<usize, FormulaError> {
        let height = height + 1;
        if height > MAX_DEPTH {
            return Err(self.too_deep());
        }
        Ok(height)
    }

    fn expression(&mut self, min_bp: u8) -> Result<Node, FormulaError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.too_deep());
        }
        self.depth += 1;
        let node = self.operators(min_bp);
        self.depth -= 1;
        node
    }

    fn operators(&mut self, min_bp: u8) -> Result<Node, FormulaError> {
        let (mut lhs, mut height) = self.prefix()?;

        loop {
            let token = match self.peek() {
                Some(spanned) => spanned.token.clone(),
                None => break,
            };

            if token == Token::Percent {
                if POSTFIX_BP < min_bp {
                    break;
                }
                self.index += 1;
                height = self.grow(height)?;
                lhs = Expr::Percent(Box::new(lhs));
                continue;
            }

            let (op, left_bp) = match binary_op(&token) {
                Some(found) => found,
                None => break,
            };
            if left_bp < min_bp {
                break;
            }
            self.index += 1;
            let (rhs, rhs_height) = self.expression(left_bp + 1)?;
            height = self.grow(height.max(rhs_height))?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok((lhs, height))
    }

    fn prefix(&mut self) -> Result<Node, FormulaError> {
        let spanned = self.next().ok_or_else(|| self.unexpected_end())?;
        match spanned.token {
            Token::Number(n) => Ok((Expr::Number(n), 1)),
            Token::Text(s) => Ok((Expr::Text(s), 1)),
            Token::Minus => {
                let (inner, height) = self.expression(PREFIX_BP)?;
                Ok((Expr::Negate(Box::new(inner)), self.grow(height)?))
            }
            Token::Plus => self.expression(PREFIX_BP),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect_close()?;
                Ok(inner)
            }
            Token::Ident(name) => {
                if matches!(self.peek(), Some(Spanned { token: Token::LParen, .. })) {
                    self.index += 1;
                    let (args, height) = self.arguments()?;
                    return Ok((Expr::Call(name, args), self.grow(height)?));
                }
                match name.as_str() {
                    "TRUE" => Ok((Expr::Bool(true), 1)),
                    "FALSE" => Ok((Expr::Bool(false), 1)),
                    _ => Err(FormulaError::UnknownName(name)),
                }
            }
            other => Err(self.error_at(spanned.pos, format!("unexpected {}", describe(&other)))),
        }
    }

    /// Call arguments plus the tallest argument's height.
    fn arguments(&mut self) -> Result<(Vec<Expr>, usize), FormulaError> {
        let mut args = Vec::new();
        let mut height = 0;
        if matches!(self.peek(), Some(Spanned { token: Token::RParen, .. })) {
            self.index += 1;
            return Ok((args, height));
        }
        loop {
            let (arg, arg_height) = self.expression(0)?;
            height = height.max(arg_height);
            args.push(arg);
            match self.next() {
                Some(Spanned { token: Token::Separator, .. }) => continue,
                Some(Spanned { token: Token::RParen, .. }) => return Ok((args, height)),
                Some(other) => {
                    return Err(self.error_at(
                        other.pos,
                        format!("expected ',' or ')', found {}", describe(&other.token)),
                    ))
                }
                None => return Err(self.unexpected_end()),
            }
        }
    }

    fn expect_close(&mut self) -> Result<(), FormulaError> {
        match self.next() {
            Some(Spanned { token: Token::RParen, .. }) => Ok(()),
            Some(other) => Err(self.error_at(
                other.pos,
                format!("expected ')', found {}", describe(&other.token)),
            )),
            None => Err(self.unexpected_end()),
        }
    }
}

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    let found = match token {
        Token::Eq => (BinaryOp::Eq, 1),
        Token::Ne => (BinaryOp::Ne, 1),
        Token::Lt => (BinaryOp::Lt, 1),
        Token::Le => (BinaryOp::Le, 1),
        Token::Gt => (BinaryOp::Gt, 1),
        Token::Ge => (BinaryOp::Ge, 1),
        Token::Ampersand => (BinaryOp::Concat, 3),
        Token::Plus => (BinaryOp::Add, 5),
        Token::Minus => (BinaryOp::Sub, 5),
        Token::Star => (BinaryOp::Mul, 7),
        Token::Slash => (BinaryOp::Div, 7),
        Token::Caret => (BinaryOp::Pow, 9),
        _ => return None,
    };
    Some(found)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {}", n),
        Token::Text(s) => format!("string \"{}\"", s),
        Token::Ident(name) => format!("name {}", name),
        Token::Separator => "','".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        other => format!("operator {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse("=1+2*3").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2.0), num(3.0)))
            )
        );
    }

    #[test]
    fn test_power_is_left_associative() {
        assert_eq!(
            parse("2^3^2").unwrap(),
            Expr::Binary(
                BinaryOp::Pow,
                Box::new(Expr::Binary(BinaryOp::Pow, num(2.0), num(3.0))),
                num(2.0)
            )
        );
    }

    #[test]
    fn test_negation_binds_tighter_than_power() {
        assert_eq!(
            parse("-2^2").unwrap(),
            Expr::Binary(BinaryOp::Pow, Box::new(Expr::Negate(num(2.0))), num(2.0))
        );
    }

    #[test]
    fn test_calls_and_booleans() {
        assert_eq!(
            parse("=IF(TRUE, \"a\", 1)").unwrap(),
            Expr::Call(
                "IF".into(),
                vec![Expr::Bool(true), Expr::Text("a".into()), Expr::Number(1.0)]
            )
        );
        assert_eq!(parse("PI()").unwrap(), Expr::Call("PI".into(), vec![]));
    }

    #[test]
    fn test_unclosed_call_is_a_syntax_error() {
        let err = parse("=INVALID(").unwrap_err();
        assert!(matches!(err, FormulaError::Syntax { .. }), "{:?}", err);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse("="), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("1 2"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("(1+2"), Err(FormulaError::Syntax { .. })));
        assert!(matches!(parse("foo"), Err(FormulaError::UnknownName(name)) if name == "FOO"));
    }

    fn nested_too_deeply(result: Result<Expr, FormulaError>) -> bool {
        matches!(result, Err(FormulaError::Syntax { message, .. }) if message == "formula nested too deeply")
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let ok = format!("={}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&ok).unwrap(), Expr::Number(1.0));

        let parens = format!("={}1{}", "(".repeat(50_000), ")".repeat(50_000));
        assert!(nested_too_deeply(parse(&parens)));
        assert!(nested_too_deeply(parse(&format!("={}1", "-".repeat(50_000)))));
        assert!(nested_too_deeply(parse(&format!("={}1", "+".repeat(50_000)))));
        assert!(nested_too_deeply(parse(&format!("={}1{}", "ABS(".repeat(5_000), ")".repeat(5_000)))));
    }

    #[test]
    fn test_long_operator_chains_are_bounded() {
        let chain = vec!["1"; MAX_DEPTH].join("+");
        assert!(parse(&chain).is_ok());

        let chain = vec!["1"; 50_000].join("+");
        assert!(nested_too_deeply(parse(&chain)));
        assert!(nested_too_deeply(parse(&format!("=1{}", "%".repeat(50_000)))));
    }
}
