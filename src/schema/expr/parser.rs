//! Recursive-descent parser producing the formula AST.
//!
//! Precedence, lowest first: `?:`, `||`, `&&`, equality, comparison,
//! additive, multiplicative, unary, postfix (member / index / call).

use super::lexer::{check_identifier, tokenize, Op, Token, TokenKind};
use super::value::Value;
use crate::error::ExprError;
use std::collections::BTreeSet;

/// Deepest nesting of parentheses, brackets and call arguments.
const MAX_NESTING: usize = 64;

/// Deepest syntax tree the evaluator will walk. Operator chains such as
/// `a + b + c` grow the tree without nesting in the source.
const MAX_TREE_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Free identifiers read by the expression (call targets excluded).
    pub fn identifiers(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_identifiers(&mut names);
        names
    }

    /// Height of the tree, measured without recursion.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((expr, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            match expr {
                Expr::Literal(_) | Expr::Ident(_) => {}
                Expr::Array(items) | Expr::Call(_, items) => {
                    stack.extend(items.iter().map(|item| (item, depth + 1)))
                }
                Expr::Unary(_, inner) | Expr::Member(inner, _) => stack.push((inner, depth + 1)),
                Expr::Binary(_, left, right)
                | Expr::Logical(_, left, right)
                | Expr::Index(left, right) => {
                    stack.push((left, depth + 1));
                    stack.push((right, depth + 1));
                }
                Expr::Conditional {
                    condition,
                    then,
                    otherwise,
                } => {
                    stack.push((condition, depth + 1));
                    stack.push((then, depth + 1));
                    stack.push((otherwise, depth + 1));
                }
            }
        }
        deepest
    }

    fn collect_identifiers(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(name) => {
                names.insert(name.clone());
            }
            Expr::Array(items) | Expr::Call(_, items) => {
                items.iter().for_each(|item| item.collect_identifiers(names))
            }
            Expr::Unary(_, inner) | Expr::Member(inner, _) => inner.collect_identifiers(names),
            Expr::Binary(_, left, right)
            | Expr::Logical(_, left, right)
            | Expr::Index(left, right) => {
                left.collect_identifiers(names);
                right.collect_identifiers(names);
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_identifiers(names);
                then.collect_identifiers(names);
                otherwise.collect_identifiers(names);
            }
        }
    }
}

/// Tokenize and parse a complete expression.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    if parser.peek() == &TokenKind::Eof {
        return Err(ExprError::syntax(0, "empty expression"));
    }
    let expr = parser.expression()?;
    if parser.peek() != &TokenKind::Eof {
        return Err(ExprError::syntax(
            parser.position(),
            format!("unexpected token {:?}", parser.peek()),
        ));
    }
    if expr.depth() > MAX_TREE_DEPTH {
        return Err(ExprError::unsafe_expr("expression is nested too deeply"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, op: Op) -> bool {
        if self.peek() == &TokenKind::Op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: Op, what: &str) -> Result<(), ExprError> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(ExprError::syntax(self.position(), format!("expected {}", what)))
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.nested(Self::conditional)
    }

    /// Run `rule` one level deeper, refusing past `MAX_NESTING`.
    fn nested(
        &mut self,
        rule: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(ExprError::unsafe_expr("expression is nested too deeply"));
        }
        self.depth += 1;
        let expr = rule(self);
        self.depth -= 1;
        expr
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        let condition = self.logical_or()?;
        if !self.eat(Op::Question) {
            return Ok(condition);
        }
        let then = self.conditional()?;
        self.expect(Op::Colon, "':' in conditional expression")?;
        let otherwise = self.conditional()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.logical_and()?;
        while self.eat(Op::OrOr) {
            let right = self.logical_and()?;
            left = Expr::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.equality()?;
        while self.eat(Op::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(Op, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(*token) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Op::EqEqEq, BinaryOp::StrictEq),
                (Op::NotEqEq, BinaryOp::StrictNe),
                (Op::EqEq, BinaryOp::LooseEq),
                (Op::NotEq, BinaryOp::LooseNe),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Op::Le, BinaryOp::Le),
                (Op::Ge, BinaryOp::Ge),
                (Op::Lt, BinaryOp::Lt),
                (Op::Gt, BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[(Op::Plus, BinaryOp::Add), (Op::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Op::Star, BinaryOp::Mul),
                (Op::Slash, BinaryOp::Div),
                (Op::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat(Op::Bang) {
            UnaryOp::Not
        } else if self.eat(Op::Minus) {
            UnaryOp::Neg
        } else if self.eat(Op::Plus) {
            UnaryOp::Plus
        } else {
            return self.postfix();
        };
        let operand = self.nested(Self::unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let bare_name = matches!(self.peek(), TokenKind::Ident(_));
        let mut expr = self.primary()?;
        let callable = bare_name && matches!(expr, Expr::Ident(_));
        loop {
            if self.eat(Op::Dot) {
                let position = self.position();
                match self.advance() {
                    TokenKind::Ident(name) => {
                        check_identifier(&name)?;
                        expr = Expr::Member(Box::new(expr), name);
                    }
                    _ => return Err(ExprError::syntax(position, "expected property name")),
                }
            } else if self.eat(Op::LBracket) {
                let index = self.expression()?;
                self.expect(Op::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.peek() == &TokenKind::Op(Op::LParen) {
                let position = self.position();
                let name = match expr {
                    Expr::Ident(name) if callable => name,
                    _ => {
                        return Err(ExprError::syntax(
                            position,
                            "only helper functions can be called",
                        ))
                    }
                };
                self.pos += 1;
                let args = self.list(Op::RParen, "')'")?;
                expr = Expr::Call(name, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn list(&mut self, close: Op, what: &str) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(Op::Comma, &format!("',' or {}", what))?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let position = self.position();
        match self.advance() {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            TokenKind::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Literal(Value::Undefined),
                "NaN" => Expr::Literal(Value::Number(f64::NAN)),
                "Infinity" => Expr::Literal(Value::Number(f64::INFINITY)),
                _ => Expr::Ident(name),
            }),
            TokenKind::Op(Op::LParen) => {
                let inner = self.expression()?;
                self.expect(Op::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Op(Op::LBracket) => Ok(Expr::Array(self.list(Op::RBracket, "']'")?)),
            TokenKind::Eof => Err(ExprError::syntax(position, "unexpected end of expression")),
            other => Err(ExprError::syntax(
                position,
                format!("unexpected token {:?}", other),
            )),
        }
    }
}
