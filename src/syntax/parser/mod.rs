//! Recursive-descent parser for program files.
//!
//! ```text
//! program := item*
//! item    := 'field' NAME ':' DTYPE '[' dims ']' ('in' GROUP)?
//!          | 'grad' GROUP
//!          | 'kernel' NAME 'over' '[' ranges ']' ('args' INT)? '{' stmt* '}'
//! ```
//!
//! Statements use exactly the syntax `KernelIr` prints, including the
//! reverse-only forms, so printed reverse kernels parse back too.

use super::{FieldDecl, Program};
use crate::diagnostic::Diagnostic;
use crate::field::DataType;
use crate::ir::{BinaryOp, CmpOp, Domain, KernelIr, Scale, Stmt, UnaryOp, ValueId};
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;

const MAX_NESTING_DEPTH: u32 = 256;

pub(crate) struct Parser {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
}

impl Parser {
    pub(crate) fn new(tokens: Vec<Spanned<Lexeme>>) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
            depth: 0,
        }
    }

    pub(crate) fn parse_program(mut self) -> Result<Program, Vec<Diagnostic>> {
        let mut program = Program::default();
        while !self.at(&Lexeme::Eof) {
            let errors = self.diagnostics.len();
            match self.peek().clone() {
                Lexeme::Field => program.fields.push(self.parse_field()),
                Lexeme::Grad => {
                    self.advance();
                    program.grads.push(self.parse_group());
                }
                Lexeme::Kernel => {
                    if let Some(kernel) = self.parse_kernel() {
                        program.kernels.push(kernel);
                    }
                }
                _ => {
                    let found = self.peek().description();
                    self.error_with_help(
                        &format!("expected 'field', 'grad' or 'kernel', found {}", found),
                        "a program file declares fields, enables gradients, and defines kernels",
                    );
                }
            }
            if self.diagnostics.len() > errors {
                self.recover();
            }
        }

        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics);
        }
        Ok(program)
    }

    /// Skip to the next top-level item.
    fn recover(&mut self) {
        let mut depth = 0u32;
        loop {
            match self.peek() {
                Lexeme::Eof => return,
                Lexeme::LBrace => depth += 1,
                Lexeme::RBrace => depth = depth.saturating_sub(1),
                Lexeme::Field | Lexeme::Kernel if depth == 0 => return,
                _ => {}
            }
            self.advance();
        }
    }

    // --- Items ---

    fn parse_field(&mut self) -> FieldDecl {
        let start = self.expect(&Lexeme::Field);
        let name = self.expect_ident();
        self.expect(&Lexeme::Colon);
        let dtype_name = self.expect_ident();
        let dtype = DataType::from_name(&dtype_name.node).unwrap_or_else(|| {
            self.diagnostics.push(
                Diagnostic::error(
                    format!("unknown element type '{}'", dtype_name.node),
                    dtype_name.span,
                )
                .with_help("element types are f32, f64 and i32".to_string()),
            );
            DataType::F32
        });
        self.expect(&Lexeme::LBracket);
        let mut shape = Vec::new();
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            shape.push(self.expect_integer() as usize);
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        let end = self.expect(&Lexeme::RBracket);
        let group = if self.eat(&Lexeme::In) {
            Some(self.parse_group())
        } else {
            None
        };
        FieldDecl {
            name: name.node,
            dtype,
            shape,
            group: group.map(|g| g.node),
            span: start.merge(end),
        }
    }

    /// A dotted group path: `root.layer.weights`.
    fn parse_group(&mut self) -> Spanned<String> {
        let first = self.expect_ident();
        let mut path = first.node;
        let mut span = first.span;
        while self.eat(&Lexeme::Dot) {
            let part = self.expect_ident();
            path.push('.');
            path.push_str(&part.node);
            span = span.merge(part.span);
        }
        Spanned::new(path, span)
    }

    fn parse_kernel(&mut self) -> Option<Spanned<KernelIr>> {
        let start = self.expect(&Lexeme::Kernel);
        let name = self.expect_ident();
        self.expect(&Lexeme::Over);
        let domain = self.parse_domain();
        let num_args = if self.eat(&Lexeme::Args) {
            self.expect_integer() as u32
        } else {
            0
        };
        let body = self.parse_block()?;
        let end = self.prev_span();
        let ir = KernelIr::new(name.node, domain, num_args, body);
        Some(Spanned::new(ir, start.merge(end)))
    }

    fn parse_domain(&mut self) -> Domain {
        self.expect(&Lexeme::LBracket);
        let mut axes = Vec::new();
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            let lo = self.parse_signed();
            self.expect(&Lexeme::DotDot);
            let hi = self.parse_signed();
            axes.push(lo..hi);
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket);
        Domain::new(axes)
    }

    fn parse_signed(&mut self) -> i64 {
        let negative = self.eat(&Lexeme::Minus);
        let n = self.expect_integer() as i64;
        if negative {
            -n
        } else {
            n
        }
    }

    // --- Statements ---

    fn parse_block(&mut self) -> Option<Vec<Stmt>> {
        if !self.enter_nesting() {
            return None;
        }
        self.expect(&Lexeme::LBrace);
        let mut body = Vec::new();
        while !self.at(&Lexeme::RBrace) && !self.at(&Lexeme::Eof) {
            let errors = self.diagnostics.len();
            match self.parse_stmt() {
                Some(stmt) => body.push(stmt),
                None if self.diagnostics.len() == errors => {
                    self.error_at_current("expected a statement");
                    self.exit_nesting();
                    return None;
                }
                None => {
                    self.exit_nesting();
                    return None;
                }
            }
        }
        self.expect(&Lexeme::RBrace);
        self.exit_nesting();
        Some(body)
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        match self.peek().clone() {
            Lexeme::Value(n) => {
                self.advance();
                self.expect(&Lexeme::Eq);
                self.parse_definition(ValueId(n))
            }
            Lexeme::Store => {
                self.advance();
                let (field, index) = self.parse_access();
                self.expect(&Lexeme::Comma);
                let value = self.expect_value();
                Some(Stmt::Store {
                    field,
                    index,
                    value,
                })
            }
            Lexeme::If => {
                self.advance();
                let cond = self.expect_value();
                let then_body = self.parse_block()?;
                let else_body = if self.eat(&Lexeme::Else) {
                    self.parse_block()?
                } else {
                    Vec::new()
                };
                Some(Stmt::If {
                    cond,
                    then_body,
                    else_body,
                })
            }
            Lexeme::Adj => {
                self.advance();
                self.parse_adjoint()
            }
            Lexeme::Grad => {
                self.advance();
                let (field, index) = self.parse_access();
                self.expect(&Lexeme::PlusEq);
                self.expect(&Lexeme::Adj);
                let source = self.expect_value();
                Some(Stmt::AccumulateGrad {
                    field,
                    index,
                    source,
                })
            }
            _ => None,
        }
    }

    /// Right-hand side of `%n = ...`.
    fn parse_definition(&mut self, dst: ValueId) -> Option<Stmt> {
        let op = self.expect_ident();
        let stmt = match op.node.as_str() {
            "const" => Stmt::Const {
                dst,
                value: self.parse_number(),
            },
            "index" => Stmt::Index {
                dst,
                axis: self.expect_integer() as u32,
            },
            "arg" => Stmt::Arg {
                dst,
                position: self.expect_integer() as u32,
            },
            "load" => {
                let (field, index) = self.parse_access();
                Stmt::Load { dst, field, index }
            }
            name => {
                if let Some(op) = UnaryOp::from_name(name) {
                    let operand = self.expect_value();
                    Stmt::Unary { dst, op, operand }
                } else if let Some(op) = BinaryOp::from_name(name) {
                    let (lhs, rhs) = self.parse_pair();
                    Stmt::Binary { dst, op, lhs, rhs }
                } else if let Some(op) = CmpOp::from_name(name) {
                    let (lhs, rhs) = self.parse_pair();
                    Stmt::Compare { dst, op, lhs, rhs }
                } else {
                    self.diagnostics.push(
                        Diagnostic::error(format!("unknown operation '{}'", name), op.span)
                            .with_help(
                                "expected const, index, arg, load, or an operator name such as add or sin"
                                    .to_string(),
                            ),
                    );
                    return None;
                }
            }
        };
        Some(stmt)
    }

    fn parse_adjoint(&mut self) -> Option<Stmt> {
        let target = self.expect_value();
        if self.eat(&Lexeme::MinusEq) {
            self.expect(&Lexeme::Adj);
            let source = self.expect_value();
            return Some(Stmt::Adjoint {
                target,
                source,
                scale: Scale::NegOne,
            });
        }
        self.expect(&Lexeme::PlusEq);
        if self.eat(&Lexeme::Grad) {
            let (field, index) = self.parse_access();
            return Some(Stmt::AdjointFromGrad {
                target,
                field,
                index,
            });
        }
        self.expect(&Lexeme::Adj);
        let source = self.expect_value();
        let scale = if self.eat(&Lexeme::Star) {
            Scale::By(self.expect_value())
        } else {
            Scale::One
        };
        Some(Stmt::Adjoint {
            target,
            source,
            scale,
        })
    }

    /// `name[%a, %b]`
    fn parse_access(&mut self) -> (String, Vec<ValueId>) {
        let field = self.expect_ident();
        self.expect(&Lexeme::LBracket);
        let mut index = Vec::new();
        while !self.at(&Lexeme::RBracket) && !self.at(&Lexeme::Eof) {
            index.push(self.expect_value());
            if !self.eat(&Lexeme::Comma) {
                break;
            }
        }
        self.expect(&Lexeme::RBracket);
        (field.node, index)
    }

    fn parse_pair(&mut self) -> (ValueId, ValueId) {
        let lhs = self.expect_value();
        self.expect(&Lexeme::Comma);
        let rhs = self.expect_value();
        (lhs, rhs)
    }

    /// A constant: `2.0`, `-1`, `1e-7`, `inf`, `-inf`, `NaN`.
    fn parse_number(&mut self) -> f64 {
        let negative = self.eat(&Lexeme::Minus);
        let magnitude = match self.peek().clone() {
            Lexeme::Integer(n) => n as f64,
            Lexeme::Float(x) => x,
            Lexeme::Ident(word) if word == "inf" => f64::INFINITY,
            Lexeme::Ident(word) if word == "NaN" => f64::NAN,
            other => {
                self.error_at_current(&format!("expected a number, found {}", other.description()));
                return 0.0;
            }
        };
        self.advance();
        if negative {
            -magnitude
        } else {
            magnitude
        }
    }

    // --- Utility methods ---

    fn enter_nesting(&mut self) -> bool {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.error_with_help(
                "nesting depth exceeded (maximum 256 levels)",
                "flatten deeply nested branches",
            );
            self.depth -= 1;
            return false;
        }
        true
    }

    fn exit_nesting(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].node
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        if self.pos > 0 {
            self.tokens[self.pos - 1].span
        } else {
            self.current_span()
        }
    }

    fn advance(&mut self) -> &Spanned<Lexeme> {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, token: &Lexeme) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(token)
    }

    fn eat(&mut self, token: &Lexeme) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> Span {
        if self.at(token) {
            let span = self.current_span();
            self.advance();
            span
        } else {
            self.error_at_current(&format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            ));
            self.current_span()
        }
    }

    fn expect_ident(&mut self) -> Spanned<String> {
        if let Lexeme::Ident(name) = self.peek().clone() {
            let span = self.current_span();
            self.advance();
            Spanned::new(name, span)
        } else {
            self.error_at_current(&format!(
                "expected identifier, found {}",
                self.peek().description()
            ));
            Spanned::new("_error_".to_string(), self.current_span())
        }
    }

    fn expect_integer(&mut self) -> u64 {
        if let Lexeme::Integer(n) = self.peek() {
            let n = *n;
            self.advance();
            n
        } else {
            self.error_at_current(&format!(
                "expected integer literal, found {}",
                self.peek().description()
            ));
            0
        }
    }

    fn expect_value(&mut self) -> ValueId {
        if let Lexeme::Value(n) = self.peek() {
            let id = ValueId(*n);
            self.advance();
            id
        } else {
            self.error_at_current(&format!(
                "expected value, found {}",
                self.peek().description()
            ));
            ValueId(0)
        }
    }

    fn error_at_current(&mut self, msg: &str) {
        self.diagnostics
            .push(Diagnostic::error(msg.to_string(), self.current_span()));
    }

    fn error_with_help(&mut self, msg: &str, help: &str) {
        self.diagnostics.push(
            Diagnostic::error(msg.to_string(), self.current_span()).with_help(help.to_string()),
        );
    }
}
