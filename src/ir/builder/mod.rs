//! KernelBuilder: records an imperative kernel body as IR.
//!
//! Each method appends one statement to the innermost open block and returns
//! the value it defines. Branch bodies are recorded by closures, so nesting in
//! the builder code mirrors nesting in the kernel:
//!
//! ```
//! use gradus::ir::builder::KernelBuilder;
//! use gradus::ir::{CmpOp, Domain};
//!
//! let mut b = KernelBuilder::new("oldeven", Domain::range(16));
//! let i = b.index(0);
//! let two = b.constant(2.0);
//! let zero = b.constant(0.0);
//! let rem = b.rem(i, two);
//! let even = b.compare(CmpOp::Eq, rem, zero);
//! b.if_then(even, |b| {
//!     let y = b.load("y", &[i]);
//!     b.store("x", &[i], y);
//! });
//! let ir = b.finish();
//! assert_eq!(ir.next_value, 6);
//! ```

#[cfg(test)]
mod tests;

use super::{BinaryOp, CmpOp, Domain, KernelIr, Stmt, UnaryOp, ValueId};

pub struct KernelBuilder {
    name: String,
    domain: Domain,
    num_args: u32,
    /// Open blocks; the last one receives new statements.
    blocks: Vec<Vec<Stmt>>,
    next_value: u32,
}

impl KernelBuilder {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            domain,
            num_args: 0,
            blocks: vec![Vec::new()],
            next_value: 0,
        }
    }

    // ── Builder-pattern configuration ─────────────────────────────

    pub fn with_args(mut self, num_args: u32) -> Self {
        self.num_args = num_args;
        self
    }

    // ── Recording ─────────────────────────────────────────────────

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    fn push(&mut self, stmt: Stmt) {
        if let Some(block) = self.blocks.last_mut() {
            block.push(stmt);
        }
    }

    fn define(&mut self, make: impl FnOnce(ValueId) -> Stmt) -> ValueId {
        let dst = self.fresh();
        let stmt = make(dst);
        self.push(stmt);
        dst
    }

    pub fn constant(&mut self, value: f64) -> ValueId {
        self.define(|dst| Stmt::Const { dst, value })
    }

    pub fn index(&mut self, axis: u32) -> ValueId {
        self.define(|dst| Stmt::Index { dst, axis })
    }

    pub fn arg(&mut self, position: u32) -> ValueId {
        self.define(|dst| Stmt::Arg { dst, position })
    }

    pub fn load(&mut self, field: &str, index: &[ValueId]) -> ValueId {
        self.define(|dst| Stmt::Load {
            dst,
            field: field.to_string(),
            index: index.to_vec(),
        })
    }

    pub fn store(&mut self, field: &str, index: &[ValueId], value: ValueId) {
        self.push(Stmt::Store {
            field: field.to_string(),
            index: index.to_vec(),
            value,
        });
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.define(|dst| Stmt::Binary { dst, op, lhs, rhs })
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ValueId) -> ValueId {
        self.define(|dst| Stmt::Unary { dst, op, operand })
    }

    pub fn compare(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.define(|dst| Stmt::Compare { dst, op, lhs, rhs })
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    pub fn rem(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mod, lhs, rhs)
    }

    // ── Control flow ──────────────────────────────────────────────

    fn nested(&mut self, body: impl FnOnce(&mut Self)) -> Vec<Stmt> {
        self.blocks.push(Vec::new());
        body(self);
        self.blocks.pop().unwrap_or_default()
    }

    pub fn if_then(&mut self, cond: ValueId, then: impl FnOnce(&mut Self)) {
        let then_body = self.nested(then);
        self.push(Stmt::If {
            cond,
            then_body,
            else_body: Vec::new(),
        });
    }

    pub fn if_else(
        &mut self,
        cond: ValueId,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) {
        let then_body = self.nested(then);
        let else_body = self.nested(otherwise);
        self.push(Stmt::If {
            cond,
            then_body,
            else_body,
        });
    }

    pub fn finish(mut self) -> KernelIr {
        let body = self.blocks.swap_remove(0);
        KernelIr {
            name: self.name,
            domain: self.domain,
            num_args: self.num_args,
            body,
            next_value: self.next_value,
        }
    }
}
