//! Per-statement reversal rules.
//!
//! Rules append to the adjoint section of the block being reversed, in
//! execution order. Derivative factors are fresh primal temporaries emitted
//! right before the adjoint update that scales by them.

use super::Reverser;
use crate::error::KernelError;
use crate::ir::{BinaryOp, CmpOp, Scale, Stmt, UnaryOp, ValueId};

impl Reverser<'_> {
    pub(super) fn rule(&mut self, stmt: &Stmt, out: &mut Vec<Stmt>) -> Result<(), KernelError> {
        match stmt {
            Stmt::Load { dst, field, index } => {
                if self.analysis.needs_adjoint(*dst) {
                    self.check_index(index)?;
                    out.push(Stmt::AccumulateGrad {
                        field: field.clone(),
                        index: index.clone(),
                        source: *dst,
                    });
                }
            }
            Stmt::Store {
                field,
                index,
                value,
            } => {
                let real = self.fields.get(field).is_some_and(|s| s.dtype.is_real());
                if real && self.analysis.needs_adjoint(*value) {
                    self.check_index(index)?;
                    out.push(Stmt::AdjointFromGrad {
                        target: *value,
                        field: field.clone(),
                        index: index.clone(),
                    });
                }
            }
            Stmt::Binary { dst, op, lhs, rhs } => {
                if self.analysis.needs_adjoint(*dst) {
                    self.binary(*dst, *op, *lhs, *rhs, out)?;
                }
            }
            Stmt::Unary { dst, op, operand } => {
                if self.analysis.needs_adjoint(*dst) {
                    self.unary(*dst, *op, *operand, out)?;
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let then_body = self.block(then_body)?;
                let else_body = self.block(else_body)?;
                if !then_body.is_empty() || !else_body.is_empty() {
                    out.push(Stmt::If {
                        cond: *cond,
                        then_body,
                        else_body,
                    });
                }
            }
            // Piecewise constant or constant: zero adjoint.
            Stmt::Const { .. } | Stmt::Index { .. } | Stmt::Arg { .. } | Stmt::Compare { .. } => {}
            Stmt::AdjointFromGrad { .. } | Stmt::Adjoint { .. } | Stmt::AccumulateGrad { .. } => {
                return Err(self.not_differentiable(stmt));
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        dst: ValueId,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
        out: &mut Vec<Stmt>,
    ) -> Result<(), KernelError> {
        let d_lhs = self.analysis.needs_adjoint(lhs);
        let d_rhs = self.analysis.needs_adjoint(rhs);
        match op {
            BinaryOp::Add => {
                self.adjoint(out, d_lhs, lhs, dst, Scale::One);
                self.adjoint(out, d_rhs, rhs, dst, Scale::One);
            }
            BinaryOp::Sub => {
                self.adjoint(out, d_lhs, lhs, dst, Scale::One);
                self.adjoint(out, d_rhs, rhs, dst, Scale::NegOne);
            }
            BinaryOp::Mul => {
                if d_lhs {
                    let b = self.primal(rhs)?;
                    self.adjoint(out, true, lhs, dst, Scale::By(b));
                }
                if d_rhs {
                    let a = self.primal(lhs)?;
                    self.adjoint(out, true, rhs, dst, Scale::By(a));
                }
            }
            BinaryOp::Div => {
                // d(a/b)/da = 1/b, d(a/b)/db = -(a/b)/b
                if d_lhs {
                    let b = self.primal(rhs)?;
                    let one = self.constant(out, 1.0);
                    let inv = self.binary_temp(out, BinaryOp::Div, one, b);
                    self.adjoint(out, true, lhs, dst, Scale::By(inv));
                }
                if d_rhs {
                    let q = self.primal(dst)?;
                    let b = self.primal(rhs)?;
                    let t = self.binary_temp(out, BinaryOp::Div, q, b);
                    let neg = self.unary_temp(out, UnaryOp::Neg, t);
                    self.adjoint(out, true, rhs, dst, Scale::By(neg));
                }
            }
            BinaryOp::Pow => {
                // d(a^b)/da = b * a^(b-1), d(a^b)/db = a^b * ln a
                if d_lhs {
                    let a = self.primal(lhs)?;
                    let b = self.primal(rhs)?;
                    let one = self.constant(out, 1.0);
                    let b1 = self.binary_temp(out, BinaryOp::Sub, b, one);
                    let p = self.binary_temp(out, BinaryOp::Pow, a, b1);
                    let f = self.binary_temp(out, BinaryOp::Mul, b, p);
                    self.adjoint(out, true, lhs, dst, Scale::By(f));
                }
                if d_rhs {
                    let a = self.primal(lhs)?;
                    let y = self.primal(dst)?;
                    let ln = self.unary_temp(out, UnaryOp::Log, a);
                    let f = self.binary_temp(out, BinaryOp::Mul, y, ln);
                    self.adjoint(out, true, rhs, dst, Scale::By(f));
                }
            }
            BinaryOp::Max | BinaryOp::Min => {
                // Ties route the whole adjoint to the left operand.
                let (to_lhs, to_rhs) = if op == BinaryOp::Max {
                    (CmpOp::Ge, CmpOp::Lt)
                } else {
                    (CmpOp::Le, CmpOp::Gt)
                };
                let a = self.primal(lhs)?;
                let b = self.primal(rhs)?;
                if d_lhs {
                    let m = self.compare_temp(out, to_lhs, a, b);
                    self.adjoint(out, true, lhs, dst, Scale::By(m));
                }
                if d_rhs {
                    let m = self.compare_temp(out, to_rhs, a, b);
                    self.adjoint(out, true, rhs, dst, Scale::By(m));
                }
            }
            BinaryOp::Mod | BinaryOp::FloorDiv => {
                return Err(self.not_differentiable(&Stmt::Binary { dst, op, lhs, rhs }));
            }
        }
        Ok(())
    }

    fn unary(
        &mut self,
        dst: ValueId,
        op: UnaryOp,
        operand: ValueId,
        out: &mut Vec<Stmt>,
    ) -> Result<(), KernelError> {
        let scale = match op {
            UnaryOp::Neg => Scale::NegOne,
            UnaryOp::Sin => {
                let a = self.primal(operand)?;
                Scale::By(self.unary_temp(out, UnaryOp::Cos, a))
            }
            UnaryOp::Cos => {
                let a = self.primal(operand)?;
                let s = self.unary_temp(out, UnaryOp::Sin, a);
                Scale::By(self.unary_temp(out, UnaryOp::Neg, s))
            }
            UnaryOp::Exp => Scale::By(self.primal(dst)?),
            UnaryOp::Log => {
                let a = self.primal(operand)?;
                let one = self.constant(out, 1.0);
                Scale::By(self.binary_temp(out, BinaryOp::Div, one, a))
            }
            UnaryOp::Sqrt => {
                let y = self.primal(dst)?;
                let half = self.constant(out, 0.5);
                Scale::By(self.binary_temp(out, BinaryOp::Div, half, y))
            }
            UnaryOp::Tanh => {
                let y = self.primal(dst)?;
                let sq = self.binary_temp(out, BinaryOp::Mul, y, y);
                let one = self.constant(out, 1.0);
                Scale::By(self.binary_temp(out, BinaryOp::Sub, one, sq))
            }
            UnaryOp::Abs => {
                let a = self.primal(operand)?;
                Scale::By(self.unary_temp(out, UnaryOp::Sgn, a))
            }
            // Inactive by construction; nothing flows through a sign.
            UnaryOp::Sgn => return Ok(()),
        };
        self.adjoint(out, true, operand, dst, scale);
        Ok(())
    }

    // ── Emission helpers ──────────────────────────────────────────

    fn adjoint(
        &self,
        out: &mut Vec<Stmt>,
        needed: bool,
        target: ValueId,
        source: ValueId,
        scale: Scale,
    ) {
        if needed {
            out.push(Stmt::Adjoint {
                target,
                source,
                scale,
            });
        }
    }

    fn constant(&mut self, out: &mut Vec<Stmt>, value: f64) -> ValueId {
        let dst = self.fresh();
        out.push(Stmt::Const { dst, value });
        dst
    }

    fn binary_temp(&mut self, out: &mut Vec<Stmt>, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dst = self.fresh();
        out.push(Stmt::Binary { dst, op, lhs, rhs });
        dst
    }

    fn unary_temp(&mut self, out: &mut Vec<Stmt>, op: UnaryOp, operand: ValueId) -> ValueId {
        let dst = self.fresh();
        out.push(Stmt::Unary { dst, op, operand });
        dst
    }

    fn compare_temp(&mut self, out: &mut Vec<Stmt>, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dst = self.fresh();
        out.push(Stmt::Compare { dst, op, lhs, rhs });
        dst
    }

    /// A primal the reverse pass reads must not depend on a field the kernel
    /// writes.
    fn primal(&self, value: ValueId) -> Result<ValueId, KernelError> {
        match self.analysis.overwritten_dependency(value) {
            Some(field) => Err(KernelError::OverwrittenPrimal {
                kernel: self.ir.name.clone(),
                value,
                field,
            }),
            None => Ok(value),
        }
    }

    /// Gradient locations are addressed by recomputed indices.
    fn check_index(&self, index: &[ValueId]) -> Result<(), KernelError> {
        for &i in index {
            self.primal(i)?;
        }
        Ok(())
    }

    fn not_differentiable(&self, stmt: &Stmt) -> KernelError {
        KernelError::NotDifferentiable {
            kernel: self.ir.name.clone(),
            op: format!("`{}`", stmt.to_string().trim_end()),
        }
    }
}
