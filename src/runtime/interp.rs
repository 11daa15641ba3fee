//! Reference interpreter for forward and gradient kernels.
//!
//! The body runs once per domain point. Primal and adjoint registers belong
//! to a single point: both are reset before every iteration, so nothing
//! computed at one index is visible at another.

use crate::error::KernelError;
use crate::field::FieldTable;
use crate::ir::{IterationOrder, KernelIr, Scale, Stmt, ValueId};

struct Interpreter<'a> {
    ir: &'a KernelIr,
    fields: &'a mut FieldTable,
    args: &'a [f64],
    point: Vec<i64>,
    values: Vec<f64>,
    adjoints: Vec<f64>,
}

/// Run `ir` over its domain in `order`.
///
/// Fields are mutated in place; on error the caller is responsible for
/// rolling back whatever was written before the failing point.
pub(crate) fn execute(
    ir: &KernelIr,
    fields: &mut FieldTable,
    args: &[f64],
    order: IterationOrder,
) -> Result<(), KernelError> {
    let registers = ir.next_value as usize;
    let mut interp = Interpreter {
        ir,
        fields,
        args,
        point: Vec::new(),
        values: vec![0.0; registers],
        adjoints: vec![0.0; registers],
    };
    for point in ir.domain.points(order) {
        interp.point = point;
        interp.values.iter_mut().for_each(|v| *v = 0.0);
        interp.adjoints.iter_mut().for_each(|a| *a = 0.0);
        interp.block(&ir.body)?;
    }
    Ok(())
}

impl Interpreter<'_> {
    fn block(&mut self, body: &[Stmt]) -> Result<(), KernelError> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), KernelError> {
        match stmt {
            Stmt::Const { dst, value } => self.set(*dst, *value),
            Stmt::Index { dst, axis } => {
                let coord = self.point.get(*axis as usize).copied().ok_or_else(|| {
                    KernelError::shape(
                        &self.ir.name,
                        format!("index axis {} on a domain of rank {}", axis, self.point.len()),
                    )
                })?;
                self.set(*dst, coord as f64);
            }
            Stmt::Arg { dst, position } => {
                let value = self.args.get(*position as usize).copied().ok_or_else(|| {
                    KernelError::ArgumentCount {
                        kernel: self.ir.name.clone(),
                        expected: self.ir.num_args,
                        found: self.args.len(),
                    }
                })?;
                self.set(*dst, value);
            }
            Stmt::Load { dst, field, index } => {
                let at = self.coords(field, index)?;
                let value = self.fields.get(field)?.read(&at)?;
                self.set(*dst, value);
            }
            Stmt::Store {
                field,
                index,
                value,
            } => {
                let at = self.coords(field, index)?;
                let value = self.get(*value);
                self.fields.get_mut(field)?.write(&at, value)?;
            }
            Stmt::Binary { dst, op, lhs, rhs } => {
                let value = op.apply(self.get(*lhs), self.get(*rhs));
                self.set(*dst, value);
            }
            Stmt::Unary { dst, op, operand } => {
                let value = op.apply(self.get(*operand));
                self.set(*dst, value);
            }
            Stmt::Compare { dst, op, lhs, rhs } => {
                let value = op.apply(self.get(*lhs), self.get(*rhs));
                self.set(*dst, value);
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.get(*cond) != 0.0 {
                    self.block(then_body)?;
                } else {
                    self.block(else_body)?;
                }
            }
            Stmt::AdjointFromGrad {
                target,
                field,
                index,
            } => {
                let at = self.coords(field, index)?;
                let grad = self.fields.get(field)?.read_grad(&at)?;
                self.adjoints[target.index()] += grad;
            }
            Stmt::Adjoint {
                target,
                source,
                scale,
            } => {
                let factor = match scale {
                    Scale::One => 1.0,
                    Scale::NegOne => -1.0,
                    Scale::By(v) => self.get(*v),
                };
                self.adjoints[target.index()] += self.adjoints[source.index()] * factor;
            }
            Stmt::AccumulateGrad {
                field,
                index,
                source,
            } => {
                let at = self.coords(field, index)?;
                let delta = self.adjoints[source.index()];
                self.fields.get_mut(field)?.accumulate_grad(&at, delta)?;
            }
        }
        Ok(())
    }

    fn get(&self, v: ValueId) -> f64 {
        self.values[v.index()]
    }

    fn set(&mut self, v: ValueId, value: f64) {
        self.values[v.index()] = value;
    }

    /// Index values must be integral; bounds are checked by the field.
    fn coords(&self, field: &str, index: &[ValueId]) -> Result<Vec<i64>, KernelError> {
        index
            .iter()
            .map(|&v| {
                let x = self.get(v);
                if x.is_finite() && x.fract() == 0.0 {
                    Ok(x as i64)
                } else {
                    Err(KernelError::shape(
                        field,
                        format!("non-integral index {} (from {})", x, v),
                    ))
                }
            })
            .collect()
    }
}
