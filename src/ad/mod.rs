//! Reverse-mode AD: forward kernel IR in, gradient kernel IR out.
//!
//! Every block `B` becomes `primal(B) ++ adjoint(B)`:
//!
//! - `primal(B)` copies the pure statements of `B` verbatim, in order, with
//!   the same value ids. This recomputes each primal the chain rule needs and
//!   re-evaluates every branch predicate exactly as the forward pass did.
//! - `adjoint(B)` applies one rule per statement, last statement first.
//!   `store f[i], v` reads `f.grad[i]` into the adjoint of `v`;
//!   `v = load f[i]` accumulates the adjoint of `v` into `f.grad[i]`;
//!   arithmetic follows the scalar chain rule through adjoint registers;
//!   `if p { .. }` becomes `if p { reverse(..) }`.
//!
//! Adjoint registers start at zero for every domain point, and every update
//! adds, so stores that fire on overlapping indices produce summed gradients.
//!
//! The transformation is a pure function of the forward IR and the field
//! signatures: fresh ids come from the forward value counter in traversal
//! order, so deriving twice yields identical IR.

mod activity;
mod rules;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use crate::error::KernelError;
use crate::field::FieldSig;
use crate::ir::{walk, KernelIr, Stmt, ValueId};

use self::activity::Analysis;

/// Suffix appended to a kernel's name to name its gradient kernel.
pub const GRAD_SUFFIX: &str = "_grad";

pub(crate) struct Reverser<'a> {
    ir: &'a KernelIr,
    analysis: Analysis<'a>,
    fields: &'a BTreeMap<String, FieldSig>,
    next_value: u32,
}

/// Derive the gradient kernel of `ir`, bound against `fields`.
pub fn reverse(
    ir: &KernelIr,
    fields: &BTreeMap<String, FieldSig>,
) -> Result<KernelIr, KernelError> {
    reject_reverse_only(ir)?;
    let analysis = Analysis::run(ir, fields);
    check_predicates(ir, &analysis)?;

    let mut reverser = Reverser {
        ir,
        analysis,
        fields,
        next_value: ir.next_value,
    };
    let body = reverser.block(&ir.body)?;
    let grad = KernelIr {
        name: format!("{}{}", ir.name, GRAD_SUFFIX),
        domain: ir.domain.clone(),
        num_args: ir.num_args,
        body,
        next_value: reverser.next_value,
    };
    log::debug!(
        "reversed {}: {} forward statements, {} reverse statements",
        ir.name,
        ir.stmt_count(),
        grad.stmt_count()
    );
    Ok(grad)
}

fn reject_reverse_only(ir: &KernelIr) -> Result<(), KernelError> {
    let mut found = None;
    walk(&ir.body, &mut |stmt| {
        if found.is_none() && stmt.is_reverse_only() {
            found = Some(stmt.mnemonic());
        }
    });
    match found {
        Some(op) => Err(KernelError::NotDifferentiable {
            kernel: ir.name.clone(),
            op: format!("reverse-only statement `{}` in a forward kernel", op),
        }),
        None => Ok(()),
    }
}

/// Branch predicates must not read anything the kernel writes: the reverse
/// pass re-evaluates them after the forward pass has run.
fn check_predicates(ir: &KernelIr, analysis: &Analysis<'_>) -> Result<(), KernelError> {
    let mut impure = None;
    walk(&ir.body, &mut |stmt| {
        if impure.is_some() {
            return;
        }
        if let Stmt::If { cond, .. } = stmt {
            if let Some(field) = analysis.overwritten_dependency(*cond) {
                impure = Some((*cond, field));
            }
        }
    });
    match impure {
        Some((predicate, field)) => Err(KernelError::ImpureBranchCondition {
            kernel: ir.name.clone(),
            predicate,
            field,
        }),
        None => Ok(()),
    }
}

impl Reverser<'_> {
    fn block(&mut self, body: &[Stmt]) -> Result<Vec<Stmt>, KernelError> {
        let mut adjoint = Vec::new();
        for stmt in body.iter().rev() {
            self.rule(stmt, &mut adjoint)?;
        }
        if adjoint.is_empty() {
            return Ok(Vec::new());
        }
        let mut out: Vec<Stmt> = body.iter().filter(|s| s.is_pure()).cloned().collect();
        out.extend(adjoint);
        Ok(out)
    }

    fn fresh(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }
}
