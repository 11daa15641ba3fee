//! Structural checks on kernel IR.
//!
//! - every value is defined once and below `next_value`
//! - every operand is visible: defined earlier in the same block or in an
//!   enclosing one
//! - `index` axes fit the domain rank, `arg` positions fit the argument count
//!
//! Field names and index arity are checked later, when the kernel is bound to
//! a field table.

use std::collections::HashSet;

use super::{KernelIr, Stmt, ValueId};
use crate::error::KernelError;

struct Verifier<'a> {
    ir: &'a KernelIr,
    defined: HashSet<ValueId>,
    visible: Vec<ValueId>,
}

pub fn verify(ir: &KernelIr) -> Result<(), KernelError> {
    let mut v = Verifier {
        ir,
        defined: HashSet::new(),
        visible: Vec::new(),
    };
    v.block(&ir.body)
}

impl Verifier<'_> {
    fn block(&mut self, body: &[Stmt]) -> Result<(), KernelError> {
        let scope = self.visible.len();
        for stmt in body {
            self.stmt(stmt)?;
        }
        self.visible.truncate(scope);
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), KernelError> {
        for operand in stmt.operands() {
            if !self.visible.contains(&operand) {
                return Err(KernelError::malformed(
                    &self.ir.name,
                    format!("`{}` uses {} outside its scope", stmt.mnemonic(), operand),
                ));
            }
        }

        match stmt {
            Stmt::Index { axis, .. } if *axis as usize >= self.ir.domain.rank() => {
                return Err(KernelError::shape(
                    &self.ir.name,
                    format!(
                        "index axis {} on a domain of rank {}",
                        axis,
                        self.ir.domain.rank()
                    ),
                ));
            }
            Stmt::Arg { position, .. } if *position >= self.ir.num_args => {
                return Err(KernelError::malformed(
                    &self.ir.name,
                    format!(
                        "argument {} requested, kernel takes {}",
                        position, self.ir.num_args
                    ),
                ));
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                self.block(then_body)?;
                self.block(else_body)?;
            }
            _ => {}
        }

        if let Some(dst) = stmt.dst() {
            if dst.0 >= self.ir.next_value {
                return Err(KernelError::malformed(
                    &self.ir.name,
                    format!("{} is beyond the value counter {}", dst, self.ir.next_value),
                ));
            }
            if !self.defined.insert(dst) {
                return Err(KernelError::malformed(
                    &self.ir.name,
                    format!("{} is defined more than once", dst),
                ));
            }
            self.visible.push(dst);
        }
        Ok(())
    }
}
