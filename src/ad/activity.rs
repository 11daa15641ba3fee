//! Activity analysis over a forward kernel.
//!
//! A value is *active* when it depends on a load from a real-typed field, and
//! *useful* when it flows into a store to a real-typed field. Only values that
//! are both need adjoint registers; everything else (loop indices, masks,
//! predicates, integer data) is differentiated to zero and emits no code.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::field::FieldSig;
use crate::ir::{walk, KernelIr, Stmt, UnaryOp, ValueId};

pub(crate) struct Analysis<'a> {
    defs: HashMap<ValueId, &'a Stmt>,
    /// Fields the kernel stores to, anywhere in its body.
    pub(crate) written: BTreeSet<String>,
    active: HashSet<ValueId>,
    useful: HashSet<ValueId>,
}

fn is_real(fields: &BTreeMap<String, FieldSig>, field: &str) -> bool {
    fields.get(field).is_some_and(|sig| sig.dtype.is_real())
}

impl<'a> Analysis<'a> {
    pub(crate) fn run(ir: &'a KernelIr, fields: &BTreeMap<String, FieldSig>) -> Self {
        let mut order: Vec<&'a Stmt> = Vec::new();
        walk(&ir.body, &mut |stmt| order.push(stmt));

        let mut defs = HashMap::new();
        let mut written = BTreeSet::new();
        let mut active = HashSet::new();

        // Definitions precede uses in preorder, so one forward sweep settles
        // activity.
        for &stmt in &order {
            if let Some(dst) = stmt.dst() {
                defs.insert(dst, stmt);
            }
            let is_active = match stmt {
                Stmt::Load { field, .. } => is_real(fields, field),
                Stmt::Binary { lhs, rhs, .. } => active.contains(lhs) || active.contains(rhs),
                Stmt::Unary { op, operand, .. } => {
                    *op != UnaryOp::Sgn && active.contains(operand)
                }
                Stmt::Store { field, .. } => {
                    written.insert(field.clone());
                    false
                }
                _ => false,
            };
            if let (true, Some(dst)) = (is_active, stmt.dst()) {
                active.insert(dst);
            }
        }

        // Every use follows its definition, so a reverse sweep sees all
        // consumers of a value before the value itself.
        let mut useful = HashSet::new();
        for &stmt in order.iter().rev() {
            match stmt {
                Stmt::Store { field, value, .. } => {
                    if is_real(fields, field) && active.contains(value) {
                        useful.insert(*value);
                    }
                }
                Stmt::Binary { dst, lhs, rhs, .. } if useful.contains(dst) => {
                    for operand in [lhs, rhs] {
                        if active.contains(operand) {
                            useful.insert(*operand);
                        }
                    }
                }
                Stmt::Unary { dst, operand, .. } if useful.contains(dst) => {
                    if active.contains(operand) {
                        useful.insert(*operand);
                    }
                }
                _ => {}
            }
        }

        Self {
            defs,
            written,
            active,
            useful,
        }
    }

    /// Whether `value` carries an adjoint register in the reverse kernel.
    pub(crate) fn needs_adjoint(&self, value: ValueId) -> bool {
        self.active.contains(&value) && self.useful.contains(&value)
    }

    /// Every field whose primal contents `value` depends on, through data or
    /// through load indices.
    pub(crate) fn loaded_fields(&self, value: ValueId) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut stack = vec![value];
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            let Some(stmt) = self.defs.get(&v) else {
                continue;
            };
            if let Stmt::Load { field, .. } = stmt {
                fields.insert(field.clone());
            }
            stack.extend(stmt.operands());
        }
        fields
    }

    /// The first field (by name) that `value` depends on and the kernel
    /// also writes.
    pub(crate) fn overwritten_dependency(&self, value: ValueId) -> Option<String> {
        self.loaded_fields(value)
            .intersection(&self.written)
            .next()
            .cloned()
    }
}
