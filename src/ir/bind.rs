//! Binding a recorded kernel to the field table.
//!
//! Binding verifies the IR, resolves every field the kernel names, checks
//! index arity against field rank, and fixes the kernel's content hash. The
//! result is what the executors run and what the AD reverser differentiates.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::hash::{hash_kernel, ContentHash};
use super::verify::verify;
use super::{walk, Access, KernelIr, Stmt};
use crate::error::KernelError;
use crate::field::{FieldSig, FieldTable};

#[derive(Clone, Debug)]
pub struct CompiledKernel {
    pub ir: Arc<KernelIr>,
    /// Signatures of every field the kernel names.
    pub fields: BTreeMap<String, FieldSig>,
    pub access: Access,
    pub hash: ContentHash,
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.ir.name
    }
}

pub fn bind(ir: Arc<KernelIr>, table: &FieldTable) -> Result<CompiledKernel, KernelError> {
    verify(&ir)?;

    let access = Access::of(&ir.body);
    let mut fields = BTreeMap::new();
    for name in access.fields() {
        let sig = table.get(&name)?.signature();
        fields.insert(name, sig);
    }

    let mut arity_error = None;
    walk(&ir.body, &mut |stmt| {
        if arity_error.is_some() {
            return;
        }
        let (field, index) = match stmt {
            Stmt::Load { field, index, .. }
            | Stmt::Store { field, index, .. }
            | Stmt::AdjointFromGrad { field, index, .. }
            | Stmt::AccumulateGrad { field, index, .. } => (field, index),
            _ => return,
        };
        if let Some(sig) = fields.get(field) {
            if sig.shape.len() != index.len() {
                arity_error = Some(KernelError::shape(
                    field,
                    format!(
                        "kernel '{}' indexes it with {} coordinate(s), field has rank {}",
                        ir.name,
                        index.len(),
                        sig.shape.len()
                    ),
                ));
            }
        }
    });
    if let Some(err) = arity_error {
        return Err(err);
    }

    let hash = hash_kernel(&ir, &fields);
    log::debug!(
        "bound kernel {} {} ({} statements, {} fields)",
        ir.name,
        hash,
        ir.stmt_count(),
        fields.len()
    );
    Ok(CompiledKernel {
        ir,
        fields,
        access,
        hash,
    })
}
