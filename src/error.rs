//! Runtime and differentiation errors.
//!
//! Every variant is a program-construction defect: errors are raised
//! synchronously at the offending call and are never retried.

use thiserror::Error;

use crate::ir::ValueId;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum KernelError {
    /// Gradient access on a field whose gradients were never enabled.
    #[error("field '{field}' has no gradient buffer (enable gradients on its group first)")]
    UngradedField { field: String },

    /// The forward IR contains an operator with no reversal rule.
    #[error("kernel '{kernel}' is not differentiable: no reversal rule for {op}")]
    NotDifferentiable { kernel: String, op: String },

    /// A branch predicate depends on a field the kernel itself writes.
    #[error(
        "kernel '{kernel}': branch predicate {predicate} reads field '{field}', which the kernel mutates"
    )]
    ImpureBranchCondition {
        kernel: String,
        predicate: ValueId,
        field: String,
    },

    /// Index arity, index range, or domain rank does not match.
    #[error("shape mismatch on '{subject}': {detail}")]
    ShapeMismatch { subject: String, detail: String },

    #[error("unknown field '{field}'")]
    UnknownField { field: String },

    #[error("unknown kernel '{kernel}'")]
    UnknownKernel { kernel: String },

    #[error("'{name}' is already declared")]
    DuplicateSymbol { name: String },

    #[error("kernel '{kernel}' takes {expected} argument(s), {found} given")]
    ArgumentCount {
        kernel: String,
        expected: u32,
        found: usize,
    },

    #[error("kernel '{kernel}': malformed IR: {detail}")]
    MalformedIr { kernel: String, detail: String },

    /// An adjoint needs a primal value that depends on a field the kernel
    /// overwrites, so the reverse pass would see post-forward state.
    #[error(
        "kernel '{kernel}': gradient of {value} needs the primal value of field '{field}', which the kernel overwrites"
    )]
    OverwrittenPrimal {
        kernel: String,
        value: ValueId,
        field: String,
    },
}

impl KernelError {
    pub(crate) fn malformed(kernel: &str, detail: impl Into<String>) -> Self {
        KernelError::MalformedIr {
            kernel: kernel.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn shape(subject: &str, detail: impl Into<String>) -> Self {
        KernelError::ShapeMismatch {
            subject: subject.to_string(),
            detail: detail.into(),
        }
    }
}
