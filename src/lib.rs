//! Kernels over array fields, with reverse-mode differentiation of kernels
//! that branch.
//!
//! ```
//! use gradus::{CmpOp, DataType, Domain, KernelBuilder, Runtime};
//!
//! let mut rt = Runtime::default();
//! rt.declare_field("x", DataType::F32, &[4]).unwrap();
//! rt.declare_field("y", DataType::F32, &[4]).unwrap();
//! rt.enable_gradients("root");
//!
//! let mut b = KernelBuilder::new("copy_pos", Domain::range(4));
//! let i = b.index(0);
//! let y = b.load("y", &[i]);
//! let zero = b.constant(0.0);
//! let pos = b.compare(CmpOp::Gt, y, zero);
//! b.if_then(pos, |b| b.store("x", &[i], y));
//! rt.define_kernel(b.finish()).unwrap();
//!
//! rt.field_mut("y").unwrap().fill(1.0);
//! rt.field_mut("x").unwrap().fill_grad(1.0).unwrap();
//! rt.invoke_gradient("copy_pos", &[]).unwrap();
//! assert_eq!(rt.field("y").unwrap().grad_to_vec().unwrap(), vec![1.0; 4]);
//! ```

pub mod ad;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod field;
pub mod ir;
pub mod registry;
pub mod runtime;
pub mod syntax;

pub use syntax::span;

pub use ad::reverse;
pub use config::Config;
pub use error::KernelError;
pub use field::{DataType, Field, FieldSig, FieldTable, ROOT_GROUP};
pub use ir::builder::KernelBuilder;
pub use ir::hash::ContentHash;
pub use ir::{BinaryOp, CmpOp, Domain, IterationOrder, KernelIr, Stmt, UnaryOp, ValueId};
pub use registry::GradientRegistry;
pub use runtime::{Runtime, Stats};
pub use syntax::{parse_program, parse_program_silent, Program};
