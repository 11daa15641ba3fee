//! Program files: field declarations plus kernels in the printed IR syntax.
//!
//! ```text
//! # N = 16
//! field x: f32[16]
//! field y: f32[16] in root.inputs
//! grad root
//!
//! kernel oldeven over [0..16] {
//!   %0 = index 0
//!   ...
//! }
//! ```

pub mod lexeme;
pub(crate) mod lexer;
pub(crate) mod parser;
pub mod span;

use crate::diagnostic::{render_diagnostics, Diagnostic};
use crate::error::KernelError;
use crate::field::{DataType, ROOT_GROUP};
use crate::ir::verify::verify;
use crate::ir::KernelIr;
use crate::runtime::Runtime;
use lexer::Lexer;
use parser::Parser;
use span::{Span, Spanned};

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub dtype: DataType,
    pub shape: Vec<usize>,
    /// Declared group; `root` when absent.
    pub group: Option<String>,
    pub span: Span,
}

/// A parsed program file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub fields: Vec<FieldDecl>,
    /// Groups to enable gradients for, in file order.
    pub grads: Vec<Spanned<String>>,
    pub kernels: Vec<Spanned<KernelIr>>,
}

impl Program {
    pub fn kernel(&self, name: &str) -> Option<&KernelIr> {
        self.kernels
            .iter()
            .map(|k| &k.node)
            .find(|k| k.name == name)
    }

    /// Declare every field, enable gradients, and define every kernel.
    pub fn load_into(&self, rt: &mut Runtime) -> Result<(), KernelError> {
        for decl in &self.fields {
            let group = decl.group.as_deref().unwrap_or(ROOT_GROUP);
            rt.declare_field_in(group, &decl.name, decl.dtype, &decl.shape)?;
        }
        for group in &self.grads {
            rt.enable_gradients(&group.node);
        }
        for kernel in &self.kernels {
            rt.define_kernel(kernel.node.clone())?;
        }
        log::debug!(
            "loaded program: {} fields, {} kernels",
            self.fields.len(),
            self.kernels.len()
        );
        Ok(())
    }
}

/// Parse a program, rendering any diagnostics to stderr.
pub fn parse_program(source: &str, filename: &str) -> Result<Program, Vec<Diagnostic>> {
    parse_program_silent(source).map_err(|errors| {
        render_diagnostics(&errors, filename, source);
        errors
    })
}

/// Parse a program without rendering diagnostics.
pub fn parse_program_silent(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    let program = Parser::new(tokens).parse_program()?;

    // Structural errors point at the whole kernel.
    let errors: Vec<Diagnostic> = program
        .kernels
        .iter()
        .filter_map(|k| {
            verify(&k.node)
                .err()
                .map(|e| Diagnostic::error(e.to_string(), k.span))
        })
        .collect();
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(program)
}
