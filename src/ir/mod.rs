//! Kernel intermediate representation.
//!
//! A kernel body is a tree of statements over SSA value registers (`%n`).
//! Pure statements define exactly one value; `Store` mutates a field;
//! `If` carries nested bodies. Three reverse-only statements operate on the
//! adjoint register file and on gradient buffers; only the AD reverser emits
//! them.
//!
//! `Display` prints the canonical text form. The same syntax is read back by
//! `crate::syntax`, and `hash` content-addresses kernels over it.

pub mod bind;
pub mod builder;
pub mod hash;
pub mod verify;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

// ─── Values ───────────────────────────────────────────────────────

/// An SSA value register. Defined once, visible in its defining block and
/// in every block nested inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ─── Operators ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Max,
    Min,
    /// Floored modulo: the result takes the sign of the divisor.
    Mod,
    FloorDiv,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 9] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Pow,
        BinaryOp::Max,
        BinaryOp::Min,
        BinaryOp::Mod,
        BinaryOp::FloorDiv,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Pow => "pow",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::Mod => "mod",
            BinaryOp::FloorDiv => "floordiv",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
            BinaryOp::Max => a.max(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::Mod => a - b * (a / b).floor(),
            BinaryOp::FloorDiv => (a / b).floor(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
    /// Sign: -1, 0 or 1. Piecewise constant, so its adjoint is zero.
    Sgn,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 9] = [
        UnaryOp::Neg,
        UnaryOp::Sin,
        UnaryOp::Cos,
        UnaryOp::Exp,
        UnaryOp::Log,
        UnaryOp::Sqrt,
        UnaryOp::Tanh,
        UnaryOp::Abs,
        UnaryOp::Sgn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Abs => "abs",
            UnaryOp::Sgn => "sgn",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn apply(self, a: f64) -> f64 {
        match self {
            UnaryOp::Neg => -a,
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
            UnaryOp::Exp => a.exp(),
            UnaryOp::Log => a.ln(),
            UnaryOp::Sqrt => a.sqrt(),
            UnaryOp::Tanh => a.tanh(),
            UnaryOp::Abs => a.abs(),
            UnaryOp::Sgn => {
                if a > 0.0 {
                    1.0
                } else if a < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Comparisons produce 1.0 (true) or 0.0 (false).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub const ALL: [CmpOp; 6] = [
        CmpOp::Eq,
        CmpOp::Ne,
        CmpOp::Lt,
        CmpOp::Le,
        CmpOp::Gt,
        CmpOp::Ge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        let holds = match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        };
        if holds {
            1.0
        } else {
            0.0
        }
    }
}

/// Multiplier applied when one adjoint register feeds another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scale {
    One,
    NegOne,
    /// Scale by a primal value computed in the same reverse block.
    By(ValueId),
}

// ─── Statements ───────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    // ── Leaves ──
    Const {
        dst: ValueId,
        value: f64,
    },
    /// Loop index along one axis of the iteration domain.
    Index {
        dst: ValueId,
        axis: u32,
    },
    /// Scalar kernel argument.
    Arg {
        dst: ValueId,
        position: u32,
    },

    // ── Field access ──
    Load {
        dst: ValueId,
        field: String,
        index: Vec<ValueId>,
    },
    Store {
        field: String,
        index: Vec<ValueId>,
        value: ValueId,
    },

    // ── Arithmetic ──
    Binary {
        dst: ValueId,
        op: BinaryOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Unary {
        dst: ValueId,
        op: UnaryOp,
        operand: ValueId,
    },
    Compare {
        dst: ValueId,
        op: CmpOp,
        lhs: ValueId,
        rhs: ValueId,
    },

    // ── Control flow ──
    /// Executes `then_body` when `cond` is nonzero, `else_body` otherwise.
    If {
        cond: ValueId,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },

    // ── Reverse-only ──
    /// `adj[target] += field.grad[index]`
    AdjointFromGrad {
        target: ValueId,
        field: String,
        index: Vec<ValueId>,
    },
    /// `adj[target] += adj[source] * scale`
    Adjoint {
        target: ValueId,
        source: ValueId,
        scale: Scale,
    },
    /// `field.grad[index] += adj[source]`
    AccumulateGrad {
        field: String,
        index: Vec<ValueId>,
        source: ValueId,
    },
}

impl Stmt {
    /// The value this statement defines, if any.
    pub fn dst(&self) -> Option<ValueId> {
        match self {
            Stmt::Const { dst, .. }
            | Stmt::Index { dst, .. }
            | Stmt::Arg { dst, .. }
            | Stmt::Load { dst, .. }
            | Stmt::Binary { dst, .. }
            | Stmt::Unary { dst, .. }
            | Stmt::Compare { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// Every value this statement reads, in either register file.
    /// Nested bodies are not included.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Stmt::Const { .. } | Stmt::Index { .. } | Stmt::Arg { .. } => Vec::new(),
            Stmt::Load { index, .. } => index.clone(),
            Stmt::Store { index, value, .. } => {
                let mut ops = index.clone();
                ops.push(*value);
                ops
            }
            Stmt::Binary { lhs, rhs, .. } | Stmt::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Stmt::Unary { operand, .. } => vec![*operand],
            Stmt::If { cond, .. } => vec![*cond],
            Stmt::AdjointFromGrad { target, index, .. } => {
                let mut ops = index.clone();
                ops.push(*target);
                ops
            }
            Stmt::Adjoint {
                target,
                source,
                scale,
            } => {
                let mut ops = vec![*target, *source];
                if let Scale::By(v) = scale {
                    ops.push(*v);
                }
                ops
            }
            Stmt::AccumulateGrad { index, source, .. } => {
                let mut ops = index.clone();
                ops.push(*source);
                ops
            }
        }
    }

    /// Side-effect free statements that define a value.
    pub fn is_pure(&self) -> bool {
        self.dst().is_some()
    }

    pub fn is_reverse_only(&self) -> bool {
        matches!(
            self,
            Stmt::AdjointFromGrad { .. } | Stmt::Adjoint { .. } | Stmt::AccumulateGrad { .. }
        )
    }

    /// Short operator name used in diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Stmt::Const { .. } => "const",
            Stmt::Index { .. } => "index",
            Stmt::Arg { .. } => "arg",
            Stmt::Load { .. } => "load",
            Stmt::Store { .. } => "store",
            Stmt::Binary { op, .. } => op.name(),
            Stmt::Unary { op, .. } => op.name(),
            Stmt::Compare { op, .. } => op.name(),
            Stmt::If { .. } => "if",
            Stmt::AdjointFromGrad { .. } => "adj-from-grad",
            Stmt::Adjoint { .. } => "adj",
            Stmt::AccumulateGrad { .. } => "grad-accumulate",
        }
    }

    /// Copy of this statement with every value id shifted by `offset`.
    pub fn renumbered(&self, offset: u32) -> Stmt {
        let v = |id: &ValueId| ValueId(id.0 + offset);
        let vs = |ids: &[ValueId]| ids.iter().map(v).collect::<Vec<_>>();
        match self {
            Stmt::Const { dst, value } => Stmt::Const {
                dst: v(dst),
                value: *value,
            },
            Stmt::Index { dst, axis } => Stmt::Index {
                dst: v(dst),
                axis: *axis,
            },
            Stmt::Arg { dst, position } => Stmt::Arg {
                dst: v(dst),
                position: *position,
            },
            Stmt::Load { dst, field, index } => Stmt::Load {
                dst: v(dst),
                field: field.clone(),
                index: vs(index),
            },
            Stmt::Store {
                field,
                index,
                value,
            } => Stmt::Store {
                field: field.clone(),
                index: vs(index),
                value: v(value),
            },
            Stmt::Binary { dst, op, lhs, rhs } => Stmt::Binary {
                dst: v(dst),
                op: *op,
                lhs: v(lhs),
                rhs: v(rhs),
            },
            Stmt::Unary { dst, op, operand } => Stmt::Unary {
                dst: v(dst),
                op: *op,
                operand: v(operand),
            },
            Stmt::Compare { dst, op, lhs, rhs } => Stmt::Compare {
                dst: v(dst),
                op: *op,
                lhs: v(lhs),
                rhs: v(rhs),
            },
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => Stmt::If {
                cond: v(cond),
                then_body: then_body.iter().map(|s| s.renumbered(offset)).collect(),
                else_body: else_body.iter().map(|s| s.renumbered(offset)).collect(),
            },
            Stmt::AdjointFromGrad {
                target,
                field,
                index,
            } => Stmt::AdjointFromGrad {
                target: v(target),
                field: field.clone(),
                index: vs(index),
            },
            Stmt::Adjoint {
                target,
                source,
                scale,
            } => Stmt::Adjoint {
                target: v(target),
                source: v(source),
                scale: match scale {
                    Scale::By(f) => Scale::By(v(f)),
                    other => *other,
                },
            },
            Stmt::AccumulateGrad {
                field,
                index,
                source,
            } => Stmt::AccumulateGrad {
                field: field.clone(),
                index: vs(index),
                source: v(source),
            },
        }
    }
}

/// Visit every statement in preorder, descending into branch bodies
/// (then before else).
pub fn walk<'a>(body: &'a [Stmt], visit: &mut impl FnMut(&'a Stmt)) {
    for stmt in body {
        visit(stmt);
        if let Stmt::If {
            then_body,
            else_body,
            ..
        } = stmt
        {
            walk(then_body, visit);
            walk(else_body, visit);
        }
    }
}

// ─── Iteration domain ─────────────────────────────────────────────

/// Order in which the interpreter visits the points of a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IterationOrder {
    /// Row-major, last axis fastest.
    #[default]
    Forward,
    /// Exactly the reverse of `Forward`.
    Reverse,
}

impl IterationOrder {
    pub fn name(self) -> &'static str {
        match self {
            IterationOrder::Forward => "forward",
            IterationOrder::Reverse => "reverse",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "forward" => Some(IterationOrder::Forward),
            "reverse" => Some(IterationOrder::Reverse),
            _ => None,
        }
    }
}

/// A rectangular index range. A domain with no axes has exactly one point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Domain {
    axes: Vec<Range<i64>>,
}

impl Domain {
    pub fn new(axes: Vec<Range<i64>>) -> Self {
        Self { axes }
    }

    /// One-dimensional domain `0..n`.
    pub fn range(n: i64) -> Self {
        Self { axes: vec![0..n] }
    }

    /// Zero-dimensional domain: the body runs once.
    pub fn serial() -> Self {
        Self { axes: Vec::new() }
    }

    pub fn axes(&self) -> &[Range<i64>] {
        &self.axes
    }

    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    fn extent(axis: &Range<i64>) -> usize {
        (axis.end - axis.start).max(0) as usize
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.axes.iter().map(Self::extent).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `flat`-th point in row-major order.
    pub fn point(&self, mut flat: usize) -> Vec<i64> {
        let mut point = vec![0; self.axes.len()];
        for (axis, range) in self.axes.iter().enumerate().rev() {
            let extent = Self::extent(range);
            if extent == 0 {
                break;
            }
            point[axis] = range.start + (flat % extent) as i64;
            flat /= extent;
        }
        point
    }

    pub fn points(&self, order: IterationOrder) -> impl Iterator<Item = Vec<i64>> + '_ {
        let n = self.len();
        let flat: Box<dyn Iterator<Item = usize>> = match order {
            IterationOrder::Forward => Box::new(0..n),
            IterationOrder::Reverse => Box::new((0..n).rev()),
        };
        flat.map(move |i| self.point(i))
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .axes
            .iter()
            .map(|r| format!("{}..{}", r.start, r.end))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

// ─── Kernel ───────────────────────────────────────────────────────

/// A recorded kernel: domain, argument count, body. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelIr {
    pub name: String,
    pub domain: Domain,
    pub num_args: u32,
    pub body: Vec<Stmt>,
    /// One past the highest value id in use; fresh ids start here.
    pub next_value: u32,
}

impl KernelIr {
    /// Build a kernel, deriving `next_value` from the ids the body defines.
    pub fn new(name: impl Into<String>, domain: Domain, num_args: u32, body: Vec<Stmt>) -> Self {
        let mut next_value = 0;
        walk(&body, &mut |stmt| {
            for id in stmt.dst().into_iter().chain(stmt.operands()) {
                next_value = next_value.max(id.0 + 1);
            }
        });
        Self {
            name: name.into(),
            domain,
            num_args,
            body,
            next_value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Total statement count, including nested bodies.
    pub fn stmt_count(&self) -> usize {
        let mut n = 0;
        walk(&self.body, &mut |_| n += 1);
        n
    }
}

/// Which fields a body touches, split by primal and gradient storage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Access {
    pub reads: BTreeSet<String>,
    pub writes: BTreeSet<String>,
    pub grad_reads: BTreeSet<String>,
    pub grad_writes: BTreeSet<String>,
}

impl Access {
    pub fn of(body: &[Stmt]) -> Self {
        let mut access = Access::default();
        walk(body, &mut |stmt| match stmt {
            Stmt::Load { field, .. } => {
                access.reads.insert(field.clone());
            }
            Stmt::Store { field, .. } => {
                access.writes.insert(field.clone());
            }
            Stmt::AdjointFromGrad { field, .. } => {
                access.grad_reads.insert(field.clone());
            }
            Stmt::AccumulateGrad { field, .. } => {
                access.grad_writes.insert(field.clone());
            }
            _ => {}
        });
        access
    }

    /// Every field named anywhere.
    pub fn fields(&self) -> BTreeSet<String> {
        self.reads
            .iter()
            .chain(&self.writes)
            .chain(&self.grad_reads)
            .chain(&self.grad_writes)
            .cloned()
            .collect()
    }

    /// Fields whose gradient buffers must exist.
    pub fn gradient_fields(&self) -> BTreeSet<String> {
        self.grad_reads
            .iter()
            .chain(&self.grad_writes)
            .cloned()
            .collect()
    }
}

// ─── Display ──────────────────────────────────────────────────────

fn fmt_index(index: &[ValueId]) -> String {
    let parts: Vec<String> = index.iter().map(|v| v.to_string()).collect();
    parts.join(", ")
}

fn fmt_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match stmt {
        Stmt::Const { dst, value } => writeln!(f, "{pad}{dst} = const {value:?}"),
        Stmt::Index { dst, axis } => writeln!(f, "{pad}{dst} = index {axis}"),
        Stmt::Arg { dst, position } => writeln!(f, "{pad}{dst} = arg {position}"),
        Stmt::Load { dst, field, index } => {
            writeln!(f, "{pad}{dst} = load {field}[{}]", fmt_index(index))
        }
        Stmt::Store {
            field,
            index,
            value,
        } => writeln!(f, "{pad}store {field}[{}], {value}", fmt_index(index)),
        Stmt::Binary { dst, op, lhs, rhs } => {
            writeln!(f, "{pad}{dst} = {} {lhs}, {rhs}", op.name())
        }
        Stmt::Unary { dst, op, operand } => writeln!(f, "{pad}{dst} = {} {operand}", op.name()),
        Stmt::Compare { dst, op, lhs, rhs } => {
            writeln!(f, "{pad}{dst} = {} {lhs}, {rhs}", op.name())
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            writeln!(f, "{pad}if {cond} {{")?;
            for s in then_body {
                fmt_stmt(f, s, depth + 1)?;
            }
            if !else_body.is_empty() {
                writeln!(f, "{pad}}} else {{")?;
                for s in else_body {
                    fmt_stmt(f, s, depth + 1)?;
                }
            }
            writeln!(f, "{pad}}}")
        }
        Stmt::AdjointFromGrad {
            target,
            field,
            index,
        } => writeln!(f, "{pad}adj {target} += grad {field}[{}]", fmt_index(index)),
        Stmt::Adjoint {
            target,
            source,
            scale,
        } => match scale {
            Scale::One => writeln!(f, "{pad}adj {target} += adj {source}"),
            Scale::NegOne => writeln!(f, "{pad}adj {target} -= adj {source}"),
            Scale::By(factor) => writeln!(f, "{pad}adj {target} += adj {source} * {factor}"),
        },
        Stmt::AccumulateGrad {
            field,
            index,
            source,
        } => writeln!(f, "{pad}grad {field}[{}] += adj {source}", fmt_index(index)),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(f, self, 0)
    }
}

impl fmt::Display for KernelIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel {} over {}", self.name, self.domain)?;
        if self.num_args > 0 {
            write!(f, " args {}", self.num_args)?;
        }
        writeln!(f, " {{")?;
        for stmt in &self.body {
            fmt_stmt(f, stmt, 1)?;
        }
        writeln!(f, "}}")
    }
}
