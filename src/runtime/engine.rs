//! Deferred launch queue.
//!
//! `Runtime::launch` records a bound kernel with its arguments instead of
//! running it. `synchronize` drains the queue: empty tasks are dropped,
//! adjacent tasks that can share one sweep over the domain are fused, and
//! the remaining tasks run in launch order.
//!
//! Two tasks fuse when they iterate the same domain in the same order, take
//! no scalar arguments, and neither writes a field (or gradient buffer) the
//! other touches. Under those conditions running both bodies at each point is
//! indistinguishable from running the kernels one after the other.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::error::KernelError;
use crate::field::{FieldSig, FieldTable};
use crate::ir::bind::{bind, CompiledKernel};
use crate::ir::hash::{hash_kernel, ContentHash};
use crate::ir::{Access, IterationOrder, KernelIr};

/// Launch counters, cumulative over the runtime's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Kernels executed, counting a fused kernel once.
    pub launched_kernels: u64,
    /// Of those, reverse passes.
    pub gradient_launches: u64,
    /// Tasks absorbed into a fused kernel.
    pub fused_kernels: u64,
    /// Tasks dropped because they had nothing to do.
    pub dropped_empty: u64,
    /// Kernels bound to the field table.
    pub compilations: u64,
    /// Bindings served from the compiled-kernel cache.
    pub compile_cache_hits: u64,
}

/// One queued launch.
#[derive(Clone, Debug)]
pub(crate) struct Task {
    pub kernel: Arc<CompiledKernel>,
    pub args: Vec<f64>,
    pub order: IterationOrder,
    pub gradient: bool,
}

impl Task {
    fn is_empty(&self) -> bool {
        self.kernel.ir.is_empty() || self.kernel.ir.domain.is_empty()
    }

    fn writes(&self) -> BTreeSet<&String> {
        let access = &self.kernel.access;
        access.writes.iter().chain(&access.grad_writes).collect()
    }

    fn touches(&self) -> BTreeSet<&String> {
        let access = &self.kernel.access;
        access
            .reads
            .iter()
            .chain(&access.writes)
            .chain(&access.grad_reads)
            .chain(&access.grad_writes)
            .collect()
    }

    fn can_fuse(&self, next: &Task) -> bool {
        self.order == next.order
            && self.kernel.ir.domain == next.kernel.ir.domain
            && self.args.is_empty()
            && next.args.is_empty()
            && self.writes().is_disjoint(&next.touches())
            && next.writes().is_disjoint(&self.touches())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Engine {
    queue: Vec<Task>,
    /// Bound kernels by content hash: reverse kernels and fused kernels.
    compiled: HashMap<ContentHash, Arc<CompiledKernel>>,
    pub stats: Stats,
    pub fusion: bool,
}

impl Engine {
    pub fn new(fusion: bool) -> Self {
        Self {
            fusion,
            ..Self::default()
        }
    }

    pub fn push(&mut self, task: Task) {
        log::debug!(
            "queued {}{} over {}",
            task.kernel.name(),
            if task.gradient { " (gradient)" } else { "" },
            task.kernel.ir.domain
        );
        self.queue.push(task);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Bind `ir`, reusing an earlier binding with the same content hash.
    pub fn compile(
        &mut self,
        ir: Arc<KernelIr>,
        fields: &FieldTable,
    ) -> Result<Arc<CompiledKernel>, KernelError> {
        let hash = hash_kernel(&ir, &signatures(&ir, fields));
        if let Some(kernel) = self.compiled.get(&hash) {
            self.stats.compile_cache_hits += 1;
            return Ok(Arc::clone(kernel));
        }
        let kernel = Arc::new(bind(ir, fields)?);
        self.stats.compilations += 1;
        self.compiled.insert(kernel.hash, Arc::clone(&kernel));
        Ok(kernel)
    }

    /// Drain the queue into the order tasks will run in.
    fn plan(&mut self, fields: &FieldTable) -> Result<Vec<Task>, KernelError> {
        let mut planned: Vec<Task> = Vec::new();
        for task in std::mem::take(&mut self.queue) {
            if task.is_empty() {
                log::debug!("dropped empty task {}", task.kernel.name());
                self.stats.dropped_empty += 1;
                continue;
            }
            let fusable = self.fusion && planned.last().is_some_and(|prev| prev.can_fuse(&task));
            match planned.pop() {
                Some(prev) if fusable => {
                    let fused = self.fuse(&prev, &task, fields)?;
                    planned.push(fused);
                }
                Some(prev) => {
                    planned.push(prev);
                    planned.push(task);
                }
                None => planned.push(task),
            }
        }
        Ok(planned)
    }

    fn fuse(&mut self, a: &Task, b: &Task, fields: &FieldTable) -> Result<Task, KernelError> {
        let (a_ir, b_ir) = (&a.kernel.ir, &b.kernel.ir);
        let offset = a_ir.next_value;
        let mut body = a_ir.body.clone();
        body.extend(b_ir.body.iter().map(|s| s.renumbered(offset)));
        let ir = KernelIr {
            name: format!("fused_{}_{}", a_ir.name, b_ir.name),
            domain: a_ir.domain.clone(),
            num_args: 0,
            body,
            next_value: offset + b_ir.next_value,
        };
        log::debug!("fusing {} and {}", a_ir.name, b_ir.name);
        let kernel = self.compile(Arc::new(ir), fields)?;
        self.stats.fused_kernels += 1;
        Ok(Task {
            kernel,
            args: Vec::new(),
            order: a.order,
            gradient: a.gradient || b.gradient,
        })
    }

    /// Run every queued task in order. Each task is all-or-nothing; the
    /// first failure stops the drain and discards the remaining tasks.
    pub fn synchronize(&mut self, fields: &mut FieldTable) -> Result<(), KernelError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let planned = self.plan(fields)?;
        for task in planned {
            run(&task.kernel, fields, &task.args, task.order)?;
            self.stats.launched_kernels += 1;
            if task.gradient {
                self.stats.gradient_launches += 1;
            }
        }
        Ok(())
    }
}

fn signatures(ir: &KernelIr, fields: &FieldTable) -> BTreeMap<String, FieldSig> {
    Access::of(&ir.body)
        .fields()
        .into_iter()
        .filter_map(|name| {
            let sig = fields.get(&name).ok()?.signature();
            Some((name, sig))
        })
        .collect()
}

/// Execute a bound kernel, rolling back every buffer it writes on failure.
pub(crate) fn run(
    kernel: &CompiledKernel,
    fields: &mut FieldTable,
    args: &[f64],
    order: IterationOrder,
) -> Result<(), KernelError> {
    if args.len() != kernel.ir.num_args as usize {
        return Err(KernelError::ArgumentCount {
            kernel: kernel.name().to_string(),
            expected: kernel.ir.num_args,
            found: args.len(),
        });
    }
    for name in kernel.access.gradient_fields() {
        if !fields.get(&name)?.has_grad() {
            return Err(KernelError::UngradedField { field: name });
        }
    }

    let saved = fields.snapshot(&kernel.access.writes, &kernel.access.grad_writes);
    log::debug!(
        "launch {} over {} ({} points, {:?})",
        kernel.name(),
        kernel.ir.domain,
        kernel.ir.domain.len(),
        order
    );
    match super::interp::execute(&kernel.ir, fields, args, order) {
        Ok(()) => Ok(()),
        Err(err) => {
            fields.restore(saved);
            Err(err)
        }
    }
}
