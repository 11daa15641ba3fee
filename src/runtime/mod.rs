//! The runtime context: fields, kernels, and the executors that connect them.
//!
//! `Runtime` owns the field table and every defined kernel. Kernels are
//! recorded once (`define_kernel`), bound to the field table on first use
//! (`compile`), and run either immediately (`invoke`, `invoke_gradient`) or
//! through the deferred queue (`launch`, `launch_gradient`, `synchronize`).
//!
//! Gradient passes never reset buffers. The caller seeds output gradients,
//! runs the reverse pass, reads input gradients, and calls `clear_grads`
//! before the next independent computation.

mod engine;
mod interp;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::Config;
use crate::error::KernelError;
use crate::field::{DataType, Field, FieldTable};
use crate::ir::bind::CompiledKernel;
use crate::ir::{IterationOrder, KernelIr};
use crate::registry::GradientRegistry;

use self::engine::{Engine, Task};
pub use self::engine::Stats;

pub struct Runtime {
    config: Config,
    fields: FieldTable,
    kernels: BTreeMap<String, Arc<KernelIr>>,
    compiled: HashMap<String, Arc<CompiledKernel>>,
    registry: Arc<GradientRegistry>,
    engine: Engine,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let registry = GradientRegistry::new().with_print_ir(config.print_ir);
        Self {
            engine: Engine::new(config.fusion),
            config,
            fields: FieldTable::new(),
            kernels: BTreeMap::new(),
            compiled: HashMap::new(),
            registry: Arc::new(registry),
        }
    }

    /// Share a registry between runtimes, so identical kernels are derived
    /// once across all of them.
    pub fn with_registry(mut self, registry: Arc<GradientRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &GradientRegistry {
        &self.registry
    }

    // ── Fields ────────────────────────────────────────────────────

    pub fn declare_field(
        &mut self,
        name: &str,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<(), KernelError> {
        self.fields
            .declare(Field::allocate(name, dtype, shape.to_vec()))
    }

    pub fn declare_field_in(
        &mut self,
        group: &str,
        name: &str,
        dtype: DataType,
        shape: &[usize],
    ) -> Result<(), KernelError> {
        self.fields
            .declare(Field::allocate(name, dtype, shape.to_vec()).in_group(group))
    }

    /// Enable gradients for every real field in `group` and its subgroups.
    pub fn enable_gradients(&mut self, group: &str) -> usize {
        self.fields.enable_gradients(group)
    }

    /// Shared access to a field as it is right now. Queued launches are not
    /// run: call [`Runtime::synchronize`] first, or use
    /// [`Runtime::field_mut`], to observe their effects.
    pub fn field(&self, name: &str) -> Result<&Field, KernelError> {
        let pending = self.engine.pending();
        if pending > 0 {
            log::warn!("reading field {} with {} launch(es) still queued", name, pending);
        }
        self.fields.get(name)
    }

    /// Mutable access to a field. Pending launches run first so the caller
    /// sees and edits up-to-date contents.
    pub fn field_mut(&mut self, name: &str) -> Result<&mut Field, KernelError> {
        self.synchronize()?;
        self.fields.get_mut(name)
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    /// Zero every gradient buffer.
    pub fn clear_grads(&mut self) -> Result<(), KernelError> {
        self.synchronize()?;
        self.fields.clear_grads();
        Ok(())
    }

    // ── Kernels ───────────────────────────────────────────────────

    pub fn define_kernel(&mut self, ir: KernelIr) -> Result<(), KernelError> {
        if self.kernels.contains_key(&ir.name) {
            return Err(KernelError::DuplicateSymbol { name: ir.name });
        }
        log::debug!("define kernel {} over {}", ir.name, ir.domain);
        self.kernels.insert(ir.name.clone(), Arc::new(ir));
        Ok(())
    }

    pub fn kernel(&self, name: &str) -> Result<&Arc<KernelIr>, KernelError> {
        self.kernels.get(name).ok_or_else(|| KernelError::UnknownKernel {
            kernel: name.to_string(),
        })
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    /// Bind a kernel to the field table. Binding happens once per kernel.
    pub fn compile(&mut self, name: &str) -> Result<Arc<CompiledKernel>, KernelError> {
        if let Some(kernel) = self.compiled.get(name) {
            return Ok(Arc::clone(kernel));
        }
        let ir = Arc::clone(self.kernel(name)?);
        let kernel = self.engine.compile(ir, &self.fields)?;
        if self.config.print_ir {
            log::info!("forward IR {}:\n{}", kernel.hash, kernel.ir);
        }
        if self.config.eager_gradients {
            if let Err(err) = self.registry.get_or_derive_reverse(&kernel) {
                log::warn!("kernel {} has no gradient: {}", name, err);
            }
        }
        self.compiled.insert(name.to_string(), Arc::clone(&kernel));
        Ok(kernel)
    }

    /// The reverse IR of a kernel, deriving it if needed.
    pub fn reverse_ir(&mut self, name: &str) -> Result<Arc<KernelIr>, KernelError> {
        let forward = self.compile(name)?;
        self.registry.get_or_derive_reverse(&forward)
    }

    /// Derive the reverse kernels of `names` in parallel.
    pub fn derive_all(&mut self, names: &[&str]) -> Result<Vec<Arc<KernelIr>>, KernelError> {
        let kernels = names
            .iter()
            .map(|name| self.compile(name).map(|k| (*k).clone()))
            .collect::<Result<Vec<_>, _>>()?;
        self.registry.derive_all(&kernels).into_iter().collect()
    }

    fn compile_reverse(&mut self, name: &str) -> Result<Arc<CompiledKernel>, KernelError> {
        let reverse = self.reverse_ir(name)?;
        self.engine.compile(reverse, &self.fields)
    }

    // ── Immediate execution ───────────────────────────────────────

    /// Run the forward pass of `name`.
    pub fn invoke(&mut self, name: &str, args: &[f64]) -> Result<(), KernelError> {
        self.synchronize()?;
        let kernel = self.compile(name)?;
        engine::run(&kernel, &mut self.fields, args, self.config.forward_order)?;
        self.engine.stats.launched_kernels += 1;
        Ok(())
    }

    /// Run the reverse pass of `name`: gradients seeded in the buffers of
    /// the fields it writes flow back into the buffers of the fields it reads.
    pub fn invoke_gradient(&mut self, name: &str, args: &[f64]) -> Result<(), KernelError> {
        self.synchronize()?;
        let kernel = self.compile_reverse(name)?;
        engine::run(&kernel, &mut self.fields, args, self.config.gradient_order)?;
        self.engine.stats.launched_kernels += 1;
        self.engine.stats.gradient_launches += 1;
        Ok(())
    }

    // ── Deferred execution ────────────────────────────────────────

    /// Queue the forward pass of `name`.
    pub fn launch(&mut self, name: &str, args: &[f64]) -> Result<(), KernelError> {
        let kernel = self.compile(name)?;
        self.enqueue(kernel, args, self.config.forward_order, false)
    }

    /// Queue the reverse pass of `name`.
    pub fn launch_gradient(&mut self, name: &str, args: &[f64]) -> Result<(), KernelError> {
        let kernel = self.compile_reverse(name)?;
        self.enqueue(kernel, args, self.config.gradient_order, true)
    }

    fn enqueue(
        &mut self,
        kernel: Arc<CompiledKernel>,
        args: &[f64],
        order: IterationOrder,
        gradient: bool,
    ) -> Result<(), KernelError> {
        if args.len() != kernel.ir.num_args as usize {
            return Err(KernelError::ArgumentCount {
                kernel: kernel.name().to_string(),
                expected: kernel.ir.num_args,
                found: args.len(),
            });
        }
        self.engine.push(Task {
            kernel,
            args: args.to_vec(),
            order,
            gradient,
        });
        Ok(())
    }

    /// Run every queued launch.
    pub fn synchronize(&mut self) -> Result<(), KernelError> {
        self.engine.synchronize(&mut self.fields)
    }

    pub fn pending(&self) -> usize {
        self.engine.pending()
    }

    pub fn stats(&self) -> Stats {
        self.engine.stats
    }
}
