//! Gradient kernel registry.
//!
//! Reverse kernels are derived on first request and cached by the content
//! hash of the bound forward kernel, so every structurally identical kernel
//! shares one derivation. Failures are cached too: a kernel that cannot be
//! differentiated reports the same error on every request without re-running
//! the reverser.
//!
//! Each key owns a `OnceLock`. The map lock is held only to find or create
//! the slot; the derivation itself runs outside it, so concurrent requests
//! for one kernel wait on a single derivation while other kernels proceed.


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use rayon::prelude::*;

use crate::ad;
use crate::error::KernelError;
use crate::ir::bind::CompiledKernel;
use crate::ir::hash::ContentHash;
use crate::ir::KernelIr;

type Derived = Result<Arc<KernelIr>, KernelError>;
type Slot = Arc<OnceLock<Derived>>;

#[derive(Debug, Default)]
pub struct GradientRegistry {
    slots: Mutex<HashMap<ContentHash, Slot>>,
    derivations: AtomicU64,
    print_ir: bool,
}

impl GradientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every derived reverse kernel at info level.
    pub fn with_print_ir(mut self, print_ir: bool) -> Self {
        self.print_ir = print_ir;
        self
    }

    fn slot(&self, hash: ContentHash) -> Slot {
        // The map is only ever inserted into, so a poisoned lock is still consistent.
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(hash).or_default().clone()
    }

    /// The reverse kernel of `kernel`, deriving it if this is the first
    /// request for its content hash.
    pub fn get_or_derive_reverse(&self, kernel: &CompiledKernel) -> Derived {
        let slot = self.slot(kernel.hash);
        slot.get_or_init(|| {
            self.derivations.fetch_add(1, Ordering::Relaxed);
            log::debug!("deriving reverse kernel for {} {}", kernel.name(), kernel.hash);
            let derived = ad::reverse(&kernel.ir, &kernel.fields).map(Arc::new);
            match &derived {
                Ok(reverse) if self.print_ir => log::info!("reverse IR:\n{}", reverse),
                Ok(_) => {}
                Err(err) => log::debug!("derivation failed: {}", err),
            }
            derived
        })
        .clone()
    }

    /// Derive many kernels in parallel. Results are in input order.
    pub fn derive_all(&self, kernels: &[CompiledKernel]) -> Vec<Derived> {
        kernels
            .par_iter()
            .map(|kernel| self.get_or_derive_reverse(kernel))
            .collect()
    }

    /// The cached result for `hash`, if a derivation has finished.
    pub fn cached(&self, hash: ContentHash) -> Option<Derived> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(&hash).and_then(|slot| slot.get().cloned())
    }

    /// Number of cache keys.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times the reverser actually ran.
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}
