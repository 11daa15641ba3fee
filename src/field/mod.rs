//! Fields: named, typed arrays with optional gradient storage.
//!
//! A field starts with primal storage only. Gradient storage is allocated
//! once, zero-filled, when gradients are enabled for its group, and from then
//! on gradient updates always accumulate. The `FieldTable` owns every field;
//! kernels refer to them by name.
//!
//! Storage is `f64` regardless of element type. Writes are cast to the
//! element type, so an `f32` field holds exactly the values an `f32` array
//! would.


use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::KernelError;

/// Group every field belongs to unless declared elsewhere.
pub const ROOT_GROUP: &str = "root";

// ─── Element types ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F64,
    I32,
}

impl DataType {
    /// Only real types carry gradients.
    pub fn is_real(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::I32 => "i32",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "f32" => Some(DataType::F32),
            "f64" => Some(DataType::F64),
            "i32" => Some(DataType::I32),
            _ => None,
        }
    }

    /// Round a value to what this element type can represent.
    pub fn cast(self, value: f64) -> f64 {
        match self {
            DataType::F32 => value as f32 as f64,
            DataType::F64 => value,
            DataType::I32 => value as i32 as f64,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a compiled kernel needs to know about a field.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldSig {
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl fmt::Display for FieldSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(", "))
    }
}

// ─── Field ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    group: String,
    dtype: DataType,
    shape: Vec<usize>,
    data: Vec<f64>,
    grad: Option<Vec<f64>>,
}

impl Field {
    /// Zero-filled primal storage, no gradient buffer.
    pub fn allocate(name: impl Into<String>, dtype: DataType, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            name: name.into(),
            group: ROOT_GROUP.to_string(),
            dtype,
            shape,
            data: vec![0.0; len],
            grad: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn signature(&self) -> FieldSig {
        FieldSig {
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    pub fn has_grad(&self) -> bool {
        self.grad.is_some()
    }

    /// Allocate a zero-filled gradient buffer. Idempotent: an existing buffer
    /// keeps its contents. Integer fields never get one.
    pub fn enable_gradient(&mut self) -> bool {
        if !self.dtype.is_real() {
            return false;
        }
        if self.grad.is_none() {
            self.grad = Some(vec![0.0; self.data.len()]);
        }
        true
    }

    /// Row-major offset of `index`, checking rank and bounds.
    pub fn offset(&self, index: &[i64]) -> Result<usize, KernelError> {
        if index.len() != self.shape.len() {
            return Err(KernelError::shape(
                &self.name,
                format!(
                    "indexed with {} coordinate(s), field has rank {}",
                    index.len(),
                    self.shape.len()
                ),
            ));
        }
        let mut offset = 0usize;
        for (axis, (&i, &extent)) in index.iter().zip(&self.shape).enumerate() {
            if i < 0 || i as usize >= extent {
                return Err(KernelError::shape(
                    &self.name,
                    format!("index {} out of range 0..{} on axis {}", i, extent, axis),
                ));
            }
            offset = offset * extent + i as usize;
        }
        Ok(offset)
    }

    pub fn read(&self, index: &[i64]) -> Result<f64, KernelError> {
        let at = self.offset(index)?;
        Ok(self.data[at])
    }

    pub fn write(&mut self, index: &[i64], value: f64) -> Result<(), KernelError> {
        let at = self.offset(index)?;
        self.data[at] = self.dtype.cast(value);
        Ok(())
    }

    fn grad_buffer(&self) -> Result<&[f64], KernelError> {
        self.grad.as_deref().ok_or_else(|| KernelError::UngradedField {
            field: self.name.clone(),
        })
    }

    fn grad_buffer_mut(&mut self) -> Result<&mut Vec<f64>, KernelError> {
        let name = &self.name;
        self.grad.as_mut().ok_or_else(|| KernelError::UngradedField {
            field: name.clone(),
        })
    }

    pub fn read_grad(&self, index: &[i64]) -> Result<f64, KernelError> {
        let grad = self.grad_buffer()?;
        let at = self.offset(index)?;
        Ok(grad[at])
    }

    /// `grad[index] += delta`. Never overwrites.
    pub fn accumulate_grad(&mut self, index: &[i64], delta: f64) -> Result<(), KernelError> {
        self.grad_buffer()?;
        let at = self.offset(index)?;
        let grad = self.grad_buffer_mut()?;
        grad[at] += delta;
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        let value = self.dtype.cast(value);
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn fill_grad(&mut self, value: f64) -> Result<(), KernelError> {
        self.grad_buffer_mut()?.iter_mut().for_each(|g| *g = value);
        Ok(())
    }

    /// Zero the gradient buffer, if there is one.
    pub fn clear_grad(&mut self) {
        if let Some(grad) = self.grad.as_mut() {
            grad.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    /// Primal contents in row-major order.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn grad(&self) -> Option<&[f64]> {
        self.grad.as_deref()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.data.clone()
    }

    pub fn grad_to_vec(&self) -> Result<Vec<f64>, KernelError> {
        Ok(self.grad_buffer()?.to_vec())
    }

    pub(crate) fn restore(&mut self, saved: Snapshot) {
        self.data = saved.data;
        if saved.grad.is_some() {
            self.grad = saved.grad;
        }
    }
}

/// Saved buffers of one field, used to roll back a failed invocation.
#[derive(Clone, Debug)]
pub(crate) struct Snapshot {
    data: Vec<f64>,
    grad: Option<Vec<f64>>,
}

// ─── Field table ───────────────────────────────────────────────────

/// Owner of every declared field, addressed by name.
#[derive(Clone, Debug, Default)]
pub struct FieldTable {
    fields: BTreeMap<String, Field>,
}

/// `group` names `path` itself or one of its ancestors.
fn group_contains(group: &str, path: &str) -> bool {
    path == group
        || path
            .strip_prefix(group)
            .is_some_and(|rest| rest.starts_with('.'))
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, field: Field) -> Result<(), KernelError> {
        if self.fields.contains_key(field.name()) {
            return Err(KernelError::DuplicateSymbol {
                name: field.name().to_string(),
            });
        }
        log::debug!(
            "declare field {}: {} in {}",
            field.name(),
            field.signature(),
            field.group()
        );
        self.fields.insert(field.name().to_string(), field);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Field, KernelError> {
        self.fields.get(name).ok_or_else(|| KernelError::UnknownField {
            field: name.to_string(),
        })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Field, KernelError> {
        self.fields
            .get_mut(name)
            .ok_or_else(|| KernelError::UnknownField {
                field: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Enable gradients on every real field in `group` and its subgroups.
    /// Returns how many fields now have gradient buffers in that scope.
    pub fn enable_gradients(&mut self, group: &str) -> usize {
        let mut count = 0;
        for field in self.fields.values_mut() {
            if group_contains(group, &field.group) && field.enable_gradient() {
                count += 1;
            }
        }
        log::debug!("gradients enabled for {} field(s) under {}", count, group);
        count
    }

    /// Zero every gradient buffer.
    pub fn clear_grads(&mut self) {
        for field in self.fields.values_mut() {
            field.clear_grad();
        }
    }

    /// Save primal buffers of `primal` and gradient buffers of `grads`.
    pub(crate) fn snapshot(
        &self,
        primal: &BTreeSet<String>,
        grads: &BTreeSet<String>,
    ) -> Vec<(String, Snapshot)> {
        primal
            .union(grads)
            .filter_map(|name| {
                let field = self.fields.get(name)?;
                let saved = Snapshot {
                    data: field.data.clone(),
                    grad: if grads.contains(name) {
                        field.grad.clone()
                    } else {
                        None
                    },
                };
                Some((name.clone(), saved))
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, saved: Vec<(String, Snapshot)>) {
        for (name, snapshot) in saved {
            if let Some(field) = self.fields.get_mut(&name) {
                field.restore(snapshot);
            }
        }
    }
}
