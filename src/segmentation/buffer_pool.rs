use std::collections::HashMap;
use std::fmt;

use crate::error::{PipelineError, Result};

/// What a pooled tensor buffer is used for. Buffers never move between roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    PrimaryInput,
    PrimaryOutput,
    HiddenInput(usize),
    HiddenOutput(usize),
}

impl fmt::Display for BufferRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryInput => write!(f, "primary-input"),
            Self::PrimaryOutput => write!(f, "primary-output"),
            Self::HiddenInput(i) => write!(f, "hidden-input-{i}"),
            Self::HiddenOutput(i) => write!(f, "hidden-output-{i}"),
        }
    }
}

/// Exclusively owned f32 storage with a fixed capacity.
///
/// Writes never grow past the capacity the buffer was allocated with, so the
/// backing allocation is stable for the buffer's whole life.
#[derive(Debug)]
pub struct TensorBuffer {
    role: BufferRole,
    data: Vec<f32>,
    capacity: usize,
}

impl TensorBuffer {
    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Address of the backing storage, stable across reuse.
    pub fn as_ptr(&self) -> *const f32 {
        self.data.as_ptr()
    }

    /// Append values up to the remaining capacity; the excess is ignored.
    pub fn extend_from_slice(&mut self, values: &[f32]) {
        let room = self.capacity - self.data.len();
        self.data.extend_from_slice(&values[..values.len().min(room)]);
    }

    /// Append values up to the remaining capacity; the excess is ignored.
    pub fn extend<I: IntoIterator<Item = f32>>(&mut self, values: I) {
        let room = self.capacity - self.data.len();
        self.data.extend(values.into_iter().take(room));
    }

    /// Pad with zeros up to full capacity.
    pub fn zero_pad(&mut self) {
        self.data.resize(self.capacity, 0.0);
    }

    /// Reset to full capacity, all zeros.
    pub fn zero_fill(&mut self) -> &mut [f32] {
        self.data.clear();
        self.data.resize(self.capacity, 0.0);
        &mut self.data
    }
}

/// Reusable tensor buffers keyed by role.
///
/// `acquire` takes the stored buffer out of the pool, so it cannot be handed
/// out again until its borrower gives it back through `release`. The pool is
/// owned by a single execution context and needs no locking.
#[derive(Debug, Default)]
pub struct TensorBufferPool {
    entries: HashMap<BufferRole, TensorBuffer>,
    allocations: u64,
}

impl TensorBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cleared buffer with exactly `elements` f32 capacity for `role`.
    ///
    /// Reuses the pooled buffer when its capacity matches; otherwise the stale
    /// entry is dropped and a new buffer is allocated.
    pub fn acquire(&mut self, role: BufferRole, elements: usize) -> Result<TensorBuffer> {
        if let Some(mut buffer) = self.entries.remove(&role) {
            if buffer.capacity == elements {
                buffer.data.clear();
                return Ok(buffer);
            }
            tracing::debug!(
                "Reallocating {} buffer ({} -> {} elements)",
                role,
                buffer.capacity,
                elements
            );
        }
        self.allocate(role, elements)
    }

    /// Return a buffer to the pool, replacing any entry stored for its role.
    pub fn release(&mut self, buffer: TensorBuffer) {
        self.entries.insert(buffer.role, buffer);
    }

    /// Number of buffers currently parked in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total allocations performed over the pool's lifetime.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn allocate(&mut self, role: BufferRole, elements: usize) -> Result<TensorBuffer> {
        let mut data = Vec::new();
        data.try_reserve_exact(elements)
            .map_err(|_| PipelineError::ResourceExhausted {
                role: role.to_string(),
                bytes: elements.saturating_mul(std::mem::size_of::<f32>()),
            })?;
        self.allocations += 1;
        Ok(TensorBuffer {
            role,
            data,
            capacity: elements,
        })
    }
}
