//! Allocation admission for [`Heightfield`](crate::Heightfield)s.
//!
//! Every buffer a heightfield owns, including each block of the span pool, is admitted by a
//! [`HeightfieldAllocator`] before the memory is reserved. The allocator is handed to the
//! heightfield at construction time, so different heightfields can use different policies.

use std::{
    fmt,
    mem::size_of,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;

/// What a [`AllocationRequest`] is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    /// The column heads, one per cell.
    Columns,
    /// The per-row edge crossing table used while rasterizing.
    EdgeHits,
    /// The per-row touched column extents used while rasterizing.
    RowExtents,
    /// The per-cell height samples used while rasterizing sloped triangles.
    TempSamples,
    /// One block of [`SPANS_PER_POOL`](crate::SPANS_PER_POOL) spans.
    SpanPool,
}

/// A request to admit or release `bytes` bytes of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRequest {
    /// What the memory is used for.
    pub kind: AllocationKind,
    /// The size of the allocation in bytes.
    pub bytes: usize,
}

impl AllocationRequest {
    /// Creates a request for an array of `len` elements of type `T`.
    #[inline]
    pub fn array<T>(kind: AllocationKind, len: usize) -> Self {
        Self {
            kind,
            bytes: size_of::<T>().saturating_mul(len),
        }
    }
}

/// Errors that can occur when a heightfield allocates memory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Happens when the [`HeightfieldAllocator`] refuses the request.
    #[error("allocator refused {bytes} bytes for {kind:?}")]
    Refused {
        /// What the memory was requested for
        kind: AllocationKind,
        /// The size of the request in bytes
        bytes: usize,
    },
    /// Happens when the system cannot reserve the memory.
    #[error("out of memory while reserving {bytes} bytes for {kind:?}")]
    OutOfMemory {
        /// What the memory was requested for
        kind: AllocationKind,
        /// The size of the request in bytes
        bytes: usize,
    },
    /// Happens when the span pool cannot address any more spans.
    #[error("span pool is exhausted, at most {max} spans can be addressed")]
    SpanKeysExhausted {
        /// The maximum number of addressable spans
        max: usize,
    },
}

/// Admits the allocations of a [`Heightfield`](crate::Heightfield).
///
/// [`allocate`](Self::allocate) is called before memory is reserved, and [`release`](Self::release)
/// is called with the same request once the memory is freed again. Spans are never released
/// one by one, only whole pool blocks.
pub trait HeightfieldAllocator: fmt::Debug + Send {
    /// Admits the request, or refuses it with [`AllocationError::Refused`].
    fn allocate(&mut self, request: AllocationRequest) -> Result<(), AllocationError>;

    /// Returns memory previously admitted by [`allocate`](Self::allocate).
    fn release(&mut self, request: AllocationRequest);
}

/// Admits every request. The memory itself still comes from the global allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemAllocator;

impl HeightfieldAllocator for SystemAllocator {
    #[inline]
    fn allocate(&mut self, _request: AllocationRequest) -> Result<(), AllocationError> {
        Ok(())
    }

    #[inline]
    fn release(&mut self, _request: AllocationRequest) {}
}

/// Admits requests as long as the total amount of admitted memory stays within a byte limit.
///
/// Wrap it in an `Arc<Mutex<_>>` to share one budget between several heightfields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetAllocator {
    limit: usize,
    used: usize,
    peak: usize,
}

impl BudgetAllocator {
    /// Creates an allocator that admits at most `limit` bytes at a time.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            used: 0,
            peak: 0,
        }
    }

    /// The byte limit.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Changes the byte limit. Memory that is already admitted stays admitted.
    #[inline]
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// The number of bytes currently admitted.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// The highest number of bytes that were admitted at the same time.
    #[inline]
    pub fn peak(&self) -> usize {
        self.peak
    }
}

impl HeightfieldAllocator for BudgetAllocator {
    fn allocate(&mut self, request: AllocationRequest) -> Result<(), AllocationError> {
        let used = self.used.saturating_add(request.bytes);
        if used > self.limit {
            return Err(AllocationError::Refused {
                kind: request.kind,
                bytes: request.bytes,
            });
        }
        self.used = used;
        self.peak = self.peak.max(used);
        Ok(())
    }

    fn release(&mut self, request: AllocationRequest) {
        self.used = self.used.saturating_sub(request.bytes);
    }
}

impl<A: HeightfieldAllocator> HeightfieldAllocator for Arc<Mutex<A>> {
    fn allocate(&mut self, request: AllocationRequest) -> Result<(), AllocationError> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(request)
    }

    fn release(&mut self, request: AllocationRequest) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(request);
    }
}

/// Admits and reserves a vector of `len` copies of `value`.
pub(crate) fn try_filled_vec<T: Clone>(
    allocator: &mut dyn HeightfieldAllocator,
    kind: AllocationKind,
    len: usize,
    value: T,
) -> Result<Vec<T>, AllocationError> {
    let request = AllocationRequest::array::<T>(kind, len);
    allocator.allocate(request)?;
    let mut vec = Vec::new();
    if vec.try_reserve_exact(len).is_err() {
        allocator.release(request);
        return Err(AllocationError::OutOfMemory {
            kind,
            bytes: request.bytes,
        });
    }
    vec.resize(len, value);
    Ok(vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_allocator_admits_everything() {
        let mut allocator = SystemAllocator;
        let request = AllocationRequest::array::<u64>(AllocationKind::Columns, 1 << 20);
        assert_eq!(allocator.allocate(request), Ok(()));
    }

    #[test]
    fn budget_allocator_refuses_requests_above_limit() {
        let mut allocator = BudgetAllocator::new(100);
        let small = AllocationRequest {
            kind: AllocationKind::EdgeHits,
            bytes: 60,
        };
        allocator.allocate(small).unwrap();
        assert_eq!(allocator.used(), 60);

        let refused = allocator.allocate(small).unwrap_err();
        assert_eq!(
            refused,
            AllocationError::Refused {
                kind: AllocationKind::EdgeHits,
                bytes: 60
            }
        );
        assert_eq!(allocator.used(), 60);

        allocator.release(small);
        assert_eq!(allocator.used(), 0);
        allocator.allocate(small).unwrap();
        assert_eq!(allocator.peak(), 60);
    }

    #[test]
    fn shared_budget_is_visible_through_all_handles() {
        let shared = Arc::new(Mutex::new(BudgetAllocator::new(1024)));
        let mut handle = shared.clone();
        handle
            .allocate(AllocationRequest {
                kind: AllocationKind::SpanPool,
                bytes: 512,
            })
            .unwrap();
        assert_eq!(shared.lock().unwrap().used(), 512);
    }

    #[test]
    fn filled_vec_is_accounted() {
        let mut allocator = BudgetAllocator::new(1024);
        let vec = try_filled_vec(&mut allocator, AllocationKind::RowExtents, 16, 7_u32).unwrap();
        assert_eq!(vec, vec![7; 16]);
        assert_eq!(allocator.used(), 64);

        let err = try_filled_vec(&mut allocator, AllocationKind::RowExtents, 1024, 0_u32);
        assert!(matches!(err, Err(AllocationError::Refused { .. })));
        assert_eq!(allocator.used(), 64);
    }
}
