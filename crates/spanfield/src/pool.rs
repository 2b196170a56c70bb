//! Pooled storage for the [`Span`]s of a [`Heightfield`](crate::Heightfield).
//!
//! Spans live in fixed-size blocks of [`SPANS_PER_POOL`] slots. Vacant slots form an intrusive
//! free list threaded through [`Span::next`], so allocating and freeing a span is O(1) and never
//! touches the global allocator. Blocks are only ever released all at once.

use std::ops::{Index, IndexMut};

use crate::{
    alloc::{AllocationError, AllocationKind, AllocationRequest, HeightfieldAllocator},
    span::Span,
};

/// The number of spans allocated per pool block.
pub const SPANS_PER_POOL: usize = 2048;

/// The key of a [`Span`] stored in [`Spans`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanKey(u32);

impl SpanKey {
    const MAX_INDEX: usize = u32::MAX as usize;

    #[inline]
    pub(crate) const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// The slot index of the span, counted across all pool blocks.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    fn block(self) -> usize {
        self.index() / SPANS_PER_POOL
    }

    #[inline]
    fn slot(self) -> usize {
        self.index() % SPANS_PER_POOL
    }
}

/// All spans of a heightfield, stored in pool blocks.
#[derive(Debug, Default)]
pub struct Spans {
    blocks: Vec<Box<[Span]>>,
    free_list: Option<SpanKey>,
    len: usize,
}

impl Spans {
    /// Creates an empty pool. No block is allocated until the first span is.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of spans currently in use.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no span is in use.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of allocated pool blocks.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The number of spans that fit into the allocated blocks.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.blocks.len() * SPANS_PER_POOL
    }

    /// Takes a slot off the free list, growing the pool by one block if the free list is
    /// about to run dry. The contents of the returned slot are unspecified until written.
    pub(crate) fn allocate(
        &mut self,
        allocator: &mut dyn HeightfieldAllocator,
    ) -> Result<SpanKey, AllocationError> {
        let key = match self.free_list {
            Some(head) if self[head].next().is_some() => head,
            _ => self.grow(allocator)?,
        };
        self.free_list = self[key].next();
        self.len += 1;
        Ok(key)
    }

    /// Allocates a slot and writes `span` into it.
    #[cfg(test)]
    pub(crate) fn insert(
        &mut self,
        span: Span,
        allocator: &mut dyn HeightfieldAllocator,
    ) -> Result<SpanKey, AllocationError> {
        let key = self.allocate(allocator)?;
        self[key] = span;
        Ok(key)
    }

    /// Returns a slot to the front of the free list.
    pub(crate) fn free(&mut self, key: SpanKey) {
        self[key] = Span::vacant(self.free_list);
        self.free_list = Some(key);
        self.len -= 1;
    }

    /// Links a new block in front of the free list and returns the new head.
    fn grow(
        &mut self,
        allocator: &mut dyn HeightfieldAllocator,
    ) -> Result<SpanKey, AllocationError> {
        let base = self.capacity();
        if base + SPANS_PER_POOL > SpanKey::MAX_INDEX {
            return Err(AllocationError::SpanKeysExhausted {
                max: SpanKey::MAX_INDEX,
            });
        }
        let request = Self::block_request();
        allocator.allocate(request)?;

        let mut block = Vec::new();
        if block.try_reserve_exact(SPANS_PER_POOL).is_err() || self.blocks.try_reserve(1).is_err()
        {
            allocator.release(request);
            return Err(AllocationError::OutOfMemory {
                kind: request.kind,
                bytes: request.bytes,
            });
        }
        // Link the new slots in ascending order in front of whatever is left of the free list.
        let tail = self.free_list;
        block.extend((0..SPANS_PER_POOL).map(|slot| {
            let next = if slot + 1 < SPANS_PER_POOL {
                Some(SpanKey::from_index((base + slot + 1) as u32))
            } else {
                tail
            };
            Span::vacant(next)
        }));
        self.blocks.push(block.into_boxed_slice());
        let head = SpanKey::from_index(base as u32);
        self.free_list = Some(head);
        tracing::debug!(
            "Allocated span pool block #{} ({} spans in use)",
            self.blocks.len(),
            self.len
        );
        Ok(head)
    }

    /// Drops every block at once and reports them to `allocator`.
    pub(crate) fn release_blocks(&mut self, allocator: &mut dyn HeightfieldAllocator) {
        for _ in self.blocks.drain(..) {
            allocator.release(Self::block_request());
        }
        self.free_list = None;
        self.len = 0;
    }

    #[inline]
    fn block_request() -> AllocationRequest {
        AllocationRequest::array::<Span>(AllocationKind::SpanPool, SPANS_PER_POOL)
    }

    /// Returns the span with the given key, or `None` if no block holds the key.
    ///
    /// Keys of freed spans still resolve to their vacant slot.
    #[inline]
    pub fn get(&self, key: SpanKey) -> Option<&Span> {
        self.blocks.get(key.block()).map(|block| &block[key.slot()])
    }
}

impl Index<SpanKey> for Spans {
    type Output = Span;

    #[inline]
    fn index(&self, key: SpanKey) -> &Self::Output {
        &self.blocks[key.block()][key.slot()]
    }
}

impl IndexMut<SpanKey> for Spans {
    #[inline]
    fn index_mut(&mut self, key: SpanKey) -> &mut Self::Output {
        &mut self.blocks[key.block()][key.slot()]
    }
}
