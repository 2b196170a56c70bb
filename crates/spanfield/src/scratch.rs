//! Per-triangle scratch state used by the rasterizer.
//!
//! The buffers are owned by the [`Heightfield`](crate::Heightfield) so they are allocated once,
//! but their contents only ever describe the triangle currently being rasterized. Every entry a
//! triangle touches is handed back in its empty state before the next triangle starts.
//!
//! Rows and columns are addressed in cell coordinates. The buffers carry a one cell border on
//! each side, so coordinates in `-1..=width` and `-1..=height` are valid.

use crate::alloc::{
    AllocationError, AllocationKind, AllocationRequest, HeightfieldAllocator, try_filled_vec,
};

/// The lowest and highest column touched in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowExtent {
    pub(crate) min_col: i32,
    pub(crate) max_col: i32,
}

impl RowExtent {
    /// An inverted range, so any touched column replaces both ends.
    #[inline]
    fn empty(width: i32) -> Self {
        Self {
            min_col: width + 2,
            max_col: -2,
        }
    }
}

/// A triangle edge crossing a row boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeHit {
    /// Index of the edge, see [`EdgeHit::for_vertex`].
    pub(crate) edge: u8,
    /// The vertex the edge starts at.
    pub(crate) base_vertex: u8,
    /// The vertex the edge ends at.
    pub(crate) other_vertex: u8,
}

impl EdgeHit {
    /// The edge running from `base_vertex` to the next vertex in winding order.
    ///
    /// Edge `i` is the edge opposite of vertex `i`.
    #[inline]
    pub(crate) fn for_vertex(base_vertex: usize) -> Self {
        debug_assert!(base_vertex < 3);
        Self {
            edge: ((base_vertex + 2) % 3) as u8,
            base_vertex: base_vertex as u8,
            other_vertex: ((base_vertex + 1) % 3) as u8,
        }
    }
}

/// At most two edges of a triangle cross any row boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EdgeHits([Option<EdgeHit>; 2]);

/// Running height bounds of the samples that landed in a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TempSample {
    pub(crate) min: i16,
    pub(crate) max: i16,
}

impl TempSample {
    /// The bound that quantized sample heights are clamped to.
    pub(crate) const LIMIT: i16 = 32000;

    /// An inverted range meaning "no sample yet".
    pub(crate) const EMPTY: Self = Self {
        min: Self::LIMIT,
        max: -Self::LIMIT,
    };

    #[inline]
    fn add(&mut self, height: i16) {
        self.min = self.min.min(height);
        self.max = self.max.max(height);
    }
}

/// The scratch buffers of a heightfield.
#[derive(Debug)]
pub(crate) struct RasterScratch {
    width: i32,
    /// `height + 1` entries, indexed by row boundary.
    edge_hits: Vec<EdgeHits>,
    /// `height + 2` entries, indexed by `row + 1`.
    row_extents: Vec<RowExtent>,
    /// `(width + 2) * (height + 2)` entries, indexed by `(col + 1) + (row + 1) * (width + 2)`.
    temp_samples: Vec<TempSample>,
}

impl RasterScratch {
    pub(crate) fn new(
        width: u16,
        height: u16,
        allocator: &mut dyn HeightfieldAllocator,
    ) -> Result<Self, AllocationError> {
        let (w, h) = (width as usize, height as usize);
        let edge_hits = try_filled_vec(
            allocator,
            AllocationKind::EdgeHits,
            h + 1,
            EdgeHits::default(),
        )?;
        let row_extents = match try_filled_vec(
            allocator,
            AllocationKind::RowExtents,
            h + 2,
            RowExtent::empty(width as i32),
        ) {
            Ok(row_extents) => row_extents,
            Err(err) => {
                allocator.release(Self::edge_hits_request(h));
                return Err(err);
            }
        };
        let temp_samples = match try_filled_vec(
            allocator,
            AllocationKind::TempSamples,
            (w + 2) * (h + 2),
            TempSample::EMPTY,
        ) {
            Ok(temp_samples) => temp_samples,
            Err(err) => {
                allocator.release(Self::edge_hits_request(h));
                allocator.release(Self::row_extents_request(h));
                return Err(err);
            }
        };
        Ok(Self {
            width: width as i32,
            edge_hits,
            row_extents,
            temp_samples,
        })
    }

    /// Reports the buffers to `allocator` as released.
    pub(crate) fn release(&self, allocator: &mut dyn HeightfieldAllocator) {
        let h = self.row_extents.len() - 2;
        allocator.release(Self::edge_hits_request(h));
        allocator.release(Self::row_extents_request(h));
        allocator.release(AllocationRequest::array::<TempSample>(
            AllocationKind::TempSamples,
            self.temp_samples.len(),
        ));
    }

    fn edge_hits_request(height: usize) -> AllocationRequest {
        AllocationRequest::array::<EdgeHits>(AllocationKind::EdgeHits, height + 1)
    }

    fn row_extents_request(height: usize) -> AllocationRequest {
        AllocationRequest::array::<RowExtent>(AllocationKind::RowExtents, height + 2)
    }

    /// Marks a cell as touched by the current triangle.
    #[inline]
    pub(crate) fn mark(&mut self, x: i32, z: i32) {
        let extent = &mut self.row_extents[Self::row_index(z)];
        extent.min_col = extent.min_col.min(x);
        extent.max_col = extent.max_col.max(x);
    }

    /// Marks a cell as touched and folds a quantized height into its sample.
    #[inline]
    pub(crate) fn sample(&mut self, x: i32, z: i32, height: i16) {
        self.mark(x, z);
        let index = self.sample_index(x, z);
        self.temp_samples[index].add(height);
    }

    /// Records that `hit` crosses the boundary below row `z`.
    /// A third hit on the same boundary replaces the second one.
    #[inline]
    pub(crate) fn record_edge_hit(&mut self, z: i32, hit: EdgeHit) {
        debug_assert!(z >= 0);
        let hits = &mut self.edge_hits[z as usize].0;
        let slot = usize::from(hits[0].is_some());
        hits[slot] = Some(hit);
    }

    /// Clears the hits of a row boundary, returning them if both edges were recorded.
    #[inline]
    pub(crate) fn take_edge_hits(&mut self, z: i32) -> Option<[EdgeHit; 2]> {
        debug_assert!(z >= 0);
        let EdgeHits(hits) = std::mem::take(&mut self.edge_hits[z as usize]);
        match hits {
            [Some(first), Some(second)] => Some([first, second]),
            _ => None,
        }
    }

    /// Resets the extent of row `z`, returning what it was.
    #[inline]
    pub(crate) fn take_row_extent(&mut self, z: i32) -> RowExtent {
        let empty = RowExtent::empty(self.width);
        std::mem::replace(&mut self.row_extents[Self::row_index(z)], empty)
    }

    /// Resets the sample of a cell, returning what it was.
    #[inline]
    pub(crate) fn take_temp_sample(&mut self, x: i32, z: i32) -> TempSample {
        let index = self.sample_index(x, z);
        std::mem::replace(&mut self.temp_samples[index], TempSample::EMPTY)
    }

    /// Whether every entry is in its empty state.
    pub(crate) fn is_clear(&self) -> bool {
        let empty_extent = RowExtent::empty(self.width);
        self.edge_hits.iter().all(|hits| *hits == EdgeHits::default())
            && self.row_extents.iter().all(|extent| *extent == empty_extent)
            && self
                .temp_samples
                .iter()
                .all(|sample| *sample == TempSample::EMPTY)
    }

    #[inline]
    fn row_index(z: i32) -> usize {
        debug_assert!(z >= -1);
        (z + 1) as usize
    }

    #[inline]
    fn sample_index(&self, x: i32, z: i32) -> usize {
        debug_assert!(x >= -1 && x <= self.width && z >= -1);
        (x + 1) as usize + (z + 1) as usize * (self.width + 2) as usize
    }
}
