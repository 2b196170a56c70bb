//! The heightfield module contains the types and functions for working with [`Heightfield`]s.
//!
//! A heightfield is a 3D grid of [`Span`]s, where each column contains 0, 1, or more spans.

use thiserror::Error;

use crate::{
    Aabb3d,
    alloc::{
        AllocationError, AllocationKind, AllocationRequest, HeightfieldAllocator, SystemAllocator,
        try_filled_vec,
    },
    pool::{SpanKey, Spans},
    scratch::RasterScratch,
    span::Span,
};

/// Corresponds to <https://github.com/recastnavigation/recastnavigation/blob/bd98d84c274ee06842bf51a4088ca82ac71f8c2d/Recast/Include/Recast.h#L312>
/// Build with [`HeightfieldBuilder`] or [`Heightfield::new`].
#[derive(Debug)]
pub struct Heightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub(crate) width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub(crate) height: u16,
    /// The AABB of the heightfield
    pub(crate) aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub(crate) cell_size: f32,
    /// The size of each cell along the y-axis
    pub(crate) cell_height: f32,
    /// The indices to the spans in the heightfield in width*height order
    /// Each index corresponds to a column in the heightfield by pointing to the lowest span in the column
    pub(crate) spans: Vec<Option<SpanKey>>,
    /// All spans in the heightfield
    pub(crate) allocated_spans: Spans,
    /// Triangle-local state of the rasterizer
    pub(crate) scratch: RasterScratch,
    allocator: Box<dyn HeightfieldAllocator>,
}

impl Heightfield {
    /// Creates an empty heightfield with explicit dimensions.
    ///
    /// All buffers are admitted by `allocator`, which is also used for every span pool block
    /// allocated later on.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell dimensions or the AABB are invalid, which is checked before
    /// anything is allocated, or if one of the buffers cannot be allocated.
    pub fn new(
        width: u16,
        height: u16,
        aabb: Aabb3d,
        cell_size: f32,
        cell_height: f32,
        allocator: impl HeightfieldAllocator + 'static,
    ) -> Result<Self, HeightfieldBuilderError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize { cell_size });
        }
        if !(cell_height.is_finite() && cell_height > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellHeight { cell_height });
        }
        if !aabb.min.cmple(aabb.max).all() {
            return Err(HeightfieldBuilderError::InvalidAabb { aabb });
        }
        if width == 0 || height == 0 {
            return Err(HeightfieldBuilderError::EmptyGrid { width, height });
        }

        let mut allocator: Box<dyn HeightfieldAllocator> = Box::new(allocator);
        let column_count = width as usize * height as usize;
        let spans = try_filled_vec(
            allocator.as_mut(),
            AllocationKind::Columns,
            column_count,
            None,
        )?;
        let scratch = match RasterScratch::new(width, height, allocator.as_mut()) {
            Ok(scratch) => scratch,
            Err(err) => {
                allocator.release(Self::columns_request(column_count));
                return Err(err.into());
            }
        };
        tracing::debug!("Created {width}x{height} heightfield");
        Ok(Self {
            width,
            height,
            aabb,
            cell_size,
            cell_height,
            spans,
            allocated_spans: Spans::new(),
            scratch,
            allocator,
        })
    }

    /// https://github.com/recastnavigation/recastnavigation/blob/bd98d84c274ee06842bf51a4088ca82ac71f8c2d/Recast/Source/RecastRasterization.cpp#L105
    ///
    /// Inserts a span into its column, merging it with every span it overlaps or touches.
    pub fn add_span(&mut self, insertion: SpanInsertion) -> Result<(), SpanInsertionError> {
        if insertion.x >= self.width || insertion.z >= self.height {
            return Err(SpanInsertionError::ColumnIndexOutOfBounds {
                x: insertion.x,
                z: insertion.z,
            });
        }
        let column_index = self.column_index(insertion.x, insertion.z);
        self.insert_span(column_index, insertion.span, insertion.flag_merge_threshold)?;
        Ok(())
    }

    /// Merge-inserts `new_span` into the column at `column_index`.
    ///
    /// The slot for the merged span is allocated before the column is touched, so an allocation
    /// failure leaves the column as it was.
    pub(crate) fn insert_span(
        &mut self,
        column_index: usize,
        mut new_span: Span,
        flag_merge_threshold: u16,
    ) -> Result<(), AllocationError> {
        let new_span_key = self.allocated_spans.allocate(self.allocator.as_mut())?;

        let mut previous_span_key = None;
        let mut current_span_key_iter = self.spans[column_index];
        // Insert the new span, possibly merging it with existing spans.
        while let Some(current_span_key) = current_span_key_iter {
            let current_span = &self.allocated_spans[current_span_key];
            let next_key = current_span.next();
            if current_span.min() > new_span.max() {
                // Current span is further up than the new span, break.
                break;
            }
            if current_span.max() < new_span.min() {
                // Current span is completely below the new span. Keep going.
                previous_span_key = Some(current_span_key);
                current_span_key_iter = next_key;
                continue;
            }

            // For spans whose tops are really close to each other, prefer walkable areas.
            // This removes aliasing (similar to z-fighting) on surfaces close to each other.
            if (new_span.max() as i32 - current_span.max() as i32).unsigned_abs()
                <= flag_merge_threshold as u32
            {
                // Higher area ID numbers indicate higher resolution priority.
                new_span.set_area(new_span.area().max(current_span.area()));
            } else if current_span.max() > new_span.max() {
                // Otherwise the area of whichever span ends up on top wins.
                new_span.set_area(current_span.area());
            }

            // Merge height intervals.
            if current_span.min() < new_span.min() {
                new_span.set_min(current_span.min());
            }
            if current_span.max() > new_span.max() {
                new_span.set_max(current_span.max());
            }

            // Remove the current span since it's now merged with the new span.
            // Keep going because there might be other overlapping spans that also need to be merged.
            self.allocated_spans.free(current_span_key);
            if let Some(previous_span_key) = previous_span_key {
                self.span_mut(previous_span_key).set_next(next_key);
            } else {
                self.spans[column_index] = next_key;
            }
            current_span_key_iter = next_key;
        }

        if let Some(previous_span_key) = previous_span_key {
            // Insert new span after prev
            new_span.set_next(self.span(previous_span_key).next());
            self.allocated_spans[new_span_key] = new_span;
            self.span_mut(previous_span_key).set_next(new_span_key);
        } else {
            // This span should go before the others in the list
            new_span.set_next(self.spans[column_index]);
            self.allocated_spans[new_span_key] = new_span;
            self.spans[column_index] = Some(new_span_key);
        }

        Ok(())
    }

    /// The width of the heightfield along the x-axis in cell units
    #[inline]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// The height of the heightfield along the z-axis in cell units
    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The AABB of the heightfield
    #[inline]
    pub fn aabb(&self) -> Aabb3d {
        self.aabb
    }

    /// The size of each cell on the xz-plane
    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// The size of each cell along the y-axis
    #[inline]
    pub fn cell_height(&self) -> f32 {
        self.cell_height
    }

    /// The pool holding all spans of the heightfield.
    #[inline]
    pub fn allocated_spans(&self) -> &Spans {
        &self.allocated_spans
    }

    /// The number of spans in the heightfield.
    #[inline]
    pub fn span_count(&self) -> usize {
        self.allocated_spans.len()
    }

    #[inline]
    pub(crate) fn column_index(&self, x: u16, z: u16) -> usize {
        x as usize + z as usize * self.width as usize
    }

    #[inline]
    pub(crate) fn contains(&self, x: i32, z: i32) -> bool {
        x >= 0 && x < self.width as i32 && z >= 0 && z < self.height as i32
    }

    /// Returns the key of the lowest span in the column at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_key_at(&self, x: u16, z: u16) -> Option<SpanKey> {
        if !self.contains(x as i32, z as i32) {
            // Invalid coordinates
            return None;
        }
        self.spans[self.column_index(x, z)]
    }

    /// Returns the lowest span at the given coordinates.
    /// `None` if either the index is out of bounds or there is no span in the column.
    #[inline]
    pub fn span_at(&self, x: u16, z: u16) -> Option<&Span> {
        let Some(span_key) = self.span_key_at(x, z) else {
            // No span in this column
            return None;
        };
        Some(self.span(span_key))
    }

    /// Returns a reference to the span with the given key.
    /// # Panics
    /// Panics if the key is not found.
    #[inline]
    pub fn span(&self, key: SpanKey) -> &Span {
        &self.allocated_spans[key]
    }

    #[inline]
    fn span_mut(&mut self, key: SpanKey) -> &mut Span {
        &mut self.allocated_spans[key]
    }

    /// Iterates over the spans of a column from bottom to top.
    /// Out of bounds coordinates yield an empty iterator.
    #[inline]
    pub fn column(&self, x: u16, z: u16) -> ColumnIter<'_> {
        ColumnIter {
            spans: &self.allocated_spans,
            next: self.span_key_at(x, z),
        }
    }

    /// Iterates over all columns that contain at least one span, in width*height order.
    pub fn columns(&self) -> impl Iterator<Item = (u16, u16, ColumnIter<'_>)> + '_ {
        (0..self.height)
            .flat_map(move |z| (0..self.width).map(move |x| (x, z)))
            .filter_map(move |(x, z)| {
                self.span_key_at(x, z).map(|key| {
                    (
                        x,
                        z,
                        ColumnIter {
                            spans: &self.allocated_spans,
                            next: Some(key),
                        },
                    )
                })
            })
    }

    /// Whether the rasterizer's scratch buffers are all back in their empty state.
    ///
    /// This holds between any two calls to
    /// [`rasterize_triangle`](Heightfield::rasterize_triangle), including after a failed one.
    pub fn scratch_is_clear(&self) -> bool {
        self.scratch.is_clear()
    }

    fn columns_request(column_count: usize) -> AllocationRequest {
        AllocationRequest::array::<Option<SpanKey>>(AllocationKind::Columns, column_count)
    }
}

impl Drop for Heightfield {
    fn drop(&mut self) {
        let allocator = self.allocator.as_mut();
        // Spans are never freed one by one here, their blocks go all at once.
        self.allocated_spans.release_blocks(allocator);
        self.scratch.release(allocator);
        allocator.release(Self::columns_request(self.spans.len()));
    }
}

/// Iterator over the spans of one column, from bottom to top.
#[derive(Debug, Clone)]
pub struct ColumnIter<'a> {
    spans: &'a Spans,
    next: Option<SpanKey>,
}

impl<'a> Iterator for ColumnIter<'a> {
    type Item = &'a Span;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let span = &self.spans[self.next?];
        self.next = span.next();
        Some(span)
    }
}

/// A builder for [`Heightfield`]s.
pub struct HeightfieldBuilder {
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
}

impl HeightfieldBuilder {
    /// Builds the heightfield, admitting every allocation.
    pub fn build(self) -> Result<Heightfield, HeightfieldBuilderError> {
        self.build_with_allocator(SystemAllocator)
    }

    /// Builds the heightfield with a custom [`HeightfieldAllocator`].
    ///
    /// The width and height of the grid are derived from the AABB and the cell size.
    pub fn build_with_allocator(
        self,
        allocator: impl HeightfieldAllocator + 'static,
    ) -> Result<Heightfield, HeightfieldBuilderError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(HeightfieldBuilderError::InvalidCellSize {
                cell_size: self.cell_size,
            });
        }
        let width = (self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5;
        let height = (self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5;
        if width > u16::MAX as f32 || height > u16::MAX as f32 {
            return Err(HeightfieldBuilderError::ColumnCountTooLarge { width, height });
        }
        Heightfield::new(
            width as u16,
            height as u16,
            self.aabb,
            self.cell_size,
            self.cell_height,
            allocator,
        )
    }
}

/// Errors that can occur when building a [`Heightfield`] with [`HeightfieldBuilder::build`].
#[derive(Error, Debug)]
pub enum HeightfieldBuilderError {
    /// Happens when the width or height does not fit into a `u16`.
    #[error("Column count (width*height) is too large, got {width}*{height} but both must be at most {max}", max = u16::MAX)]
    ColumnCountTooLarge {
        /// The width of the heightfield along the x-axis in cell units
        width: f32,
        /// The height of the heightfield along the z-axis in cell units
        height: f32,
    },
    /// Happens when the grid would not contain a single column.
    #[error("Heightfield must contain at least one column, got {width}x{height}")]
    EmptyGrid {
        /// The width of the heightfield along the x-axis in cell units
        width: u16,
        /// The height of the heightfield along the z-axis in cell units
        height: u16,
    },
    /// Happens when the cell size is not a positive number.
    #[error("Cell size must be positive and finite, got {cell_size}")]
    InvalidCellSize {
        /// The offending cell size
        cell_size: f32,
    },
    /// Happens when the cell height is not a positive number.
    #[error("Cell height must be positive and finite, got {cell_height}")]
    InvalidCellHeight {
        /// The offending cell height
        cell_height: f32,
    },
    /// Happens when the minimum of the AABB is above its maximum.
    #[error("AABB minimum must not exceed its maximum, got {aabb:?}")]
    InvalidAabb {
        /// The offending AABB
        aabb: Aabb3d,
    },
    /// Happens when one of the buffers of the heightfield cannot be allocated.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Errors that can occur when inserting a span into a [`Heightfield`]
#[derive(Error, Debug)]
pub enum SpanInsertionError {
    /// Happens when the column index is out of bounds.
    #[error("column index out of bounds: x={x}, z={z}")]
    ColumnIndexOutOfBounds {
        /// The x-coordinate of the span
        x: u16,
        /// The z-coordinate of the span
        z: u16,
    },
    /// Happens when the span pool cannot grow.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// A span to be merged into a column with [`Heightfield::add_span`].
#[derive(Debug, Clone)]
pub struct SpanInsertion {
    /// The x-coordinate of the span
    pub x: u16,
    /// The z-coordinate of the span
    pub z: u16,
    /// Maximum difference between the ceilings of two spans to merge area type IDs
    pub flag_merge_threshold: u16,
    /// The span to insert
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use glam::Vec3A;

    use crate::{
        Aabb3d,
        alloc::BudgetAllocator,
        span::{AreaType, SpanBuilder},
    };

    use super::*;

    fn height_field() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn span(min: u16, max: u16, area: u8) -> Span {
        SpanBuilder {
            min,
            max,
            area: AreaType(area),
        }
        .build()
        .unwrap()
    }

    fn span_low() -> Span {
        span(2, 4, 2)
    }

    fn span_mid() -> Span {
        span(4, 7, 2)
    }

    fn span_high() -> Span {
        span(7, 10, 2)
    }

    fn insert(heightfield: &mut Heightfield, x: u16, z: u16, threshold: u16, span: Span) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: threshold,
                span,
            })
            .unwrap();
    }

    fn column(heightfield: &Heightfield, x: u16, z: u16) -> Vec<(u16, u16, u8)> {
        heightfield
            .column(x, z)
            .map(|span| (span.min(), span.max(), span.area().id()))
            .collect()
    }

    #[test]
    fn can_create_heightfield() {
        let heightfield = height_field();
        assert_eq!(heightfield.width(), 10);
        assert_eq!(heightfield.height(), 10);
        assert!(heightfield.scratch_is_clear());
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn can_add_span() {
        let mut heightfield = height_field();
        let expected_span = span_low();
        insert(&mut heightfield, 1, 3, 0, expected_span.clone());
        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, expected_span);

        let empty_span = heightfield.span_at(3, 1);
        assert_eq!(empty_span, None);
    }

    #[test]
    fn can_add_multiple_spans_next_to_each_other() {
        let mut heightfield = height_field();
        let expected_span_1 = span_low();
        insert(&mut heightfield, 1, 3, 0, expected_span_1.clone());

        let expected_span_2 = span_mid();
        insert(&mut heightfield, 2, 3, 0, expected_span_2.clone());

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, expected_span_1);
        let span = heightfield.span_at(2, 3).unwrap();
        assert_eq!(*span, expected_span_2);

        let empty_span = heightfield.span_at(3, 1);
        assert_eq!(empty_span, None);
    }

    #[test]
    fn can_add_higher_span_in_same_column() {
        let mut heightfield = height_field();
        let span_low = span_low();
        insert(&mut heightfield, 1, 3, 0, span_low.clone());

        let span_high = span_high();
        insert(&mut heightfield, 1, 3, 0, span_high.clone());

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq_without_next(span, &span_low);
        let next_span = span.next().unwrap();
        let next_span = heightfield.span(next_span);
        assert_eq_without_next(next_span, &span_high);
    }

    #[test]
    fn can_add_lower_span_in_same_column() {
        let mut heightfield = height_field();
        let span_high = span_high();
        insert(&mut heightfield, 1, 3, 0, span_high.clone());

        let span_low = span_low();
        insert(&mut heightfield, 1, 3, 0, span_low.clone());

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq_without_next(span, &span_low);
        let next_span = span.next().unwrap();
        let next_span = heightfield.span(next_span);
        assert_eq_without_next(next_span, &span_high);
    }

    #[test]
    fn can_merge_spans() {
        let mut heightfield = height_field();
        let span_low = span_low();
        insert(&mut heightfield, 1, 3, 0, span_low.clone());

        let span_mid = span_mid();
        insert(&mut heightfield, 1, 3, 0, span_mid.clone());

        let merged_span = SpanBuilder {
            min: span_low.min(),
            max: span_mid.max(),
            area: span_mid.area(),
        }
        .build()
        .unwrap();

        let span = heightfield.span_at(1, 3).unwrap();
        assert_eq!(*span, merged_span);
        assert_eq!(heightfield.span_count(), 1);
    }

    #[test]
    fn higher_top_wins_outside_merge_threshold() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 0, 0, 0, span(1, 4, 10));
        insert(&mut heightfield, 0, 0, 0, span(3, 6, 20));
        assert_eq!(column(&heightfield, 0, 0), vec![(1, 6, 20)]);

        let mut heightfield = height_field();
        insert(&mut heightfield, 0, 0, 0, span(3, 6, 10));
        insert(&mut heightfield, 0, 0, 0, span(1, 4, 20));
        assert_eq!(column(&heightfield, 0, 0), vec![(1, 6, 10)]);
    }

    #[test]
    fn higher_area_wins_inside_merge_threshold() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 0, 0, 2, span(1, 6, 30));
        insert(&mut heightfield, 0, 0, 2, span(3, 4, 5));
        assert_eq!(column(&heightfield, 0, 0), vec![(1, 6, 30)]);

        let mut heightfield = height_field();
        insert(&mut heightfield, 0, 0, 2, span(1, 4, 5));
        insert(&mut heightfield, 0, 0, 2, span(3, 6, 30));
        assert_eq!(column(&heightfield, 0, 0), vec![(1, 6, 30)]);

        let mut heightfield = height_field();
        insert(&mut heightfield, 0, 0, 2, span(1, 5, 30));
        insert(&mut heightfield, 0, 0, 2, span(3, 6, 5));
        assert_eq!(column(&heightfield, 0, 0), vec![(1, 6, 30)]);
    }

    #[test]
    fn bridging_span_merges_all_neighbors() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 4, 4, 0, span(1, 2, 1));
        insert(&mut heightfield, 4, 4, 0, span(5, 6, 1));
        insert(&mut heightfield, 4, 4, 0, span(9, 12, 1));
        insert(&mut heightfield, 4, 4, 0, span(2, 5, 1));
        assert_eq!(column(&heightfield, 4, 4), vec![(1, 6, 1), (9, 12, 1)]);
        assert_eq!(heightfield.span_count(), 2);
    }

    #[test]
    fn touching_spans_merge_but_gapped_spans_do_not() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 2, 2, 0, span(1, 3, 1));
        insert(&mut heightfield, 2, 2, 0, span(3, 5, 1));
        assert_eq!(column(&heightfield, 2, 2), vec![(1, 5, 1)]);

        insert(&mut heightfield, 2, 2, 0, span(6, 8, 1));
        assert_eq!(column(&heightfield, 2, 2), vec![(1, 5, 1), (6, 8, 1)]);
    }

    #[test]
    fn identical_spans_collapse() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 2, 2, 0, span(3, 5, 7));
        insert(&mut heightfield, 2, 2, 0, span(3, 5, 7));
        assert_eq!(column(&heightfield, 2, 2), vec![(3, 5, 7)]);
    }

    #[test]
    fn rejects_out_of_bounds_columns() {
        let mut heightfield = height_field();
        let result = heightfield.add_span(SpanInsertion {
            x: 10,
            z: 0,
            flag_merge_threshold: 0,
            span: span_low(),
        });
        assert!(matches!(
            result,
            Err(SpanInsertionError::ColumnIndexOutOfBounds { x: 10, z: 0 })
        ));
        assert_eq!(heightfield.column(10, 0).count(), 0);
    }

    #[test]
    fn columns_skips_empty_columns() {
        let mut heightfield = height_field();
        insert(&mut heightfield, 3, 1, 0, span_low());
        insert(&mut heightfield, 1, 3, 0, span_low());
        insert(&mut heightfield, 1, 3, 0, span_high());
        let columns: Vec<_> = heightfield
            .columns()
            .map(|(x, z, spans)| (x, z, spans.count()))
            .collect();
        assert_eq!(columns, vec![(3, 1, 1), (1, 3, 2)]);
    }

    #[test]
    fn rejects_invalid_cell_dimensions_before_allocating() {
        let budget = Arc::new(Mutex::new(BudgetAllocator::new(usize::MAX)));
        let aabb = Aabb3d::new(Vec3A::ZERO, [1.0, 1.0, 1.0]);
        let result = Heightfield::new(2, 2, aabb, 0.0, 1.0, budget.clone());
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::InvalidCellSize { .. })
        ));
        let result = Heightfield::new(2, 2, aabb, 1.0, -1.0, budget.clone());
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::InvalidCellHeight { .. })
        ));
        let result = Heightfield::new(0, 2, aabb, 1.0, 1.0, budget.clone());
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::EmptyGrid { .. })
        ));
        assert_eq!(budget.lock().unwrap().peak(), 0);
    }

    #[test]
    fn failed_construction_releases_everything() {
        let budget = Arc::new(Mutex::new(BudgetAllocator::new(64)));
        let aabb = Aabb3d::new(Vec3A::ZERO, [8.0, 8.0, 8.0]);
        let result = Heightfield::new(16, 16, aabb, 1.0, 1.0, budget.clone());
        assert!(matches!(
            result,
            Err(HeightfieldBuilderError::Allocation(
                AllocationError::Refused { .. }
            ))
        ));
        assert_eq!(budget.lock().unwrap().used(), 0);
    }

    #[test]
    fn refused_span_allocation_keeps_existing_spans() {
        let budget = Arc::new(Mutex::new(BudgetAllocator::new(usize::MAX)));
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::new(Vec3A::ZERO, [5.0, 5.0, 5.0]),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build_with_allocator(budget.clone())
        .unwrap();

        // Fill the first block, then refuse any further block.
        for z in 0..heightfield.height() {
            for x in 0..heightfield.width() {
                insert(&mut heightfield, x, z, 0, span(1, 2, 1));
            }
        }
        {
            let mut budget = budget.lock().unwrap();
            let used = budget.used();
            budget.set_limit(used);
        }
        let mut inserted = heightfield.span_count();
        let err = loop {
            let x = (inserted % 10) as u16;
            let z = (inserted / 10 % 10) as u16;
            let layer = (inserted / 100) as u16 * 4 + 4;
            match heightfield.add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: span(layer, layer + 1, 1),
            }) {
                Ok(()) => inserted += 1,
                Err(err) => break err,
            }
        };
        assert!(matches!(
            err,
            SpanInsertionError::Allocation(AllocationError::Refused {
                kind: AllocationKind::SpanPool,
                ..
            })
        ));
        assert_eq!(heightfield.span_count(), inserted);
        assert_eq!(column(&heightfield, 0, 0).first(), Some(&(1, 2, 1)));

        drop(heightfield);
        assert_eq!(budget.lock().unwrap().used(), 0);
    }

    #[track_caller]
    fn assert_eq_without_next(span: &Span, expected_span: &Span) {
        assert_eq!(span.min(), expected_span.min(), "min is not equal");
        assert_eq!(span.max(), expected_span.max(), "max is not equal");
        assert_eq!(span.area(), expected_span.area(), "area is not equal");
    }
}
