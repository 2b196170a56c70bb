//! Rasterization of triangles into a [`Heightfield`].
//!
//! Triangles are scan converted in two passes. The first pass walks the edges of the triangle
//! and records which cells of each row are touched, the second pass emits one span per touched
//! cell. Triangles whose quantized height is uniform skip all height bookkeeping and emit their
//! single height interval directly, all other triangles gather the minimum and maximum height
//! they reach within each cell first.

use glam::{IVec2, Vec3A};
use thiserror::Error;

use crate::{
    alloc::AllocationError,
    heightfield::Heightfield,
    math::{TriangleVertices as _, saturate},
    scratch::{EdgeHit, RasterScratch, TempSample},
    span::{AreaType, SPAN_MAX_HEIGHT, Span},
    trimesh::TriMesh,
};

bitflags::bitflags! {
    /// Flags controlling how triangles are rasterized, see [`RasterizationOptions`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RasterizationFlags: u8 {
        /// Forces the floor of emitted spans down to height 0.
        const PROJECT_TO_FLOOR = 1;
    }
}

/// Parameters shared by all triangles of a rasterization pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterizationOptions<'a> {
    /// Maximum difference between the ceilings of two spans to merge area type IDs. `[Units: vx]`
    pub flag_merge_threshold: u16,
    /// Flags applied to every triangle.
    pub flags: RasterizationFlags,
    /// Optional per-column flags in width*height order.
    ///
    /// Without a mask every column uses [`RasterizationOptions::flags`]. With a mask a column only
    /// uses the flags that are set both in [`RasterizationOptions::flags`] and in its mask entry.
    pub mask: Option<&'a [RasterizationFlags]>,
}

impl RasterizationOptions<'_> {
    #[inline]
    fn projects_to_floor(&self, column_index: usize) -> bool {
        let flags = match self.mask {
            Some(mask) => self.flags & mask[column_index],
            None => self.flags,
        };
        flags.contains(RasterizationFlags::PROJECT_TO_FLOOR)
    }
}

/// Errors that can occur when rasterizing triangles into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// Happens when a span cannot be inserted because the span pool cannot grow.
    /// Spans inserted before the failure stay in the heightfield.
    #[error("failed to insert span: {0}")]
    Allocation(#[from] AllocationError),
    /// Happens when the rasterization mask does not have one entry per column.
    #[error("rasterization mask has {actual} entries, but the heightfield has {expected} columns")]
    MaskSizeMismatch {
        /// The number of columns of the heightfield
        expected: usize,
        /// The number of mask entries
        actual: usize,
    },
    /// Happens when a trimesh does not have one area type per triangle.
    #[error("trimesh has {triangles} triangles but {area_types} area types")]
    AreaCountMismatch {
        /// The number of triangles of the trimesh
        triangles: usize,
        /// The number of area types of the trimesh
        area_types: usize,
    },
    /// Happens when a triangle of a trimesh references a vertex that does not exist.
    #[error(
        "triangle {triangle} references vertex {index}, but the trimesh only has {vertex_count} vertices"
    )]
    VertexIndexOutOfBounds {
        /// The index of the offending triangle
        triangle: usize,
        /// The offending vertex index
        index: u32,
        /// The number of vertices of the trimesh
        vertex_count: usize,
    },
}

impl Heightfield {
    /// Rasterizes all triangles of a [`TriMesh`], each with its own area type.
    ///
    /// The trimesh and the options are validated before the first span is inserted.
    pub fn rasterize_triangles(
        &mut self,
        trimesh: &TriMesh,
        options: &RasterizationOptions,
    ) -> Result<(), RasterizationError> {
        self.validate_options(options)?;
        trimesh.validate()?;

        for (indices, area_type) in trimesh.indices.iter().zip(&trimesh.area_types) {
            let triangle = [
                trimesh.vertices[indices[0] as usize],
                trimesh.vertices[indices[1] as usize],
                trimesh.vertices[indices[2] as usize],
            ];
            self.rasterize_validated(triangle, *area_type, options)?;
        }
        Ok(())
    }

    /// Rasterizes a single triangle, merging one span per touched column into the heightfield.
    ///
    /// Triangles that lie completely outside of the heightfield are silently skipped.
    /// If the span pool cannot grow, the spans inserted so far stay in the heightfield and the
    /// scratch state is still reset, so rasterization can continue with the next triangle.
    pub fn rasterize_triangle(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        options: &RasterizationOptions,
    ) -> Result<(), RasterizationError> {
        self.validate_options(options)?;
        self.rasterize_validated(triangle, area_type, options)
    }

    fn validate_options(&self, options: &RasterizationOptions) -> Result<(), RasterizationError> {
        match options.mask {
            Some(mask) if mask.len() != self.spans.len() => {
                Err(RasterizationError::MaskSizeMismatch {
                    expected: self.spans.len(),
                    actual: mask.len(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Corresponds to `rasterizeTri` in <https://github.com/recastnavigation/recastnavigation/blob/bd98d84c274ee06842bf51a4088ca82ac71f8c2d/Recast/Source/RecastRasterization.cpp>
    fn rasterize_validated(
        &mut self,
        triangle: [Vec3A; 3],
        area_type: AreaType,
        options: &RasterizationOptions,
    ) -> Result<(), RasterizationError> {
        let grid = GridGeometry::new(self);
        let cells = triangle.map(|vertex| grid.cell_of(vertex));
        let cell_min = cells[0].min(cells[1]).min(cells[2]);
        let cell_max = cells[0].max(cells[1]).max(cells[2]);
        let (width, height) = (self.width as i32, self.height as i32);

        if cell_max.x < 0 || cell_min.x >= width || cell_max.y < 0 || cell_min.y >= height {
            tracing::trace!("Skipping triangle outside of the heightfield footprint");
            return Ok(());
        }

        // Vertical extent of the triangle relative to the heightfield floor
        let bounds = triangle.aabb();
        let triangle_min = bounds.min.y - grid.min.y;
        let triangle_max = bounds.max.y - grid.min.y;
        if triangle_max < 0.0 || triangle_min > grid.height {
            tracing::trace!("Skipping triangle outside of the heightfield height range");
            return Ok(());
        }

        if cell_min == cell_max {
            let column_index = self.column_index(cell_min.x as u16, cell_min.y as u16);
            let span = grid.single_cell_span(
                triangle_min,
                triangle_max,
                area_type,
                options.projects_to_floor(column_index),
            );
            return self
                .insert_span(column_index, span, options.flag_merge_threshold)
                .map_err(|err| {
                    tracing::warn!("Failed to rasterize triangle: {err}");
                    err.into()
                });
        }

        let quantized_min = grid.quantize(triangle_min);
        let quantized_max = grid.quantize(triangle_max);
        let footprint = Footprint {
            x0: cell_min.x.max(0),
            x1: cell_max.x.min(width - 1),
            x1_edge: cell_max.x.min(width),
            z0: cell_min.y.max(0),
            z1: cell_max.y.min(height - 1),
            z1_edge: cell_max.y.min(height),
        };
        let walk = TriangleWalk {
            triangle,
            cells,
            edges: Edge::all(&triangle),
            footprint,
            grid,
        };

        let result = if quantized_min == quantized_max {
            // Flat triangles are much cheaper, they only need to know which cells they touch.
            walk.discover(&mut self.scratch, &FlatSampler);
            let span_min = (quantized_min as i32).clamp(0, SPAN_MAX_HEIGHT as i32 - 1) as u16;
            let span_max =
                (quantized_max as i32).clamp(span_min as i32 + 1, SPAN_MAX_HEIGHT as i32) as u16;
            self.emit_flat(&footprint, span_min, span_max, area_type, options)
        } else {
            walk.discover(&mut self.scratch, &SlopedSampler { grid });
            self.emit_sloped(&footprint, area_type, options)
        };

        result.map_err(|err| {
            tracing::warn!("Failed to rasterize triangle: {err}");
            err.into()
        })
    }

    /// Emits the uniform span of a flat triangle for every touched column and resets the row
    /// extents, including those of the padding rows.
    fn emit_flat(
        &mut self,
        footprint: &Footprint,
        span_min: u16,
        span_max: u16,
        area_type: AreaType,
        options: &RasterizationOptions,
    ) -> Result<(), AllocationError> {
        let mut result = Ok(());
        for z in footprint.z0 - 1..=footprint.z1_edge {
            let extent = self.scratch.take_row_extent(z);
            if result.is_err() || !footprint.contains_row(z) {
                continue;
            }
            for x in extent.min_col.max(footprint.x0)..=extent.max_col.min(footprint.x1) {
                let column_index = self.column_index(x as u16, z as u16);
                let span_min = if options.projects_to_floor(column_index) {
                    0
                } else {
                    span_min
                };
                let span = Span::from_quantized(span_min, span_max, area_type);
                if let Err(err) =
                    self.insert_span(column_index, span, options.flag_merge_threshold)
                {
                    result = Err(err);
                    break;
                }
            }
        }
        result
    }

    /// Converts the gathered height samples of a sloped triangle into spans and resets every
    /// touched sample and row extent, including those in the padding border.
    fn emit_sloped(
        &mut self,
        footprint: &Footprint,
        area_type: AreaType,
        options: &RasterizationOptions,
    ) -> Result<(), AllocationError> {
        let mut result = Ok(());
        for z in footprint.z0 - 1..=footprint.z1_edge {
            let extent = self.scratch.take_row_extent(z);
            let emit_row = footprint.contains_row(z);
            for x in extent.min_col..=extent.max_col {
                let sample = self.scratch.take_temp_sample(x, z);
                if result.is_err() || !emit_row || x < footprint.x0 || x > footprint.x1 {
                    continue;
                }
                // Skip the span if it is outside the heightfield bbox
                if sample.min >= SPAN_MAX_HEIGHT as i16 || sample.max < 0 {
                    continue;
                }
                let span_min = sample.min.max(0);
                let span_max = sample.max.max(span_min + 1).min(SPAN_MAX_HEIGHT as i16);

                let column_index = self.column_index(x as u16, z as u16);
                let span_min = if options.projects_to_floor(column_index) {
                    0
                } else {
                    span_min as u16
                };
                let span = Span::from_quantized(span_min, span_max as u16, area_type);
                if let Err(err) =
                    self.insert_span(column_index, span, options.flag_merge_threshold)
                {
                    result = Err(err);
                }
            }
        }
        result
    }
}

/// The parts of a heightfield's geometry the rasterizer needs.
#[derive(Debug, Clone, Copy)]
struct GridGeometry {
    min: Vec3A,
    /// Height of the heightfield AABB
    height: f32,
    cell_size: f32,
    inverse_cell_size: f32,
    inverse_cell_height: f32,
}

impl GridGeometry {
    fn new(heightfield: &Heightfield) -> Self {
        Self {
            min: heightfield.aabb.min,
            height: heightfield.aabb.max.y - heightfield.aabb.min.y,
            cell_size: heightfield.cell_size,
            inverse_cell_size: 1.0 / heightfield.cell_size,
            inverse_cell_height: 1.0 / heightfield.cell_height,
        }
    }

    /// The column containing `vertex`, possibly outside of the grid.
    #[inline]
    fn cell_of(&self, vertex: Vec3A) -> IVec2 {
        IVec2::new(self.cell_x(vertex.x), self.cell_z(vertex.z))
    }

    #[inline]
    fn cell_x(&self, x: f32) -> i32 {
        ((x - self.min.x) * self.inverse_cell_size).floor() as i32
    }

    #[inline]
    fn cell_z(&self, z: f32) -> i32 {
        ((z - self.min.z) * self.inverse_cell_size).floor() as i32
    }

    /// Quantizes a height relative to the heightfield floor, rounding down.
    #[inline]
    fn quantize(&self, height: f32) -> i16 {
        let limit = TempSample::LIMIT as i32;
        ((height * self.inverse_cell_height).floor() as i32).clamp(-limit, limit) as i16
    }

    /// The span of a triangle whose footprint is a single cell.
    ///
    /// The ceiling is rounded up and always lies above the floor, so even a perfectly flat
    /// triangle produces a span one cell high.
    fn single_cell_span(
        &self,
        triangle_min: f32,
        triangle_max: f32,
        area_type: AreaType,
        project_to_floor: bool,
    ) -> Span {
        // Clamp the span to the heightfield bbox.
        let triangle_min = triangle_min.max(0.0);
        let triangle_max = triangle_max.min(self.height);

        // Snap the span to the heightfield height grid.
        let max_height = SPAN_MAX_HEIGHT as i32;
        let span_min =
            ((triangle_min * self.inverse_cell_height).floor() as i32).clamp(0, max_height - 1);
        let span_max = ((triangle_max * self.inverse_cell_height).ceil() as i32)
            .clamp(span_min + 1, max_height);
        let span_min = if project_to_floor { 0 } else { span_min };
        Span::from_quantized(span_min as u16, span_max as u16, area_type)
    }
}

/// The columns a triangle may touch, clamped to the heightfield.
#[derive(Debug, Clone, Copy)]
struct Footprint {
    x0: i32,
    x1: i32,
    /// Last vertical grid line an edge may cross, one past the last column at most
    x1_edge: i32,
    z0: i32,
    z1: i32,
    /// Last row boundary an edge may cross, one past the last row at most
    z1_edge: i32,
}

impl Footprint {
    #[inline]
    fn contains(&self, cell: IVec2) -> bool {
        cell.x >= self.x0 && cell.x <= self.x1 && self.contains_row(cell.y)
    }

    #[inline]
    fn contains_row(&self, z: i32) -> bool {
        z >= self.z0 && z <= self.z1
    }
}

/// A triangle edge, parameterized from its base vertex.
#[derive(Debug, Clone, Copy, Default)]
struct Edge {
    origin: Vec3A,
    delta: Vec3A,
    inverse: Vec3A,
}

impl Edge {
    /// All edges of the triangle, indexed by [`EdgeHit::edge`].
    fn all(triangle: &[Vec3A; 3]) -> [Edge; 3] {
        let mut edges = [Edge::default(); 3];
        for base_vertex in 0..3 {
            let hit = EdgeHit::for_vertex(base_vertex);
            let origin = triangle[hit.base_vertex as usize];
            let delta = triangle[hit.other_vertex as usize] - origin;
            edges[hit.edge as usize] = Edge {
                origin,
                delta,
                inverse: delta.recip(),
            };
        }
        edges
    }

    /// The point of the edge at the vertical grid line `x`, clamped to the edge.
    #[inline]
    fn intersect_x(&self, x: f32) -> Vec3A {
        let t = saturate((x - self.origin.x) * self.inverse.x);
        self.origin + t * self.delta
    }

    /// The point of the edge at the row boundary `z`, clamped to the edge.
    #[inline]
    fn intersect_z(&self, z: f32) -> Vec3A {
        let t = saturate((z - self.origin.z) * self.inverse.z);
        self.origin + t * self.delta
    }
}

/// What the rasterizer records for every cell it finds the triangle in.
trait CellSampler {
    /// Records that the triangle passes through cell `(x, z)` at `point`.
    fn touch(&self, scratch: &mut RasterScratch, x: i32, z: i32, point: Vec3A);

    /// Records the cells between the two points where the triangle crosses row boundary `z`.
    fn fill_between(
        &self,
        scratch: &mut RasterScratch,
        z: i32,
        left: (Vec3A, i32),
        right: (Vec3A, i32),
        footprint: &Footprint,
    );
}

/// Only tracks which cells are touched.
struct FlatSampler;

impl CellSampler for FlatSampler {
    #[inline]
    fn touch(&self, scratch: &mut RasterScratch, x: i32, z: i32, _point: Vec3A) {
        scratch.mark(x, z);
    }

    fn fill_between(
        &self,
        scratch: &mut RasterScratch,
        z: i32,
        (_, left_x): (Vec3A, i32),
        (_, right_x): (Vec3A, i32),
        footprint: &Footprint,
    ) {
        // The row extents cover everything in between, so the outermost cells are enough.
        let x_start = (left_x + 1).max(footprint.x0);
        let x_end = right_x.min(footprint.x1);
        if x_start > x_end {
            return;
        }
        for row in [z, z - 1] {
            for x in [x_start, x_end, x_start - 1, x_end - 1] {
                scratch.mark(x, row);
            }
        }
    }
}

/// Tracks the height range of the triangle within each touched cell.
struct SlopedSampler {
    grid: GridGeometry,
}

impl CellSampler for SlopedSampler {
    #[inline]
    fn touch(&self, scratch: &mut RasterScratch, x: i32, z: i32, point: Vec3A) {
        scratch.sample(x, z, self.grid.quantize(point.y - self.grid.min.y));
    }

    fn fill_between(
        &self,
        scratch: &mut RasterScratch,
        z: i32,
        (left, left_x): (Vec3A, i32),
        (right, right_x): (Vec3A, i32),
        footprint: &Footprint,
    ) {
        let grid = &self.grid;
        let x_start = (left_x + 1).max(footprint.x0);
        let x_end = right_x.min(footprint.x1_edge);

        let d = 1.0 / (right.x - left.x);
        let dy = right.y - left.y;
        let height_at = |x: i32| {
            let t = saturate((x as f32 * grid.cell_size + grid.min.x - left.x) * d);
            left.y + t * dy - grid.min.y
        };
        let mut height = height_at(x_start);
        let step = if x_end > x_start {
            (height_at(x_end) - height) / (x_end - x_start) as f32
        } else {
            0.0
        };
        for x in x_start..=x_end {
            let quantized = grid.quantize(height);
            scratch.sample(x, z, quantized);
            scratch.sample(x - 1, z, quantized);
            scratch.sample(x, z - 1, quantized);
            scratch.sample(x - 1, z - 1, quantized);
            height += step;
        }
    }
}

/// Everything needed to find the cells a triangle touches.
struct TriangleWalk {
    triangle: [Vec3A; 3],
    cells: [IVec2; 3],
    edges: [Edge; 3],
    footprint: Footprint,
    grid: GridGeometry,
}

impl TriangleWalk {
    /// Walks the vertices and edges of the triangle, handing every touched cell to `sampler`.
    ///
    /// Leaves the edge hits cleared and the touched cells recorded in the row extents.
    fn discover(&self, scratch: &mut RasterScratch, sampler: &impl CellSampler) {
        let Self {
            triangle,
            cells,
            edges,
            footprint,
            grid,
        } = self;

        for base_vertex in 0..3 {
            let hit = EdgeHit::for_vertex(base_vertex);
            let cell = cells[base_vertex];
            let other_cell = cells[hit.other_vertex as usize];
            let edge = &edges[hit.edge as usize];

            // Drop the vertex into its own cell.
            if footprint.contains(cell) {
                sampler.touch(scratch, cell.x, cell.y, triangle[base_vertex]);
            }

            // Remember which row boundaries the edge crosses.
            if cell.y != other_cell.y {
                let start = (cell.y.min(other_cell.y) + 1).max(footprint.z0);
                let end = cell.y.max(other_cell.y).min(footprint.z1_edge);
                for z in start..=end {
                    scratch.record_edge_hit(z, hit);
                }
            }

            // Intersect the edge with the vertical grid lines it crosses.
            if cell.x != other_cell.x {
                let start = (cell.x.min(other_cell.x) + 1).max(footprint.x0);
                let end = cell.x.max(other_cell.x).min(footprint.x1_edge);
                let mut line_x = grid.min.x + grid.cell_size * start as f32;
                for x in start..=end {
                    let point = edge.intersect_x(line_x);
                    let z = grid.cell_z(point.z);
                    if footprint.contains_row(z) {
                        sampler.touch(scratch, x, z, point);
                        sampler.touch(scratch, x - 1, z, point);
                    }
                    line_x += grid.cell_size;
                }
            }
        }

        // Intersect the row boundaries with the two edges crossing them.
        let min_z = cells[0].y.min(cells[1].y).min(cells[2].y);
        let max_z = cells[0].y.max(cells[1].y).max(cells[2].y);
        let start = (min_z + 1).max(footprint.z0);
        let end = max_z.min(footprint.z1_edge);
        let mut line_z = grid.min.z + grid.cell_size * start as f32;
        for z in start..=end {
            if let Some(hits) = scratch.take_edge_hits(z) {
                let points = hits.map(|hit| edges[hit.edge as usize].intersect_z(line_z));
                let columns = points.map(|point| grid.cell_x(point.x));
                for (point, x) in points.into_iter().zip(columns) {
                    if x >= footprint.x0 && x <= footprint.x1 {
                        sampler.touch(scratch, x, z, point);
                        sampler.touch(scratch, x, z - 1, point);
                    }
                }
                if columns[0] != columns[1] {
                    let left = usize::from(points[1].x < points[0].x);
                    let right = 1 - left;
                    sampler.fill_between(
                        scratch,
                        z,
                        (points[left], columns[left]),
                        (points[right], columns[right]),
                        footprint,
                    );
                }
            }
            line_z += grid.cell_size;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use glam::UVec3;

    use crate::{
        Aabb3d,
        alloc::{BudgetAllocator, SystemAllocator},
        heightfield::Heightfield,
    };

    use super::*;

    /// 4x4 columns, 4 units high, `cs = ch = 1`, starting at the origin.
    fn height_field() -> Heightfield {
        height_field_with(1.0, SystemAllocator)
    }

    fn height_field_with(
        cell_height: f32,
        allocator: impl crate::HeightfieldAllocator + 'static,
    ) -> Heightfield {
        let aabb = Aabb3d {
            min: Vec3A::ZERO,
            max: Vec3A::splat(4.0),
        };
        Heightfield::new(4, 4, aabb, 1.0, cell_height, allocator).unwrap()
    }

    fn options() -> RasterizationOptions<'static> {
        RasterizationOptions::default()
    }

    /// A right triangle touching 10 of the 16 columns.
    fn corner_triangle(heights: [f32; 3]) -> [Vec3A; 3] {
        [
            Vec3A::new(0.5, heights[0], 0.5),
            Vec3A::new(3.5, heights[1], 0.5),
            Vec3A::new(0.5, heights[2], 3.2),
        ]
    }

    const CORNER_TRIANGLE_COLUMNS: [(u16, u16); 10] = [
        (0, 0),
        (1, 0),
        (2, 0),
        (3, 0),
        (0, 1),
        (1, 1),
        (2, 1),
        (0, 2),
        (1, 2),
        (0, 3),
    ];

    fn spans(heightfield: &Heightfield) -> Vec<(u16, u16, u16, u16, u8)> {
        heightfield
            .columns()
            .flat_map(|(x, z, spans)| {
                spans.map(move |span| (x, z, span.min(), span.max(), span.area().id()))
            })
            .collect()
    }

    fn touched_columns(heightfield: &Heightfield) -> Vec<(u16, u16)> {
        let mut columns: Vec<_> = heightfield.columns().map(|(x, z, _)| (x, z)).collect();
        columns.sort_by_key(|&(x, z)| (z, x));
        columns
    }

    #[test]
    fn flat_triangle_in_single_cell() {
        let mut heightfield = height_field();
        let triangle = [
            Vec3A::new(1.1, 2.0, 1.1),
            Vec3A::new(1.9, 2.0, 1.1),
            Vec3A::new(1.1, 2.0, 1.9),
        ];
        heightfield
            .rasterize_triangle(triangle, AreaType::DEFAULT_WALKABLE, &options())
            .unwrap();
        assert_eq!(spans(&heightfield), vec![(1, 1, 2, 3, 63)]);
        assert!(heightfield.scratch_is_clear());
    }

    #[test]
    fn single_cell_span_rounds_ceiling_up() {
        let mut heightfield = height_field_with(0.5, SystemAllocator);
        let triangle = [
            Vec3A::new(2.2, 1.3, 1.2),
            Vec3A::new(2.8, 2.2, 1.4),
            Vec3A::new(2.5, 1.8, 1.9),
        ];
        heightfield
            .rasterize_triangle(triangle, AreaType(7), &options())
            .unwrap();
        // floor(1.3 / 0.5) = 2, ceil(2.2 / 0.5) = 5
        assert_eq!(spans(&heightfield), vec![(2, 1, 2, 5, 7)]);
    }

    #[test]
    fn single_cell_span_is_clamped_to_the_height_range() {
        let mut heightfield = height_field();
        let triangle = [
            Vec3A::new(0.2, -1.0, 0.2),
            Vec3A::new(0.8, 9.0, 0.2),
            Vec3A::new(0.5, 1.0, 0.8),
        ];
        heightfield
            .rasterize_triangle(triangle, AreaType(1), &options())
            .unwrap();
        assert_eq!(spans(&heightfield), vec![(0, 0, 0, 4, 1)]);
    }

    #[test]
    fn single_cell_span_stays_below_max_height() {
        let aabb = Aabb3d {
            min: Vec3A::ZERO,
            max: Vec3A::new(1.0, 10_000.0, 1.0),
        };
        let mut heightfield = Heightfield::new(1, 1, aabb, 1.0, 1.0, SystemAllocator).unwrap();
        let triangle = [
            Vec3A::new(0.2, 9000.0, 0.2),
            Vec3A::new(0.8, 9000.0, 0.2),
            Vec3A::new(0.5, 9000.0, 0.8),
        ];
        heightfield
            .rasterize_triangle(triangle, AreaType(1), &options())
            .unwrap();
        assert_eq!(
            spans(&heightfield),
            vec![(0, 0, SPAN_MAX_HEIGHT - 1, SPAN_MAX_HEIGHT, 1)]
        );
    }

    #[test]
    fn flat_triangle_covers_its_footprint() {
        let mut heightfield = height_field();
        heightfield
            .rasterize_triangle(
                corner_triangle([2.5; 3]),
                AreaType::DEFAULT_WALKABLE,
                &options(),
            )
            .unwrap();
        assert_eq!(touched_columns(&heightfield), CORNER_TRIANGLE_COLUMNS);
        for (_, _, min, max, area) in spans(&heightfield) {
            assert_eq!((min, max, area), (2, 3, 63));
        }
        assert!(heightfield.scratch_is_clear());
    }

    #[test]
    fn sloped_triangle_covers_the_same_footprint() {
        let mut heightfield = height_field();
        heightfield
            .rasterize_triangle(
                corner_triangle([0.5, 0.5, 3.5]),
                AreaType::DEFAULT_WALKABLE,
                &options(),
            )
            .unwrap();
        assert_eq!(touched_columns(&heightfield), CORNER_TRIANGLE_COLUMNS);
        for (_, _, min, max, _) in spans(&heightfield) {
            assert!(min < max);
            assert!(max <= 4);
        }
        assert_eq!(heightfield.span_at(0, 0).map(Span::min), Some(0));
        assert!(heightfield.span_at(0, 3).unwrap().max() >= 3);
        assert_eq!(heightfield.span_count(), CORNER_TRIANGLE_COLUMNS.len());
        assert!(heightfield.scratch_is_clear());
    }

    #[test]
    fn triangles_outside_the_heightfield_deposit_nothing() {
        let mut heightfield = height_field();
        let outside = [
            // Right of the grid
            [
                Vec3A::new(5.0, 1.0, 1.0),
                Vec3A::new(7.0, 1.0, 1.0),
                Vec3A::new(6.0, 1.0, 3.0),
            ],
            // Before the grid
            [
                Vec3A::new(1.0, 1.0, -5.0),
                Vec3A::new(3.0, 1.0, -5.0),
                Vec3A::new(2.0, 1.0, -0.5),
            ],
            // Below the grid
            [
                Vec3A::new(0.5, -3.0, 0.5),
                Vec3A::new(3.5, -2.0, 0.5),
                Vec3A::new(0.5, -1.0, 3.5),
            ],
            // Above the grid
            [
                Vec3A::new(0.5, 5.0, 0.5),
                Vec3A::new(3.5, 6.0, 0.5),
                Vec3A::new(0.5, 5.0, 3.5),
            ],
        ];
        for triangle in outside {
            heightfield
                .rasterize_triangle(triangle, AreaType(1), &options())
                .unwrap();
            assert!(heightfield.scratch_is_clear());
        }
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn triangles_overlapping_the_border_are_clipped() {
        let mut heightfield = height_field();
        let triangles = [
            [
                Vec3A::new(-3.0, 1.0, -2.0),
                Vec3A::new(7.0, 1.0, -1.5),
                Vec3A::new(1.5, 1.0, 9.0),
            ],
            [
                Vec3A::new(-3.0, -2.0, -2.0),
                Vec3A::new(7.0, 3.0, -1.5),
                Vec3A::new(1.5, 7.0, 9.0),
            ],
            [
                Vec3A::new(3.5, 0.2, 3.5),
                Vec3A::new(4.5, 0.2, 3.7),
                Vec3A::new(3.7, 1.9, 4.5),
            ],
        ];
        for triangle in triangles {
            heightfield
                .rasterize_triangle(triangle, AreaType(1), &options())
                .unwrap();
            assert!(heightfield.scratch_is_clear());
        }
        for (x, z, min, max, _) in spans(&heightfield) {
            assert!(x < 4 && z < 4);
            assert!(min < max && max <= SPAN_MAX_HEIGHT);
        }
        // The first triangle covers the whole grid.
        assert_eq!(heightfield.columns().count(), 16);
    }

    #[test]
    fn rasterizing_twice_is_idempotent() {
        for triangle in [
            corner_triangle([2.5; 3]),
            corner_triangle([0.5, 1.5, 3.5]),
        ] {
            let mut once = height_field();
            once.rasterize_triangle(triangle, AreaType(3), &options())
                .unwrap();
            let mut twice = height_field();
            twice
                .rasterize_triangle(triangle, AreaType(3), &options())
                .unwrap();
            twice
                .rasterize_triangle(triangle, AreaType(3), &options())
                .unwrap();
            assert_eq!(spans(&once), spans(&twice));
        }
    }

    #[test]
    fn projects_spans_to_the_floor() {
        let mut heightfield = height_field();
        let options = RasterizationOptions {
            flags: RasterizationFlags::PROJECT_TO_FLOOR,
            ..options()
        };
        heightfield
            .rasterize_triangle(corner_triangle([2.5; 3]), AreaType(1), &options)
            .unwrap();
        for (_, _, min, max, _) in spans(&heightfield) {
            assert_eq!((min, max), (0, 3));
        }
    }

    #[test]
    fn mask_selects_columns_projected_to_the_floor() {
        let mut mask = vec![RasterizationFlags::empty(); 16];
        mask[0] = RasterizationFlags::PROJECT_TO_FLOOR;
        mask[1 + 4] = RasterizationFlags::PROJECT_TO_FLOOR;

        let mut heightfield = height_field();
        let options = RasterizationOptions {
            flags: RasterizationFlags::PROJECT_TO_FLOOR,
            mask: Some(&mask),
            ..options()
        };
        heightfield
            .rasterize_triangle(corner_triangle([2.5; 3]), AreaType(1), &options)
            .unwrap();
        for (x, z, min, _, _) in spans(&heightfield) {
            let expected = if (x, z) == (0, 0) || (x, z) == (1, 1) {
                0
            } else {
                2
            };
            assert_eq!(min, expected, "column ({x}, {z})");
        }

        // Without the flag, the mask alone does nothing.
        let mut heightfield = height_field();
        let mask_only = RasterizationOptions {
            mask: Some(&mask),
            ..RasterizationOptions::default()
        };
        heightfield
            .rasterize_triangle(corner_triangle([2.5; 3]), AreaType(1), &mask_only)
            .unwrap();
        assert!(spans(&heightfield).iter().all(|span| span.2 == 2));
    }

    #[test]
    fn rejects_mask_of_wrong_size() {
        let mask = vec![RasterizationFlags::PROJECT_TO_FLOOR; 15];
        let mut heightfield = height_field();
        let options = RasterizationOptions {
            mask: Some(&mask),
            ..options()
        };
        let result =
            heightfield.rasterize_triangle(corner_triangle([2.5; 3]), AreaType(1), &options);
        assert!(matches!(
            result,
            Err(RasterizationError::MaskSizeMismatch {
                expected: 16,
                actual: 15
            })
        ));
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn allocation_failure_keeps_spans_and_clears_scratch() {
        let budget = Arc::new(Mutex::new(BudgetAllocator::new(usize::MAX)));
        let mut heightfield = height_field_with(1.0, budget.clone());
        {
            let mut budget = budget.lock().unwrap();
            let used = budget.used();
            budget.set_limit(used);
        }

        for triangle in [corner_triangle([2.5; 3]), corner_triangle([0.5, 1.5, 3.5])] {
            let result = heightfield.rasterize_triangle(triangle, AreaType(1), &options());
            assert!(matches!(
                result,
                Err(RasterizationError::Allocation(
                    AllocationError::Refused { .. }
                ))
            ));
            assert!(heightfield.scratch_is_clear());
            assert_eq!(heightfield.span_count(), 0);
        }

        budget.lock().unwrap().set_limit(usize::MAX);
        heightfield
            .rasterize_triangle(corner_triangle([2.5; 3]), AreaType(1), &options())
            .unwrap();
        assert_eq!(heightfield.span_count(), CORNER_TRIANGLE_COLUMNS.len());
    }

    #[test]
    fn rasterizes_trimesh_with_its_area_types() {
        let [a, b, c] = corner_triangle([2.5; 3]);
        let trimesh = TriMesh {
            vertices: vec![a, b, c, Vec3A::new(3.2, 1.0, 3.2)],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(3, 3, 3)],
            area_types: vec![AreaType(5), AreaType(9)],
        };
        let mut heightfield = height_field();
        heightfield
            .rasterize_triangles(&trimesh, &options())
            .unwrap();
        assert_eq!(heightfield.span_at(0, 0).map(Span::area), Some(AreaType(5)));
        assert_eq!(
            heightfield.span_at(3, 3).map(|span| (span.min(), span.max(), span.area())),
            Some((1, 2, AreaType(9)))
        );
    }

    #[test]
    fn rejects_invalid_trimesh_before_inserting_spans() {
        let [a, b, c] = corner_triangle([2.5; 3]);
        let mut heightfield = height_field();

        let missing_area = TriMesh {
            vertices: vec![a, b, c],
            indices: vec![UVec3::new(0, 1, 2), UVec3::new(2, 1, 0)],
            area_types: vec![AreaType(1)],
        };
        let result = heightfield.rasterize_triangles(&missing_area, &options());
        assert!(matches!(
            result,
            Err(RasterizationError::AreaCountMismatch {
                triangles: 2,
                area_types: 1
            })
        ));

        let bad_index = TriMesh::with_area_type(
            vec![a, b, c],
            vec![UVec3::new(0, 1, 2), UVec3::new(0, 1, 3)],
            AreaType(1),
        );
        let result = heightfield.rasterize_triangles(&bad_index, &options());
        assert!(matches!(
            result,
            Err(RasterizationError::VertexIndexOutOfBounds {
                triangle: 1,
                index: 3,
                vertex_count: 3
            })
        ));
        assert_eq!(heightfield.span_count(), 0);
    }

    #[test]
    fn edges_start_at_their_base_vertex() {
        let triangle = corner_triangle([0.0, 1.0, 2.0]);
        let edges = Edge::all(&triangle);
        // Edge 2 runs from vertex 0 to vertex 1.
        assert_eq!(edges[2].origin, triangle[0]);
        assert_eq!(edges[2].origin + edges[2].delta, triangle[1]);
        assert_eq!(edges[0].origin, triangle[1]);
        assert_eq!(edges[1].origin, triangle[2]);

        let point = edges[2].intersect_x(2.0);
        assert_eq!(point.z, 0.5);
        assert_eq!(edges[2].intersect_x(100.0), triangle[1]);
    }
}
