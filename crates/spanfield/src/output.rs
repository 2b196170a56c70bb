//! World space representations of the spans of a [`Heightfield`].
//!
//! These are read-only views meant for hosts that want to display or export a heightfield.
//! Every span is converted with the heightfield's own AABB, cell size and cell height.

use glam::Vec3A;

use crate::{heightfield::Heightfield, math::Aabb3d, span::AreaType};

/// An axis-aligned box in world space covering one span or one voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CellBox {
    /// The column of the box along the x-axis
    pub x: u16,
    /// The column of the box along the z-axis
    pub z: u16,
    /// The minimum corner of the box
    pub min: Vec3A,
    /// The maximum corner of the box
    pub max: Vec3A,
    /// The area type of the span the box belongs to
    pub area: AreaType,
}

/// A point in world space sampling one span or one voxel.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanPoint {
    /// The column of the point along the x-axis
    pub x: u16,
    /// The column of the point along the z-axis
    pub z: u16,
    /// The position of the point
    pub position: Vec3A,
    /// The world space height of the floor of the span the point belongs to
    pub span_min: f32,
    /// The world space height of the ceiling of the span the point belongs to
    pub span_max: f32,
    /// The area type of the span the point belongs to
    pub area: AreaType,
}

/// Selects the representation built by [`Heightfield::output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
pub enum OutputMode {
    /// One box per span, see [`Heightfield::span_boxes`].
    #[default]
    Spans,
    /// One box per voxel, see [`Heightfield::voxel_boxes`].
    Voxels,
    /// One point per span, see [`Heightfield::span_points`].
    SpanPoints,
    /// One point per voxel, see [`Heightfield::voxel_points`].
    VoxelPoints,
}

/// The geometry produced for one [`OutputMode`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(rename_all = "snake_case"))]
pub enum OutputGeometry {
    /// Boxes produced by [`OutputMode::Spans`] and [`OutputMode::Voxels`].
    Boxes(Vec<CellBox>),
    /// Points produced by [`OutputMode::SpanPoints`] and [`OutputMode::VoxelPoints`].
    Points(Vec<SpanPoint>),
}

impl OutputGeometry {
    /// The number of boxes or points.
    pub fn len(&self) -> usize {
        match self {
            Self::Boxes(boxes) => boxes.len(),
            Self::Points(points) => points.len(),
        }
    }

    /// Whether there are no boxes or points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A heightfield converted to world space, together with the grid it was sampled on.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct HeightfieldOutput {
    /// The representation of the geometry
    pub mode: OutputMode,
    /// The width of the heightfield along the x-axis in cell units
    pub width: u16,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u16,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The number of spans in the heightfield
    pub span_count: usize,
    /// The converted spans
    pub geometry: OutputGeometry,
}

impl Heightfield {
    /// Converts the heightfield into the representation selected by `mode`.
    pub fn output(&self, mode: OutputMode) -> HeightfieldOutput {
        let geometry = match mode {
            OutputMode::Spans => OutputGeometry::Boxes(self.span_boxes().collect()),
            OutputMode::Voxels => OutputGeometry::Boxes(self.voxel_boxes().collect()),
            OutputMode::SpanPoints => OutputGeometry::Points(self.span_points().collect()),
            OutputMode::VoxelPoints => OutputGeometry::Points(self.voxel_points().collect()),
        };
        HeightfieldOutput {
            mode,
            width: self.width(),
            height: self.height(),
            aabb: self.aabb(),
            cell_size: self.cell_size(),
            cell_height: self.cell_height(),
            span_count: self.span_count(),
            geometry,
        }
    }

    /// One box per span, spanning its whole column on the xz-plane.
    pub fn span_boxes(&self) -> impl Iterator<Item = CellBox> + '_ {
        self.world_spans().map(|span| CellBox {
            x: span.x,
            z: span.z,
            min: span.corner.with_y(span.min),
            max: (span.corner + Vec3A::new(self.cell_size, 0.0, self.cell_size))
                .with_y(span.max),
            area: span.area,
        })
    }

    /// One box per voxel, i.e. per cell height unit of every span.
    pub fn voxel_boxes(&self) -> impl Iterator<Item = CellBox> + '_ {
        self.world_voxels().map(|(span, voxel_min)| CellBox {
            x: span.x,
            z: span.z,
            min: span.corner.with_y(voxel_min),
            max: (span.corner + Vec3A::new(self.cell_size, 0.0, self.cell_size))
                .with_y(voxel_min + self.cell_height),
            area: span.area,
        })
    }

    /// One point per span, centered on its column and placed at its ceiling.
    pub fn span_points(&self) -> impl Iterator<Item = SpanPoint> + '_ {
        let half_cell = 0.5 * self.cell_size;
        self.world_spans().map(move |span| SpanPoint {
            x: span.x,
            z: span.z,
            position: (span.corner + Vec3A::new(half_cell, 0.0, half_cell)).with_y(span.max),
            span_min: span.min,
            span_max: span.max,
            area: span.area,
        })
    }

    /// One point per voxel, placed at its center.
    pub fn voxel_points(&self) -> impl Iterator<Item = SpanPoint> + '_ {
        let half_cell = 0.5 * self.cell_size;
        let half_height = 0.5 * self.cell_height;
        self.world_voxels().map(move |(span, voxel_min)| SpanPoint {
            x: span.x,
            z: span.z,
            position: (span.corner + Vec3A::new(half_cell, 0.0, half_cell))
                .with_y(voxel_min + half_height),
            span_min: span.min,
            span_max: span.max,
            area: span.area,
        })
    }

    fn world_spans(&self) -> impl Iterator<Item = WorldSpan> + '_ {
        let origin = self.aabb.min;
        self.columns().flat_map(move |(x, z, spans)| {
            let corner = origin + Vec3A::new(x as f32, 0.0, z as f32) * self.cell_size;
            spans.map(move |span| WorldSpan {
                x,
                z,
                corner,
                min: span.min() as f32 * self.cell_height + origin.y,
                max: span.max() as f32 * self.cell_height + origin.y,
                span_min: span.min(),
                span_max: span.max(),
                area: span.area(),
            })
        })
    }

    fn world_voxels(&self) -> impl Iterator<Item = (WorldSpan, f32)> + '_ {
        let origin_y = self.aabb.min.y;
        self.world_spans().flat_map(move |span| {
            (span.span_min..span.span_max)
                .map(move |voxel| (span, voxel as f32 * self.cell_height + origin_y))
        })
    }
}

/// A span together with the world space position of its column.
#[derive(Debug, Clone, Copy)]
struct WorldSpan {
    x: u16,
    z: u16,
    /// The minimum corner of the column on the xz-plane, at height 0
    corner: Vec3A,
    min: f32,
    max: f32,
    span_min: u16,
    span_max: u16,
    area: AreaType,
}
