#![doc = include_str!("../../../readme.md")]

mod alloc;
mod config;
mod heightfield;
mod main_api;
mod math;
mod output;
mod pool;
mod rasterize;
mod scratch;
mod span;
mod trimesh;

pub use alloc::{
    AllocationError, AllocationKind, AllocationRequest, BudgetAllocator, HeightfieldAllocator,
    SystemAllocator,
};
pub use config::RasterizationConfig;
pub use heightfield::{
    ColumnIter, Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertion,
    SpanInsertionError,
};
pub use main_api::VoxelizationError;
pub use math::Aabb3d;
pub use output::{CellBox, HeightfieldOutput, OutputGeometry, OutputMode, SpanPoint};
pub use pool::{SPANS_PER_POOL, SpanKey, Spans};
pub use rasterize::{RasterizationError, RasterizationFlags, RasterizationOptions};
pub use span::{AREA_BITS, AreaType, SPAN_HEIGHT_BITS, SPAN_MAX_HEIGHT, Span, SpanBuilder, SpanError};
pub use trimesh::TriMesh;
