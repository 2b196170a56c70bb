use std::borrow::Cow;

use thiserror::Error;

use crate::{
    alloc::{HeightfieldAllocator, SystemAllocator},
    config::RasterizationConfig,
    heightfield::{Heightfield, HeightfieldBuilder, HeightfieldBuilderError},
    rasterize::{RasterizationError, RasterizationOptions},
    trimesh::TriMesh,
};

impl Heightfield {
    /// Voxelizes a [`TriMesh`] into a new [`Heightfield`].
    ///
    /// The heightfield covers the AABB of the trimesh grown by
    /// [`RasterizationConfig::bounds_padding`].
    ///
    /// # Arguments
    ///
    /// * `trimesh` - The [`TriMesh`] to rasterize.
    /// * `config` - Cell dimensions and rasterization parameters.
    ///
    pub fn from_trimesh(
        trimesh: &TriMesh,
        config: &RasterizationConfig,
    ) -> Result<Self, VoxelizationError> {
        Self::from_trimesh_with_allocator(trimesh, config, SystemAllocator)
    }

    /// Voxelizes a [`TriMesh`] into a new [`Heightfield`] whose allocations are admitted by
    /// `allocator`. See [`Heightfield::from_trimesh`].
    pub fn from_trimesh_with_allocator(
        trimesh: &TriMesh,
        config: &RasterizationConfig,
        allocator: impl HeightfieldAllocator + 'static,
    ) -> Result<Self, VoxelizationError> {
        let aabb = config
            .heightfield_aabb(trimesh)
            .ok_or(VoxelizationError::EmptyMesh)?;
        trimesh.validate()?;

        let trimesh = match config.walkable_slope_angle {
            Some(angle) => {
                let mut trimesh = trimesh.clone();
                trimesh.clear_unwalkable_triangles(angle);
                trimesh.mark_walkable_triangles(angle);
                Cow::Owned(trimesh)
            }
            None => Cow::Borrowed(trimesh),
        };

        let mut heightfield = HeightfieldBuilder {
            aabb,
            cell_size: config.cell_size,
            cell_height: config.cell_height,
        }
        .build_with_allocator(allocator)?;

        let options = RasterizationOptions {
            flag_merge_threshold: config.flag_merge_threshold,
            flags: config.rasterization_flags(),
            mask: None,
        };
        heightfield.rasterize_triangles(&trimesh, &options)?;

        tracing::debug!(
            "Voxelized {} triangles into {}x{} columns with {} spans",
            trimesh.triangle_count(),
            heightfield.width(),
            heightfield.height(),
            heightfield.span_count()
        );
        Ok(heightfield)
    }
}

/// Errors that can occur when voxelizing a [`TriMesh`] with [`Heightfield::from_trimesh`].
#[derive(Error, Debug)]
pub enum VoxelizationError {
    /// Happens when the trimesh has no vertices, so there are no bounds to voxelize.
    #[error("Cannot voxelize a trimesh without vertices")]
    EmptyMesh,
    /// Happens when the heightfield cannot be built.
    #[error("Failed to build heightfield: {0}")]
    Builder(#[from] HeightfieldBuilderError),
    /// Happens when the triangles cannot be rasterized.
    #[error("Failed to rasterize trimesh: {0}")]
    Rasterization(#[from] RasterizationError),
}
