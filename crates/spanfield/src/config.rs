#[cfg(feature = "bevy_reflect")]
use bevy_reflect::prelude::*;

use crate::{Aabb3d, RasterizationFlags, TriMesh};

/// Specifies a configuration to use when voxelizing a [`TriMesh`] with
/// [`Heightfield::from_trimesh`](crate::Heightfield::from_trimesh).
///
/// Units are either in voxels (vx) or world units (wu). The units for voxels are based on the
/// values of [`Self::cell_size`] and [`Self::cell_height`].
///
/// The defaults match a fine grained voxelization of a human sized scene.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
#[cfg_attr(feature = "bevy_reflect", derive(Reflect))]
#[cfg_attr(
    all(feature = "serialize", feature = "bevy_reflect"),
    reflect(Serialize, Deserialize)
)]
pub struct RasterizationConfig {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// Smaller values of cell_size increase the rasterization resolution, but the number of
    /// columns grows quadratically with it.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// The voxelization cell height is defined separately in order to allow for greater precision in height tests.
    /// Spans can be at most [`SPAN_MAX_HEIGHT`](crate::SPAN_MAX_HEIGHT) cells high.
    pub cell_height: f32,

    /// Distance added to every side of the mesh AABB to get the heightfield AABB. `[Limit: >= 0] [Units: wu]`
    pub bounds_padding: f32,

    /// Maximum difference between the ceilings of two merged spans for which the higher area type wins. `[Limit: >= 0] [Units: vx]`
    ///
    /// Spans whose ceilings are further apart take the area type of the higher span.
    pub flag_merge_threshold: u16,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// If set, the area types of the mesh are overwritten before rasterization:
    /// triangles at most this steep become [`AreaType::DEFAULT_WALKABLE`](crate::AreaType::DEFAULT_WALKABLE),
    /// all others [`AreaType::NOT_WALKABLE`](crate::AreaType::NOT_WALKABLE).
    /// If `None`, the area types of the mesh are used as they are.
    pub walkable_slope_angle: Option<f32>,

    /// Whether every span is extended down to the floor of the heightfield.
    pub project_to_floor: bool,
}

impl Default for RasterizationConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.19,
            cell_height: 0.1,
            bounds_padding: 10.0,
            flag_merge_threshold: 4,
            walkable_slope_angle: None,
            project_to_floor: false,
        }
    }
}

impl RasterizationConfig {
    /// The AABB of the heightfield for `trimesh`, i.e. its AABB grown by [`Self::bounds_padding`].
    /// Returns `None` if the trimesh is empty.
    pub fn heightfield_aabb(&self, trimesh: &TriMesh) -> Option<Aabb3d> {
        trimesh
            .compute_aabb()
            .map(|aabb| aabb.grow(glam::Vec3A::splat(self.bounds_padding)))
    }

    /// The flags every triangle is rasterized with.
    pub fn rasterization_flags(&self) -> RasterizationFlags {
        if self.project_to_floor {
            RasterizationFlags::PROJECT_TO_FLOOR
        } else {
            RasterizationFlags::empty()
        }
    }
}
