//! Triangle meshes used as input for [`Heightfield`](crate::Heightfield) rasterization.

use glam::{UVec3, Vec3A};

use crate::{
    math::{Aabb3d, TriangleIndices as _},
    rasterize::RasterizationError,
    span::AreaType,
};

/// A mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh where every triangle has the same area type.
    pub fn with_area_type(vertices: Vec<Vec3A>, indices: Vec<UVec3>, area_type: AreaType) -> Self {
        let area_types = vec![area_type; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    ///
    /// # Panics
    ///
    /// Panics if the combined trimesh would have more than 2^32 vertices.
    pub fn extend(&mut self, other: TriMesh) {
        let Ok(next_vertex_index) = u32::try_from(self.vertices.len()) else {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        };
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// The number of triangles.
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    /// The vertices of the triangle at `index`.
    /// Returns `None` if the triangle or one of its vertices does not exist.
    pub fn triangle(&self, index: usize) -> Option<[Vec3A; 3]> {
        let indices = self.indices.get(index)?;
        Some([
            *self.vertices.get(indices.x as usize)?,
            *self.vertices.get(indices.y as usize)?,
            *self.vertices.get(indices.z as usize)?,
        ])
    }

    /// Checks that every triangle has an area type and only references existing vertices.
    pub fn validate(&self) -> Result<(), RasterizationError> {
        if self.area_types.len() != self.indices.len() {
            return Err(RasterizationError::AreaCountMismatch {
                triangles: self.indices.len(),
                area_types: self.area_types.len(),
            });
        }
        let vertex_count = self.vertices.len();
        for (triangle, indices) in self.indices.iter().enumerate() {
            if let Some(index) = indices
                .to_array()
                .into_iter()
                .find(|&index| index as usize >= vertex_count)
            {
                return Err(RasterizationError::VertexIndexOutOfBounds {
                    triangle,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(())
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// The triangles are marked as walkable if the angle between their normal and the up axis
    /// is less than the threshold angle. Other triangles keep their area type.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (indices, area_type) in self.indices.iter().zip(&mut self.area_types) {
            let Some(normal) = indices.normal(&self.vertices) else {
                continue;
            };
            if normal.y > threshold_cos {
                *area_type = AreaType::DEFAULT_WALKABLE;
            }
        }
    }

    /// Marks the triangles steeper than the threshold angle as [`AreaType::NOT_WALKABLE`].
    /// Other triangles keep their area type.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn clear_unwalkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (indices, area_type) in self.indices.iter().zip(&mut self.area_types) {
            let Some(normal) = indices.normal(&self.vertices) else {
                continue;
            };
            if normal.y <= threshold_cos {
                *area_type = AreaType::NOT_WALKABLE;
            }
        }
    }
}
