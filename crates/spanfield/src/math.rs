use glam::{UVec3, Vec3A};

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum point of the box
    pub min: Vec3A,
    /// The maximum point of the box
    pub max: Vec3A,
}

impl Aabb3d {
    /// Constructs an AABB from its center and half-size.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let (center, half_size) = (center.into(), half_size.into());
        debug_assert!(half_size.cmpge(Vec3A::ZERO).all());
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Computes the smallest AABB containing all `vertices`.
    /// Returns `None` if `vertices` is empty.
    pub fn from_verts(vertices: &[Vec3A]) -> Option<Self> {
        let mut iter = vertices.iter();
        let first = iter.next()?;
        let (min, max) = iter.fold((*first, *first), |(prev_min, prev_max), point| {
            (point.min(prev_min), point.max(prev_max))
        });
        Some(Self { min, max })
    }

    /// Grows the AABB by `padding` on every side.
    #[inline]
    pub fn grow(self, padding: impl Into<Vec3A>) -> Self {
        let padding = padding.into();
        Self {
            min: self.min - padding,
            max: self.max + padding,
        }
    }

    /// The size of the AABB along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }
}

pub(crate) trait TriangleIndices {
    /// `None` if one of the indices is not a vertex.
    fn normal(&self, vertices: &[Vec3A]) -> Option<Vec3A>;
}

impl TriangleIndices for UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Option<Vec3A> {
        let a = *vertices.get(self[0] as usize)?;
        let b = *vertices.get(self[1] as usize)?;
        let c = *vertices.get(self[2] as usize)?;
        let ab = b - a;
        let ac = c - a;
        Some(ab.cross(ac).normalize_or_zero())
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Clamps `t` to `[0, 1]`. NaN clamps to 0.
#[inline]
pub(crate) fn saturate(t: f32) -> f32 {
    t.max(0.0).min(1.0)
}
