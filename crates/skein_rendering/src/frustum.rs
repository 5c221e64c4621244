//! View frustum derived from the view-projection matrix.
//!
//! Rebuilt every frame from the origin-relative matrix, so every test takes
//! coordinates relative to the render origin.

use bytemuck::{Pod, Zeroable};

/// A plane in 3D space (Ax + By + Cz + D = 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Plane {
    /// Normal X component.
    pub a: f32,
    /// Normal Y component.
    pub b: f32,
    /// Normal Z component.
    pub c: f32,
    /// Distance from origin.
    pub d: f32,
}

impl Plane {
    /// Creates a new plane.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.a * self.a + self.b * self.b + self.c * self.c).sqrt();
        if len > 0.0 {
            Self {
                a: self.a / len,
                b: self.b / len,
                c: self.c / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, point: [f32; 3]) -> f32 {
        self.a * point[0] + self.b * point[1] + self.c * point[2] + self.d
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl Aabb {
    /// Creates a box from its corners.
    #[must_use]
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// Returns the center.
    #[must_use]
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Returns the half-extents.
    #[must_use]
    pub fn half_extents(&self) -> [f32; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }
}

/// View frustum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the planes of a column-major view-projection matrix.
    #[must_use]
    pub fn from_view_projection(m: &[[f32; 4]; 4]) -> Self {
        let row = |r: usize| [m[0][r], m[1][r], m[2][r], m[3][r]];
        let (x, y, z, w) = (row(0), row(1), row(2), row(3));
        let plane = |sign: f32, axis: [f32; 4]| {
            Plane::new(
                w[0] + sign * axis[0],
                w[1] + sign * axis[1],
                w[2] + sign * axis[2],
                w[3] + sign * axis[3],
            )
            .normalized()
        };

        Self {
            planes: [
                plane(1.0, x),
                plane(-1.0, x),
                plane(1.0, y),
                plane(-1.0, y),
                plane(1.0, z),
                plane(-1.0, z),
            ],
        }
    }

    /// Tests if a sphere intersects the frustum.
    #[must_use]
    pub fn test_sphere(&self, center: [f32; 3], radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }

    /// Tests if a box intersects the frustum.
    #[must_use]
    pub fn test_aabb(&self, aabb: &Aabb) -> bool {
        let center = aabb.center();
        let half = aabb.half_extents();

        self.planes.iter().all(|plane| {
            let r = half[0] * plane.a.abs() + half[1] * plane.b.abs() + half[2] * plane.c.abs();
            plane.distance_to_point(center) >= -r
        })
    }

    /// Returns the planes as arrays.
    #[must_use]
    pub fn as_arrays(&self) -> [[f32; 4]; 6] {
        self.planes.map(|plane| [plane.a, plane.b, plane.c, plane.d])
    }
}
