//! Axis-aligned bounding boxes in world space.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, StrataResult};
use crate::point::WorldPoint;

/// Axis-aligned box given by min/max corner points.
///
/// Fixed at creation; malformed corners are rejected at construction time
/// rather than surfacing later as query errors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner (inclusive)
    pub min: WorldPoint,
    /// Maximum corner (exclusive for point containment)
    pub max: WorldPoint,
}

impl Aabb {
    /// Creates a new box, failing fast on malformed corners.
    pub fn new(min: WorldPoint, max: WorldPoint) -> StrataResult<Self> {
        if !min.is_finite() || !max.is_finite() || min.x > max.x || min.y > max.y || min.z > max.z {
            return Err(IndexError::MalformedBounds { min, max }.into());
        }
        Ok(Self { min, max })
    }

    /// Creates a cubic (square in 2D) box of half-width `half_extent`
    /// centered on `center`.
    pub fn around(center: WorldPoint, half_extent: f32) -> StrataResult<Self> {
        Self::new(
            WorldPoint::new(
                center.x - half_extent,
                center.y - half_extent,
                center.z - half_extent,
            ),
            WorldPoint::new(
                center.x + half_extent,
                center.y + half_extent,
                center.z + half_extent,
            ),
        )
    }

    /// Checks containment with the lower edge inclusive, upper exclusive.
    #[must_use]
    pub fn contains_point(&self, p: WorldPoint) -> bool {
        p.x >= self.min.x
            && p.x < self.max.x
            && p.y >= self.min.y
            && p.y < self.max.y
            && p.z >= self.min.z
            && p.z < self.max.z
    }

    /// Checks fully-inclusive containment (used at a root's outer boundary).
    #[must_use]
    pub fn contains_point_closed(&self, p: WorldPoint) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Checks box overlap: boxes overlap iff no axis separates them.
    #[must_use]
    pub fn intersects(&self, other: &Aabb) -> bool {
        !(self.min.x > other.max.x
            || self.max.x < other.min.x
            || self.min.y > other.max.y
            || self.max.y < other.min.y
            || self.min.z > other.max.z
            || self.max.z < other.min.z)
    }

    /// Returns the geometric center.
    #[must_use]
    pub fn center(&self) -> WorldPoint {
        WorldPoint::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    /// Returns the extent along each axis.
    #[must_use]
    pub fn extent(&self) -> WorldPoint {
        WorldPoint::new(
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        )
    }

    /// Returns the smallest axis extent over the first `axes` axes.
    #[must_use]
    pub fn min_extent(&self, axes: usize) -> f32 {
        let e = self.extent();
        let mut result = e.x.min(e.y);
        if axes > 2 {
            result = result.min(e.z);
        }
        result
    }

    /// Returns the child box for octant/quadrant `index`, splitting at the
    /// midpoint along the first `axes` axes.
    ///
    /// Bit 0 of `index` selects the x half, bit 1 the y half, bit 2 the z
    /// half. With `axes == 2` the z range is carried through unchanged.
    #[must_use]
    pub fn child_bounds(&self, index: usize, axes: usize) -> Aabb {
        let c = self.center();
        let (min_x, max_x) = if index & 1 == 0 {
            (self.min.x, c.x)
        } else {
            (c.x, self.max.x)
        };
        let (min_y, max_y) = if index & 2 == 0 {
            (self.min.y, c.y)
        } else {
            (c.y, self.max.y)
        };
        let (min_z, max_z) = if axes > 2 {
            if index & 4 == 0 {
                (self.min.z, c.z)
            } else {
                (c.z, self.max.z)
            }
        } else {
            (self.min.z, self.max.z)
        };
        Aabb {
            min: WorldPoint::new(min_x, min_y, min_z),
            max: WorldPoint::new(max_x, max_y, max_z),
        }
    }
}
