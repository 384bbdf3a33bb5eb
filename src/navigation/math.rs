use bevy::math::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in world space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Bounds {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Self { center, half_extents }
    }

    pub fn cube(center: Vec3, half_size: f32) -> Self {
        Self::new(center, Vec3::splat(half_size))
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    #[inline]
    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    /// Inclusive containment; points on a face belong to both sides.
    #[inline]
    pub fn contains(&self, point: Vec3) -> bool {
        let d = (point - self.center).abs();
        d.x <= self.half_extents.x && d.y <= self.half_extents.y && d.z <= self.half_extents.z
    }

    /// Strict overlap: boxes that only touch along a face do not intersect.
    #[inline]
    pub fn intersects(&self, other: &Bounds) -> bool {
        let d = (self.center - other.center).abs();
        let r = self.half_extents + other.half_extents;
        d.x < r.x && d.y < r.y && d.z < r.z
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::from_min_max(self.min().min(other.min()), self.max().max(other.max()))
    }

    pub fn volume(&self) -> f32 {
        let size = self.half_extents * 2.0;
        size.x * size.y * size.z
    }

    pub fn expanded(&self, amount: f32) -> Bounds {
        Bounds::new(self.center, self.half_extents + Vec3::splat(amount))
    }

    /// Entry distance of the segment `from -> to` into this box, using the slab
    /// method. Returns the fraction along the segment in `[0, 1]`.
    pub fn segment_entry(&self, from: Vec3, to: Vec3) -> Option<f32> {
        let dir = to - from;
        let min = self.min();
        let max = self.max();
        let mut t_enter = 0.0f32;
        let mut t_exit = 1.0f32;

        for axis in 0..3 {
            let o = from[axis];
            let d = dir[axis];
            if d.abs() < f32::EPSILON {
                if o < min[axis] || o > max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (min[axis] - o) * inv;
            let mut t1 = (max[axis] - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_enter = t_enter.max(t0);
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }
        Some(t_enter)
    }
}

/// Number of axes along which two lattice coordinates are equal.
#[inline]
pub fn shared_axes(a: IVec3, b: IVec3) -> u8 {
    (a.x == b.x) as u8 + (a.y == b.y) as u8 + (a.z == b.z) as u8
}

/// Index of the component with the largest magnitude (x wins ties).
#[inline]
pub fn dominant_axis(v: Vec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

#[inline]
pub fn manhattan(a: Vec3, b: Vec3) -> f32 {
    let d = (a - b).abs();
    d.x + d.y + d.z
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_boxes_do_not_intersect() {
        let a = Bounds::cube(Vec3::ZERO, 50.0);
        let b = Bounds::cube(Vec3::new(100.0, 0.0, 0.0), 50.0);
        assert!(!a.intersects(&b), "shared face is not an overlap");
        assert!(a.intersects(&Bounds::cube(Vec3::new(99.0, 0.0, 0.0), 50.0)));
    }

    #[test]
    fn test_segment_entry() {
        let b = Bounds::cube(Vec3::new(500.0, 0.0, 0.0), 100.0);
        let t = b
            .segment_entry(Vec3::ZERO, Vec3::new(1000.0, 0.0, 0.0))
            .expect("segment crosses the box");
        assert!((t - 0.4).abs() < 1e-5, "entry at x=400, got t={}", t);

        assert!(b.segment_entry(Vec3::new(0.0, 200.0, 0.0), Vec3::new(1000.0, 200.0, 0.0)).is_none());
        assert_eq!(b.segment_entry(Vec3::new(500.0, 0.0, 0.0), Vec3::new(900.0, 0.0, 0.0)), Some(0.0));
    }

    #[test]
    fn test_shared_axes_and_dominant_axis() {
        assert_eq!(shared_axes(IVec3::new(1, 2, 3), IVec3::new(1, 2, 3)), 3);
        assert_eq!(shared_axes(IVec3::new(1, 2, 3), IVec3::new(2, 3, 4)), 0);
        assert_eq!(dominant_axis(Vec3::new(-5.0, 2.0, 1.0)), 0);
        assert_eq!(dominant_axis(Vec3::new(0.0, 0.0, -3.0)), 2);
    }
}
