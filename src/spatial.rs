use cgmath::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::binary::{BinaryError, BinaryReader, BinaryWriter};

/// 3-D axis-aligned bounding box with inclusive corners.
///
/// `min`/`max` are stored exactly as the raw `f32` corner values that go on
/// disk — no epsilon inflation — so a decoded box compares bit-equal to the
/// box that was encoded.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb3 {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb3 {
    pub const ZERO: Self = Self {
        min: Vector3 {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
        max: Vector3 {
            x: 0.0,
            y: 0.0,
            z: 0.0,
        },
    };

    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    /// Bounding box of a point set. `None` for an empty iterator.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vector3<f32>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    pub fn include(&mut self, p: Vector3<f32>) {
        for axis in 0..3 {
            if p[axis] < self.min[axis] {
                self.min[axis] = p[axis];
            }
            if p[axis] > self.max[axis] {
                self.max[axis] = p[axis];
            }
        }
    }

    pub fn union(self, other: Self) -> Self {
        let mut out = self;
        out.include(other.min);
        out.include(other.max);
        out
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Index of the axis with the largest extent. Ties go to the lower axis.
    pub fn longest_axis(&self) -> usize {
        let e = self.extents();
        let mut best = 0;
        for axis in 1..3 {
            if e[axis] > e[best] {
                best = axis;
            }
        }
        best
    }

    pub fn write(&self, w: &mut BinaryWriter) {
        for axis in 0..3 {
            w.write_f32(self.min[axis]);
        }
        for axis in 0..3 {
            w.write_f32(self.max[axis]);
        }
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, BinaryError> {
        let mut min = Vector3::new(0.0, 0.0, 0.0);
        let mut max = Vector3::new(0.0, 0.0, 0.0);
        for axis in 0..3 {
            min[axis] = r.read_f32()?;
        }
        for axis in 0..3 {
            max[axis] = r.read_f32()?;
        }
        Ok(Self { min, max })
    }
}

/// 2-D axis-aligned bounding box, same conventions as [`Aabb3`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb2 {
    pub min: Vector2<f32>,
    pub max: Vector2<f32>,
}

impl Aabb2 {
    pub const ZERO: Self = Self {
        min: Vector2 { x: 0.0, y: 0.0 },
        max: Vector2 { x: 0.0, y: 0.0 },
    };

    pub fn new(min: Vector2<f32>, max: Vector2<f32>) -> Self {
        Self { min, max }
    }

    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vector2<f32>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self {
            min: first,
            max: first,
        };
        for p in iter {
            bounds.include(p);
        }
        Some(bounds)
    }

    pub fn include(&mut self, p: Vector2<f32>) {
        for axis in 0..2 {
            if p[axis] < self.min[axis] {
                self.min[axis] = p[axis];
            }
            if p[axis] > self.max[axis] {
                self.max[axis] = p[axis];
            }
        }
    }

    pub fn union(self, other: Self) -> Self {
        let mut out = self;
        out.include(other.min);
        out.include(other.max);
        out
    }

    pub fn center(&self) -> Vector2<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn write(&self, w: &mut BinaryWriter) {
        w.write_f32(self.min.x);
        w.write_f32(self.min.y);
        w.write_f32(self.max.x);
        w.write_f32(self.max.y);
    }

    pub fn read(r: &mut BinaryReader<'_>) -> Result<Self, BinaryError> {
        let min_x = r.read_f32()?;
        let min_y = r.read_f32()?;
        let max_x = r.read_f32()?;
        let max_y = r.read_f32()?;
        Ok(Self {
            min: Vector2::new(min_x, min_y),
            max: Vector2::new(max_x, max_y),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb3_from_points_and_union() {
        let a = Aabb3::from_points([
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(-1.0, 5.0, 0.5),
        ])
        .expect("non-empty point set");
        assert_eq!(a.min, Vector3::new(-1.0, 2.0, 0.5));
        assert_eq!(a.max, Vector3::new(1.0, 5.0, 3.0));

        let b = Aabb3::new(Vector3::new(0.0, -4.0, 0.0), Vector3::new(0.0, -2.0, 9.0));
        let u = a.union(b);
        assert_eq!(u.min, Vector3::new(-1.0, -4.0, 0.0));
        assert_eq!(u.max, Vector3::new(1.0, 5.0, 9.0));
    }

    #[test]
    fn aabb3_from_points_empty_is_none() {
        assert!(Aabb3::from_points(std::iter::empty()).is_none());
    }

    #[test]
    fn longest_axis_prefers_lower_axis_on_tie() {
        let cube = Aabb3::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 2.0, 2.0));
        assert_eq!(cube.longest_axis(), 0);

        let tall = Aabb3::new(Vector3::new(0.0, 0.0, 0.0), Vector3::new(1.0, 5.0, 2.0));
        assert_eq!(tall.longest_axis(), 1);
    }

    #[test]
    fn aabb_codec_round_trip() {
        let a3 = Aabb3::new(Vector3::new(-1.5, 0.25, 3.0), Vector3::new(4.0, 8.5, 9.75));
        let a2 = Aabb2::new(Vector2::new(-7.0, 2.5), Vector2::new(0.125, 3.0));

        let mut w = BinaryWriter::new();
        a3.write(&mut w);
        a2.write(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 24 + 16);

        let mut r = BinaryReader::new(&bytes);
        assert_eq!(Aabb3::read(&mut r).unwrap(), a3);
        assert_eq!(Aabb2::read(&mut r).unwrap(), a2);
    }
}
