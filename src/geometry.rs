//! Spatial primitives shared by placement, rooms and the host collaborators.

use glam::{DVec3, IVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in world units. `min` is inclusive, `max` exclusive on containment checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub min: Vec3,
    pub max: Vec3,
}

impl Region {
    /// Builds a region from two opposite corners in any order.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Region covering the block cells `min..=max`.
    pub fn from_blocks(min: IVec3, max: IVec3) -> Self {
        let lo = min.min(max);
        let hi = min.max(max);
        Self {
            min: lo.as_vec3(),
            max: (hi + IVec3::ONE).as_vec3(),
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmplt(self.max).all()
    }

    pub fn shifted(&self, by: IVec3) -> Self {
        let by = by.as_vec3();
        Self {
            min: self.min + by,
            max: self.max + by,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// A position inside a named world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldPos {
    pub world: String,
    pub pos: DVec3,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl WorldPos {
    pub fn new(world: impl Into<String>, pos: DVec3) -> Self {
        Self {
            world: world.into(),
            pos,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn at_block(world: impl Into<String>, block: IVec3) -> Self {
        Self::new(world, block.as_dvec3())
    }

    pub fn offset(&self, by: Vec3) -> Self {
        Self {
            pos: self.pos + by.as_dvec3(),
            ..self.clone()
        }
    }

    pub fn block(&self) -> IVec3 {
        self.pos.floor().as_ivec3()
    }

    /// Distance to `other`, or `None` when the two live in different worlds.
    pub fn distance(&self, other: &WorldPos) -> Option<f64> {
        (self.world == other.world).then(|| self.pos.distance(other.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_region_is_inclusive_of_last_cell() {
        let region = Region::from_blocks(IVec3::new(2, 0, 2), IVec3::ZERO);
        assert!(region.contains(Vec3::new(2.5, 0.5, 2.5)));
        assert!(!region.contains(Vec3::new(3.0, 0.5, 0.5)));
        assert_eq!(region.size(), Vec3::new(3.0, 1.0, 3.0));
    }

    #[test]
    fn distance_is_none_across_worlds() {
        let a = WorldPos::at_block("instancing", IVec3::ZERO);
        let b = WorldPos::at_block("world", IVec3::ZERO);
        assert_eq!(a.distance(&b), None);
        let c = WorldPos::at_block("instancing", IVec3::new(3, 0, 4));
        assert_eq!(a.distance(&c), Some(5.0));
    }
}
