//! Core types for the junction simulation
//!
//! Identifiers are owned by the host network; this crate only indexes
//! fixed-size tables with them.

use log::warn;
use std::fmt;

/// Maximum number of segment ends that can meet at one node
pub const MAX_NODE_SEGMENTS: usize = 8;

/// Maximum number of other segments visible from one segment end
pub const MAX_CONNECTED_SEGMENTS: usize = MAX_NODE_SEGMENTS - 1;

/// Node, segment and vehicle ids are 16 bits wide
pub const MAX_TABLE_SLOTS: usize = u16::MAX as usize + 1;

/// Clamp a requested table size to what 16-bit ids can address
pub fn table_capacity(requested: usize, table: &str) -> usize {
    if requested > MAX_TABLE_SLOTS {
        warn!(
            "{} table capacity {} exceeds the id range; using {}",
            table, requested, MAX_TABLE_SLOTS
        );
        MAX_TABLE_SLOTS
    } else {
        requested
    }
}

macro_rules! entity_id {
    ($(#[$attr:meta])* $name:ident($inner:ty)) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $inner);

        impl $name {
            /// Cast to `usize` for direct table indexing
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

entity_id! {
    /// A road segment connecting two nodes
    SegmentId(u16)
}

entity_id! {
    /// A junction (or plain road joint) between segments
    NodeId(u16)
}

entity_id! {
    /// A single lane of a segment
    LaneId(u32)
}

entity_id! {
    /// A vehicle instance driven by the host
    VehicleId(u16)
}

/// A 3D vector in world space (x east, y up, z north)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vector3) -> f32 {
        (*other - *self).length()
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn lerp(&self, other: &Vector3, t: f32) -> Vector3 {
        Vector3 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }

    /// Project onto the ground plane and normalize.
    /// Returns `None` for a vector with no horizontal extent.
    pub fn flat_normalized(&self) -> Option<Vector3> {
        let len = (self.x * self.x + self.z * self.z).sqrt();
        if len > f32::EPSILON {
            Some(Vector3::new(self.x / len, 0.0, self.z / len))
        } else {
            None
        }
    }

    pub fn dot(&self, other: &Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Vertical component of `self × other`
    pub fn cross_y(&self, other: &Vector3) -> f32 {
        self.z * other.x - self.x * other.z
    }
}

impl std::ops::Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// A set of at most `MAX_CONNECTED_SEGMENTS` segment ids stored inline.
///
/// Insertion order is preserved and duplicates are ignored. Pushing past
/// capacity is rejected, so the fixed bound is part of the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentSet {
    ids: [SegmentId; MAX_CONNECTED_SEGMENTS],
    len: u8,
}

impl SegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a segment id. Returns false if the set is full.
    pub fn insert(&mut self, id: SegmentId) -> bool {
        if self.contains(id) {
            return true;
        }
        if self.len() == MAX_CONNECTED_SEGMENTS {
            return false;
        }
        self.ids[self.len()] = id;
        self.len += 1;
        true
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.as_slice().contains(&id)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[SegmentId] {
        &self.ids[..self.len()]
    }

    pub fn iter(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.as_slice().iter().copied()
    }

    pub fn is_disjoint(&self, other: &SegmentSet) -> bool {
        !self.iter().any(|id| other.contains(id))
    }

    pub fn union(&self, other: &SegmentSet) -> Vec<SegmentId> {
        let mut ids: Vec<SegmentId> = self.iter().collect();
        ids.extend(other.iter().filter(|id| !self.contains(*id)));
        ids
    }
}
