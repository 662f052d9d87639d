//! Working subsets of a mesh.

use std::collections::HashSet;

use super::types::PolygonId;

/// A set of polygons that decimation is allowed to touch.
///
/// Points on the rim of the group (touching at least one polygon outside
/// it) are frozen: they keep their id and position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    polygons: HashSet<PolygonId>,
}

impl Group {
    pub fn from_polygons<I: IntoIterator<Item = PolygonId>>(polygons: I) -> Self {
        Self {
            polygons: polygons.into_iter().collect(),
        }
    }

    pub fn contains(&self, polygon: PolygonId) -> bool {
        self.polygons.contains(&polygon)
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}

impl FromIterator<PolygonId> for Group {
    fn from_iter<I: IntoIterator<Item = PolygonId>>(iter: I) -> Self {
        Self::from_polygons(iter)
    }
}
