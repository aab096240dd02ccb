// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Enums for pipeline configuration.

/// Defines how vertices are connected to form a geometric primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PrimitiveTopology {
    /// Vertices are rendered as a list of isolated points.
    PointList,
    /// Vertices are rendered as a list of isolated lines (every two vertices form a line).
    LineList,
    /// Vertices are rendered as a connected line strip.
    LineStrip,
    /// Vertices are rendered as a list of isolated triangles (every three vertices form a
    /// triangle).
    #[default]
    TriangleList,
    /// Vertices are rendered as a connected triangle strip.
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Returns how many vertices (or indices) are consumed to draw `num_primitives`.
    ///
    /// Strips share vertices between neighbouring primitives, so an empty strip
    /// consumes nothing rather than the strip's start-up vertices.
    pub const fn index_count(self, num_primitives: u32) -> u32 {
        match self.checked_index_count(num_primitives) {
            Some(count) => count,
            None => u32::MAX,
        }
    }

    /// Like [`index_count`](Self::index_count), but `None` when the count
    /// does not fit in 32 bits.
    pub const fn checked_index_count(self, num_primitives: u32) -> Option<u32> {
        if num_primitives == 0 {
            return Some(0);
        }
        match self {
            PrimitiveTopology::PointList => Some(num_primitives),
            PrimitiveTopology::LineList => num_primitives.checked_mul(2),
            PrimitiveTopology::LineStrip => num_primitives.checked_add(1),
            PrimitiveTopology::TriangleList => num_primitives.checked_mul(3),
            PrimitiveTopology::TriangleStrip => num_primitives.checked_add(2),
        }
    }
}

/// Defines how polygons are rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum FillMode {
    /// Polygons are filled. This is the normal rendering mode.
    #[default]
    Solid,
    /// Polygons are rendered as outlines.
    Wireframe,
    /// Polygon vertices are rendered as points.
    Point,
}

/// Defines which winding order is culled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CullMode {
    /// No culling is performed.
    #[default]
    None,
    /// Clockwise-wound triangles are culled.
    Cw,
    /// Counter-clockwise-wound triangles are culled.
    Ccw,
}

impl CullMode {
    /// Returns the mode that culls the opposite winding.
    ///
    /// `None` stays `None`.
    pub const fn inverted(self) -> Self {
        match self {
            CullMode::None => CullMode::None,
            CullMode::Cw => CullMode::Ccw,
            CullMode::Ccw => CullMode::Cw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverted_cull_mode() {
        assert_eq!(CullMode::None.inverted(), CullMode::None);
        assert_eq!(CullMode::Cw.inverted(), CullMode::Ccw);
        assert_eq!(CullMode::Ccw.inverted(), CullMode::Cw);
    }

    #[test]
    fn test_index_count_per_topology() {
        assert_eq!(PrimitiveTopology::TriangleList.index_count(4), 12);
        assert_eq!(PrimitiveTopology::TriangleStrip.index_count(4), 6);
        assert_eq!(PrimitiveTopology::LineList.index_count(3), 6);
        assert_eq!(PrimitiveTopology::LineStrip.index_count(3), 4);
        assert_eq!(PrimitiveTopology::PointList.index_count(7), 7);
        assert_eq!(PrimitiveTopology::TriangleStrip.index_count(0), 0);
    }

    #[test]
    fn test_index_count_overflow() {
        assert_eq!(PrimitiveTopology::TriangleList.checked_index_count(u32::MAX / 2), None);
        assert_eq!(PrimitiveTopology::LineStrip.checked_index_count(u32::MAX), None);
        assert_eq!(PrimitiveTopology::PointList.checked_index_count(u32::MAX), Some(u32::MAX));
        assert_eq!(PrimitiveTopology::TriangleList.index_count(u32::MAX), u32::MAX);
    }
}
