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

//! Sort keys of visible mesh draw commands.
//!
//! A [`MeshDrawCommandSortKey`] is a single `u64` so that sorting never touches
//! the command body. It is only ever built from one of the field structs below,
//! each of which packs its fields most-significant-first. The packing is a
//! plain shift-and-or, so comparing two packed keys compares their fields
//! lexicographically in declaration order.

use crate::material::{BlendMode, MeshShader};

/// The packed, pass-specific ordering of a visible command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MeshDrawCommandSortKey(u64);

impl MeshDrawCommandSortKey {
    /// The key of commands whose pass does not order them.
    pub const DEFAULT: Self = Self(0);

    /// The packed value.
    pub const fn packed(self) -> u64 {
        self.0
    }
}

/// Ordering of opaque passes: unmasked geometry first, then grouped by shaders.
///
/// Layout: masked (1 bit) | pixel shader hash (32 bits) | vertex shader hash (16 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasePassSortKey {
    /// The material discards pixels.
    pub masked: bool,
    /// Hash of the pixel shader.
    pub pixel_shader_hash: u32,
    /// Low bits of the vertex shader hash.
    pub vertex_shader_hash: u16,
}

impl From<BasePassSortKey> for MeshDrawCommandSortKey {
    fn from(key: BasePassSortKey) -> Self {
        Self(
            (key.masked as u64) << 48
                | (key.pixel_shader_hash as u64) << 16
                | key.vertex_shader_hash as u64,
        )
    }
}

/// Ordering of translucency passes: by priority, then back to front.
///
/// Layout: priority (16 bits) | inverted distance (32 bits) | mesh id (16 bits).
/// Larger distances sort first; negative distances sort after every positive
/// one. The built-in translucency processor uses the unsigned
/// [`ViewInfo::distance_to`](crate::view::ViewInfo::distance_to), so negative
/// values only come from processors that key on a signed depth.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TranslucentSortKey {
    /// Author-assigned priority. Lower values are drawn first.
    pub priority: i16,
    /// Distance from the view.
    pub distance: f32,
    /// Stable tie-breaker within one primitive.
    pub mesh_id_in_primitive: u16,
}

/// Maps a float onto a `u32` with the same total order.
fn order_preserving_bits(value: f32) -> u32 {
    let bits = value.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

impl From<TranslucentSortKey> for MeshDrawCommandSortKey {
    fn from(key: TranslucentSortKey) -> Self {
        let priority = (key.priority as u16 ^ 0x8000) as u64;
        let distance = !order_preserving_bits(key.distance) as u64;
        Self(priority << 48 | distance << 16 | key.mesh_id_in_primitive as u64)
    }
}

/// Ordering of passes that only group by shader.
///
/// Layout: pixel shader hash (32 bits) | vertex shader hash (32 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenericSortKey {
    /// Hash of the pixel shader.
    pub pixel_shader_hash: u32,
    /// Hash of the vertex shader.
    pub vertex_shader_hash: u32,
}

impl From<GenericSortKey> for MeshDrawCommandSortKey {
    fn from(key: GenericSortKey) -> Self {
        Self((key.pixel_shader_hash as u64) << 32 | key.vertex_shader_hash as u64)
    }
}

/// The sort key of a depth-only or base pass draw.
pub fn calculate_base_pass_sort_key(
    blend_mode: BlendMode,
    vertex_shader: Option<&MeshShader>,
    pixel_shader: Option<&MeshShader>,
) -> MeshDrawCommandSortKey {
    BasePassSortKey {
        masked: blend_mode == BlendMode::Masked,
        pixel_shader_hash: pixel_shader.map_or(0, |s| s.hash),
        vertex_shader_hash: vertex_shader.map_or(0, |s| s.hash as u16),
    }
    .into()
}

/// The sort key of a draw that only groups by shader.
pub fn calculate_generic_sort_key(
    vertex_shader: Option<&MeshShader>,
    pixel_shader: Option<&MeshShader>,
) -> MeshDrawCommandSortKey {
    GenericSortKey {
        pixel_shader_hash: pixel_shader.map_or(0, |s| s.hash),
        vertex_shader_hash: vertex_shader.map_or(0, |s| s.hash),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(masked: bool, ps: u32, vs: u16) -> MeshDrawCommandSortKey {
        BasePassSortKey {
            masked,
            pixel_shader_hash: ps,
            vertex_shader_hash: vs,
        }
        .into()
    }

    fn translucent(priority: i16, distance: f32, id: u16) -> MeshDrawCommandSortKey {
        TranslucentSortKey {
            priority,
            distance,
            mesh_id_in_primitive: id,
        }
        .into()
    }

    #[test]
    fn test_unmasked_sorts_before_masked_regardless_of_hashes() {
        assert!(base(false, u32::MAX, u16::MAX) < base(true, 0, 0));
    }

    #[test]
    fn test_base_pass_groups_by_pixel_then_vertex_shader() {
        assert!(base(false, 1, u16::MAX) < base(false, 2, 0));
        assert!(base(false, 2, 1) < base(false, 2, 3));
    }

    #[test]
    fn test_translucent_priority_dominates() {
        assert!(translucent(-1, 1.0, 0) < translucent(0, 1000.0, 0));
        assert!(translucent(0, 0.0, 0) < translucent(i16::MAX, 1000.0, 0));
    }

    #[test]
    fn test_translucent_sorts_back_to_front() {
        assert!(translucent(0, 100.0, 0) < translucent(0, 10.0, 0));
        assert!(translucent(0, 10.0, 0) < translucent(0, 0.0, 0));
        assert!(translucent(0, 0.5, 0) < translucent(0, -0.5, 0));
        assert!(translucent(0, -0.5, 0) < translucent(0, -20.0, 0));
    }

    #[test]
    fn test_translucent_mesh_id_breaks_ties() {
        assert!(translucent(0, 5.0, 1) < translucent(0, 5.0, 2));
    }

    #[test]
    fn test_generic_key_orders_by_pixel_shader_first() {
        let a: MeshDrawCommandSortKey = GenericSortKey {
            pixel_shader_hash: 1,
            vertex_shader_hash: u32::MAX,
        }
        .into();
        let b: MeshDrawCommandSortKey = GenericSortKey {
            pixel_shader_hash: 2,
            vertex_shader_hash: 0,
        }
        .into();
        assert!(a < b);
    }
}
