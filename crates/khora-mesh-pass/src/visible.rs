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

//! Visibility records: small, sortable handles to draw commands.

use crate::draw_command::MeshDrawCommand;
use crate::draw_list::{
    CachedCommandKey, CachedPassStorage, DynamicCommandIndex, DynamicMeshDrawCommandStorage,
    StateBucketId,
};
use crate::scene::PrimitiveId;
use crate::sort_key::MeshDrawCommandSortKey;
use khora_core::renderer::{CullMode, FillMode};

/// Where the draw command of a visible record lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawCommandRef {
    /// In the per-frame arena of the pass.
    Dynamic(DynamicCommandIndex),
    /// In the cached unique list of the pass.
    Cached(CachedCommandKey),
    /// In a state bucket of the pass.
    StateBucket(StateBucketId),
}

/// A visible draw: a command reference plus the data needed to sort and merge
/// it without reading the command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleMeshDrawCommand {
    /// The command to draw.
    pub command: DrawCommandRef,
    /// Pass-specific ordering.
    pub sort_key: MeshDrawCommandSortKey,
    /// Primitive id written to the primitive id buffer for this draw.
    pub draw_primitive_id: u32,
    /// The scene primitive that produced the draw, if any.
    pub scene_primitive_id: Option<PrimitiveId>,
    /// Offset of this record's entry in the primitive id buffer, once built.
    pub primitive_id_buffer_offset: Option<u32>,
    /// The state bucket of the command. Records sharing a bucket always match
    /// for dynamic instancing.
    pub state_bucket_id: Option<StateBucketId>,
    /// Fill mode the command was built with.
    pub fill_mode: FillMode,
    /// Cull mode the command was built with.
    pub cull_mode: CullMode,
}

/// Sorts records by sort key, then by state bucket, keeping insertion order
/// among equal records.
///
/// Grouping by bucket places every sharer of a bucket next to each other,
/// which is what lets submission merge them.
pub fn sort_visible_mesh_draw_commands(visible: &mut [VisibleMeshDrawCommand]) {
    visible.sort_by(|a, b| {
        a.sort_key
            .cmp(&b.sort_key)
            .then_with(|| a.state_bucket_id.cmp(&b.state_bucket_id))
    });
}

/// The storages a pass's visible records can point into.
#[derive(Clone, Copy)]
pub struct MeshDrawCommandSources<'a> {
    dynamic: &'a DynamicMeshDrawCommandStorage,
    cached: Option<&'a CachedPassStorage>,
}

impl<'a> MeshDrawCommandSources<'a> {
    /// Creates a source set. `cached` is `None` for passes that are never cached.
    pub fn new(
        dynamic: &'a DynamicMeshDrawCommandStorage,
        cached: Option<&'a CachedPassStorage>,
    ) -> Self {
        Self { dynamic, cached }
    }

    /// Returns the command behind `command`, if it exists.
    pub fn resolve(&self, command: DrawCommandRef) -> Option<&'a MeshDrawCommand> {
        match command {
            DrawCommandRef::Dynamic(index) => self.dynamic.get(index),
            DrawCommandRef::Cached(key) => self.cached.and_then(|c| c.draw_list().get(key)),
            DrawCommandRef::StateBucket(id) => self.cached.and_then(|c| c.state_buckets().get(id)),
        }
    }
}
