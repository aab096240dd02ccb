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

//! Destinations for finished draw commands.
//!
//! A pass processor builds commands without knowing where they go. It hands
//! each one to a [`MeshPassDrawListContext`], which identifies the pipeline
//! state, finalizes the command and stores it:
//!
//! - [`DynamicPassMeshDrawListContext`] appends to a pass's per-frame arena and
//!   visible list, identifying states against the pass's local set;
//! - [`CachedPassMeshDrawListContext`] stores the command in the scene's
//!   per-pass cache, identifying states against the persistent table.

mod cached;
mod dynamic;

pub use self::cached::*;
pub use self::dynamic::*;

use crate::draw_command::MeshDrawCommand;
use crate::error::MeshPassError;
use crate::mesh_batch::MeshBatch;
use crate::scene::PrimitiveId;
use crate::sort_key::MeshDrawCommandSortKey;
use khora_core::renderer::{CullMode, FillMode, GraphicsMinimalPipelineState};

/// How shaders of a command obtain per-primitive data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveIdMode {
    /// Through the primitive id vertex stream. Commands do not depend on the
    /// primitive and may be shared between primitives.
    FromPrimitiveIdStream,
    /// Through a per-primitive uniform buffer bound in the command.
    FromUniformBuffer,
}

/// Everything a context needs besides the command itself.
#[derive(Debug, Clone, Copy)]
pub struct FinalizeCommandInfo<'a> {
    /// The batch the command was built from.
    pub batch: &'a MeshBatch,
    /// Index of the element in `batch`.
    pub element_index: usize,
    /// Primitive id written to the primitive id buffer.
    pub draw_primitive_id: u32,
    /// The scene primitive, if the batch belongs to one.
    pub scene_primitive_id: Option<PrimitiveId>,
    /// How the shaders fetch primitive data.
    pub primitive_id_mode: PrimitiveIdMode,
    /// Fill mode of the command.
    pub fill_mode: FillMode,
    /// Cull mode of the command.
    pub cull_mode: CullMode,
    /// Pass-specific ordering.
    pub sort_key: MeshDrawCommandSortKey,
    /// The complete pipeline state of the command.
    pub pipeline_state: &'a GraphicsMinimalPipelineState,
}

/// The sink of a pass processor.
pub trait MeshPassDrawListContext {
    /// Identifies the pipeline state, finalizes `command` and stores it.
    fn finalize_command(
        &mut self,
        command: MeshDrawCommand,
        info: FinalizeCommandInfo<'_>,
    ) -> Result<(), MeshPassError>;
}
