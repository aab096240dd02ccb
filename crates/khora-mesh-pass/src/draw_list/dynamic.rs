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

use super::{FinalizeCommandInfo, MeshPassDrawListContext};
use crate::draw_command::MeshDrawCommand;
use crate::error::MeshPassError;
use crate::pipeline_state_id::{
    get_pipeline_state_id, LocalPipelineStateSet, PersistentPipelineStateTable,
};
use crate::visible::{DrawCommandRef, VisibleMeshDrawCommand};

/// Index of a command in a [`DynamicMeshDrawCommandStorage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DynamicCommandIndex(u32);

impl DynamicCommandIndex {
    /// Wraps a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// The per-frame command arena of one pass.
///
/// Commands are stored in fixed-capacity chunks. A chunk never grows past the
/// capacity it was created with, so commands never move once pushed. Clearing
/// keeps the chunks for the next frame.
#[derive(Debug)]
pub struct DynamicMeshDrawCommandStorage {
    chunks: Vec<Vec<MeshDrawCommand>>,
    chunk_size: usize,
    len: usize,
}

impl DynamicMeshDrawCommandStorage {
    /// Creates an empty arena of `chunk_size` commands per chunk.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: chunk_size.max(1),
            len: 0,
        }
    }

    /// Appends a command and returns its index.
    pub fn push(&mut self, command: MeshDrawCommand) -> DynamicCommandIndex {
        let chunk_index = self.len / self.chunk_size;
        if chunk_index == self.chunks.len() {
            self.chunks.push(Vec::with_capacity(self.chunk_size));
        }
        let chunk = &mut self.chunks[chunk_index];
        debug_assert!(chunk.len() < self.chunk_size);
        chunk.push(command);

        let index = DynamicCommandIndex(self.len as u32);
        self.len += 1;
        index
    }

    /// Returns the command at `index`.
    pub fn get(&self, index: DynamicCommandIndex) -> Option<&MeshDrawCommand> {
        let index = index.0 as usize;
        if index >= self.len {
            return None;
        }
        self.chunks
            .get(index / self.chunk_size)
            .and_then(|chunk| chunk.get(index % self.chunk_size))
    }

    /// Number of stored commands.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no command is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every command. Chunks are kept.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.len = 0;
    }

    /// Heap memory held by the arena and its commands, in bytes.
    pub fn allocated_size(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| {
                chunk.capacity() * std::mem::size_of::<MeshDrawCommand>()
                    + chunk.iter().map(MeshDrawCommand::allocated_size).sum::<usize>()
            })
            .sum()
    }
}

impl Default for DynamicMeshDrawCommandStorage {
    fn default() -> Self {
        Self::new(crate::settings::MeshPassSettings::default().dynamic_storage_chunk_size)
    }
}

/// Stores commands built during the frame into a pass's arena and appends a
/// visible record for each.
pub struct DynamicPassMeshDrawListContext<'a> {
    storage: &'a mut DynamicMeshDrawCommandStorage,
    visible: &'a mut Vec<VisibleMeshDrawCommand>,
    local: &'a mut LocalPipelineStateSet,
    persistent: &'a PersistentPipelineStateTable,
}

impl<'a> DynamicPassMeshDrawListContext<'a> {
    /// Creates a context writing into the given pass state.
    pub fn new(
        storage: &'a mut DynamicMeshDrawCommandStorage,
        visible: &'a mut Vec<VisibleMeshDrawCommand>,
        local: &'a mut LocalPipelineStateSet,
        persistent: &'a PersistentPipelineStateTable,
    ) -> Self {
        Self {
            storage,
            visible,
            local,
            persistent,
        }
    }
}

impl MeshPassDrawListContext for DynamicPassMeshDrawListContext<'_> {
    fn finalize_command(
        &mut self,
        mut command: MeshDrawCommand,
        info: FinalizeCommandInfo<'_>,
    ) -> Result<(), MeshPassError> {
        let pipeline_id = get_pipeline_state_id(info.pipeline_state, self.persistent, self.local)?;
        command.set_draw_parameters_and_finalize(info.batch, info.element_index, pipeline_id)?;

        let index = self.storage.push(command);
        self.visible.push(VisibleMeshDrawCommand {
            command: DrawCommandRef::Dynamic(index),
            sort_key: info.sort_key,
            draw_primitive_id: info.draw_primitive_id,
            scene_primitive_id: info.scene_primitive_id,
            primitive_id_buffer_offset: None,
            state_bucket_id: None,
            fill_mode: info.fill_mode,
            cull_mode: info.cull_mode,
        });
        Ok(())
    }
}
