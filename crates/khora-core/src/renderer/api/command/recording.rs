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

//! A [`RenderCommandList`] that records calls instead of executing them.
//!
//! Used for headless runs and to assert on the exact command stream produced by
//! the mesh pass pipeline.

use crate::renderer::api::{
    buffer::BufferId,
    pipeline::GraphicsMinimalPipelineState,
    shader::ShaderStage,
    texture::{SamplerId, TextureViewId},
    util::IndexFormat,
};
use crate::renderer::traits::RenderCommandList;
use std::ops::Range;

/// One call made on a [`RecordingCommandList`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `set_pipeline_state`.
    SetPipelineState(GraphicsMinimalPipelineState),
    /// `set_stencil_reference`.
    SetStencilReference(u32),
    /// `set_uniform_buffer`.
    SetUniformBuffer {
        /// Shader stage.
        stage: ShaderStage,
        /// Binding slot.
        slot: u32,
        /// Bound buffer.
        buffer: BufferId,
    },
    /// `set_texture`.
    SetTexture {
        /// Shader stage.
        stage: ShaderStage,
        /// Binding slot.
        slot: u32,
        /// Bound texture view.
        texture: TextureViewId,
    },
    /// `set_sampler`.
    SetSampler {
        /// Shader stage.
        stage: ShaderStage,
        /// Binding slot.
        slot: u32,
        /// Bound sampler.
        sampler: SamplerId,
    },
    /// `set_shader_parameters`.
    SetShaderParameters {
        /// Shader stage.
        stage: ShaderStage,
        /// Raw parameter bytes.
        data: Vec<u8>,
    },
    /// `set_vertex_buffer`.
    SetVertexBuffer {
        /// Stream slot.
        slot: u32,
        /// Bound buffer.
        buffer: BufferId,
        /// Byte offset into the buffer.
        offset: u64,
    },
    /// `set_index_buffer`.
    SetIndexBuffer {
        /// Bound buffer.
        buffer: BufferId,
        /// Byte offset into the buffer.
        offset: u64,
        /// Index width.
        format: IndexFormat,
    },
    /// `draw`.
    Draw {
        /// Vertex range.
        vertices: Range<u32>,
        /// Instance range.
        instances: Range<u32>,
    },
    /// `draw_indexed`.
    DrawIndexed {
        /// Index range.
        indices: Range<u32>,
        /// Value added to each index.
        base_vertex: i32,
        /// Instance range.
        instances: Range<u32>,
    },
    /// `draw_indirect`.
    DrawIndirect {
        /// Argument buffer.
        args: BufferId,
        /// Byte offset of the arguments.
        offset: u64,
    },
    /// `draw_indexed_indirect`.
    DrawIndexedIndirect {
        /// Argument buffer.
        args: BufferId,
        /// Byte offset of the arguments.
        offset: u64,
    },
}

impl RecordedCommand {
    /// Returns `true` if this command issues a draw.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            RecordedCommand::Draw { .. }
                | RecordedCommand::DrawIndexed { .. }
                | RecordedCommand::DrawIndirect { .. }
                | RecordedCommand::DrawIndexedIndirect { .. }
        )
    }

    /// Returns the number of instances drawn, or `None` for non-draw commands
    /// and for indirect draws whose count lives on the GPU.
    pub fn instance_count(&self) -> Option<u32> {
        match self {
            RecordedCommand::Draw { instances, .. }
            | RecordedCommand::DrawIndexed { instances, .. } => {
                Some(instances.end - instances.start)
            }
            _ => None,
        }
    }
}

/// A command list that stores every call it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingCommandList {
    commands: Vec<RecordedCommand>,
}

impl RecordingCommandList {
    /// Creates an empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded commands in call order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Iterates the recorded draw commands only.
    pub fn draws(&self) -> impl Iterator<Item = &RecordedCommand> {
        self.commands.iter().filter(|c| c.is_draw())
    }

    /// Returns the number of draw calls recorded.
    pub fn draw_calls(&self) -> usize {
        self.draws().count()
    }

    /// Returns the number of recorded commands of any kind.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Discards the recording.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

impl RenderCommandList for RecordingCommandList {
    fn set_pipeline_state(&mut self, state: &GraphicsMinimalPipelineState) {
        self.commands.push(RecordedCommand::SetPipelineState(*state));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.commands
            .push(RecordedCommand::SetStencilReference(reference));
    }

    fn set_uniform_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: BufferId) {
        self.commands.push(RecordedCommand::SetUniformBuffer {
            stage,
            slot,
            buffer,
        });
    }

    fn set_texture(&mut self, stage: ShaderStage, slot: u32, texture: TextureViewId) {
        self.commands.push(RecordedCommand::SetTexture {
            stage,
            slot,
            texture,
        });
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: SamplerId) {
        self.commands.push(RecordedCommand::SetSampler {
            stage,
            slot,
            sampler,
        });
    }

    fn set_shader_parameters(&mut self, stage: ShaderStage, data: &[u8]) {
        self.commands.push(RecordedCommand::SetShaderParameters {
            stage,
            data: data.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64) {
        self.commands.push(RecordedCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, index_format: IndexFormat) {
        self.commands.push(RecordedCommand::SetIndexBuffer {
            buffer,
            offset,
            format: index_format,
        });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands
            .push(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.commands.push(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn draw_indirect(&mut self, args: BufferId, offset: u64) {
        self.commands
            .push(RecordedCommand::DrawIndirect { args, offset });
    }

    fn draw_indexed_indirect(&mut self, args: BufferId, offset: u64) {
        self.commands
            .push(RecordedCommand::DrawIndexedIndirect { args, offset });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_counts_only_draws() {
        let mut list = RecordingCommandList::new();
        list.set_stencil_reference(1);
        list.set_vertex_buffer(0, BufferId(4), 0);
        list.draw(0..3, 0..2);
        list.draw_indexed_indirect(BufferId(9), 16);

        assert_eq!(list.len(), 4);
        assert_eq!(list.draw_calls(), 2);
        assert_eq!(list.commands()[2].instance_count(), Some(2));
        assert_eq!(list.commands()[3].instance_count(), None);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut list = RecordingCommandList::new();
        list.draw(0..3, 0..1);
        list.clear();
        assert!(list.is_empty());
    }
}
