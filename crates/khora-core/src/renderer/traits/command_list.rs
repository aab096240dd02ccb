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

use crate::renderer::api::{
    buffer::BufferId,
    pipeline::GraphicsMinimalPipelineState,
    shader::ShaderStage,
    texture::{SamplerId, TextureViewId},
    util::IndexFormat,
};
use std::ops::Range;

/// A low-level graphics command stream.
///
/// This is the only surface through which the mesh pass pipeline talks to a
/// graphics backend. Calls are recorded in the order they are made, and that
/// order must be preserved by the backend: draws depend on the state set before
/// them.
///
/// Nothing is returned from any call. Validation and error reporting are the
/// backend's concern.
pub trait RenderCommandList {
    /// Binds the pipeline state object described by `state`.
    fn set_pipeline_state(&mut self, state: &GraphicsMinimalPipelineState);

    /// Sets the stencil reference value used by the depth-stencil state.
    fn set_stencil_reference(&mut self, reference: u32);

    /// Binds a uniform buffer to a slot of one shader stage.
    fn set_uniform_buffer(&mut self, stage: ShaderStage, slot: u32, buffer: BufferId);

    /// Binds a texture view to a slot of one shader stage.
    fn set_texture(&mut self, stage: ShaderStage, slot: u32, texture: TextureViewId);

    /// Binds a sampler to a slot of one shader stage.
    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, sampler: SamplerId);

    /// Uploads the loose (non-resource) parameter bytes of one shader stage.
    fn set_shader_parameters(&mut self, stage: ShaderStage, data: &[u8]);

    /// Binds a vertex buffer to a stream slot.
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferId, offset: u64);

    /// Binds an index buffer for indexed drawing.
    fn set_index_buffer(&mut self, buffer: BufferId, offset: u64, index_format: IndexFormat);

    /// Records a non-indexed draw call.
    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    /// Records an indexed draw call.
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    /// Records a non-indexed draw whose arguments are read from `args` on the GPU.
    fn draw_indirect(&mut self, args: BufferId, offset: u64);

    /// Records an indexed draw whose arguments are read from `args` on the GPU.
    fn draw_indexed_indirect(&mut self, args: BufferId, offset: u64);
}
