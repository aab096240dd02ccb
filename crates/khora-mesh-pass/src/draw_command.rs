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

//! The mesh draw command: everything needed to issue one draw, minus the
//! per-instance primitive id.
//!
//! A command is assembled in three steps. [`MeshDrawCommand::set_shaders`]
//! fills the shader part of the pipeline state and allocates the binding
//! region; the processor then writes bindings, vertex streams and the stencil
//! reference; finally [`MeshDrawCommand::set_draw_parameters_and_finalize`]
//! copies the element's draw range, records the pipeline state id and locks the
//! command. After that the command is never mutated again, which is what makes
//! byte comparison a valid test for dynamic instancing.

use crate::error::MeshPassError;
use crate::material::MeshProcessorShaders;
use crate::mesh_batch::MeshBatch;
use crate::pipeline_state_id::PipelineStateId;
use crate::shader_bindings::MeshDrawShaderBindings;
use khora_core::renderer::{
    hash_combine, BufferId, GraphicsMinimalPipelineState, IndexBufferBinding, VertexDeclarationId,
};
use smallvec::SmallVec;

/// A vertex buffer bound to one stream slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexInputStream {
    /// The stream slot.
    pub stream_index: u8,
    /// Byte offset into the buffer.
    pub offset: u32,
    /// The buffer.
    pub buffer: BufferId,
}

impl VertexInputStream {
    /// Creates a stream binding.
    pub const fn new(stream_index: u8, buffer: BufferId, offset: u32) -> Self {
        Self {
            stream_index,
            offset,
            buffer,
        }
    }
}

/// The vertex streams of one command. Most meshes use at most four.
pub type VertexInputStreamArray = SmallVec<[VertexInputStream; 4]>;

/// The draw range of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrawArguments {
    /// Draw with CPU-known counts.
    Vertices {
        /// Value added to each index.
        base_vertex_index: u32,
        /// Number of vertices spanned.
        num_vertices: u32,
    },
    /// Draw with arguments read from a GPU buffer.
    Indirect {
        /// Buffer holding the arguments.
        buffer: BufferId,
        /// Byte offset of the arguments.
        offset: u32,
    },
}

impl Default for DrawArguments {
    fn default() -> Self {
        DrawArguments::Vertices {
            base_vertex_index: 0,
            num_vertices: 0,
        }
    }
}

/// Everything needed to issue one draw.
#[derive(Debug, Clone, Default)]
pub struct MeshDrawCommand {
    shader_bindings: MeshDrawShaderBindings,
    vertex_streams: VertexInputStreamArray,
    index_buffer: Option<IndexBufferBinding>,
    pipeline_id: PipelineStateId,
    stencil_ref: u8,
    primitive_id_stream_index: Option<u8>,
    first_index: u32,
    num_primitives: u32,
    num_instances: u32,
    draw_args: DrawArguments,
}

impl MeshDrawCommand {
    /// Creates an empty, unfinalized command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the shaders: writes the vertex declaration and shader modules into
    /// `pipeline_state` and allocates the binding region from the shader layouts.
    pub fn set_shaders(
        &mut self,
        vertex_declaration: VertexDeclarationId,
        shaders: &MeshProcessorShaders,
        pipeline_state: &mut GraphicsMinimalPipelineState,
    ) -> Result<(), MeshPassError> {
        if self.is_finalized() {
            return Err(MeshPassError::AlreadyFinalized);
        }
        let bound = &mut pipeline_state.bound_shader_state;
        bound.vertex_declaration = vertex_declaration;
        for stage in khora_core::renderer::ShaderStage::ALL {
            bound.set_shader(stage, shaders.get(stage).map(|s| s.module));
        }
        self.shader_bindings.initialize(&shaders.layouts())?;
        Ok(())
    }

    /// Sets the stencil reference. Values above 255 are rejected.
    pub fn set_stencil_ref(&mut self, stencil_ref: u32) -> Result<(), MeshPassError> {
        if self.is_finalized() {
            return Err(MeshPassError::AlreadyFinalized);
        }
        self.stencil_ref = u8::try_from(stencil_ref)
            .map_err(|_| MeshPassError::StencilRefOutOfRange(stencil_ref))?;
        Ok(())
    }

    /// Replaces the vertex streams.
    pub fn set_vertex_streams(
        &mut self,
        streams: &[VertexInputStream],
    ) -> Result<(), MeshPassError> {
        if self.is_finalized() {
            return Err(MeshPassError::AlreadyFinalized);
        }
        self.vertex_streams = streams.iter().copied().collect();
        Ok(())
    }

    /// Sets the stream slot fed with primitive ids at submission.
    pub fn set_primitive_id_stream_index(
        &mut self,
        index: Option<u8>,
    ) -> Result<(), MeshPassError> {
        if self.is_finalized() {
            return Err(MeshPassError::AlreadyFinalized);
        }
        self.primitive_id_stream_index = index;
        Ok(())
    }

    /// Mutable access to the binding region, for writing stage bindings.
    ///
    /// The region refuses writes once the command is finalized.
    pub fn shader_bindings_mut(&mut self) -> &mut MeshDrawShaderBindings {
        &mut self.shader_bindings
    }

    /// Copies the draw range of `batch.elements[element_index]`, records
    /// `pipeline_id` and finalizes the command.
    ///
    /// Elements without primitives but with indirect arguments become indirect
    /// draws. Finalizing twice is an error.
    pub fn set_draw_parameters_and_finalize(
        &mut self,
        batch: &MeshBatch,
        element_index: usize,
        pipeline_id: PipelineStateId,
    ) -> Result<(), MeshPassError> {
        if self.is_finalized() {
            return Err(MeshPassError::AlreadyFinalized);
        }
        let element = batch
            .elements
            .get(element_index)
            .ok_or(MeshPassError::ElementOutOfRange {
                index: element_index,
                count: batch.elements.len(),
            })?;

        self.index_buffer = element.index_buffer;
        self.first_index = element.first_index;
        self.num_primitives = element.num_primitives;
        self.num_instances = element.num_instances;
        self.draw_args = match (element.num_primitives, element.indirect_args) {
            (0, Some(args)) => DrawArguments::Indirect {
                buffer: args.buffer,
                offset: args.offset,
            },
            _ => DrawArguments::Vertices {
                base_vertex_index: element.base_vertex_index,
                num_vertices: element.num_vertices(),
            },
        };
        self.pipeline_id = pipeline_id;
        self.shader_bindings.finalize()?;
        Ok(())
    }

    /// Returns a finalized copy of this command identified by `pipeline_id`.
    ///
    /// Used when a view override changes the pipeline state of an existing
    /// command; the original stays untouched.
    pub fn with_pipeline_id(&self, pipeline_id: PipelineStateId) -> Self {
        let mut copy = self.clone();
        copy.pipeline_id = pipeline_id;
        copy
    }

    /// Returns `true` once the command is finalized.
    pub fn is_finalized(&self) -> bool {
        self.shader_bindings.is_finalized()
    }

    /// Returns `true` if both commands can be merged into one instanced draw:
    /// they are identical in everything but the primitive id.
    pub fn matches_for_dynamic_instancing(&self, other: &Self) -> bool {
        self.pipeline_id == other.pipeline_id
            && self.stencil_ref == other.stencil_ref
            && self.primitive_id_stream_index == other.primitive_id_stream_index
            && self.index_buffer == other.index_buffer
            && self.first_index == other.first_index
            && self.num_primitives == other.num_primitives
            && self.num_instances == other.num_instances
            && self.draw_args == other.draw_args
            && self.vertex_streams == other.vertex_streams
            && self
                .shader_bindings
                .matches_for_dynamic_instancing(&other.shader_bindings)
    }

    /// Returns a stable hash of everything compared by
    /// [`MeshDrawCommand::matches_for_dynamic_instancing`].
    pub fn dynamic_instancing_hash(&self) -> u32 {
        let mut hash = hash_combine(self.pipeline_id.raw(), u32::from(self.stencil_ref));
        hash = hash_combine(hash, self.shader_bindings.dynamic_instancing_hash());
        for stream in &self.vertex_streams {
            hash = hash_combine(hash, u32::from(stream.stream_index));
            hash = hash_combine(hash, stream.offset);
            hash = hash_combine(hash, stream.buffer.0 as u32);
        }
        hash = hash_combine(hash, self.primitive_id_stream_index.map_or(u32::MAX, u32::from));
        if let Some(index_buffer) = self.index_buffer {
            hash = hash_combine(hash, index_buffer.buffer.0 as u32);
            hash = hash_combine(hash, index_buffer.format.size());
        }
        hash = hash_combine(hash, self.first_index);
        hash = hash_combine(hash, self.num_primitives);
        hash = hash_combine(hash, self.num_instances);
        match self.draw_args {
            DrawArguments::Vertices {
                base_vertex_index,
                num_vertices,
            } => {
                hash = hash_combine(hash, base_vertex_index);
                hash_combine(hash, num_vertices)
            }
            DrawArguments::Indirect { buffer, offset } => {
                hash = hash_combine(hash, buffer.0 as u32);
                hash_combine(hash, offset)
            }
        }
    }

    /// Returns the heap memory owned by the command in bytes.
    pub fn allocated_size(&self) -> usize {
        let streams = if self.vertex_streams.spilled() {
            self.vertex_streams.capacity() * std::mem::size_of::<VertexInputStream>()
        } else {
            0
        };
        self.shader_bindings.allocated_size() + streams
    }

    /// The binding region.
    pub fn shader_bindings(&self) -> &MeshDrawShaderBindings {
        &self.shader_bindings
    }

    /// The vertex streams.
    pub fn vertex_streams(&self) -> &[VertexInputStream] {
        &self.vertex_streams
    }

    /// The index buffer, if the command is indexed.
    pub fn index_buffer(&self) -> Option<IndexBufferBinding> {
        self.index_buffer
    }

    /// The pipeline state id recorded at finalization.
    pub fn pipeline_id(&self) -> PipelineStateId {
        self.pipeline_id
    }

    /// The stencil reference.
    pub fn stencil_ref(&self) -> u8 {
        self.stencil_ref
    }

    /// The stream slot fed with primitive ids.
    pub fn primitive_id_stream_index(&self) -> Option<u8> {
        self.primitive_id_stream_index
    }

    /// First index of the draw range.
    pub fn first_index(&self) -> u32 {
        self.first_index
    }

    /// Number of primitives drawn.
    pub fn num_primitives(&self) -> u32 {
        self.num_primitives
    }

    /// Number of instances drawn per visible record.
    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }

    /// The draw arguments.
    pub fn draw_args(&self) -> DrawArguments {
        self.draw_args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::{BlendMode, MaterialRenderProxy, MeshShader};
    use crate::mesh_batch::{IndirectArgs, MeshBatchElement, VertexFactory};
    use crate::mesh_pass::MeshPass;
    use crate::shader_bindings::ShaderBindingsLayout;
    use khora_core::renderer::{IndexFormat, ShaderModuleId, ShaderStage};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FlatMaterial;

    impl MaterialRenderProxy for FlatMaterial {
        fn blend_mode(&self) -> BlendMode {
            BlendMode::Opaque
        }

        fn shader(&self, _: MeshPass, _: ShaderStage, _: bool) -> Option<Arc<MeshShader>> {
            None
        }
    }

    fn shaders() -> MeshProcessorShaders {
        let mut shaders = MeshProcessorShaders::new();
        shaders.set(Arc::new(MeshShader::new(
            ShaderModuleId(1),
            ShaderStage::Vertex,
            ShaderBindingsLayout::new(1, 0, 0, 0),
            11,
        )));
        shaders
    }

    fn batch(element: MeshBatchElement) -> MeshBatch {
        MeshBatch::new(
            Arc::new(VertexFactory::default()),
            Arc::new(FlatMaterial),
            element,
        )
    }

    fn build(buffer: usize, element: MeshBatchElement) -> MeshDrawCommand {
        let mut command = MeshDrawCommand::new();
        let mut state = GraphicsMinimalPipelineState::default();
        command
            .set_shaders(VertexDeclarationId(4), &shaders(), &mut state)
            .unwrap();
        command
            .shader_bindings_mut()
            .stage_bindings(ShaderStage::Vertex)
            .unwrap()
            .add_uniform_buffer(0, BufferId(buffer))
            .unwrap();
        command
            .set_draw_parameters_and_finalize(&batch(element), 0, PipelineStateId::local(0))
            .unwrap();
        command
    }

    fn element() -> MeshBatchElement {
        let index_buffer = IndexBufferBinding::new(BufferId(9), IndexFormat::Uint16);
        MeshBatchElement::indexed(index_buffer, 0, 12, 24)
    }

    #[test]
    fn test_set_shaders_fills_pipeline_state() {
        let mut command = MeshDrawCommand::new();
        let mut state = GraphicsMinimalPipelineState::default();
        command
            .set_shaders(VertexDeclarationId(4), &shaders(), &mut state)
            .unwrap();
        assert_eq!(state.bound_shader_state.vertex_declaration, VertexDeclarationId(4));
        assert_eq!(
            state.bound_shader_state.shader(ShaderStage::Vertex),
            Some(ShaderModuleId(1))
        );
        assert_eq!(command.shader_bindings().data_size(), 8);
    }

    #[test]
    fn test_finalize_twice_fails() {
        let mut command = build(1, element());
        assert!(command.is_finalized());
        let id = PipelineStateId::local(0);
        let err = command.set_draw_parameters_and_finalize(&batch(element()), 0, id);
        assert_eq!(err, Err(MeshPassError::AlreadyFinalized));
        assert_eq!(command.set_stencil_ref(1), Err(MeshPassError::AlreadyFinalized));
    }

    #[test]
    fn test_stencil_ref_must_fit_u8() {
        let mut command = MeshDrawCommand::new();
        assert_eq!(
            command.set_stencil_ref(256),
            Err(MeshPassError::StencilRefOutOfRange(256))
        );
        assert!(command.set_stencil_ref(255).is_ok());
    }

    #[test]
    fn test_draw_arguments_selection() {
        let vertices = build(1, element());
        assert_eq!(
            vertices.draw_args(),
            DrawArguments::Vertices {
                base_vertex_index: 0,
                num_vertices: 24
            }
        );

        let indirect = build(
            1,
            MeshBatchElement {
                num_primitives: 0,
                indirect_args: Some(IndirectArgs {
                    buffer: BufferId(77),
                    offset: 16,
                }),
                ..element()
            },
        );
        assert_eq!(
            indirect.draw_args(),
            DrawArguments::Indirect {
                buffer: BufferId(77),
                offset: 16
            }
        );
    }

    #[test]
    fn test_matching_commands_share_hash() {
        let a = build(5, element());
        let b = build(5, element());
        let c = build(6, element());
        assert!(a.matches_for_dynamic_instancing(&b));
        assert_eq!(a.dynamic_instancing_hash(), b.dynamic_instancing_hash());
        assert!(!a.matches_for_dynamic_instancing(&c));
    }

    #[test]
    fn test_pipeline_id_participates_in_matching() {
        let a = build(5, element());
        let b = a.with_pipeline_id(PipelineStateId::local(1));
        assert!(b.is_finalized());
        assert!(!a.matches_for_dynamic_instancing(&b));
    }

    #[test]
    fn test_element_out_of_range() {
        let mut command = MeshDrawCommand::new();
        let id = PipelineStateId::local(0);
        let err = command.set_draw_parameters_and_finalize(&batch(element()), 3, id);
        assert_eq!(err, Err(MeshPassError::ElementOutOfRange { index: 3, count: 1 }));
    }
}
