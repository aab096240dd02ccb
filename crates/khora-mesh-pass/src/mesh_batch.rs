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

//! Mesh batches: the draw descriptions produced by scene primitives.

use crate::draw_command::{VertexInputStream, VertexInputStreamArray};
use crate::material::MaterialRenderProxy;
use khora_core::renderer::{BufferId, IndexBufferBinding, PrimitiveTopology, VertexDeclarationId};
use smallvec::SmallVec;
use std::sync::Arc;

/// GPU-side draw arguments for an indirect draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndirectArgs {
    /// Buffer holding the arguments.
    pub buffer: BufferId,
    /// Byte offset of the arguments.
    pub offset: u32,
}

/// One drawable range of a mesh batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshBatchElement {
    /// The index buffer, or `None` for non-indexed geometry.
    pub index_buffer: Option<IndexBufferBinding>,
    /// First index (or vertex, when non-indexed) of the range.
    pub first_index: u32,
    /// Number of primitives. Zero selects indirect drawing.
    pub num_primitives: u32,
    /// Number of instances.
    pub num_instances: u32,
    /// Value added to every index.
    pub base_vertex_index: u32,
    /// Lowest vertex referenced by the range.
    pub min_vertex_index: u32,
    /// Highest vertex referenced by the range.
    pub max_vertex_index: u32,
    /// Arguments for an indirect draw.
    pub indirect_args: Option<IndirectArgs>,
    /// The primitive's uniform buffer, for factories without a primitive id stream.
    pub primitive_uniform_buffer: Option<BufferId>,
}

impl MeshBatchElement {
    /// Creates an indexed element drawing `num_primitives` primitives once.
    pub fn indexed(
        index_buffer: IndexBufferBinding,
        first_index: u32,
        num_primitives: u32,
        num_vertices: u32,
    ) -> Self {
        Self {
            index_buffer: Some(index_buffer),
            first_index,
            num_primitives,
            num_instances: 1,
            min_vertex_index: 0,
            max_vertex_index: num_vertices.saturating_sub(1),
            ..Default::default()
        }
    }

    /// Number of vertices spanned by the element.
    pub fn num_vertices(&self) -> u32 {
        if self.max_vertex_index < self.min_vertex_index {
            0
        } else {
            self.max_vertex_index - self.min_vertex_index + 1
        }
    }
}

/// The vertex input of a mesh: its declaration and bound streams.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexFactory {
    /// Declaration used with the full streams.
    pub declaration: VertexDeclarationId,
    /// Declaration reading positions only, if the factory supports it.
    pub position_only_declaration: Option<VertexDeclarationId>,
    /// Full vertex streams.
    pub streams: VertexInputStreamArray,
    /// Streams for position-only rendering.
    pub position_only_streams: VertexInputStreamArray,
    /// Stream slot fed with primitive ids, when shaders fetch primitive data by id.
    pub primitive_id_stream_index: Option<u8>,
}

impl VertexFactory {
    /// Creates a factory with the given declaration and streams.
    pub fn new(
        declaration: VertexDeclarationId,
        streams: impl IntoIterator<Item = VertexInputStream>,
    ) -> Self {
        Self {
            declaration,
            streams: streams.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Returns `true` if a position-only declaration is available.
    pub fn supports_position_only_stream(&self) -> bool {
        self.position_only_declaration.is_some()
    }

    /// Returns `true` if shaders fetch primitive data through the primitive id stream.
    pub fn supports_primitive_id_stream(&self) -> bool {
        self.primitive_id_stream_index.is_some()
    }
}

/// A draw description: elements sharing one vertex factory and material.
#[derive(Debug, Clone)]
pub struct MeshBatch {
    /// The drawable ranges.
    pub elements: SmallVec<[MeshBatchElement; 1]>,
    /// The vertex input.
    pub vertex_factory: Arc<VertexFactory>,
    /// The material.
    pub material: Arc<dyn MaterialRenderProxy>,
    /// Topology of the elements.
    pub topology: PrimitiveTopology,
    /// Render as wireframe regardless of the material.
    pub use_wireframe: bool,
    /// Invert the culling winding (mirrored transforms).
    pub reverse_culling: bool,
    /// Render both faces regardless of the material.
    pub disable_backface_culling: bool,
    /// The batch casts shadows.
    pub cast_shadow: bool,
    /// The batch is rendered in depth-only passes.
    pub use_for_depth_pass: bool,
    /// The batch is rendered in material passes.
    pub use_for_material: bool,
    /// Level of detail of the batch.
    pub lod_index: u8,
    /// Identifier of the batch within its primitive, used as a stable sort tie-breaker.
    pub mesh_id_in_primitive: u16,
}

impl MeshBatch {
    /// Creates a batch with one element and default flags.
    pub fn new(
        vertex_factory: Arc<VertexFactory>,
        material: Arc<dyn MaterialRenderProxy>,
        element: MeshBatchElement,
    ) -> Self {
        Self {
            elements: smallvec::smallvec![element],
            vertex_factory,
            material,
            topology: PrimitiveTopology::TriangleList,
            use_wireframe: false,
            reverse_culling: false,
            disable_backface_culling: false,
            cast_shadow: true,
            use_for_depth_pass: true,
            use_for_material: true,
            lod_index: 0,
            mesh_id_in_primitive: 0,
        }
    }

    /// Returns the number of elements.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Returns the mask selecting every element.
    ///
    /// Only the first 64 elements can be addressed by a mask.
    pub fn all_elements_mask(&self) -> u64 {
        match self.elements.len() {
            n if n >= 64 => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }
}
