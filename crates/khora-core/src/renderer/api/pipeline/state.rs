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

//! Fixed-function state handles and the minimal graphics pipeline state.

use super::enums::{CullMode, FillMode, PrimitiveTopology};
use crate::renderer::api::shader::{ShaderModuleId, ShaderStage};
use crate::renderer::api::util::hash::{hash_combine, hash_u64};

/// An opaque handle to a vertex declaration (the vertex input layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VertexDeclarationId(pub usize);

/// An opaque handle to an immutable blend state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlendStateId(pub usize);

impl BlendStateId {
    /// Blending disabled, all color channels written.
    pub const OPAQUE: Self = Self(0);
    /// Blending disabled, no color channel written (depth-only rendering).
    pub const NO_COLOR_WRITES: Self = Self(1);
    /// Premultiplied alpha blending.
    pub const TRANSLUCENT: Self = Self(2);
}

/// An opaque handle to an immutable depth-stencil state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DepthStencilStateId(pub usize);

impl DepthStencilStateId {
    /// Depth test `LessEqual` with depth writes.
    pub const DEPTH_WRITE: Self = Self(0);
    /// Depth test `LessEqual` without depth writes.
    pub const DEPTH_READ: Self = Self(1);
    /// Depth test `Equal` without depth writes, for passes after a depth prepass.
    pub const DEPTH_EQUAL: Self = Self(2);
}

/// The rasterizer part of a pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RasterizerState {
    /// How polygons are filled.
    pub fill_mode: FillMode,
    /// Which winding is culled.
    pub cull_mode: CullMode,
}

impl RasterizerState {
    /// Creates a rasterizer state.
    pub const fn new(fill_mode: FillMode, cull_mode: CullMode) -> Self {
        Self {
            fill_mode,
            cull_mode,
        }
    }
}

/// The vertex declaration and the shader module bound to each stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BoundShaderState {
    /// The vertex input layout.
    pub vertex_declaration: VertexDeclarationId,
    shaders: [Option<ShaderModuleId>; ShaderStage::COUNT],
}

impl BoundShaderState {
    /// Creates a shader state with no stage bound.
    pub const fn new(vertex_declaration: VertexDeclarationId) -> Self {
        Self {
            vertex_declaration,
            shaders: [None; ShaderStage::COUNT],
        }
    }

    /// Builder-style variant of [`BoundShaderState::set_shader`].
    pub fn with_shader(mut self, stage: ShaderStage, module: ShaderModuleId) -> Self {
        self.shaders[stage.index()] = Some(module);
        self
    }

    /// Binds (or clears) the module of one stage.
    pub fn set_shader(&mut self, stage: ShaderStage, module: Option<ShaderModuleId>) {
        self.shaders[stage.index()] = module;
    }

    /// Returns the module bound to `stage`, if any.
    pub fn shader(&self, stage: ShaderStage) -> Option<ShaderModuleId> {
        self.shaders[stage.index()]
    }

    /// Iterates the stages that have a module bound, in ascending frequency order.
    pub fn stages(&self) -> impl Iterator<Item = ShaderStage> + '_ {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| self.shaders[stage.index()].is_some())
    }
}

/// The subset of pipeline state that identifies a graphics pipeline state object.
///
/// Two draws that resolve to equal `GraphicsMinimalPipelineState` values can
/// share one pipeline object on the GPU. Equality and hashing are by value, so
/// this type is directly usable as a map key by the pipeline identity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GraphicsMinimalPipelineState {
    /// Vertex declaration and shaders.
    pub bound_shader_state: BoundShaderState,
    /// Blend state object.
    pub blend_state: BlendStateId,
    /// Rasterizer configuration.
    pub rasterizer_state: RasterizerState,
    /// Depth-stencil state object.
    pub depth_stencil_state: DepthStencilStateId,
    /// Topology of the primitives fed to the pipeline.
    pub primitive_topology: PrimitiveTopology,
}

impl GraphicsMinimalPipelineState {
    /// Computes a stable 32-bit hash suitable for pipeline precaching.
    ///
    /// Unlike the `Hash` impl, the result does not depend on the hasher in use
    /// and is identical on every platform and run.
    pub fn compute_precache_hash(&self) -> u32 {
        let shaders = &self.bound_shader_state;
        let mut hash = hash_u64(shaders.vertex_declaration.0 as u64);
        for stage in ShaderStage::ALL {
            let module = shaders.shader(stage).map_or(u64::MAX, |m| m.0 as u64);
            hash = hash_combine(hash, hash_u64(module));
        }
        hash = hash_combine(hash, hash_u64(self.blend_state.0 as u64));
        hash = hash_combine(hash, self.rasterizer_state.fill_mode as u32);
        hash = hash_combine(hash, self.rasterizer_state.cull_mode as u32);
        hash = hash_combine(hash, hash_u64(self.depth_stencil_state.0 as u64));
        hash_combine(hash, self.primitive_topology as u32)
    }
}
