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

//! The material and shader contract consumed by mesh pass processors.
//!
//! Materials are compiled elsewhere. From the point of view of the mesh pass
//! pipeline a material is an opaque provider: given a pass and a stage it
//! returns a compiled [`MeshShader`] (or `None` when it has no code for that
//! combination), and given a shader it writes its bound parameters.

use crate::error::ShaderBindingError;
use crate::mesh_pass::MeshPass;
use crate::shader_bindings::{ShaderBindingsLayout, SingleShaderBindings};
use khora_core::renderer::{ShaderModuleId, ShaderStage};
use std::fmt;
use std::sync::Arc;

/// How a material's output is combined with the render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// Fully opaque.
    #[default]
    Opaque,
    /// Opaque with per-pixel discard.
    Masked,
    /// Alpha blended.
    Translucent,
    /// Added to the target.
    Additive,
    /// Multiplied with the target.
    Modulate,
}

impl BlendMode {
    /// Returns `true` for modes drawn in the translucency passes.
    pub const fn is_translucent(self) -> bool {
        matches!(
            self,
            BlendMode::Translucent | BlendMode::Additive | BlendMode::Modulate
        )
    }
}

/// A compiled shader of one stage together with its parameter layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MeshShader {
    /// The compiled module.
    pub module: ShaderModuleId,
    /// The stage the module runs in.
    pub stage: ShaderStage,
    /// The parameter layout of the module.
    pub layout: ShaderBindingsLayout,
    /// A stable hash of the shader code, used by sort keys.
    pub hash: u32,
    /// Uniform buffer slot receiving the view parameters, if the shader reads them.
    pub view_uniform_buffer_slot: Option<u32>,
    /// Uniform buffer slot receiving the pass parameters, if the shader reads them.
    pub pass_uniform_buffer_slot: Option<u32>,
    /// Uniform buffer slot receiving the primitive parameters.
    ///
    /// Only bound when the vertex factory cannot fetch primitive data through
    /// the primitive id stream.
    pub primitive_uniform_buffer_slot: Option<u32>,
}

impl MeshShader {
    /// Creates a shader with no pass-level uniform buffer slots.
    pub fn new(
        module: ShaderModuleId,
        stage: ShaderStage,
        layout: ShaderBindingsLayout,
        hash: u32,
    ) -> Self {
        Self {
            module,
            stage,
            layout,
            hash,
            view_uniform_buffer_slot: None,
            pass_uniform_buffer_slot: None,
            primitive_uniform_buffer_slot: None,
        }
    }
}

/// The shaders used by one pass to draw one mesh batch, per stage.
#[derive(Debug, Clone, Default)]
pub struct MeshProcessorShaders {
    shaders: [Option<Arc<MeshShader>>; ShaderStage::COUNT],
}

impl MeshProcessorShaders {
    /// Creates an empty shader set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `shader` in the slot of its own stage.
    pub fn set(&mut self, shader: Arc<MeshShader>) {
        let index = shader.stage.index();
        self.shaders[index] = Some(shader);
    }

    /// Returns the shader of `stage`.
    pub fn get(&self, stage: ShaderStage) -> Option<&Arc<MeshShader>> {
        self.shaders[stage.index()].as_ref()
    }

    /// The vertex shader.
    pub fn vertex(&self) -> Option<&Arc<MeshShader>> {
        self.get(ShaderStage::Vertex)
    }

    /// The fragment (pixel) shader.
    pub fn pixel(&self) -> Option<&Arc<MeshShader>> {
        self.get(ShaderStage::Fragment)
    }

    /// Iterates the present shaders in ascending stage order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MeshShader>> {
        self.shaders.iter().flatten()
    }

    /// Returns `(stage, layout)` of every present shader.
    pub fn layouts(&self) -> Vec<(ShaderStage, ShaderBindingsLayout)> {
        self.iter().map(|s| (s.stage, s.layout)).collect()
    }
}

/// A material as seen by the mesh pass pipeline.
pub trait MaterialRenderProxy: Send + Sync + fmt::Debug {
    /// The blend mode of the material.
    fn blend_mode(&self) -> BlendMode;

    /// Back faces are rendered too.
    fn is_two_sided(&self) -> bool {
        false
    }

    /// The material always renders as wireframe.
    fn is_wireframe(&self) -> bool {
        false
    }

    /// The material discards pixels.
    fn is_masked(&self) -> bool {
        self.blend_mode() == BlendMode::Masked
    }

    /// Every rasterized pixel is written (no discard, no blending).
    fn writes_every_pixel(&self) -> bool {
        !self.is_masked() && !self.blend_mode().is_translucent()
    }

    /// The material offsets vertex positions, so position-only shaders would be wrong.
    fn modifies_mesh_position(&self) -> bool {
        false
    }

    /// Returns the shader used for `stage` in `pass`, or `None` if the material
    /// has no code for it.
    ///
    /// `position_only` requests the variant reading only the position stream.
    fn shader(
        &self,
        pass: MeshPass,
        stage: ShaderStage,
        position_only: bool,
    ) -> Option<Arc<MeshShader>>;

    /// Writes the material's parameters for `shader` into `bindings`.
    fn get_shader_bindings(
        &self,
        shader: &MeshShader,
        bindings: &mut SingleShaderBindings<'_>,
    ) -> Result<(), ShaderBindingError> {
        let _ = (shader, bindings);
        Ok(())
    }
}
