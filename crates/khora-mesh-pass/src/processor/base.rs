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

use super::{
    build_mesh_draw_commands, compute_mesh_cull_mode, compute_mesh_fill_mode,
    compute_mesh_override_settings, MeshCommandBuildParams, MeshPassFeatures, MeshPassProcessor,
    MeshPassProcessorRenderState, PassProcessorCreateInfo,
};
use crate::draw_list::MeshPassDrawListContext;
use crate::error::MeshPassError;
use crate::material::MeshProcessorShaders;
use crate::mesh_batch::MeshBatch;
use crate::mesh_pass::MeshPass;
use crate::scene::PrimitiveContext;
use crate::sort_key::calculate_base_pass_sort_key;
use khora_core::renderer::{BlendStateId, DepthStencilStateId, ShaderStage};

/// Draws opaque and masked materials with their full shaders.
///
/// Opaque geometry is tested for depth equality against the prepass; masked
/// geometry writes its own depth.
pub struct BasePassMeshProcessor<'a> {
    pass: MeshPass,
    ctx: &'a mut dyn MeshPassDrawListContext,
    opaque_state: MeshPassProcessorRenderState,
    masked_state: MeshPassProcessorRenderState,
    use_gpu_scene: bool,
}

impl<'a> BasePassMeshProcessor<'a> {
    /// Creates a base pass processor for `info.pass`.
    pub fn new(
        info: PassProcessorCreateInfo<'a>,
        ctx: &'a mut dyn MeshPassDrawListContext,
    ) -> Self {
        Self {
            pass: info.pass,
            ctx,
            opaque_state: info.render_state(BlendStateId::OPAQUE, DepthStencilStateId::DEPTH_EQUAL),
            masked_state: info.render_state(BlendStateId::OPAQUE, DepthStencilStateId::DEPTH_WRITE),
            use_gpu_scene: info.settings.use_gpu_scene,
        }
    }
}

/// Registry entry point of [`BasePassMeshProcessor`].
pub fn create_base_pass_processor<'a>(
    info: PassProcessorCreateInfo<'a>,
    ctx: &'a mut dyn MeshPassDrawListContext,
) -> Box<dyn MeshPassProcessor + 'a> {
    Box::new(BasePassMeshProcessor::new(info, ctx))
}

impl MeshPassProcessor for BasePassMeshProcessor<'_> {
    fn add_mesh_batch(
        &mut self,
        batch: &MeshBatch,
        element_mask: u64,
        primitive: Option<&PrimitiveContext>,
    ) -> Result<(), MeshPassError> {
        let material = batch.material.as_ref();
        let blend_mode = material.blend_mode();
        if blend_mode.is_translucent() || !batch.use_for_material {
            return Ok(());
        }

        let mut shaders = MeshProcessorShaders::new();
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            match material.shader(self.pass, stage, false) {
                Some(shader) => shaders.set(shader),
                None => {
                    log::trace!("No {stage} shader for {material:?} in {}", self.pass);
                    return Ok(());
                }
            }
        }

        let override_settings = compute_mesh_override_settings(batch);
        let render_state = if material.is_masked() {
            &self.masked_state
        } else {
            &self.opaque_state
        };

        build_mesh_draw_commands(
            &mut *self.ctx,
            &MeshCommandBuildParams {
                batch,
                element_mask,
                primitive,
                material,
                render_state,
                shaders: &shaders,
                fill_mode: compute_mesh_fill_mode(material, &override_settings),
                cull_mode: compute_mesh_cull_mode(material, &override_settings),
                sort_key: calculate_base_pass_sort_key(
                    blend_mode,
                    shaders.vertex().map(|s| s.as_ref()),
                    shaders.pixel().map(|s| s.as_ref()),
                ),
                features: MeshPassFeatures::DEFAULT,
                use_gpu_scene: self.use_gpu_scene,
                element_data: &(),
            },
        )
    }
}
