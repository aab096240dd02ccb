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

//! Depth-only rendering: the depth prepass and the rain occlusion depth.

use super::{
    build_mesh_draw_commands, compute_mesh_cull_mode, compute_mesh_fill_mode,
    compute_mesh_override_settings, MeshCommandBuildParams, MeshPassFeatures, MeshPassProcessor,
    MeshPassProcessorRenderState, PassProcessorCreateInfo,
};
use crate::draw_list::MeshPassDrawListContext;
use crate::error::MeshPassError;
use crate::material::{MaterialRenderProxy, MeshProcessorShaders};
use crate::mesh_batch::MeshBatch;
use crate::mesh_pass::MeshPass;
use crate::scene::PrimitiveContext;
use crate::sort_key::calculate_base_pass_sort_key;
use khora_core::renderer::{BlendStateId, DepthStencilStateId, ShaderStage};
use std::sync::Arc;

/// Writes depth for opaque and masked geometry.
///
/// Opaque materials that neither move vertices nor discard pixels are drawn
/// with position-only shaders, taken from the default material when one is
/// given, so that they all collapse into a handful of pipeline states. Masked
/// materials need their own pixel shader to discard.
pub struct DepthPassMeshProcessor<'a> {
    pass: MeshPass,
    ctx: &'a mut dyn MeshPassDrawListContext,
    render_state: MeshPassProcessorRenderState,
    default_material: Option<Arc<dyn MaterialRenderProxy>>,
    use_gpu_scene: bool,
}

impl<'a> DepthPassMeshProcessor<'a> {
    /// Creates a depth processor for `info.pass`.
    pub fn new(
        info: PassProcessorCreateInfo<'a>,
        ctx: &'a mut dyn MeshPassDrawListContext,
    ) -> Self {
        let render_state =
            info.render_state(BlendStateId::NO_COLOR_WRITES, DepthStencilStateId::DEPTH_WRITE);
        Self {
            pass: info.pass,
            ctx,
            render_state,
            default_material: info.default_material,
            use_gpu_scene: info.settings.use_gpu_scene,
        }
    }

    fn process(
        &mut self,
        batch: &MeshBatch,
        element_mask: u64,
        primitive: Option<&PrimitiveContext>,
        material: &dyn MaterialRenderProxy,
        position_only: bool,
    ) -> Result<(), MeshPassError> {
        let mut shaders = MeshProcessorShaders::new();
        let Some(vertex) = material.shader(self.pass, ShaderStage::Vertex, position_only) else {
            log::trace!("No depth vertex shader for {:?} in {}", material, self.pass);
            return Ok(());
        };
        shaders.set(vertex);
        if batch.material.is_masked() {
            match material.shader(self.pass, ShaderStage::Fragment, false) {
                Some(pixel) => shaders.set(pixel),
                None => return Ok(()),
            }
        }

        // Fill and cull come from the batch's own material even when drawing
        // with the default one.
        let override_settings = compute_mesh_override_settings(batch);
        let fill_mode = compute_mesh_fill_mode(batch.material.as_ref(), &override_settings);
        let cull_mode = compute_mesh_cull_mode(batch.material.as_ref(), &override_settings);
        let sort_key = calculate_base_pass_sort_key(
            batch.material.blend_mode(),
            shaders.vertex().map(|s| s.as_ref()),
            shaders.pixel().map(|s| s.as_ref()),
        );

        build_mesh_draw_commands(
            &mut *self.ctx,
            &MeshCommandBuildParams {
                batch,
                element_mask,
                primitive,
                material,
                render_state: &self.render_state,
                shaders: &shaders,
                fill_mode,
                cull_mode,
                sort_key,
                features: if position_only {
                    MeshPassFeatures::POSITION_ONLY
                } else {
                    MeshPassFeatures::DEFAULT
                },
                use_gpu_scene: self.use_gpu_scene,
                element_data: &(),
            },
        )
    }
}

/// Registry entry point of [`DepthPassMeshProcessor`].
pub fn create_depth_pass_processor<'a>(
    info: PassProcessorCreateInfo<'a>,
    ctx: &'a mut dyn MeshPassDrawListContext,
) -> Box<dyn MeshPassProcessor + 'a> {
    Box::new(DepthPassMeshProcessor::new(info, ctx))
}

impl MeshPassProcessor for DepthPassMeshProcessor<'_> {
    fn add_mesh_batch(
        &mut self,
        batch: &MeshBatch,
        element_mask: u64,
        primitive: Option<&PrimitiveContext>,
    ) -> Result<(), MeshPassError> {
        let material = Arc::clone(&batch.material);
        if material.blend_mode().is_translucent() || !batch.use_for_depth_pass {
            return Ok(());
        }

        let position_only = !material.is_masked()
            && !material.modifies_mesh_position()
            && material.writes_every_pixel()
            && batch.vertex_factory.supports_position_only_stream();

        if position_only {
            let effective = self.default_material.clone().unwrap_or(material);
            self.process(batch, element_mask, primitive, effective.as_ref(), true)
        } else {
            self.process(batch, element_mask, primitive, material.as_ref(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::material::BlendMode;
    use crate::settings::MeshPassSettings;
    use khora_core::renderer::{BufferId, ShaderModuleId};

    fn run(
        batch: &MeshBatch,
        default_material: Option<Arc<dyn MaterialRenderProxy>>,
    ) -> CollectingContext {
        let settings = MeshPassSettings::default();
        let mut info = PassProcessorCreateInfo::new(MeshPass::DepthPass, &settings);
        info.default_material = default_material;
        let mut ctx = CollectingContext::default();
        {
            let mut processor = DepthPassMeshProcessor::new(info, &mut ctx);
            processor.add_mesh_batch(batch, batch.all_elements_mask(), None).unwrap();
        }
        ctx
    }

    #[test]
    fn test_translucent_and_excluded_batches_are_skipped() {
        let translucent = batch(Arc::new(TestMaterial::new(BlendMode::Translucent)), true);
        assert!(run(&translucent, None).commands.is_empty());

        let mut excluded = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        excluded.use_for_depth_pass = false;
        assert!(run(&excluded, None).commands.is_empty());
    }

    #[test]
    fn test_opaque_uses_position_only_default_material() {
        let mut real = TestMaterial::new(BlendMode::Opaque);
        real.parameter = BufferId(1);
        let mut default = TestMaterial::new(BlendMode::Opaque);
        default.parameter = BufferId(2);

        let ctx = run(&batch(Arc::new(real), true), Some(Arc::new(default)));
        let (command, state, ..) = &ctx.commands[0];
        assert_eq!(state.bound_shader_state.shader(ShaderStage::Vertex), Some(ShaderModuleId(11)));
        assert_eq!(state.bound_shader_state.shader(ShaderStage::Fragment), None);
        assert_eq!(state.blend_state, BlendStateId::NO_COLOR_WRITES);
        let buffers: Vec<_> = command
            .shader_bindings()
            .stages()
            .flat_map(|v| v.uniform_buffers().map(|(_, b)| b).collect::<Vec<_>>())
            .collect();
        assert_eq!(buffers, vec![BufferId(2)], "bindings come from the default material");
    }

    #[test]
    fn test_position_moving_material_keeps_full_shaders() {
        let mut material = TestMaterial::new(BlendMode::Opaque);
        material.modifies_position = true;
        let ctx = run(&batch(Arc::new(material), true), None);
        let (_, state, ..) = &ctx.commands[0];
        assert_eq!(state.bound_shader_state.shader(ShaderStage::Vertex), Some(ShaderModuleId(10)));
        assert_eq!(state.bound_shader_state.vertex_declaration.0, 1);
    }

    #[test]
    fn test_masked_uses_own_pixel_shader_and_sorts_last() {
        let opaque = run(&batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true), None);
        let masked = run(&batch(Arc::new(TestMaterial::new(BlendMode::Masked)), true), None);
        let (_, state, masked_key, _) = &masked.commands[0];
        assert_eq!(
            state.bound_shader_state.shader(ShaderStage::Fragment),
            Some(ShaderModuleId(20))
        );
        assert!(opaque.commands[0].2 < *masked_key);
    }
}
