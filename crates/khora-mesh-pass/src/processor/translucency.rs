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
use crate::sort_key::TranslucentSortKey;
use crate::view::ViewInfo;
use khora_core::renderer::{BlendStateId, DepthStencilStateId, ShaderStage};

/// Draws translucent materials back to front.
///
/// The sort key depends on the view, so these passes are rebuilt every frame
/// and never cached. Without a view every distance is zero.
pub struct TranslucencyMeshProcessor<'a> {
    pass: MeshPass,
    ctx: &'a mut dyn MeshPassDrawListContext,
    view: Option<&'a ViewInfo>,
    render_state: MeshPassProcessorRenderState,
    use_gpu_scene: bool,
}

impl<'a> TranslucencyMeshProcessor<'a> {
    /// Creates a translucency processor for `info.pass`.
    pub fn new(
        info: PassProcessorCreateInfo<'a>,
        ctx: &'a mut dyn MeshPassDrawListContext,
    ) -> Self {
        Self {
            pass: info.pass,
            ctx,
            view: info.view,
            render_state: info
                .render_state(BlendStateId::TRANSLUCENT, DepthStencilStateId::DEPTH_READ),
            use_gpu_scene: info.settings.use_gpu_scene,
        }
    }
}

/// Registry entry point of [`TranslucencyMeshProcessor`].
pub fn create_translucency_processor<'a>(
    info: PassProcessorCreateInfo<'a>,
    ctx: &'a mut dyn MeshPassDrawListContext,
) -> Box<dyn MeshPassProcessor + 'a> {
    Box::new(TranslucencyMeshProcessor::new(info, ctx))
}

impl MeshPassProcessor for TranslucencyMeshProcessor<'_> {
    fn add_mesh_batch(
        &mut self,
        batch: &MeshBatch,
        element_mask: u64,
        primitive: Option<&PrimitiveContext>,
    ) -> Result<(), MeshPassError> {
        let material = batch.material.as_ref();
        if !material.blend_mode().is_translucent() || !batch.use_for_material {
            return Ok(());
        }

        let mut shaders = MeshProcessorShaders::new();
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            match material.shader(self.pass, stage, false) {
                Some(shader) => shaders.set(shader),
                None => return Ok(()),
            }
        }

        let distance = match (self.view, primitive) {
            (Some(view), Some(primitive)) => view.distance_to(primitive.bounds_origin),
            _ => 0.0,
        };
        let sort_key = TranslucentSortKey {
            priority: primitive.map_or(0, |p| p.translucency_sort_priority),
            distance,
            mesh_id_in_primitive: batch.mesh_id_in_primitive,
        };

        let override_settings = compute_mesh_override_settings(batch);
        build_mesh_draw_commands(
            &mut *self.ctx,
            &MeshCommandBuildParams {
                batch,
                element_mask,
                primitive,
                material,
                render_state: &self.render_state,
                shaders: &shaders,
                fill_mode: compute_mesh_fill_mode(material, &override_settings),
                cull_mode: compute_mesh_cull_mode(material, &override_settings),
                sort_key: sort_key.into(),
                features: MeshPassFeatures::DEFAULT,
                use_gpu_scene: self.use_gpu_scene,
                element_data: &(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::material::BlendMode;
    use crate::scene::PrimitiveId;
    use crate::settings::MeshPassSettings;
    use std::sync::Arc;

    fn primitive(id: u32, z: f32) -> PrimitiveContext {
        PrimitiveContext {
            id: PrimitiveId::new(id),
            uniform_buffer: None,
            bounds_origin: [0.0, 0.0, z],
            translucency_sort_priority: 0,
        }
    }

    #[test]
    fn test_far_primitives_sort_first() {
        let settings = MeshPassSettings::default();
        let view = ViewInfo::new([0.0; 3]);
        let info =
            PassProcessorCreateInfo::new(MeshPass::TranslucencyAll, &settings).with_view(&view);
        let batch = batch(Arc::new(TestMaterial::new(BlendMode::Translucent)), true);

        let mut ctx = CollectingContext::default();
        {
            let mut processor = TranslucencyMeshProcessor::new(info, &mut ctx);
            processor.add_mesh_batch(&batch, 1, Some(&primitive(0, 5.0))).unwrap();
            processor.add_mesh_batch(&batch, 1, Some(&primitive(1, 50.0))).unwrap();
        }
        assert!(ctx.commands[1].2 < ctx.commands[0].2);
        assert_eq!(ctx.commands[0].1.blend_state, BlendStateId::TRANSLUCENT);
        assert_eq!(ctx.commands[0].1.depth_stencil_state, DepthStencilStateId::DEPTH_READ);
    }

    #[test]
    fn test_opaque_is_not_drawn() {
        let settings = MeshPassSettings::default();
        let info = PassProcessorCreateInfo::new(MeshPass::TranslucencyStandard, &settings);
        let batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        let mut ctx = CollectingContext::default();
        TranslucencyMeshProcessor::new(info, &mut ctx)
            .add_mesh_batch(&batch, 1, None)
            .unwrap();
        assert!(ctx.commands.is_empty());
    }
}
