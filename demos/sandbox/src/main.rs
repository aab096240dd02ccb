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

// Khora Engine Sandbox
// Headless frame of the mesh pass pipeline.
//
// Usage: sandbox [settings.ron] [--wireframe]

use std::sync::Arc;

use anyhow::{Context, Result};
use khora_core::renderer::{
    BufferId, IndexBufferBinding, IndexFormat, RecordingCommandList, ShaderModuleId, ShaderStage,
    VertexDeclarationId,
};
use khora_mesh_pass::draw_command::VertexInputStream;
use khora_mesh_pass::shader_bindings::{ShaderBindingsLayout, SingleShaderBindings};
use khora_mesh_pass::{
    BlendMode, MaterialRenderProxy, MeshBatch, MeshBatchElement, MeshDrawCommandPass, MeshPass,
    MeshPassSettings, MeshShader, PrimitiveDesc, PrimitiveId, Scene, ShaderBindingError,
    SubmitStats, VertexFactory, ViewInfo,
};

const VIEW_UNIFORM_BUFFER: BufferId = BufferId(1);
const PRIMITIVE_IDS_BUFFER: BufferId = BufferId(2);

#[derive(Debug)]
struct SandboxMaterial {
    blend_mode: BlendMode,
    color: BufferId,
}

impl MaterialRenderProxy for SandboxMaterial {
    fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    fn shader(
        &self,
        _pass: MeshPass,
        stage: ShaderStage,
        position_only: bool,
    ) -> Option<Arc<MeshShader>> {
        let module = match (stage, position_only) {
            (ShaderStage::Vertex, false) => 10,
            (ShaderStage::Vertex, true) => 11,
            (ShaderStage::Fragment, _) if self.blend_mode.is_translucent() => 21,
            (ShaderStage::Fragment, _) => 20,
            _ => return None,
        };
        let mut shader = MeshShader::new(
            ShaderModuleId(module),
            stage,
            ShaderBindingsLayout::new(2, 0, 0, 0),
            module as u32,
        );
        shader.view_uniform_buffer_slot = Some(0);
        Some(Arc::new(shader))
    }

    fn get_shader_bindings(
        &self,
        _shader: &MeshShader,
        bindings: &mut SingleShaderBindings<'_>,
    ) -> Result<(), ShaderBindingError> {
        bindings.add_uniform_buffer(1, self.color)
    }
}

struct Args {
    settings: MeshPassSettings,
    wireframe: bool,
}

fn parse_args() -> Result<Args> {
    let mut settings = MeshPassSettings::default();
    let mut wireframe = false;
    for arg in std::env::args().skip(1) {
        if arg == "--wireframe" {
            wireframe = true;
        } else {
            let source = std::fs::read_to_string(&arg)
                .with_context(|| format!("Failed to read settings file {arg}"))?;
            settings = MeshPassSettings::from_ron_str(&source)?;
            log::info!("Loaded settings from {arg}");
        }
    }
    Ok(Args { settings, wireframe })
}

/// A grid of cubes: most opaque, some masked, a row of glass panes.
fn build_scene(settings: MeshPassSettings) -> Result<(Scene, Vec<PrimitiveId>)> {
    let scene = Scene::new(settings);

    let mut factory = VertexFactory::new(
        VertexDeclarationId(1),
        [VertexInputStream::new(0, BufferId(100), 0)],
    );
    factory.position_only_declaration = Some(VertexDeclarationId(2));
    factory.position_only_streams =
        [VertexInputStream::new(0, BufferId(101), 0)].into_iter().collect();
    factory.primitive_id_stream_index = Some(1);
    let factory = Arc::new(factory);
    let index_buffer = IndexBufferBinding::new(BufferId(200), IndexFormat::Uint16);
    let cube = MeshBatchElement::indexed(index_buffer, 0, 12, 24);

    let materials: [Arc<dyn MaterialRenderProxy>; 3] = [
        Arc::new(SandboxMaterial {
            blend_mode: BlendMode::Opaque,
            color: BufferId(300),
        }),
        Arc::new(SandboxMaterial {
            blend_mode: BlendMode::Masked,
            color: BufferId(301),
        }),
        Arc::new(SandboxMaterial {
            blend_mode: BlendMode::Translucent,
            color: BufferId(302),
        }),
    ];

    let descs = (0..64)
        .map(|i| {
            let material = match i % 8 {
                7 => &materials[2],
                5 => &materials[1],
                _ => &materials[0],
            };
            PrimitiveDesc {
                static_meshes: vec![MeshBatch::new(factory.clone(), material.clone(), cube)],
                bounds_origin: [(i % 8) as f32 * 2.0, 0.0, (i / 8) as f32 * 2.0],
                ..Default::default()
            }
        })
        .collect();
    let ids = scene.add_primitives(descs)?;
    log::info!("Scene built with {} primitives", scene.num_primitives());
    Ok((scene, ids))
}

fn render_pass(
    scene: &Scene,
    pass: MeshPass,
    view: &ViewInfo,
    visible: &[PrimitiveId],
    cmd_list: &mut RecordingCommandList,
) -> Result<SubmitStats> {
    let mut draw_pass = MeshDrawCommandPass::new(pass, scene.settings());
    let cached = scene.cached_pass(pass);
    if cached.is_empty() {
        scene.add_dynamic_mesh_commands(pass, Some(view), visible, &mut draw_pass)?;
    } else {
        scene.gather_cached_commands(pass, visible, &mut draw_pass)?;
    }
    draw_pass.apply_view_overrides(view, Some(&*cached), scene.persistent_table())?;
    draw_pass.finalize()?;

    let info = draw_pass
        .submit_info()
        .with_primitive_ids_buffer(PRIMITIVE_IDS_BUFFER, 0);
    let stats = draw_pass.submit(Some(&*cached), scene.persistent_table(), &info, cmd_list)?;
    log::info!(
        "{pass}: {} visible, {} draws, {} merged, {} pipeline binds",
        stats.visible_commands,
        stats.draw_calls,
        stats.merged_commands,
        stats.pipeline_binds
    );
    Ok(stats)
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let (scene, visible) = build_scene(args.settings)?;
    let view = ViewInfo {
        view_uniform_buffer: Some(VIEW_UNIFORM_BUFFER),
        wireframe: args.wireframe,
        ..ViewInfo::new([7.0, 5.0, -10.0])
    };

    let mut cmd_list = RecordingCommandList::new();
    let mut total = SubmitStats::default();
    for pass in [MeshPass::DepthPass, MeshPass::BasePass, MeshPass::TranslucencyAll] {
        total += render_pass(&scene, pass, &view, &visible, &mut cmd_list)?;
    }

    let stats = scene.pipeline_state_stats();
    log::info!(
        "Frame: {} draws for {} visible commands, {} recorded calls, {} persistent pipeline states",
        total.draw_calls,
        total.visible_commands,
        cmd_list.len(),
        stats.persistent
    );
    Ok(())
}
