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

//! Mesh pass processors: turn mesh batches into draw commands for one pass.
//!
//! A processor decides whether a batch is drawn in its pass, selects shaders
//! and render state, then calls [`build_mesh_draw_commands`], which assembles
//! one command per selected element and hands it to the draw list context the
//! processor was created with.

mod base;
mod depth;
mod registry;
mod translucency;

pub use self::base::{create_base_pass_processor, BasePassMeshProcessor};
pub use self::depth::{create_depth_pass_processor, DepthPassMeshProcessor};
pub use self::registry::{PassProcessorCreateFn, PassProcessorEntry, PassProcessorRegistry};
pub use self::translucency::{create_translucency_processor, TranslucencyMeshProcessor};

use crate::draw_command::MeshDrawCommand;
use crate::draw_list::{FinalizeCommandInfo, MeshPassDrawListContext, PrimitiveIdMode};
use crate::error::{MeshPassError, ShaderBindingError};
use crate::material::{MaterialRenderProxy, MeshProcessorShaders, MeshShader};
use crate::mesh_batch::MeshBatch;
use crate::mesh_pass::MeshPass;
use crate::scene::PrimitiveContext;
use crate::settings::MeshPassSettings;
use crate::shader_bindings::SingleShaderBindings;
use crate::sort_key::MeshDrawCommandSortKey;
use crate::view::ViewInfo;
use khora_core::renderer::{
    BlendStateId, BufferId, CullMode, DepthStencilStateId, FillMode, GraphicsMinimalPipelineState,
    PrimitiveTopology, RasterizerState,
};
use std::ops::BitOr;
use std::sync::Arc;

/// Output-merger state and pass-level bindings shared by every draw of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshPassProcessorRenderState {
    blend_state: BlendStateId,
    depth_stencil_state: DepthStencilStateId,
    stencil_ref: u32,
    view_uniform_buffer: Option<BufferId>,
    pass_uniform_buffer: Option<BufferId>,
}

impl MeshPassProcessorRenderState {
    /// Creates a render state with the given blend and depth-stencil states.
    pub fn new(blend_state: BlendStateId, depth_stencil_state: DepthStencilStateId) -> Self {
        Self {
            blend_state,
            depth_stencil_state,
            ..Default::default()
        }
    }

    /// Sets the blend state.
    pub fn set_blend_state(&mut self, blend_state: BlendStateId) {
        self.blend_state = blend_state;
    }

    /// The blend state.
    pub fn blend_state(&self) -> BlendStateId {
        self.blend_state
    }

    /// Sets the depth-stencil state. The stencil reference goes back to zero,
    /// since it only means something for the state it was chosen with.
    pub fn set_depth_stencil_state(&mut self, depth_stencil_state: DepthStencilStateId) {
        self.depth_stencil_state = depth_stencil_state;
        self.stencil_ref = 0;
    }

    /// Sets the depth-stencil state together with its stencil reference.
    pub fn set_depth_stencil_state_with_ref(
        &mut self,
        depth_stencil_state: DepthStencilStateId,
        stencil_ref: u32,
    ) {
        self.depth_stencil_state = depth_stencil_state;
        self.stencil_ref = stencil_ref;
    }

    /// The depth-stencil state.
    pub fn depth_stencil_state(&self) -> DepthStencilStateId {
        self.depth_stencil_state
    }

    /// Sets the stencil reference.
    pub fn set_stencil_ref(&mut self, stencil_ref: u32) {
        self.stencil_ref = stencil_ref;
    }

    /// The stencil reference.
    pub fn stencil_ref(&self) -> u32 {
        self.stencil_ref
    }

    /// Sets the view uniform buffer.
    pub fn set_view_uniform_buffer(&mut self, buffer: Option<BufferId>) {
        self.view_uniform_buffer = buffer;
    }

    /// The view uniform buffer.
    pub fn view_uniform_buffer(&self) -> Option<BufferId> {
        self.view_uniform_buffer
    }

    /// Sets the pass uniform buffer.
    pub fn set_pass_uniform_buffer(&mut self, buffer: Option<BufferId>) {
        self.pass_uniform_buffer = buffer;
    }

    /// The pass uniform buffer.
    pub fn pass_uniform_buffer(&self) -> Option<BufferId> {
        self.pass_uniform_buffer
    }
}

/// Per-batch overrides of the rasterizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshOverrideFlags {
    bits: u8,
}

impl MeshOverrideFlags {
    /// No override.
    pub const NONE: Self = Self { bits: 0 };
    /// Disable culling.
    pub const TWO_SIDED: Self = Self { bits: 1 << 0 };
    /// Render as wireframe.
    pub const WIREFRAME: Self = Self { bits: 1 << 1 };
    /// Invert the culling winding.
    pub const REVERSE_CULL_MODE: Self = Self { bits: 1 << 2 };

    /// Returns `true` if every flag of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl BitOr for MeshOverrideFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            bits: self.bits | rhs.bits,
        }
    }
}

/// Drawing overrides derived from a mesh batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeshDrawingPolicyOverrideSettings {
    /// Topology the batch is drawn with.
    pub mesh_primitive_type: PrimitiveTopology,
    /// Rasterizer overrides.
    pub mesh_override_flags: MeshOverrideFlags,
}

/// Derives the drawing overrides of `batch`.
pub fn compute_mesh_override_settings(batch: &MeshBatch) -> MeshDrawingPolicyOverrideSettings {
    let mut flags = MeshOverrideFlags::NONE;
    if batch.material.is_two_sided() || batch.disable_backface_culling {
        flags = flags | MeshOverrideFlags::TWO_SIDED;
    }
    if batch.use_wireframe {
        flags = flags | MeshOverrideFlags::WIREFRAME;
    }
    if batch.reverse_culling {
        flags = flags | MeshOverrideFlags::REVERSE_CULL_MODE;
    }
    MeshDrawingPolicyOverrideSettings {
        mesh_primitive_type: batch.topology,
        mesh_override_flags: flags,
    }
}

/// Wireframe when the material or the overrides ask for it.
pub fn compute_mesh_fill_mode(
    material: &dyn MaterialRenderProxy,
    settings: &MeshDrawingPolicyOverrideSettings,
) -> FillMode {
    if material.is_wireframe()
        || settings
            .mesh_override_flags
            .contains(MeshOverrideFlags::WIREFRAME)
    {
        FillMode::Wireframe
    } else {
        FillMode::Solid
    }
}

/// No culling for two-sided meshes; otherwise clockwise, inverted when the
/// overrides reverse culling.
pub fn compute_mesh_cull_mode(
    material: &dyn MaterialRenderProxy,
    settings: &MeshDrawingPolicyOverrideSettings,
) -> CullMode {
    let flags = settings.mesh_override_flags;
    if material.is_two_sided() || flags.contains(MeshOverrideFlags::TWO_SIDED) {
        return CullMode::None;
    }
    if flags.contains(MeshOverrideFlags::REVERSE_CULL_MODE) {
        CullMode::Cw.inverted()
    } else {
        CullMode::Cw
    }
}

/// Optional command-building features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshPassFeatures {
    bits: u8,
}

impl MeshPassFeatures {
    /// Nothing special.
    pub const DEFAULT: Self = Self { bits: 0 };
    /// Use the position-only declaration and streams of the vertex factory.
    pub const POSITION_ONLY: Self = Self { bits: 1 << 0 };

    /// Returns `true` if every feature of `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

/// Per-element shader parameters supplied by a processor.
pub trait MeshElementShaderData {
    /// Writes parameters of `batch.elements[element_index]` for `shader`.
    fn get_element_shader_bindings(
        &self,
        shader: &MeshShader,
        batch: &MeshBatch,
        element_index: usize,
        bindings: &mut SingleShaderBindings<'_>,
    ) -> Result<(), ShaderBindingError>;
}

impl MeshElementShaderData for () {
    fn get_element_shader_bindings(
        &self,
        _shader: &MeshShader,
        _batch: &MeshBatch,
        _element_index: usize,
        _bindings: &mut SingleShaderBindings<'_>,
    ) -> Result<(), ShaderBindingError> {
        Ok(())
    }
}

/// Inputs of [`build_mesh_draw_commands`].
pub struct MeshCommandBuildParams<'a> {
    /// The batch to draw.
    pub batch: &'a MeshBatch,
    /// Which elements to draw. Bit `i` selects element `i`.
    pub element_mask: u64,
    /// The owning primitive, if any.
    pub primitive: Option<&'a PrimitiveContext>,
    /// The material providing shader bindings. May differ from the batch's
    /// material when a pass substitutes a default one.
    pub material: &'a dyn MaterialRenderProxy,
    /// Blend, depth-stencil and pass-level bindings.
    pub render_state: &'a MeshPassProcessorRenderState,
    /// Shaders of the pass.
    pub shaders: &'a MeshProcessorShaders,
    /// Fill mode of the rasterizer.
    pub fill_mode: FillMode,
    /// Cull mode of the rasterizer.
    pub cull_mode: CullMode,
    /// Pass-specific ordering.
    pub sort_key: MeshDrawCommandSortKey,
    /// Optional features.
    pub features: MeshPassFeatures,
    /// Whether shaders may fetch primitive data by id.
    pub use_gpu_scene: bool,
    /// Per-element parameters.
    pub element_data: &'a dyn MeshElementShaderData,
}

/// Builds one draw command per element selected by `params.element_mask` and
/// passes each to `ctx`.
///
/// The parts common to every element (shaders, pipeline state, stencil and
/// vertex streams) are set once on a shared command that each element clones.
/// Bindings are then written stage by stage in ascending order: view and pass
/// uniform buffers, material parameters, the primitive uniform buffer when the
/// primitive id stream is not used, and per-element data.
pub fn build_mesh_draw_commands(
    ctx: &mut dyn MeshPassDrawListContext,
    params: &MeshCommandBuildParams<'_>,
) -> Result<(), MeshPassError> {
    let batch = params.batch;
    let vertex_factory = &batch.vertex_factory;
    let render_state = params.render_state;

    let (declaration, streams) = match vertex_factory.position_only_declaration {
        Some(declaration) if params.features.contains(MeshPassFeatures::POSITION_ONLY) => {
            (declaration, &vertex_factory.position_only_streams)
        }
        _ => (vertex_factory.declaration, &vertex_factory.streams),
    };

    let mut pipeline_state = GraphicsMinimalPipelineState {
        blend_state: render_state.blend_state(),
        depth_stencil_state: render_state.depth_stencil_state(),
        rasterizer_state: RasterizerState::new(params.fill_mode, params.cull_mode),
        primitive_topology: batch.topology,
        ..Default::default()
    };

    let primitive_id_mode = if params.use_gpu_scene
        && vertex_factory.supports_primitive_id_stream()
    {
        PrimitiveIdMode::FromPrimitiveIdStream
    } else {
        PrimitiveIdMode::FromUniformBuffer
    };

    let mut shared = MeshDrawCommand::new();
    shared.set_shaders(declaration, params.shaders, &mut pipeline_state)?;
    shared.set_stencil_ref(render_state.stencil_ref())?;
    shared.set_vertex_streams(streams)?;
    shared.set_primitive_id_stream_index(match primitive_id_mode {
        PrimitiveIdMode::FromPrimitiveIdStream => vertex_factory.primitive_id_stream_index,
        PrimitiveIdMode::FromUniformBuffer => None,
    })?;

    let draw_primitive_id = params.primitive.map_or(0, |p| p.id.get());
    let scene_primitive_id = params.primitive.map(|p| p.id);

    for (element_index, element) in batch.elements.iter().enumerate().take(u64::BITS as usize) {
        if params.element_mask & (1 << element_index) == 0 {
            continue;
        }

        let mut command = shared.clone();
        for shader in params.shaders.iter() {
            let mut bindings = command.shader_bindings_mut().stage_bindings(shader.stage)?;
            if let (Some(slot), Some(buffer)) =
                (shader.view_uniform_buffer_slot, render_state.view_uniform_buffer())
            {
                bindings.add_uniform_buffer(slot, buffer)?;
            }
            if let (Some(slot), Some(buffer)) =
                (shader.pass_uniform_buffer_slot, render_state.pass_uniform_buffer())
            {
                bindings.add_uniform_buffer(slot, buffer)?;
            }
            params.material.get_shader_bindings(shader, &mut bindings)?;
            if primitive_id_mode == PrimitiveIdMode::FromUniformBuffer {
                let buffer = element
                    .primitive_uniform_buffer
                    .or_else(|| params.primitive.and_then(|p| p.uniform_buffer));
                if let (Some(slot), Some(buffer)) = (shader.primitive_uniform_buffer_slot, buffer) {
                    bindings.add_uniform_buffer(slot, buffer)?;
                }
            }
            params
                .element_data
                .get_element_shader_bindings(shader, batch, element_index, &mut bindings)?;
        }

        ctx.finalize_command(
            command,
            FinalizeCommandInfo {
                batch,
                element_index,
                draw_primitive_id,
                scene_primitive_id,
                primitive_id_mode,
                fill_mode: params.fill_mode,
                cull_mode: params.cull_mode,
                sort_key: params.sort_key,
                pipeline_state: &pipeline_state,
            },
        )?;
    }
    Ok(())
}

/// Turns mesh batches into draw commands for one pass.
pub trait MeshPassProcessor {
    /// Processes the elements of `batch` selected by `element_mask`.
    ///
    /// Batches the pass does not draw are skipped without error.
    fn add_mesh_batch(
        &mut self,
        batch: &MeshBatch,
        element_mask: u64,
        primitive: Option<&PrimitiveContext>,
    ) -> Result<(), MeshPassError>;
}

/// What a processor is created with.
#[derive(Clone)]
pub struct PassProcessorCreateInfo<'a> {
    /// The pass the processor builds commands for.
    pub pass: MeshPass,
    /// The view, for processors that depend on it. `None` when caching.
    pub view: Option<&'a ViewInfo>,
    /// Pipeline settings.
    pub settings: &'a MeshPassSettings,
    /// Pass-level uniform buffer.
    pub pass_uniform_buffer: Option<BufferId>,
    /// Material substituted by passes that do not need the real one.
    pub default_material: Option<Arc<dyn MaterialRenderProxy>>,
}

impl<'a> PassProcessorCreateInfo<'a> {
    /// Creates info for `pass` with no view.
    pub fn new(pass: MeshPass, settings: &'a MeshPassSettings) -> Self {
        Self {
            pass,
            view: None,
            settings,
            pass_uniform_buffer: None,
            default_material: None,
        }
    }

    /// Sets the view.
    pub fn with_view(mut self, view: &'a ViewInfo) -> Self {
        self.view = Some(view);
        self
    }

    /// Sets the default material.
    pub fn with_default_material(mut self, material: Arc<dyn MaterialRenderProxy>) -> Self {
        self.default_material = Some(material);
        self
    }

    pub(crate) fn render_state(
        &self,
        blend_state: BlendStateId,
        depth_stencil_state: DepthStencilStateId,
    ) -> MeshPassProcessorRenderState {
        let mut render_state = MeshPassProcessorRenderState::new(blend_state, depth_stencil_state);
        render_state.set_view_uniform_buffer(self.view.and_then(|v| v.view_uniform_buffer));
        render_state.set_pass_uniform_buffer(self.pass_uniform_buffer);
        render_state
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::material::BlendMode;
    use crate::mesh_batch::{MeshBatchElement, VertexFactory};
    use crate::shader_bindings::ShaderBindingsLayout;
    use khora_core::renderer::{
        IndexBufferBinding, IndexFormat, ShaderModuleId, ShaderStage, VertexDeclarationId,
    };

    /// A material with one vertex and one fragment shader per call.
    #[derive(Debug)]
    pub struct TestMaterial {
        pub blend_mode: BlendMode,
        pub two_sided: bool,
        pub modifies_position: bool,
        pub parameter: BufferId,
    }

    impl TestMaterial {
        pub fn new(blend_mode: BlendMode) -> Self {
            Self {
                blend_mode,
                two_sided: false,
                modifies_position: false,
                parameter: BufferId(500),
            }
        }
    }

    impl MaterialRenderProxy for TestMaterial {
        fn blend_mode(&self) -> BlendMode {
            self.blend_mode
        }

        fn is_two_sided(&self) -> bool {
            self.two_sided
        }

        fn modifies_mesh_position(&self) -> bool {
            self.modifies_position
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
                (ShaderStage::Fragment, _) => 20,
                _ => return None,
            };
            let mut shader = MeshShader::new(
                ShaderModuleId(module),
                stage,
                ShaderBindingsLayout::new(3, 0, 0, 0),
                module as u32,
            );
            shader.view_uniform_buffer_slot = Some(0);
            shader.primitive_uniform_buffer_slot = Some(1);
            Some(Arc::new(shader))
        }

        fn get_shader_bindings(
            &self,
            _shader: &MeshShader,
            bindings: &mut SingleShaderBindings<'_>,
        ) -> Result<(), ShaderBindingError> {
            bindings.add_uniform_buffer(2, self.parameter)
        }
    }

    pub fn vertex_factory(primitive_id_stream: bool) -> Arc<VertexFactory> {
        let mut factory = VertexFactory::new(
            VertexDeclarationId(1),
            [crate::draw_command::VertexInputStream::new(0, BufferId(100), 0)],
        );
        factory.position_only_declaration = Some(VertexDeclarationId(2));
        factory.position_only_streams = smallvec::smallvec![
            crate::draw_command::VertexInputStream::new(0, BufferId(101), 0)
        ];
        if primitive_id_stream {
            factory.primitive_id_stream_index = Some(1);
        }
        Arc::new(factory)
    }

    pub fn batch(material: Arc<dyn MaterialRenderProxy>, primitive_id_stream: bool) -> MeshBatch {
        MeshBatch::new(
            vertex_factory(primitive_id_stream),
            material,
            MeshBatchElement::indexed(
                IndexBufferBinding::new(BufferId(200), IndexFormat::Uint32),
                0,
                4,
                8,
            ),
        )
    }

    /// Collects finalized commands without storing pipeline ids anywhere.
    #[derive(Default)]
    pub struct CollectingContext {
        pub commands: Vec<(
            MeshDrawCommand,
            GraphicsMinimalPipelineState,
            MeshDrawCommandSortKey,
            PrimitiveIdMode,
        )>,
    }

    impl MeshPassDrawListContext for CollectingContext {
        fn finalize_command(
            &mut self,
            mut command: MeshDrawCommand,
            info: FinalizeCommandInfo<'_>,
        ) -> Result<(), MeshPassError> {
            command.set_draw_parameters_and_finalize(
                info.batch,
                info.element_index,
                crate::pipeline_state_id::PipelineStateId::local(self.commands.len() as u32),
            )?;
            self.commands
                .push((command, *info.pipeline_state, info.sort_key, info.primitive_id_mode));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::material::BlendMode;
    use crate::mesh_batch::MeshBatchElement;
    use crate::scene::PrimitiveId;
    use khora_core::renderer::ShaderStage;

    fn shaders(material: &dyn MaterialRenderProxy) -> MeshProcessorShaders {
        let mut shaders = MeshProcessorShaders::new();
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if let Some(shader) = material.shader(MeshPass::BasePass, stage, false) {
                shaders.set(shader);
            }
        }
        shaders
    }

    fn params<'a>(
        batch: &'a MeshBatch,
        shaders: &'a MeshProcessorShaders,
        render_state: &'a MeshPassProcessorRenderState,
        primitive: Option<&'a PrimitiveContext>,
        use_gpu_scene: bool,
    ) -> MeshCommandBuildParams<'a> {
        MeshCommandBuildParams {
            batch,
            element_mask: batch.all_elements_mask(),
            primitive,
            material: batch.material.as_ref(),
            render_state,
            shaders,
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Cw,
            sort_key: MeshDrawCommandSortKey::DEFAULT,
            features: MeshPassFeatures::DEFAULT,
            use_gpu_scene,
            element_data: &(),
        }
    }

    #[test]
    fn test_override_settings_follow_batch_and_material() {
        let mut material = TestMaterial::new(BlendMode::Opaque);
        material.two_sided = true;
        let mut batch = batch(Arc::new(material), false);
        batch.reverse_culling = true;
        let settings = compute_mesh_override_settings(&batch);
        assert!(settings.mesh_override_flags.contains(MeshOverrideFlags::TWO_SIDED));
        assert!(settings.mesh_override_flags.contains(MeshOverrideFlags::REVERSE_CULL_MODE));
        assert_eq!(compute_mesh_cull_mode(batch.material.as_ref(), &settings), CullMode::None);
        assert_eq!(compute_mesh_fill_mode(batch.material.as_ref(), &settings), FillMode::Solid);
    }

    #[test]
    fn test_reverse_culling_inverts_winding() {
        let mut batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), false);
        let settings = compute_mesh_override_settings(&batch);
        assert_eq!(compute_mesh_cull_mode(batch.material.as_ref(), &settings), CullMode::Cw);

        batch.reverse_culling = true;
        batch.use_wireframe = true;
        let settings = compute_mesh_override_settings(&batch);
        assert_eq!(compute_mesh_cull_mode(batch.material.as_ref(), &settings), CullMode::Ccw);
        assert_eq!(compute_mesh_fill_mode(batch.material.as_ref(), &settings), FillMode::Wireframe);
    }

    #[test]
    fn test_set_depth_stencil_state_resets_stencil_ref() {
        let mut state = MeshPassProcessorRenderState::default();
        state.set_stencil_ref(7);
        state.set_depth_stencil_state(DepthStencilStateId::DEPTH_READ);
        assert_eq!(state.stencil_ref(), 0);
        state.set_depth_stencil_state_with_ref(DepthStencilStateId::DEPTH_WRITE, 3);
        assert_eq!(state.stencil_ref(), 3);
    }

    #[test]
    fn test_one_command_per_selected_element() {
        let mut batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        batch.elements.push(batch.elements[0]);
        batch.elements.push(MeshBatchElement {
            first_index: 12,
            ..batch.elements[0]
        });
        let shaders = shaders(batch.material.as_ref());
        let render_state = MeshPassProcessorRenderState::default();
        let mut params = params(&batch, &shaders, &render_state, None, true);
        params.element_mask = 0b101;

        let mut ctx = CollectingContext::default();
        build_mesh_draw_commands(&mut ctx, &params).unwrap();
        assert_eq!(ctx.commands.len(), 2);
        assert_eq!(ctx.commands[1].0.first_index(), 12);
        assert!(ctx.commands.iter().all(|(c, ..)| c.is_finalized()));
    }

    #[test]
    fn test_primitive_uniform_buffer_only_without_id_stream() {
        let batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        let shaders = shaders(batch.material.as_ref());
        let render_state = MeshPassProcessorRenderState::default();
        let primitive = PrimitiveContext {
            id: PrimitiveId::new(3),
            uniform_buffer: Some(BufferId(42)),
            bounds_origin: [0.0; 3],
            translucency_sort_priority: 0,
        };

        let mut ctx = CollectingContext::default();
        for use_gpu_scene in [true, false] {
            let params = params(&batch, &shaders, &render_state, Some(&primitive), use_gpu_scene);
            build_mesh_draw_commands(&mut ctx, &params).unwrap();
        }

        let bound = |command: &MeshDrawCommand| -> Vec<BufferId> {
            command
                .shader_bindings()
                .stages()
                .flat_map(|view| view.uniform_buffers().map(|(_, b)| b).collect::<Vec<_>>())
                .collect()
        };
        let (with_stream, _, _, mode) = &ctx.commands[0];
        assert_eq!(*mode, PrimitiveIdMode::FromPrimitiveIdStream);
        assert_eq!(with_stream.primitive_id_stream_index(), Some(1));
        assert!(!bound(with_stream).contains(&BufferId(42)));

        let (without_stream, _, _, mode) = &ctx.commands[1];
        assert_eq!(*mode, PrimitiveIdMode::FromUniformBuffer);
        assert_eq!(without_stream.primitive_id_stream_index(), None);
        assert!(bound(without_stream).contains(&BufferId(42)));
    }

    #[test]
    fn test_position_only_feature_selects_position_streams() {
        let batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), false);
        let shaders = shaders(batch.material.as_ref());
        let render_state = MeshPassProcessorRenderState::new(
            BlendStateId::NO_COLOR_WRITES,
            DepthStencilStateId::DEPTH_WRITE,
        );
        let mut params = params(&batch, &shaders, &render_state, None, true);
        params.features = MeshPassFeatures::POSITION_ONLY;

        let mut ctx = CollectingContext::default();
        build_mesh_draw_commands(&mut ctx, &params).unwrap();
        let (command, state, ..) = &ctx.commands[0];
        assert_eq!(command.vertex_streams()[0].buffer, BufferId(101));
        assert_eq!(state.bound_shader_state.vertex_declaration.0, 2);
        assert_eq!(state.blend_state, BlendStateId::NO_COLOR_WRITES);
    }
}
