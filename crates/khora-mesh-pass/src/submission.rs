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

//! Turns sorted visible records into calls on a [`RenderCommandList`].
//!
//! Submission walks the records in order, merges runs of matching commands
//! into one instanced draw, and skips redundant pipeline, stencil and vertex
//! stream binds through a small state cache.

use crate::draw_command::{DrawArguments, MeshDrawCommand, VertexInputStream};
use crate::error::MeshPassError;
use crate::pipeline_state_id::{PipelineStateId, PipelineStateResolver};
use crate::settings::MeshPassSettings;
use crate::visible::{MeshDrawCommandSources, VisibleMeshDrawCommand};
use khora_core::renderer::{BufferId, GraphicsMinimalPipelineState, RenderCommandList};
use std::ops::{AddAssign, Range};

/// Size in bytes of one primitive id buffer entry.
pub const PRIMITIVE_ID_STRIDE: u64 = std::mem::size_of::<u32>() as u64;

/// Per-submission parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    /// The buffer holding the pass's primitive ids, bound to each command's
    /// primitive id stream. `None` leaves that stream unbound.
    pub primitive_ids_buffer: Option<BufferId>,
    /// Byte offset of the pass's first entry in `primitive_ids_buffer`.
    pub base_primitive_ids_offset: u64,
    /// Merge matching adjacent records into one draw.
    pub dynamic_instancing: bool,
    /// Multiplier applied to every instance count.
    pub instance_factor: u32,
}

impl Default for SubmitInfo {
    fn default() -> Self {
        Self {
            primitive_ids_buffer: None,
            base_primitive_ids_offset: 0,
            dynamic_instancing: true,
            instance_factor: 1,
        }
    }
}

impl SubmitInfo {
    /// Takes instancing parameters from `settings`.
    pub fn from_settings(settings: &MeshPassSettings) -> Self {
        Self {
            dynamic_instancing: settings.dynamic_instancing,
            instance_factor: settings.instance_factor.max(1),
            ..Self::default()
        }
    }

    /// Sets the primitive id buffer.
    pub fn with_primitive_ids_buffer(mut self, buffer: BufferId, base_offset: u64) -> Self {
        self.primitive_ids_buffer = Some(buffer);
        self.base_primitive_ids_offset = base_offset;
        self
    }
}

/// Counters of one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitStats {
    /// Records walked.
    pub visible_commands: usize,
    /// Draw calls issued.
    pub draw_calls: usize,
    /// Instances drawn by non-indirect draws.
    pub instances: u64,
    /// Records folded into a previous record's draw.
    pub merged_commands: usize,
    /// Pipeline state binds issued.
    pub pipeline_binds: usize,
    /// Vertex buffer binds issued.
    pub vertex_stream_binds: usize,
}

impl AddAssign for SubmitStats {
    fn add_assign(&mut self, rhs: Self) {
        self.visible_commands += rhs.visible_commands;
        self.draw_calls += rhs.draw_calls;
        self.instances += rhs.instances;
        self.merged_commands += rhs.merged_commands;
        self.pipeline_binds += rhs.pipeline_binds;
        self.vertex_stream_binds += rhs.vertex_stream_binds;
    }
}

const MAX_CACHED_STREAMS: usize = 16;

/// The state last bound on the command list during a submission.
#[derive(Debug, Clone)]
pub struct MeshDrawCommandStateCache {
    pipeline_id: Option<PipelineStateId>,
    stencil_ref: Option<u8>,
    vertex_streams: [Option<(BufferId, u64)>; MAX_CACHED_STREAMS],
}

impl Default for MeshDrawCommandStateCache {
    fn default() -> Self {
        Self {
            pipeline_id: None,
            stencil_ref: None,
            vertex_streams: [None; MAX_CACHED_STREAMS],
        }
    }
}

impl MeshDrawCommandStateCache {
    /// Creates a cache that knows nothing is bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` as bound. Returns `true` if it was not bound already.
    pub fn set_pipeline(&mut self, id: PipelineStateId) -> bool {
        let changed = self.pipeline_id != Some(id);
        self.pipeline_id = Some(id);
        if changed {
            // A new pipeline may use a different stream layout.
            self.vertex_streams = [None; MAX_CACHED_STREAMS];
        }
        changed
    }

    /// Records `stencil_ref` as bound. Returns `true` if it changed.
    pub fn set_stencil_ref(&mut self, stencil_ref: u8) -> bool {
        let changed = self.stencil_ref != Some(stencil_ref);
        self.stencil_ref = Some(stencil_ref);
        changed
    }

    /// Records a vertex buffer bind. Returns `true` if it changed.
    ///
    /// Slots beyond the cache size are always reported as changed.
    pub fn set_vertex_stream(&mut self, slot: u32, buffer: BufferId, offset: u64) -> bool {
        match self.vertex_streams.get_mut(slot as usize) {
            Some(cached) if *cached == Some((buffer, offset)) => false,
            Some(cached) => {
                *cached = Some((buffer, offset));
                true
            }
            None => true,
        }
    }
}

/// Submits every record in `visible`.
pub fn submit_mesh_draw_commands(
    visible: &[VisibleMeshDrawCommand],
    sources: &MeshDrawCommandSources<'_>,
    resolver: &PipelineStateResolver<'_>,
    info: &SubmitInfo,
    cmd_list: &mut dyn RenderCommandList,
) -> Result<SubmitStats, MeshPassError> {
    submit_mesh_draw_commands_range(visible, 0..visible.len(), sources, resolver, info, cmd_list)
}

/// Submits the records of `visible` in `range`, clamped to the slice.
///
/// Ranges let several workers submit disjoint parts of one pass into their
/// own command lists.
pub fn submit_mesh_draw_commands_range(
    visible: &[VisibleMeshDrawCommand],
    range: Range<usize>,
    sources: &MeshDrawCommandSources<'_>,
    resolver: &PipelineStateResolver<'_>,
    info: &SubmitInfo,
    cmd_list: &mut dyn RenderCommandList,
) -> Result<SubmitStats, MeshPassError> {
    let end = range.end.min(visible.len());
    let start = range.start.min(end);
    let records = &visible[start..end];

    let mut stats = SubmitStats {
        visible_commands: records.len(),
        ..SubmitStats::default()
    };
    let mut cache = MeshDrawCommandStateCache::new();

    let mut index = 0;
    while index < records.len() {
        let record = &records[index];
        let command = sources
            .resolve(record.command)
            .ok_or(MeshPassError::UnresolvedDrawCommand)?;

        let mut run = 1;
        if info.dynamic_instancing {
            while let Some(next) = records.get(index + run) {
                if !can_merge(record, next, command, sources)? {
                    break;
                }
                run += 1;
            }
        }

        let run_len = u32::try_from(run).map_err(|_| MeshPassError::DrawCountOverflow)?;
        submit_draw(command, record, run_len, resolver, info, &mut cache, &mut stats, cmd_list)?;
        stats.merged_commands += run - 1;
        index += run;
    }

    log::trace!(
        "Submitted {} records as {} draws ({} merged)",
        stats.visible_commands,
        stats.draw_calls,
        stats.merged_commands
    );
    Ok(stats)
}

fn can_merge(
    first: &VisibleMeshDrawCommand,
    next: &VisibleMeshDrawCommand,
    command: &MeshDrawCommand,
    sources: &MeshDrawCommandSources<'_>,
) -> Result<bool, MeshPassError> {
    // Without a primitive id stream every instance would read the first record's primitive.
    if command.primitive_id_stream_index().is_none() {
        return Ok(false);
    }
    if first.state_bucket_id.is_some() && first.state_bucket_id == next.state_bucket_id {
        return Ok(true);
    }
    let other = sources
        .resolve(next.command)
        .ok_or(MeshPassError::UnresolvedDrawCommand)?;
    Ok(command.matches_for_dynamic_instancing(other))
}

#[allow(clippy::too_many_arguments)]
fn submit_draw(
    command: &MeshDrawCommand,
    record: &VisibleMeshDrawCommand,
    run: u32,
    resolver: &PipelineStateResolver<'_>,
    info: &SubmitInfo,
    cache: &mut MeshDrawCommandStateCache,
    stats: &mut SubmitStats,
    cmd_list: &mut dyn RenderCommandList,
) -> Result<(), MeshPassError> {
    let pipeline_id = command.pipeline_id();
    let Some(state) = resolver.resolve(pipeline_id) else {
        log::warn!("Refusing to draw a command with unresolved pipeline state {pipeline_id:?}");
        return Err(MeshPassError::UnresolvedPipelineState(pipeline_id));
    };
    if cache.set_pipeline(pipeline_id) {
        cmd_list.set_pipeline_state(state);
        stats.pipeline_binds += 1;
    }

    if cache.set_stencil_ref(command.stencil_ref()) {
        cmd_list.set_stencil_reference(u32::from(command.stencil_ref()));
    }

    for &VertexInputStream {
        stream_index,
        offset,
        buffer,
    } in command.vertex_streams()
    {
        let slot = u32::from(stream_index);
        if cache.set_vertex_stream(slot, buffer, u64::from(offset)) {
            cmd_list.set_vertex_buffer(slot, buffer, u64::from(offset));
            stats.vertex_stream_binds += 1;
        }
    }

    if let (Some(stream_index), Some(buffer)) =
        (command.primitive_id_stream_index(), info.primitive_ids_buffer)
    {
        let entry = u64::from(record.primitive_id_buffer_offset.unwrap_or(0));
        let offset = info
            .base_primitive_ids_offset
            .checked_add(entry * PRIMITIVE_ID_STRIDE)
            .ok_or(MeshPassError::DrawCountOverflow)?;
        let slot = u32::from(stream_index);
        if cache.set_vertex_stream(slot, buffer, offset) {
            cmd_list.set_vertex_buffer(slot, buffer, offset);
            stats.vertex_stream_binds += 1;
        }
    }

    for stage in command.shader_bindings().stages() {
        for (slot, buffer) in stage.uniform_buffers() {
            cmd_list.set_uniform_buffer(stage.stage(), slot, buffer);
        }
        for (slot, texture) in stage.textures() {
            cmd_list.set_texture(stage.stage(), slot, texture);
        }
        for (slot, sampler) in stage.samplers() {
            cmd_list.set_sampler(stage.stage(), slot, sampler);
        }
        let loose = stage.loose_data();
        if !loose.is_empty() {
            cmd_list.set_shader_parameters(stage.stage(), loose);
        }
    }

    let num_instances = command
        .num_instances()
        .max(1)
        .checked_mul(run)
        .and_then(|n| n.checked_mul(info.instance_factor))
        .ok_or(MeshPassError::DrawCountOverflow)?;
    match (command.draw_args(), command.index_buffer()) {
        (
            DrawArguments::Vertices {
                base_vertex_index, ..
            },
            Some(index_buffer),
        ) => {
            let first = command.first_index();
            let last = vertex_range_end(state, command, first)?;
            cmd_list.set_index_buffer(index_buffer.buffer, 0, index_buffer.format);
            cmd_list.draw_indexed(first..last, base_vertex_index as i32, 0..num_instances);
            stats.instances += u64::from(num_instances);
        }
        (
            DrawArguments::Vertices {
                base_vertex_index, ..
            },
            None,
        ) => {
            let last = vertex_range_end(state, command, base_vertex_index)?;
            cmd_list.draw(base_vertex_index..last, 0..num_instances);
            stats.instances += u64::from(num_instances);
        }
        (DrawArguments::Indirect { buffer, offset }, Some(index_buffer)) => {
            cmd_list.set_index_buffer(index_buffer.buffer, 0, index_buffer.format);
            cmd_list.draw_indexed_indirect(buffer, u64::from(offset));
        }
        (DrawArguments::Indirect { buffer, offset }, None) => {
            cmd_list.draw_indirect(buffer, u64::from(offset));
        }
    }
    stats.draw_calls += 1;
    Ok(())
}

/// End of the index or vertex range that starts at `first`.
fn vertex_range_end(
    state: &GraphicsMinimalPipelineState,
    command: &MeshDrawCommand,
    first: u32,
) -> Result<u32, MeshPassError> {
    state
        .primitive_topology
        .checked_index_count(command.num_primitives())
        .and_then(|count| first.checked_add(count))
        .ok_or(MeshPassError::DrawCountOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw_list::{
        DynamicMeshDrawCommandStorage, DynamicPassMeshDrawListContext, FinalizeCommandInfo,
        MeshPassDrawListContext, PrimitiveIdMode,
    };
    use crate::material::BlendMode;
    use crate::mesh_batch::MeshBatch;
    use crate::pipeline_state_id::{LocalPipelineStateSet, PersistentPipelineStateTable};
    use crate::processor::test_support::{batch, TestMaterial};
    use crate::sort_key::MeshDrawCommandSortKey;
    use crate::visible::sort_visible_mesh_draw_commands;
    use khora_core::renderer::{
        CullMode, FillMode, GraphicsMinimalPipelineState, RecordedCommand, RecordingCommandList,
        ShaderStage,
    };
    use std::sync::Arc;

    struct Frame {
        storage: DynamicMeshDrawCommandStorage,
        visible: Vec<VisibleMeshDrawCommand>,
        local: LocalPipelineStateSet,
        persistent: PersistentPipelineStateTable,
    }

    impl Frame {
        fn new() -> Self {
            Self {
                storage: DynamicMeshDrawCommandStorage::new(4),
                visible: Vec::new(),
                local: LocalPipelineStateSet::new(),
                persistent: PersistentPipelineStateTable::new(),
            }
        }

        /// Adds one command per parameter buffer; equal buffers match.
        fn add(&mut self, parameter: usize, primitive_id: u32) {
            let mut material = TestMaterial::new(BlendMode::Opaque);
            material.parameter = BufferId(parameter);
            let batch = batch(Arc::new(material), true);
            self.add_batch(&batch, parameter, primitive_id, PrimitiveIdMode::FromPrimitiveIdStream);
        }

        fn add_batch(
            &mut self,
            batch: &MeshBatch,
            parameter: usize,
            primitive_id: u32,
            mode: PrimitiveIdMode,
        ) {

            let mut command = MeshDrawCommand::new();
            let mut state = GraphicsMinimalPipelineState::default();
            let shaders = {
                let mut shaders = crate::material::MeshProcessorShaders::new();
                for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
                    let pass = crate::mesh_pass::MeshPass::BasePass;
                    if let Some(shader) = batch.material.shader(pass, stage, false) {
                        shaders.set(shader);
                    }
                }
                shaders
            };
            command
                .set_shaders(batch.vertex_factory.declaration, &shaders, &mut state)
                .unwrap();
            command
                .shader_bindings_mut()
                .stage_bindings(ShaderStage::Fragment)
                .unwrap()
                .add_uniform_buffer(2, BufferId(parameter))
                .unwrap();
            command
                .set_vertex_streams(&batch.vertex_factory.streams)
                .unwrap();
            command
                .set_primitive_id_stream_index(batch.vertex_factory.primitive_id_stream_index)
                .unwrap();

            let mut ctx = DynamicPassMeshDrawListContext::new(
                &mut self.storage,
                &mut self.visible,
                &mut self.local,
                &self.persistent,
            );
            ctx.finalize_command(
                command,
                FinalizeCommandInfo {
                    batch,
                    element_index: 0,
                    draw_primitive_id: primitive_id,
                    scene_primitive_id: None,
                    primitive_id_mode: mode,
                    fill_mode: FillMode::Solid,
                    cull_mode: CullMode::Cw,
                    sort_key: MeshDrawCommandSortKey::DEFAULT,
                    pipeline_state: &state,
                },
            )
            .unwrap();
        }

        fn submit(&mut self, info: &SubmitInfo) -> (SubmitStats, RecordingCommandList) {
            let mut list = RecordingCommandList::new();
            let stats = self.try_submit(info, &mut list).unwrap();
            (stats, list)
        }

        fn try_submit(
            &mut self,
            info: &SubmitInfo,
            list: &mut RecordingCommandList,
        ) -> Result<SubmitStats, MeshPassError> {
            sort_visible_mesh_draw_commands(&mut self.visible);
            for (offset, record) in self.visible.iter_mut().enumerate() {
                record.primitive_id_buffer_offset = Some(offset as u32);
            }
            let sources = MeshDrawCommandSources::new(&self.storage, None);
            let resolver = PipelineStateResolver::new(&self.persistent, &self.local);
            submit_mesh_draw_commands(&self.visible, &sources, &resolver, info, list)
        }
    }

    #[test]
    fn test_matching_commands_merge_into_one_draw() {
        let mut frame = Frame::new();
        for primitive in 0..3 {
            frame.add(7, primitive);
        }
        let (stats, list) = frame.submit(&SubmitInfo::default());

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.merged_commands, 2);
        assert_eq!(list.draw_calls(), 1);
        assert_eq!(list.draws().next().and_then(RecordedCommand::instance_count), Some(3));
    }

    #[test]
    fn test_instancing_disabled_draws_each_record() {
        let mut frame = Frame::new();
        for primitive in 0..3 {
            frame.add(7, primitive);
        }
        let info = SubmitInfo {
            dynamic_instancing: false,
            ..SubmitInfo::default()
        };
        let (stats, list) = frame.submit(&info);

        assert_eq!(stats.draw_calls, 3);
        assert_eq!(stats.pipeline_binds, 1);
        assert!(list.draws().all(|draw| draw.instance_count() == Some(1)));
    }

    #[test]
    fn test_different_bindings_do_not_merge() {
        let mut frame = Frame::new();
        frame.add(7, 0);
        frame.add(8, 1);
        let (stats, _) = frame.submit(&SubmitInfo::default());
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.merged_commands, 0);
    }

    #[test]
    fn test_instance_factor_multiplies_instances() {
        let mut frame = Frame::new();
        frame.add(7, 0);
        frame.add(7, 1);
        let info = SubmitInfo {
            instance_factor: 2,
            ..SubmitInfo::default()
        };
        let (stats, list) = frame.submit(&info);
        assert_eq!(stats.instances, 4);
        assert_eq!(list.draws().next().and_then(RecordedCommand::instance_count), Some(4));
    }

    #[test]
    fn test_primitive_id_stream_offset() {
        let mut frame = Frame::new();
        frame.add(7, 0);
        frame.add(8, 1);
        let info = SubmitInfo::default().with_primitive_ids_buffer(BufferId(500), 64);
        let (_, list) = frame.submit(&info);

        let offsets: Vec<u64> = list
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetVertexBuffer { buffer, offset, .. }
                    if *buffer == BufferId(500) =>
                {
                    Some(*offset)
                }
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![64, 68]);
    }

    #[test]
    fn test_indexed_draw_range() {
        let mut frame = Frame::new();
        frame.add(7, 0);
        let (_, list) = frame.submit(&SubmitInfo::default());
        let draw = list.draws().next().cloned();
        assert_eq!(
            draw,
            Some(RecordedCommand::DrawIndexed {
                indices: 0..12,
                base_vertex: 0,
                instances: 0..1
            })
        );
    }

    #[test]
    fn test_range_is_clamped() {
        let mut frame = Frame::new();
        frame.add(7, 0);
        frame.add(8, 1);
        sort_visible_mesh_draw_commands(&mut frame.visible);
        let sources = MeshDrawCommandSources::new(&frame.storage, None);
        let resolver = PipelineStateResolver::new(&frame.persistent, &frame.local);
        let mut list = RecordingCommandList::new();
        let stats = submit_mesh_draw_commands_range(
            &frame.visible,
            1..10,
            &sources,
            &resolver,
            &SubmitInfo::default(),
            &mut list,
        )
        .unwrap();
        assert_eq!(stats.visible_commands, 1);
        assert_eq!(list.draw_calls(), 1);
    }

    #[test]
    fn test_commands_without_primitive_id_stream_do_not_merge() {
        let mut frame = Frame::new();
        let batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), false);
        frame.add_batch(&batch, 7, 0, PrimitiveIdMode::FromUniformBuffer);
        frame.add_batch(&batch, 7, 1, PrimitiveIdMode::FromUniformBuffer);
        let (stats, list) = frame.submit(&SubmitInfo::default());

        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.merged_commands, 0);
        assert!(list.draws().all(|draw| draw.instance_count() == Some(1)));
    }

    #[test]
    fn test_instance_overflow_is_an_error() {
        let mut frame = Frame::new();
        let mut batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        batch.elements[0].num_instances = 1 << 31;
        frame.add_batch(&batch, 7, 0, PrimitiveIdMode::FromPrimitiveIdStream);
        frame.add_batch(&batch, 7, 1, PrimitiveIdMode::FromPrimitiveIdStream);

        let mut list = RecordingCommandList::new();
        let result = frame.try_submit(&SubmitInfo::default(), &mut list);
        assert_eq!(result, Err(MeshPassError::DrawCountOverflow));
        assert_eq!(list.draw_calls(), 0);
    }

    #[test]
    fn test_index_range_overflow_is_an_error() {
        let mut frame = Frame::new();
        let mut batch = batch(Arc::new(TestMaterial::new(BlendMode::Opaque)), true);
        batch.elements[0].first_index = u32::MAX - 4;
        frame.add_batch(&batch, 7, 0, PrimitiveIdMode::FromPrimitiveIdStream);

        let mut list = RecordingCommandList::new();
        let result = frame.try_submit(&SubmitInfo::default(), &mut list);
        assert_eq!(result, Err(MeshPassError::DrawCountOverflow));
    }

    #[test]
    fn test_state_cache_skips_redundant_binds() {
        let mut cache = MeshDrawCommandStateCache::new();
        assert!(cache.set_pipeline(PipelineStateId::local(0)));
        assert!(!cache.set_pipeline(PipelineStateId::local(0)));
        assert!(cache.set_vertex_stream(0, BufferId(1), 0));
        assert!(!cache.set_vertex_stream(0, BufferId(1), 0));
        assert!(cache.set_pipeline(PipelineStateId::local(1)));
        assert!(cache.set_vertex_stream(0, BufferId(1), 0));
        assert!(cache.set_vertex_stream(99, BufferId(1), 0));
        assert!(cache.set_vertex_stream(99, BufferId(1), 0));
    }
}
