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

//! The per-frame state of one mesh pass for one view.
//!
//! A [`MeshDrawCommandPass`] moves through three phases every frame:
//!
//! 1. `Building`: visible records are gathered from the scene cache and
//!    per-frame commands are built into the pass's arena.
//! 2. `Finalizing`: records are sorted and the primitive id buffer contents
//!    are laid out.
//! 3. `Submitted`: the records have been turned into draw calls.
//!
//! [`MeshDrawCommandPass::reset`] returns to `Building` for the next frame.

use crate::draw_list::{
    CachedPassStorage, DynamicMeshDrawCommandStorage, DynamicPassMeshDrawListContext,
};
use crate::error::MeshPassError;
use crate::mesh_pass::MeshPass;
use crate::pipeline_state_id::{
    get_pipeline_state_id, LocalPipelineStateSet, PersistentPipelineStateTable,
    PipelineStateResolver, PipelineStateStats,
};
use crate::settings::MeshPassSettings;
use crate::submission::{submit_mesh_draw_commands, SubmitInfo, SubmitStats};
use crate::view::ViewInfo;
use crate::visible::{
    sort_visible_mesh_draw_commands, DrawCommandRef, MeshDrawCommandSources, VisibleMeshDrawCommand,
};
use khora_core::renderer::{FillMode, RenderCommandList};
use std::fmt;

/// Where a [`MeshDrawCommandPass`] is in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    /// Accepting visible records and per-frame commands.
    Building,
    /// Sorted and laid out, ready to submit.
    Finalizing,
    /// Submitted for this frame.
    Submitted,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassPhase::Building => f.write_str("building"),
            PassPhase::Finalizing => f.write_str("finalizing"),
            PassPhase::Submitted => f.write_str("submitted"),
        }
    }
}

/// The visible draws of one pass for one frame, with the storage backing the
/// commands built this frame.
#[derive(Debug)]
pub struct MeshDrawCommandPass {
    pass: MeshPass,
    settings: MeshPassSettings,
    phase: PassPhase,
    storage: DynamicMeshDrawCommandStorage,
    local: LocalPipelineStateSet,
    visible: Vec<VisibleMeshDrawCommand>,
    primitive_ids: Vec<u32>,
}

impl MeshDrawCommandPass {
    /// Creates an empty pass in the `Building` phase.
    pub fn new(pass: MeshPass, settings: &MeshPassSettings) -> Self {
        Self {
            pass,
            settings: settings.clone(),
            phase: PassPhase::Building,
            storage: DynamicMeshDrawCommandStorage::new(settings.dynamic_storage_chunk_size),
            local: LocalPipelineStateSet::new(),
            visible: Vec::new(),
            primitive_ids: Vec::new(),
        }
    }

    fn expect_phase(&self, expected: PassPhase) -> Result<(), MeshPassError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(MeshPassError::InvalidPhase {
                expected,
                actual: self.phase,
            })
        }
    }

    /// The pass.
    pub fn pass(&self) -> MeshPass {
        self.pass
    }

    /// The current phase.
    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    /// A context for building this frame's commands into the pass.
    pub fn dynamic_context<'a>(
        &'a mut self,
        persistent: &'a PersistentPipelineStateTable,
    ) -> Result<DynamicPassMeshDrawListContext<'a>, MeshPassError> {
        self.expect_phase(PassPhase::Building)?;
        Ok(DynamicPassMeshDrawListContext::new(
            &mut self.storage,
            &mut self.visible,
            &mut self.local,
            persistent,
        ))
    }

    /// Appends a visible record.
    pub fn add_visible(&mut self, record: VisibleMeshDrawCommand) -> Result<(), MeshPassError> {
        self.expect_phase(PassPhase::Building)?;
        self.visible.push(record);
        Ok(())
    }

    /// Applies the view's rasterizer overrides to every visible record.
    ///
    /// An affected command is copied into the pass's arena with its pipeline
    /// state re-identified against the local set; the original, which may be
    /// shared through the scene cache, is left untouched. Returns the number
    /// of records redirected.
    pub fn apply_view_overrides(
        &mut self,
        view: &ViewInfo,
        cached: Option<&CachedPassStorage>,
        persistent: &PersistentPipelineStateTable,
    ) -> Result<usize, MeshPassError> {
        self.expect_phase(PassPhase::Building)?;
        if !view.has_rasterizer_overrides() {
            return Ok(0);
        }

        let mut redirected = 0;
        for index in 0..self.visible.len() {
            let record = self.visible[index];
            let fill_mode = if view.wireframe {
                FillMode::Wireframe
            } else {
                record.fill_mode
            };
            let cull_mode = if view.reverse_culling {
                record.cull_mode.inverted()
            } else {
                record.cull_mode
            };
            if fill_mode == record.fill_mode && cull_mode == record.cull_mode {
                continue;
            }

            let source = MeshDrawCommandSources::new(&self.storage, cached)
                .resolve(record.command)
                .ok_or(MeshPassError::UnresolvedDrawCommand)?;
            let source_id = source.pipeline_id();
            let mut state = if source_id.is_local() {
                self.local.get(source_id).copied()
            } else {
                persistent.get(source_id)
            }
            .ok_or(MeshPassError::UnresolvedPipelineState(source_id))?;
            state.rasterizer_state.fill_mode = fill_mode;
            state.rasterizer_state.cull_mode = cull_mode;

            let pipeline_id = get_pipeline_state_id(&state, persistent, &mut self.local)?;
            let command = source.with_pipeline_id(pipeline_id);
            let command_index = self.storage.push(command);
            self.visible[index] = VisibleMeshDrawCommand {
                command: DrawCommandRef::Dynamic(command_index),
                state_bucket_id: None,
                fill_mode,
                cull_mode,
                ..record
            };
            redirected += 1;
        }
        log::trace!("{redirected} commands of {} redirected by view overrides", self.pass);
        Ok(redirected)
    }

    /// Sorts the visible records and lays out the primitive id buffer.
    ///
    /// Record `i` reads its primitive id from entry `i` of
    /// [`MeshDrawCommandPass::primitive_ids`].
    pub fn finalize(&mut self) -> Result<(), MeshPassError> {
        self.expect_phase(PassPhase::Building)?;
        sort_visible_mesh_draw_commands(&mut self.visible);
        self.primitive_ids.clear();
        self.primitive_ids.reserve(self.visible.len());
        for (offset, record) in self.visible.iter_mut().enumerate() {
            record.primitive_id_buffer_offset = Some(offset as u32);
            self.primitive_ids.push(record.draw_primitive_id);
        }
        self.phase = PassPhase::Finalizing;
        log::debug!("{} is {} with {} visible commands", self.pass, self.phase, self.visible.len());
        Ok(())
    }

    /// The primitive id buffer contents, valid once finalized.
    pub fn primitive_ids(&self) -> &[u32] {
        &self.primitive_ids
    }

    /// Records the draws of the pass into `cmd_list`.
    ///
    /// `cached` must be the scene cache of this pass when any record refers to
    /// cached commands.
    pub fn submit(
        &mut self,
        cached: Option<&CachedPassStorage>,
        persistent: &PersistentPipelineStateTable,
        submit_info: &SubmitInfo,
        cmd_list: &mut dyn RenderCommandList,
    ) -> Result<SubmitStats, MeshPassError> {
        self.expect_phase(PassPhase::Finalizing)?;
        let sources = MeshDrawCommandSources::new(&self.storage, cached);
        let resolver = PipelineStateResolver::new(persistent, &self.local);
        let stats =
            submit_mesh_draw_commands(&self.visible, &sources, &resolver, submit_info, cmd_list)?;
        drop(resolver);

        log::debug!(
            "{}: {} visible commands in {} draw calls, {} pipeline binds",
            self.pass,
            stats.visible_commands,
            stats.draw_calls,
            stats.pipeline_binds
        );
        self.phase = PassPhase::Submitted;
        Ok(stats)
    }

    /// Discards this frame's records, commands and local pipeline states.
    pub fn reset(&mut self) {
        self.storage.clear();
        self.local.clear();
        self.visible.clear();
        self.primitive_ids.clear();
        self.phase = PassPhase::Building;
        log::trace!("{} is {}", self.pass, self.phase);
    }

    /// The visible records.
    pub fn visible(&self) -> &[VisibleMeshDrawCommand] {
        &self.visible
    }

    /// The commands built this frame.
    pub fn dynamic_storage(&self) -> &DynamicMeshDrawCommandStorage {
        &self.storage
    }

    /// The submission parameters implied by the pass settings.
    pub fn submit_info(&self) -> SubmitInfo {
        SubmitInfo::from_settings(&self.settings)
    }

    /// Sizes of the pipeline state tables seen by this pass.
    pub fn pipeline_state_stats(
        &self,
        persistent: &PersistentPipelineStateTable,
    ) -> PipelineStateStats {
        PipelineStateStats {
            persistent: persistent.len(),
            local: self.local.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_core::renderer::{CullMode, RecordingCommandList};

    #[test]
    fn test_phase_machine() {
        let table = PersistentPipelineStateTable::new();
        let mut pass = MeshDrawCommandPass::new(MeshPass::BasePass, &MeshPassSettings::default());
        let mut list = RecordingCommandList::new();
        let info = pass.submit_info();

        assert_eq!(
            pass.submit(None, &table, &info, &mut list).err(),
            Some(MeshPassError::InvalidPhase {
                expected: PassPhase::Finalizing,
                actual: PassPhase::Building
            })
        );
        pass.finalize().unwrap();
        assert!(pass.dynamic_context(&table).is_err());
        assert!(pass.finalize().is_err());

        let stats = pass.submit(None, &table, &info, &mut list).unwrap();
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(pass.phase(), PassPhase::Submitted);

        pass.reset();
        assert_eq!(pass.phase(), PassPhase::Building);
    }

    #[test]
    fn test_views_without_overrides_redirect_nothing() {
        let table = PersistentPipelineStateTable::new();
        let mut pass = MeshDrawCommandPass::new(MeshPass::BasePass, &MeshPassSettings::default());
        let redirected = pass
            .apply_view_overrides(&ViewInfo::new([0.0; 3]), None, &table)
            .unwrap();
        assert_eq!(redirected, 0);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(PassPhase::Finalizing.to_string(), "finalizing");
        assert_eq!(CullMode::Cw.inverted(), CullMode::Ccw);
    }
}
