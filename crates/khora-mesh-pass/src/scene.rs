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

//! Scene primitives and the draw commands cached on their behalf.
//!
//! Adding a primitive runs every cached pass processor of the active shading
//! path over its static meshes once. The resulting commands live in the scene
//! cache until the primitive is removed or updated; each frame only gathers
//! references to them.

use crate::draw_list::{
    CachedMeshDrawCommandInfo, CachedMeshDrawCommands, CachedPassMeshDrawListContext,
    CachedPassStorage,
};
use crate::error::MeshPassError;
use crate::material::MaterialRenderProxy;
use crate::mesh_batch::MeshBatch;
use crate::mesh_pass::{MeshPass, MeshPassMask};
use crate::pass::MeshDrawCommandPass;
use crate::pipeline_state_id::{PersistentPipelineStateTable, PipelineStateStats};
use crate::processor::{PassProcessorCreateInfo, PassProcessorRegistry};
use crate::settings::MeshPassSettings;
use crate::view::ViewInfo;
use crate::visible::VisibleMeshDrawCommand;
use khora_core::renderer::BufferId;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Dense index of a primitive in its scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(u32);

impl PrimitiveId {
    /// Wraps a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index.
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// The per-primitive data processors read while building commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimitiveContext {
    /// The primitive.
    pub id: PrimitiveId,
    /// The primitive's uniform buffer.
    pub uniform_buffer: Option<BufferId>,
    /// World-space origin of the primitive's bounds.
    pub bounds_origin: [f32; 3],
    /// Priority of the primitive's translucent draws. Lower draws first.
    pub translucency_sort_priority: i16,
}

/// What a primitive is created from.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveDesc {
    /// Meshes whose commands are cached.
    pub static_meshes: Vec<MeshBatch>,
    /// The primitive's uniform buffer.
    pub uniform_buffer: Option<BufferId>,
    /// World-space origin of the primitive's bounds.
    pub bounds_origin: [f32; 3],
    /// Priority of the primitive's translucent draws.
    pub translucency_sort_priority: i16,
}

impl PrimitiveDesc {
    fn context(&self, id: PrimitiveId) -> PrimitiveContext {
        PrimitiveContext {
            id,
            uniform_buffer: self.uniform_buffer,
            bounds_origin: self.bounds_origin,
            translucency_sort_priority: self.translucency_sort_priority,
        }
    }
}

/// A primitive registered in a [`Scene`].
#[derive(Debug)]
pub struct PrimitiveSceneInfo {
    id: PrimitiveId,
    desc: PrimitiveDesc,
    pass_mask: MeshPassMask,
    cached_commands: Vec<CachedMeshDrawCommandInfo>,
}

impl PrimitiveSceneInfo {
    /// The primitive's id.
    pub fn id(&self) -> PrimitiveId {
        self.id
    }

    /// The static meshes.
    pub fn static_meshes(&self) -> &[MeshBatch] {
        &self.desc.static_meshes
    }

    /// The passes that hold at least one cached command of this primitive.
    pub fn pass_mask(&self) -> MeshPassMask {
        self.pass_mask
    }

    /// The primitive's cached commands, across every pass.
    pub fn cached_commands(&self) -> &[CachedMeshDrawCommandInfo] {
        &self.cached_commands
    }

    /// The data processors read.
    pub fn context(&self) -> PrimitiveContext {
        self.desc.context(self.id)
    }
}

#[derive(Debug, Default)]
struct PrimitiveTable {
    slots: Vec<Option<PrimitiveSceneInfo>>,
    free: BTreeSet<u32>,
}

impl PrimitiveTable {
    /// Reserves the lowest free id.
    fn allocate(&mut self) -> PrimitiveId {
        match self.free.pop_first() {
            Some(index) => PrimitiveId(index),
            None => {
                self.slots.push(None);
                PrimitiveId(self.slots.len() as u32 - 1)
            }
        }
    }

    fn release(&mut self, id: PrimitiveId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            *slot = None;
            self.free.insert(id.0);
        }
    }

    fn insert(&mut self, info: PrimitiveSceneInfo) {
        let index = info.id.0 as usize;
        debug_assert!(index < self.slots.len() && !self.free.contains(&info.id.0));
        self.slots[index] = Some(info);
    }

    /// Takes the primitive out, keeping its id reserved.
    fn take(&mut self, id: PrimitiveId) -> Option<PrimitiveSceneInfo> {
        self.slots.get_mut(id.0 as usize).and_then(Option::take)
    }

    fn get(&self, id: PrimitiveId) -> Option<&PrimitiveSceneInfo> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Owns the primitives, the persistent pipeline state table and the cached
/// commands of every pass.
pub struct Scene {
    settings: MeshPassSettings,
    registry: PassProcessorRegistry,
    persistent: Arc<PersistentPipelineStateTable>,
    cached: CachedMeshDrawCommands,
    primitives: RwLock<PrimitiveTable>,
    default_material: Option<Arc<dyn MaterialRenderProxy>>,
}

impl Scene {
    /// Creates an empty scene using the built-in processors.
    pub fn new(settings: MeshPassSettings) -> Self {
        Self::with_registry(settings, PassProcessorRegistry::with_default_processors())
    }

    /// Creates an empty scene using the given processors.
    pub fn with_registry(settings: MeshPassSettings, registry: PassProcessorRegistry) -> Self {
        Self {
            settings,
            registry,
            persistent: Arc::new(PersistentPipelineStateTable::new()),
            cached: CachedMeshDrawCommands::new(),
            primitives: RwLock::default(),
            default_material: None,
        }
    }

    /// Sets the material substituted by passes that do not need the real one.
    pub fn with_default_material(mut self, material: Arc<dyn MaterialRenderProxy>) -> Self {
        self.default_material = Some(material);
        self
    }

    fn read_primitives(&self) -> RwLockReadGuard<'_, PrimitiveTable> {
        self.primitives.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_primitives(&self) -> RwLockWriteGuard<'_, PrimitiveTable> {
        self.primitives.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_info<'a>(
        &'a self,
        pass: MeshPass,
        view: Option<&'a ViewInfo>,
    ) -> PassProcessorCreateInfo<'a> {
        PassProcessorCreateInfo {
            pass,
            view,
            settings: &self.settings,
            pass_uniform_buffer: None,
            default_material: self.default_material.clone(),
        }
    }

    fn cache_pass(
        &self,
        pass: MeshPass,
        context: &PrimitiveContext,
        desc: &PrimitiveDesc,
        infos: &mut Vec<CachedMeshDrawCommandInfo>,
    ) -> Result<(), MeshPassError> {
        let mut ctx =
            CachedPassMeshDrawListContext::new(pass, &self.cached, &self.persistent, infos);
        let info = self.create_info(pass, None);
        let mut processor =
            self.registry
                .create_processor(self.settings.shading_path, info, &mut ctx)?;
        for batch in &desc.static_meshes {
            processor.add_mesh_batch(batch, batch.all_elements_mask(), Some(context))?;
        }
        Ok(())
    }

    fn cache_primitive(
        &self,
        context: &PrimitiveContext,
        desc: &PrimitiveDesc,
    ) -> Result<(Vec<CachedMeshDrawCommandInfo>, MeshPassMask), MeshPassError> {
        let mut infos = Vec::new();
        let mut pass_mask = MeshPassMask::new();
        if !self.settings.use_cached_mesh_draw_commands {
            return Ok((infos, pass_mask));
        }

        for pass in self.registry.cached_passes(self.settings.shading_path).iter() {
            let before = infos.len();
            if let Err(e) = self.cache_pass(pass, context, desc, &mut infos) {
                if let Err(release) = self.release_infos(infos) {
                    log::warn!("Failed to roll back cached commands: {release}");
                }
                return Err(e);
            }
            if infos.len() > before {
                pass_mask.set(pass);
            }
        }
        Ok((infos, pass_mask))
    }

    fn release_infos(&self, infos: Vec<CachedMeshDrawCommandInfo>) -> Result<(), MeshPassError> {
        let mut first_error = None;
        for info in infos {
            if let Err(e) = self.cached.remove(info) {
                log::warn!("Failed to release cached draw command: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Adds a primitive and caches its static meshes in every cached pass.
    pub fn add_primitive(&self, desc: PrimitiveDesc) -> Result<PrimitiveId, MeshPassError> {
        let id = self.write_primitives().allocate();
        match self.cache_primitive(&desc.context(id), &desc) {
            Ok((cached_commands, pass_mask)) => {
                log::debug!(
                    "Primitive {} added with {} cached commands",
                    id.0,
                    cached_commands.len()
                );
                self.write_primitives().insert(PrimitiveSceneInfo {
                    id,
                    desc,
                    pass_mask,
                    cached_commands,
                });
                Ok(id)
            }
            Err(e) => {
                self.write_primitives().release(id);
                Err(e)
            }
        }
    }

    /// Adds primitives in parallel on the rayon pool.
    ///
    /// Ids are returned in input order. On error, primitives added before the
    /// failure stay in the scene.
    pub fn add_primitives(
        &self,
        descs: Vec<PrimitiveDesc>,
    ) -> Result<Vec<PrimitiveId>, MeshPassError> {
        descs
            .into_par_iter()
            .map(|desc| self.add_primitive(desc))
            .collect()
    }

    /// Removes a primitive and releases its cached commands.
    pub fn remove_primitive(&self, id: PrimitiveId) -> Result<(), MeshPassError> {
        let info = {
            let mut primitives = self.write_primitives();
            let info = primitives.take(id).ok_or(MeshPassError::UnknownPrimitive(id))?;
            primitives.release(id);
            info
        };
        log::debug!("Primitive {} removed", id.0);
        self.release_infos(info.cached_commands)
    }

    /// Replaces a primitive's description, rebuilding its cached commands
    /// under the same id.
    ///
    /// If releasing the old commands or rebuilding fails, the primitive is
    /// removed and its id freed.
    pub fn update_primitive(
        &self,
        id: PrimitiveId,
        desc: PrimitiveDesc,
    ) -> Result<(), MeshPassError> {
        let old = self
            .write_primitives()
            .take(id)
            .ok_or(MeshPassError::UnknownPrimitive(id))?;
        if let Err(e) = self.release_infos(old.cached_commands) {
            self.write_primitives().release(id);
            return Err(e);
        }

        match self.cache_primitive(&desc.context(id), &desc) {
            Ok((cached_commands, pass_mask)) => {
                self.write_primitives().insert(PrimitiveSceneInfo {
                    id,
                    desc,
                    pass_mask,
                    cached_commands,
                });
                Ok(())
            }
            Err(e) => {
                self.write_primitives().release(id);
                Err(e)
            }
        }
    }

    /// Appends a visible record for every cached command of `pass` owned by
    /// the `visible` primitives. Returns the number of records added.
    ///
    /// With caching disabled, the commands of cached passes are built into
    /// `out` instead.
    pub fn gather_cached_commands(
        &self,
        pass: MeshPass,
        visible: &[PrimitiveId],
        out: &mut MeshDrawCommandPass,
    ) -> Result<usize, MeshPassError> {
        if !self.settings.use_cached_mesh_draw_commands {
            if !self.registry.cached_passes(self.settings.shading_path).get(pass) {
                return Ok(0);
            }
            let before = out.visible().len();
            self.add_dynamic_mesh_commands(pass, None, visible, out)?;
            return Ok(out.visible().len() - before);
        }

        let primitives = self.read_primitives();
        let mut added = 0;
        for &id in visible {
            let primitive = primitives.get(id).ok_or(MeshPassError::UnknownPrimitive(id))?;
            if !primitive.pass_mask.get(pass) {
                continue;
            }
            for info in primitive.cached_commands.iter().filter(|info| info.pass == pass) {
                out.add_visible(VisibleMeshDrawCommand {
                    command: info.command_ref(),
                    sort_key: info.sort_key,
                    draw_primitive_id: id.0,
                    scene_primitive_id: Some(id),
                    primitive_id_buffer_offset: None,
                    state_bucket_id: info.state_bucket_id(),
                    fill_mode: info.fill_mode,
                    cull_mode: info.cull_mode,
                })?;
                added += 1;
            }
        }
        Ok(added)
    }

    /// Builds this frame's commands of `pass` for the static meshes of the
    /// `visible` primitives, for passes that are not cached.
    pub fn add_dynamic_mesh_commands(
        &self,
        pass: MeshPass,
        view: Option<&ViewInfo>,
        visible: &[PrimitiveId],
        out: &mut MeshDrawCommandPass,
    ) -> Result<(), MeshPassError> {
        let primitives = self.read_primitives();
        let mut ctx = out.dynamic_context(&self.persistent)?;
        let info = self.create_info(pass, view);
        let mut processor =
            self.registry
                .create_processor(self.settings.shading_path, info, &mut ctx)?;
        for &id in visible {
            let primitive = primitives.get(id).ok_or(MeshPassError::UnknownPrimitive(id))?;
            let context = primitive.context();
            for batch in primitive.static_meshes() {
                processor.add_mesh_batch(batch, batch.all_elements_mask(), Some(&context))?;
            }
        }
        Ok(())
    }

    /// Locks the cache of `pass` for reading.
    pub fn cached_pass(&self, pass: MeshPass) -> RwLockReadGuard<'_, CachedPassStorage> {
        self.cached.read(pass)
    }

    /// The caches of every pass.
    pub fn cached_commands(&self) -> &CachedMeshDrawCommands {
        &self.cached
    }

    /// The persistent pipeline state table.
    pub fn persistent_table(&self) -> &Arc<PersistentPipelineStateTable> {
        &self.persistent
    }

    /// The processor registry.
    pub fn registry(&self) -> &PassProcessorRegistry {
        &self.registry
    }

    /// The settings.
    pub fn settings(&self) -> &MeshPassSettings {
        &self.settings
    }

    /// Number of primitives.
    pub fn num_primitives(&self) -> usize {
        self.read_primitives().len()
    }

    /// The passes holding cached commands of `id`.
    pub fn primitive_pass_mask(&self, id: PrimitiveId) -> Option<MeshPassMask> {
        self.read_primitives().get(id).map(|p| p.pass_mask)
    }

    /// Number of cached commands held by `id`, across every pass.
    pub fn num_cached_commands(&self, id: PrimitiveId) -> Option<usize> {
        self.read_primitives().get(id).map(|p| p.cached_commands.len())
    }

    /// Size of the persistent table. The scene owns no local set.
    pub fn pipeline_state_stats(&self) -> PipelineStateStats {
        PipelineStateStats {
            persistent: self.persistent.len(),
            local: 0,
        }
    }
}
