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

//! Draw commands cached across frames.
//!
//! Each mesh pass owns a [`CachedPassStorage`] with two containers:
//!
//! - a list of unique commands, for commands that bind per-primitive data;
//! - a map of state buckets, where content-identical commands built by
//!   different primitives collapse into one reference-counted entry.
//!
//! Every cached command is described, on the primitive side, by a
//! [`CachedMeshDrawCommandInfo`] that knows how to find and release it.

use super::{FinalizeCommandInfo, MeshPassDrawListContext, PrimitiveIdMode};
use crate::draw_command::MeshDrawCommand;
use crate::error::MeshPassError;
use crate::mesh_pass::MeshPass;
use crate::pipeline_state_id::{
    PersistentPipelineStateRef, PersistentPipelineStateTable, PipelineStateId,
};
use crate::sort_key::MeshDrawCommandSortKey;
use crate::visible::DrawCommandRef;
use khora_core::renderer::{CullMode, FillMode};
use slotmap::{new_key_type, SlotMap};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

new_key_type! {
    /// Identifies a state bucket within one pass.
    pub struct StateBucketId;
    /// Identifies a unique cached command within one pass.
    pub struct CachedCommandKey;
}

#[derive(Debug)]
struct StateBucket {
    command: MeshDrawCommand,
    ref_count: u32,
}

/// Reference-counted storage of commands shared between primitives.
///
/// Lookup goes through [`MeshDrawCommand::dynamic_instancing_hash`]; equality
/// is decided by [`MeshDrawCommand::matches_for_dynamic_instancing`], so two
/// commands share a bucket exactly when they could be instanced together.
#[derive(Debug, Default)]
pub struct StateBucketMap {
    buckets: SlotMap<StateBucketId, StateBucket>,
    by_hash: HashMap<u32, SmallVec<[StateBucketId; 1]>, ahash::RandomState>,
}

impl StateBucketMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bucket matching `command`, adding one reference, or inserts
    /// a new bucket with one reference. The flag is `true` on insertion.
    pub fn find_or_add(&mut self, command: MeshDrawCommand) -> (StateBucketId, bool) {
        let hash = command.dynamic_instancing_hash();
        let candidates = self.by_hash.entry(hash).or_default();
        for &id in candidates.iter() {
            if let Some(bucket) = self.buckets.get_mut(id) {
                if bucket.command.matches_for_dynamic_instancing(&command) {
                    bucket.ref_count += 1;
                    return (id, false);
                }
            }
        }

        let id = self.buckets.insert(StateBucket {
            command,
            ref_count: 1,
        });
        candidates.push(id);
        (id, true)
    }

    /// Drops one reference. Returns `true` if the bucket was erased.
    pub fn release(&mut self, id: StateBucketId) -> Result<bool, MeshPassError> {
        let bucket = self
            .buckets
            .get_mut(id)
            .ok_or(MeshPassError::UnknownStateBucket(id))?;
        bucket.ref_count -= 1;
        if bucket.ref_count > 0 {
            return Ok(false);
        }

        if let Some(bucket) = self.buckets.remove(id) {
            let hash = bucket.command.dynamic_instancing_hash();
            if let Some(candidates) = self.by_hash.get_mut(&hash) {
                candidates.retain(|candidate| *candidate != id);
                if candidates.is_empty() {
                    self.by_hash.remove(&hash);
                }
            }
        }
        Ok(true)
    }

    /// The command of bucket `id`.
    pub fn get(&self, id: StateBucketId) -> Option<&MeshDrawCommand> {
        self.buckets.get(id).map(|bucket| &bucket.command)
    }

    /// The reference count of bucket `id`, or zero if it does not exist.
    pub fn ref_count(&self, id: StateBucketId) -> u32 {
        self.buckets.get(id).map_or(0, |bucket| bucket.ref_count)
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if there is no bucket.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Cached commands owned by a single primitive.
#[derive(Debug, Default)]
pub struct CachedPassMeshDrawList {
    commands: SlotMap<CachedCommandKey, MeshDrawCommand>,
}

impl CachedPassMeshDrawList {
    /// Stores a command.
    pub fn insert(&mut self, command: MeshDrawCommand) -> CachedCommandKey {
        self.commands.insert(command)
    }

    /// Removes a command, returning it.
    pub fn remove(&mut self, key: CachedCommandKey) -> Option<MeshDrawCommand> {
        self.commands.remove(key)
    }

    /// The command at `key`.
    pub fn get(&self, key: CachedCommandKey) -> Option<&MeshDrawCommand> {
        self.commands.get(key)
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if there is no command.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// The cache of one mesh pass.
#[derive(Debug, Default)]
pub struct CachedPassStorage {
    draw_list: CachedPassMeshDrawList,
    state_buckets: StateBucketMap,
}

impl CachedPassStorage {
    /// Commands owned by single primitives.
    pub fn draw_list(&self) -> &CachedPassMeshDrawList {
        &self.draw_list
    }

    /// Commands shared between primitives.
    pub fn state_buckets(&self) -> &StateBucketMap {
        &self.state_buckets
    }

    /// Resolves a cached command reference. Dynamic references resolve to `None`.
    pub fn get(&self, command: DrawCommandRef) -> Option<&MeshDrawCommand> {
        match command {
            DrawCommandRef::Cached(key) => self.draw_list.get(key),
            DrawCommandRef::StateBucket(id) => self.state_buckets.get(id),
            DrawCommandRef::Dynamic(_) => None,
        }
    }

    /// Total number of cached commands.
    pub fn len(&self) -> usize {
        self.draw_list.len() + self.state_buckets.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where a cached command lives inside its pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedCommandLocation {
    /// In the unique list.
    Unique(CachedCommandKey),
    /// In a shared state bucket.
    StateBucket(StateBucketId),
}

/// A primitive's handle on one cached command.
///
/// Holds one reference on the command's persistent pipeline state, released
/// when the info is dropped.
#[derive(Debug)]
pub struct CachedMeshDrawCommandInfo {
    /// The pass the command belongs to.
    pub pass: MeshPass,
    /// Pass-specific ordering.
    pub sort_key: MeshDrawCommandSortKey,
    /// Where the command lives.
    pub location: CachedCommandLocation,
    /// Fill mode the command was built with.
    pub fill_mode: FillMode,
    /// Cull mode the command was built with.
    pub cull_mode: CullMode,
    pipeline: PersistentPipelineStateRef,
}

impl CachedMeshDrawCommandInfo {
    /// The persistent pipeline state id of the command.
    pub fn pipeline_id(&self) -> PipelineStateId {
        self.pipeline.id()
    }

    /// The bucket of the command, if it is shared.
    pub fn state_bucket_id(&self) -> Option<StateBucketId> {
        match self.location {
            CachedCommandLocation::StateBucket(id) => Some(id),
            CachedCommandLocation::Unique(_) => None,
        }
    }

    /// A reference usable in visible records.
    pub fn command_ref(&self) -> DrawCommandRef {
        match self.location {
            CachedCommandLocation::Unique(key) => DrawCommandRef::Cached(key),
            CachedCommandLocation::StateBucket(id) => DrawCommandRef::StateBucket(id),
        }
    }
}

/// The caches of every mesh pass, one lock per pass.
#[derive(Debug)]
pub struct CachedMeshDrawCommands {
    passes: [RwLock<CachedPassStorage>; MeshPass::COUNT],
}

impl Default for CachedMeshDrawCommands {
    fn default() -> Self {
        Self {
            passes: std::array::from_fn(|_| RwLock::default()),
        }
    }
}

impl CachedMeshDrawCommands {
    /// Creates empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the cache of `pass` for reading.
    pub fn read(&self, pass: MeshPass) -> RwLockReadGuard<'_, CachedPassStorage> {
        self.passes[pass.index()]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the cache of `pass` for writing.
    pub fn write(&self, pass: MeshPass) -> RwLockWriteGuard<'_, CachedPassStorage> {
        self.passes[pass.index()]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the command behind `info`: drops one bucket reference (erasing
    /// the bucket at zero) or removes the unique command. The pipeline state
    /// reference is released with `info`.
    pub fn remove(&self, info: CachedMeshDrawCommandInfo) -> Result<(), MeshPassError> {
        let mut storage = self.write(info.pass);
        match info.location {
            CachedCommandLocation::StateBucket(id) => {
                if storage.state_buckets.release(id)? {
                    log::trace!("State bucket {id:?} of {} erased", info.pass);
                }
            }
            CachedCommandLocation::Unique(key) => {
                storage
                    .draw_list
                    .remove(key)
                    .ok_or(MeshPassError::UnknownCachedCommand)?;
            }
        }
        Ok(())
    }
}

/// Stores commands built when a primitive is added into the scene cache.
///
/// Commands drawn through the primitive id stream go to state buckets; the
/// others bind per-primitive data and go to the unique list.
pub struct CachedPassMeshDrawListContext<'a> {
    pass: MeshPass,
    commands: &'a CachedMeshDrawCommands,
    persistent: &'a Arc<PersistentPipelineStateTable>,
    infos: &'a mut Vec<CachedMeshDrawCommandInfo>,
}

impl<'a> CachedPassMeshDrawListContext<'a> {
    /// Creates a context caching into `pass` and collecting infos into `infos`.
    pub fn new(
        pass: MeshPass,
        commands: &'a CachedMeshDrawCommands,
        persistent: &'a Arc<PersistentPipelineStateTable>,
        infos: &'a mut Vec<CachedMeshDrawCommandInfo>,
    ) -> Self {
        Self {
            pass,
            commands,
            persistent,
            infos,
        }
    }
}

impl MeshPassDrawListContext for CachedPassMeshDrawListContext<'_> {
    fn finalize_command(
        &mut self,
        mut command: MeshDrawCommand,
        info: FinalizeCommandInfo<'_>,
    ) -> Result<(), MeshPassError> {
        let pipeline = self.persistent.acquire(info.pipeline_state)?;
        command.set_draw_parameters_and_finalize(info.batch, info.element_index, pipeline.id())?;

        let mut storage = self.commands.write(self.pass);
        let location = match info.primitive_id_mode {
            PrimitiveIdMode::FromPrimitiveIdStream => {
                let (id, inserted) = storage.state_buckets.find_or_add(command);
                if inserted {
                    log::trace!("State bucket {id:?} of {} created", self.pass);
                }
                CachedCommandLocation::StateBucket(id)
            }
            PrimitiveIdMode::FromUniformBuffer => {
                CachedCommandLocation::Unique(storage.draw_list.insert(command))
            }
        };
        drop(storage);

        self.infos.push(CachedMeshDrawCommandInfo {
            pass: self.pass,
            sort_key: info.sort_key,
            location,
            fill_mode: info.fill_mode,
            cull_mode: info.cull_mode,
            pipeline,
        });
        Ok(())
    }
}
