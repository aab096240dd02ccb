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

//! Pipeline state identity.
//!
//! Draw commands do not store their [`GraphicsMinimalPipelineState`]; they store
//! a small [`PipelineStateId`] interned in one of two tables:
//!
//! - the [`PersistentPipelineStateTable`], shared by the whole scene and
//!   reference counted, which backs cached draw commands that live across frames;
//! - a [`LocalPipelineStateSet`], owned by one pass for one frame, which backs
//!   per-frame draw commands and is simply cleared afterwards.
//!
//! An id only means something relative to the table or set that produced it.
//! A local id must always travel with the set it came from, which is what
//! [`PipelineStateResolver`] bundles. Local ids carry the tag of their set, so
//! resolving one against another set, or after a clear, finds nothing.

use crate::error::MeshPassError;
use khora_core::renderer::GraphicsMinimalPipelineState;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const GENERATION_BITS: u32 = 10;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const LOCAL_BIT: u32 = 1 << 30;
const VALID_BIT: u32 = 1 << 31;

/// The maximum number of distinct pipeline states a table or set can hold.
pub const MAX_PIPELINE_STATES: usize = INDEX_MASK as usize + 1;

type StateMap = HashMap<GraphicsMinimalPipelineState, u32, ahash::RandomState>;

/// A packed 32-bit pipeline state identifier.
///
/// Bit layout, from least significant: 20-bit index, 10-bit generation (the
/// issuing set's tag for local ids), local flag, valid flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineStateId(u32);

impl PipelineStateId {
    /// An id that refers to nothing.
    pub const INVALID: Self = Self(0);

    /// Creates the id of persistent slot `index` at `generation`.
    pub const fn persistent(index: u32, generation: u32) -> Self {
        Self(VALID_BIT | (generation & GENERATION_MASK) << INDEX_BITS | (index & INDEX_MASK))
    }

    /// Creates the id of local entry `index`, untagged.
    pub const fn local(index: u32) -> Self {
        Self::local_tagged(index, 0)
    }

    /// Creates the id of local entry `index` in the set tagged `tag`.
    pub const fn local_tagged(index: u32, tag: u32) -> Self {
        Self(VALID_BIT | LOCAL_BIT | (tag & GENERATION_MASK) << INDEX_BITS | (index & INDEX_MASK))
    }

    /// Returns `false` for [`PipelineStateId::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    /// Returns `true` if the id belongs to a [`LocalPipelineStateSet`].
    pub const fn is_local(self) -> bool {
        self.0 & LOCAL_BIT != 0
    }

    /// The slot index.
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// The slot generation, or the set tag of a local id.
    pub const fn generation(self) -> u32 {
        (self.0 >> INDEX_BITS) & GENERATION_MASK
    }

    /// The packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Default for PipelineStateId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for PipelineStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            f.write_str("PipelineStateId(invalid)")
        } else if self.is_local() {
            write!(f, "PipelineStateId(local {})", self.index())
        } else {
            write!(
                f,
                "PipelineStateId(persistent {} gen {})",
                self.index(),
                self.generation()
            )
        }
    }
}

#[derive(Debug)]
struct PersistentSlot {
    state: Option<GraphicsMinimalPipelineState>,
    ref_count: u32,
    generation: u32,
}

#[derive(Debug, Default)]
struct PersistentTableInner {
    slots: Vec<PersistentSlot>,
    free: Vec<u32>,
    lookup: StateMap,
}

impl PersistentTableInner {
    fn id_of(&self, index: u32) -> PipelineStateId {
        PipelineStateId::persistent(index, self.slots[index as usize].generation)
    }

    fn live_slot(&self, id: PipelineStateId) -> Option<&PersistentSlot> {
        if !id.is_valid() || id.is_local() {
            return None;
        }
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation() && slot.state.is_some())
    }

    fn live_slot_mut(&mut self, id: PipelineStateId) -> Option<&mut PersistentSlot> {
        if !id.is_valid() || id.is_local() {
            return None;
        }
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation() && slot.state.is_some())
    }
}

/// The scene-wide, reference-counted pipeline state table.
///
/// Constructed explicitly and shared through an [`Arc`]. A single lock guards
/// the table; it is written only when cached commands are created or
/// destroyed, and read once per pass submission.
#[derive(Debug)]
pub struct PersistentPipelineStateTable {
    inner: RwLock<PersistentTableInner>,
    capacity: usize,
}

impl Default for PersistentPipelineStateTable {
    fn default() -> Self {
        Self::with_capacity_limit(MAX_PIPELINE_STATES)
    }
}

impl PersistentPipelineStateTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty table holding at most `capacity` states, capped at
    /// [`MAX_PIPELINE_STATES`].
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            inner: RwLock::default(),
            capacity: capacity.min(MAX_PIPELINE_STATES),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, PersistentTableInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, PersistentTableInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interns `state`, adding one reference to its entry.
    ///
    /// A missing state is inserted with a count of one. Fails only when every
    /// index is in use.
    pub fn get_persistent_id(
        &self,
        state: &GraphicsMinimalPipelineState,
    ) -> Result<PipelineStateId, MeshPassError> {
        let mut inner = self.write();
        if let Some(&index) = inner.lookup.get(state) {
            inner.slots[index as usize].ref_count += 1;
            return Ok(inner.id_of(index));
        }

        let index = match inner.free.pop() {
            Some(index) => {
                let slot = &mut inner.slots[index as usize];
                slot.state = Some(*state);
                slot.ref_count = 1;
                index
            }
            None => {
                if inner.slots.len() >= self.capacity {
                    log::warn!(
                        "Persistent pipeline state table is full ({} states)",
                        self.capacity
                    );
                    return Err(MeshPassError::PipelineStateTableFull);
                }
                let index = inner.slots.len() as u32;
                inner.slots.push(PersistentSlot {
                    state: Some(*state),
                    ref_count: 1,
                    generation: 0,
                });
                index
            }
        };
        inner.lookup.insert(*state, index);
        let id = inner.id_of(index);
        log::trace!("Persistent pipeline state {id:?} created");
        Ok(id)
    }

    /// Adds one reference to a live entry.
    pub fn add_ref(&self, id: PipelineStateId) -> Result<(), MeshPassError> {
        let mut inner = self.write();
        let slot = inner
            .live_slot_mut(id)
            .ok_or(MeshPassError::UnknownPersistentId(id))?;
        slot.ref_count += 1;
        Ok(())
    }

    /// Drops one reference, erasing the entry when the count reaches zero.
    ///
    /// Releasing an id that is not live (never issued, already erased, or
    /// belonging to a recycled slot) is an error and leaves the table untouched.
    pub fn remove_persistent_id(&self, id: PipelineStateId) -> Result<(), MeshPassError> {
        let mut inner = self.write();
        let slot = inner
            .live_slot_mut(id)
            .ok_or(MeshPassError::UnknownPersistentId(id))?;
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return Ok(());
        }

        let state = slot.state.take();
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        if let Some(state) = state {
            inner.lookup.remove(&state);
        }
        inner.free.push(id.index());
        log::trace!("Persistent pipeline state {id:?} erased");
        Ok(())
    }

    /// Interns `state` and returns a handle that releases the reference on drop.
    pub fn acquire(
        self: &Arc<Self>,
        state: &GraphicsMinimalPipelineState,
    ) -> Result<PersistentPipelineStateRef, MeshPassError> {
        let id = self.get_persistent_id(state)?;
        Ok(PersistentPipelineStateRef {
            table: Arc::clone(self),
            id,
        })
    }

    /// Returns the id of `state` if it is already interned. Adds no reference.
    pub fn find(&self, state: &GraphicsMinimalPipelineState) -> Option<PipelineStateId> {
        let inner = self.read_inner();
        inner.lookup.get(state).map(|&index| inner.id_of(index))
    }

    /// Returns a copy of the state behind a live id.
    pub fn get(&self, id: PipelineStateId) -> Option<GraphicsMinimalPipelineState> {
        self.read_inner().live_slot(id).and_then(|slot| slot.state)
    }

    /// Returns the reference count of `id`, or zero if it is not live.
    pub fn ref_count(&self, id: PipelineStateId) -> u32 {
        self.read_inner().live_slot(id).map_or(0, |slot| slot.ref_count)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.read_inner().lookup.len()
    }

    /// Returns `true` if no entry is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the table for reading, for resolving many ids without relocking.
    pub fn read(&self) -> PersistentPipelineStateReader<'_> {
        PersistentPipelineStateReader {
            inner: self.read_inner(),
        }
    }
}

/// A read lock on a [`PersistentPipelineStateTable`].
pub struct PersistentPipelineStateReader<'a> {
    inner: RwLockReadGuard<'a, PersistentTableInner>,
}

impl<'a> PersistentPipelineStateReader<'a> {
    /// Returns the state behind a live id.
    pub fn get(&self, id: PipelineStateId) -> Option<&GraphicsMinimalPipelineState> {
        self.inner.live_slot(id).and_then(|slot| slot.state.as_ref())
    }

    /// Returns the id of `state` if it is interned.
    pub fn find(&self, state: &GraphicsMinimalPipelineState) -> Option<PipelineStateId> {
        self.inner
            .lookup
            .get(state)
            .map(|&index| self.inner.id_of(index))
    }
}

/// One reference on a persistent pipeline state, released when dropped.
pub struct PersistentPipelineStateRef {
    table: Arc<PersistentPipelineStateTable>,
    id: PipelineStateId,
}

impl PersistentPipelineStateRef {
    /// The referenced id.
    pub fn id(&self) -> PipelineStateId {
        self.id
    }
}

impl fmt::Debug for PersistentPipelineStateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PersistentPipelineStateRef")
            .field(&self.id)
            .finish()
    }
}

impl Drop for PersistentPipelineStateRef {
    fn drop(&mut self) {
        if let Err(e) = self.table.remove_persistent_id(self.id) {
            log::warn!("Failed to release pipeline state reference: {e}");
        }
    }
}

static NEXT_LOCAL_TAG: AtomicU32 = AtomicU32::new(1);

/// Tags are never zero, so untagged ids resolve against no set.
fn next_local_tag() -> u32 {
    loop {
        let tag = NEXT_LOCAL_TAG.fetch_add(1, Ordering::Relaxed) & GENERATION_MASK;
        if tag != 0 {
            return tag;
        }
    }
}

/// A per-pass, per-frame set of pipeline states. Not reference counted.
///
/// Each set, and each clear of a set, draws a new 10-bit tag stamped into the
/// ids it issues. Tags repeat after 1023 draws.
#[derive(Debug)]
pub struct LocalPipelineStateSet {
    states: Vec<GraphicsMinimalPipelineState>,
    lookup: StateMap,
    tag: u32,
    capacity: usize,
}

impl Default for LocalPipelineStateSet {
    fn default() -> Self {
        Self::with_capacity_limit(MAX_PIPELINE_STATES)
    }
}

impl LocalPipelineStateSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set holding at most `capacity` states, capped at
    /// [`MAX_PIPELINE_STATES`].
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            states: Vec::new(),
            lookup: StateMap::default(),
            tag: next_local_tag(),
            capacity: capacity.min(MAX_PIPELINE_STATES),
        }
    }

    /// Returns the id of `state`, inserting it on a miss.
    pub fn find_or_add(
        &mut self,
        state: &GraphicsMinimalPipelineState,
    ) -> Result<PipelineStateId, MeshPassError> {
        if let Some(&index) = self.lookup.get(state) {
            return Ok(PipelineStateId::local_tagged(index, self.tag));
        }
        if self.states.len() >= self.capacity {
            log::warn!("Local pipeline state set is full ({} states)", self.capacity);
            return Err(MeshPassError::PipelineStateTableFull);
        }
        let index = self.states.len() as u32;
        self.states.push(*state);
        self.lookup.insert(*state, index);
        Ok(PipelineStateId::local_tagged(index, self.tag))
    }

    /// Returns the state behind a local id issued by this set since its last
    /// clear.
    pub fn get(&self, id: PipelineStateId) -> Option<&GraphicsMinimalPipelineState> {
        if !id.is_valid() || !id.is_local() || id.generation() != self.tag {
            return None;
        }
        self.states.get(id.index() as usize)
    }

    /// Returns the number of states in the set.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Empties the set. Every id it issued stops resolving.
    pub fn clear(&mut self) {
        self.states.clear();
        self.lookup.clear();
        self.tag = next_local_tag();
    }
}

/// Returns the id of `state`, preferring the persistent table.
///
/// A state already interned persistently (because some cached command uses it)
/// reuses that id; anything else lands in `local`. No persistent reference is
/// added, so the returned id is only valid while the cached commands keeping
/// the entry alive exist, which holds for the duration of a frame.
pub fn get_pipeline_state_id(
    state: &GraphicsMinimalPipelineState,
    persistent: &PersistentPipelineStateTable,
    local: &mut LocalPipelineStateSet,
) -> Result<PipelineStateId, MeshPassError> {
    match persistent.find(state) {
        Some(id) => Ok(id),
        None => local.find_or_add(state),
    }
}

/// Resolves ids of either kind against one persistent table and one local set.
pub struct PipelineStateResolver<'a> {
    persistent: PersistentPipelineStateReader<'a>,
    local: &'a LocalPipelineStateSet,
}

impl<'a> PipelineStateResolver<'a> {
    /// Locks `persistent` for reading for the lifetime of the resolver.
    pub fn new(
        persistent: &'a PersistentPipelineStateTable,
        local: &'a LocalPipelineStateSet,
    ) -> Self {
        Self {
            persistent: persistent.read(),
            local,
        }
    }

    /// Returns the state behind `id`.
    pub fn resolve(&self, id: PipelineStateId) -> Option<&GraphicsMinimalPipelineState> {
        if id.is_local() {
            self.local.get(id)
        } else {
            self.persistent.get(id)
        }
    }
}

/// Sizes of the pipeline state tables, for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStateStats {
    /// Live persistent entries.
    pub persistent: usize,
    /// Entries in the local set.
    pub local: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use khora_core::renderer::{
        BoundShaderState, CullMode, FillMode, RasterizerState, ShaderModuleId, ShaderStage,
        VertexDeclarationId,
    };

    fn state(module: usize) -> GraphicsMinimalPipelineState {
        GraphicsMinimalPipelineState {
            bound_shader_state: BoundShaderState::new(VertexDeclarationId(1))
                .with_shader(ShaderStage::Vertex, ShaderModuleId(module)),
            rasterizer_state: RasterizerState::new(FillMode::Solid, CullMode::Cw),
            ..Default::default()
        }
    }

    #[test]
    fn test_id_packing() {
        let id = PipelineStateId::persistent(1234, 5);
        assert!(id.is_valid());
        assert!(!id.is_local());
        assert_eq!(id.index(), 1234);
        assert_eq!(id.generation(), 5);

        let local = PipelineStateId::local(9);
        assert!(local.is_local());
        assert_eq!(local.index(), 9);
        assert!(!PipelineStateId::INVALID.is_valid());
    }

    #[test]
    fn test_get_and_remove_restore_cardinality() {
        let table = PersistentPipelineStateTable::new();
        let a = table.get_persistent_id(&state(1)).unwrap();
        let b = table.get_persistent_id(&state(1)).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.ref_count(a), 2);

        table.remove_persistent_id(a).unwrap();
        assert_eq!(table.len(), 1, "entry must survive while referenced");
        assert_eq!(table.get(a), Some(state(1)));

        table.remove_persistent_id(a).unwrap();
        assert!(table.is_empty());
        assert_eq!(
            table.remove_persistent_id(a),
            Err(MeshPassError::UnknownPersistentId(a))
        );
    }

    #[test]
    fn test_recycled_slot_rejects_stale_id() {
        let table = PersistentPipelineStateTable::new();
        let stale = table.get_persistent_id(&state(1)).unwrap();
        table.remove_persistent_id(stale).unwrap();

        let fresh = table.get_persistent_id(&state(2)).unwrap();
        assert_eq!(fresh.index(), stale.index(), "slot is reused");
        assert_ne!(fresh, stale);
        assert_eq!(table.get(stale), None);
        assert!(table.remove_persistent_id(stale).is_err());
        assert_eq!(table.ref_count(fresh), 1);
    }

    #[test]
    fn test_acquire_releases_on_drop() {
        let table = Arc::new(PersistentPipelineStateTable::new());
        let first = table.acquire(&state(3)).unwrap();
        let second = table.acquire(&state(3)).unwrap();
        assert_eq!(table.ref_count(first.id()), 2);
        drop(first);
        assert_eq!(table.ref_count(second.id()), 1);
        drop(second);
        assert!(table.is_empty());
    }

    #[test]
    fn test_local_set_interns_without_counting() {
        let mut local = LocalPipelineStateSet::new();
        let a = local.find_or_add(&state(1)).unwrap();
        let b = local.find_or_add(&state(1)).unwrap();
        let c = local.find_or_add(&state(2)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(local.len(), 2);
        assert_eq!(local.get(c), Some(&state(2)));
        local.clear();
        assert_eq!(local.get(a), None);
    }

    #[test]
    fn test_lookup_prefers_persistent_table() {
        let table = PersistentPipelineStateTable::new();
        let persistent = table.get_persistent_id(&state(1)).unwrap();
        let mut local = LocalPipelineStateSet::new();

        assert_eq!(get_pipeline_state_id(&state(1), &table, &mut local), Ok(persistent));
        let fallback = get_pipeline_state_id(&state(2), &table, &mut local).unwrap();
        assert!(fallback.is_local());
        assert_eq!(local.len(), 1);
        assert_eq!(table.ref_count(persistent), 1, "lookups add no reference");

        let resolver = PipelineStateResolver::new(&table, &local);
        assert_eq!(resolver.resolve(persistent), Some(&state(1)));
        assert_eq!(resolver.resolve(fallback), Some(&state(2)));
    }

    #[test]
    fn test_local_id_does_not_resolve_in_another_set() {
        let mut first = LocalPipelineStateSet::new();
        let mut second = LocalPipelineStateSet::new();
        let id = first.find_or_add(&state(1)).unwrap();
        second.find_or_add(&state(2)).unwrap();

        assert_eq!(second.get(id), None, "another set must not resolve the id");
        assert_eq!(second.get(PipelineStateId::local(id.index())), None);
        assert_eq!(first.get(id), Some(&state(1)));

        first.clear();
        first.find_or_add(&state(2)).unwrap();
        assert_eq!(first.get(id), None, "ids issued before a clear must not resolve");

        let table = PersistentPipelineStateTable::new();
        assert_eq!(PipelineStateResolver::new(&table, &second).resolve(id), None);
    }

    #[test]
    fn test_full_tables_refuse_new_states() {
        let table = PersistentPipelineStateTable::with_capacity_limit(2);
        let a = table.get_persistent_id(&state(1)).unwrap();
        table.get_persistent_id(&state(2)).unwrap();
        assert_eq!(
            table.get_persistent_id(&state(3)),
            Err(MeshPassError::PipelineStateTableFull)
        );
        assert_eq!(table.get_persistent_id(&state(1)), Ok(a), "interned states still resolve");
        assert_eq!(table.get(a), Some(state(1)));

        table.remove_persistent_id(a).unwrap();
        table.remove_persistent_id(a).unwrap();
        assert!(table.get_persistent_id(&state(3)).is_ok(), "freed slots are reused");

        let mut local = LocalPipelineStateSet::with_capacity_limit(1);
        let only = local.find_or_add(&state(1)).unwrap();
        assert_eq!(local.find_or_add(&state(2)), Err(MeshPassError::PipelineStateTableFull));
        assert_eq!(local.get(only), Some(&state(1)));
    }
}
