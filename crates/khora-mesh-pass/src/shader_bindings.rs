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

//! Per-draw shader binding storage.
//!
//! Every mesh draw command owns one [`MeshDrawShaderBindings`]: a single byte
//! region holding the bound resources and loose parameters of every shader
//! stage of the draw. The region is sized once, from the stage layouts, and is
//! stored inline when small enough or in exactly one heap allocation otherwise.
//!
//! The region of one stage is laid out as:
//!
//! ```text
//! [ uniform buffer handles | sampler handles | texture handles | loose bytes ]
//!   8 bytes each             8 bytes each      8 bytes each
//! ```
//!
//! Handles are stored as little-endian `u64` values biased by one, so that an
//! all-zero slot reads back as "unbound".
//!
//! Because the region is plain bytes, two draws bind identical state exactly
//! when their regions compare equal. That byte equality is what dynamic
//! instancing relies on.

use crate::error::ShaderBindingError;
use khora_core::renderer::{
    hash_bytes, hash_combine, BufferId, SamplerId, ShaderStage, TextureViewId,
};
use smallvec::SmallVec;
use std::fmt;

/// Bytes of binding data stored without a heap allocation.
pub const INLINE_SHADER_BINDINGS_SIZE: usize = 80;

const HANDLE_SIZE: usize = std::mem::size_of::<u64>();

/// The kind of resource held by a binding slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A uniform (constant) buffer.
    UniformBuffer,
    /// A sampler.
    Sampler,
    /// A texture view.
    Texture,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::UniformBuffer => f.write_str("Uniform buffer"),
            BindingKind::Sampler => f.write_str("Sampler"),
            BindingKind::Texture => f.write_str("Texture"),
        }
    }
}

/// The parameter layout of one compiled shader.
///
/// Produced by the shader compiler alongside the shader itself. Only the slot
/// counts and the size of the loose parameter block matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ShaderBindingsLayout {
    /// Number of uniform buffer slots.
    pub uniform_buffers: u8,
    /// Number of sampler slots.
    pub samplers: u8,
    /// Number of texture slots.
    pub textures: u8,
    /// Size in bytes of the loose parameter block.
    pub loose_data_bytes: u16,
}

impl ShaderBindingsLayout {
    /// A layout with no parameters at all.
    pub const EMPTY: Self = Self::new(0, 0, 0, 0);

    /// Creates a layout.
    pub const fn new(
        uniform_buffers: u8,
        samplers: u8,
        textures: u8,
        loose_data_bytes: u16,
    ) -> Self {
        Self {
            uniform_buffers,
            samplers,
            textures,
            loose_data_bytes,
        }
    }

    fn samplers_offset(&self) -> usize {
        self.uniform_buffers as usize * HANDLE_SIZE
    }

    fn textures_offset(&self) -> usize {
        self.samplers_offset() + self.samplers as usize * HANDLE_SIZE
    }

    fn loose_data_offset(&self) -> usize {
        self.textures_offset() + self.textures as usize * HANDLE_SIZE
    }

    /// Returns the number of bytes this layout occupies in the binding region.
    pub fn data_size(&self) -> usize {
        self.loose_data_offset() + self.loose_data_bytes as usize
    }

    fn hash(&self) -> u32 {
        let counts = u32::from(self.uniform_buffers)
            | u32::from(self.samplers) << 8
            | u32::from(self.textures) << 16;
        hash_combine(counts, u32::from(self.loose_data_bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct StageLayout {
    stage: ShaderStage,
    layout: ShaderBindingsLayout,
    offset: u16,
}

/// Backing memory of a binding region.
#[derive(Clone)]
enum ShaderBindingStorage {
    Inline {
        data: [u8; INLINE_SHADER_BINDINGS_SIZE],
        len: u8,
    },
    Heap(Box<[u8]>),
}

impl ShaderBindingStorage {
    fn zeroed(size: usize) -> Self {
        if size <= INLINE_SHADER_BINDINGS_SIZE {
            ShaderBindingStorage::Inline {
                data: [0; INLINE_SHADER_BINDINGS_SIZE],
                len: size as u8,
            }
        } else {
            ShaderBindingStorage::Heap(vec![0; size].into_boxed_slice())
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            ShaderBindingStorage::Inline { data, len } => &data[..*len as usize],
            ShaderBindingStorage::Heap(data) => data,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            ShaderBindingStorage::Inline { data, len } => &mut data[..*len as usize],
            ShaderBindingStorage::Heap(data) => data,
        }
    }

    fn heap_size(&self) -> usize {
        match self {
            ShaderBindingStorage::Inline { .. } => 0,
            ShaderBindingStorage::Heap(data) => data.len(),
        }
    }
}

impl Default for ShaderBindingStorage {
    fn default() -> Self {
        ShaderBindingStorage::zeroed(0)
    }
}

impl fmt::Debug for ShaderBindingStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderBindingStorage::Inline { len, .. } => write!(f, "Inline({len} bytes)"),
            ShaderBindingStorage::Heap(data) => write!(f, "Heap({} bytes)", data.len()),
        }
    }
}

/// The binding region of every shader stage of one draw.
///
/// Cloning deep-copies the region. Moving transfers a heap region without
/// copying it.
#[derive(Debug, Clone, Default)]
pub struct MeshDrawShaderBindings {
    stages: SmallVec<[StageLayout; ShaderStage::COUNT]>,
    storage: ShaderBindingStorage,
    last_requested: Option<ShaderStage>,
    finalized: bool,
}

impl MeshDrawShaderBindings {
    /// Computes the layout of every stage and allocates the zeroed region.
    ///
    /// `layouts` may be given in any order; regions are laid out in ascending
    /// stage order. Re-initializing an unfinalized instance discards what was
    /// written before.
    pub fn initialize(
        &mut self,
        layouts: &[(ShaderStage, ShaderBindingsLayout)],
    ) -> Result<(), ShaderBindingError> {
        if self.finalized {
            return Err(ShaderBindingError::AlreadyFinalized);
        }

        let mut sorted: SmallVec<[(ShaderStage, ShaderBindingsLayout); ShaderStage::COUNT]> =
            layouts.iter().copied().collect();
        sorted.sort_by_key(|(stage, _)| *stage);
        debug_assert!(
            sorted.windows(2).all(|w| w[0].0 != w[1].0),
            "a stage appears twice in the binding layouts"
        );

        let mut stages = SmallVec::new();
        let mut size = 0usize;
        for (stage, layout) in sorted {
            let offset = u16::try_from(size).map_err(|_| ShaderBindingError::Overflow { size })?;
            stages.push(StageLayout {
                stage,
                layout,
                offset,
            });
            size += layout.data_size();
        }
        if size > u16::MAX as usize {
            return Err(ShaderBindingError::Overflow { size });
        }

        self.stages = stages;
        self.storage = ShaderBindingStorage::zeroed(size);
        self.last_requested = None;
        Ok(())
    }

    /// Returns a writer for the region of `stage`.
    ///
    /// Stages must be requested in strictly ascending order. Requesting a stage
    /// at or before the last one requested is an error, as is requesting a
    /// stage with no shader bound.
    pub fn stage_bindings(
        &mut self,
        stage: ShaderStage,
    ) -> Result<SingleShaderBindings<'_>, ShaderBindingError> {
        if self.finalized {
            return Err(ShaderBindingError::AlreadyFinalized);
        }
        if let Some(last) = self.last_requested {
            if stage <= last {
                return Err(ShaderBindingError::StageOutOfOrder {
                    requested: stage,
                    last,
                });
            }
        }
        let entry = self
            .stages
            .iter()
            .find(|entry| entry.stage == stage)
            .copied()
            .ok_or(ShaderBindingError::StageNotBound(stage))?;

        self.last_requested = Some(stage);
        let start = entry.offset as usize;
        let end = start + entry.layout.data_size();
        Ok(SingleShaderBindings {
            stage,
            layout: entry.layout,
            data: &mut self.storage.as_mut_slice()[start..end],
        })
    }

    /// Locks the bindings. Any later write or second finalize is an error.
    pub fn finalize(&mut self) -> Result<(), ShaderBindingError> {
        if self.finalized {
            return Err(ShaderBindingError::AlreadyFinalized);
        }
        self.finalized = true;
        Ok(())
    }

    /// Returns `true` once [`MeshDrawShaderBindings::finalize`] succeeded.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Returns `true` if both instances have identical layouts and bytes.
    pub fn matches_for_dynamic_instancing(&self, other: &Self) -> bool {
        self.stages == other.stages && self.storage.as_slice() == other.storage.as_slice()
    }

    /// Returns a hash of everything compared by
    /// [`MeshDrawShaderBindings::matches_for_dynamic_instancing`].
    pub fn dynamic_instancing_hash(&self) -> u32 {
        let mut hash = 0;
        for entry in &self.stages {
            hash = hash_combine(hash, entry.stage.index() as u32);
            hash = hash_combine(hash, entry.layout.hash());
        }
        hash_bytes(hash, self.storage.as_slice())
    }

    /// Iterates read-only views of every stage region, in ascending stage order.
    pub fn stages(&self) -> impl Iterator<Item = ShaderBindingsView<'_>> {
        let data = self.storage.as_slice();
        self.stages.iter().map(move |entry| {
            let start = entry.offset as usize;
            ShaderBindingsView {
                stage: entry.stage,
                layout: entry.layout,
                data: &data[start..start + entry.layout.data_size()],
            }
        })
    }

    /// Returns the size of the binding region in bytes.
    pub fn data_size(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// Returns the number of heap bytes owned by the region (zero when inline).
    pub fn allocated_size(&self) -> usize {
        self.storage.heap_size()
    }

    /// Returns `true` if the region lives inline.
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, ShaderBindingStorage::Inline { .. })
    }
}

/// A writer for the binding region of one stage.
pub struct SingleShaderBindings<'a> {
    stage: ShaderStage,
    layout: ShaderBindingsLayout,
    data: &'a mut [u8],
}

impl<'a> SingleShaderBindings<'a> {
    /// The stage this writer belongs to.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// The layout of the stage.
    pub fn layout(&self) -> ShaderBindingsLayout {
        self.layout
    }

    /// Binds a uniform buffer to `slot`.
    pub fn add_uniform_buffer(
        &mut self,
        slot: u32,
        buffer: BufferId,
    ) -> Result<(), ShaderBindingError> {
        let count = self.layout.uniform_buffers as u32;
        self.write_handle(BindingKind::UniformBuffer, 0, count, slot, buffer.0 as u64)
    }

    /// Binds a sampler to `slot`.
    pub fn add_sampler(&mut self, slot: u32, sampler: SamplerId) -> Result<(), ShaderBindingError> {
        let base = self.layout.samplers_offset();
        let count = self.layout.samplers as u32;
        self.write_handle(BindingKind::Sampler, base, count, slot, sampler.0 as u64)
    }

    /// Binds a texture view to `slot`.
    pub fn add_texture(
        &mut self,
        slot: u32,
        texture: TextureViewId,
    ) -> Result<(), ShaderBindingError> {
        let base = self.layout.textures_offset();
        let count = self.layout.textures as u32;
        self.write_handle(BindingKind::Texture, base, count, slot, texture.0 as u64)
    }

    /// Copies `bytes` into the loose parameter block at `offset`.
    pub fn add_loose_data(&mut self, offset: u32, bytes: &[u8]) -> Result<(), ShaderBindingError> {
        let size = u32::from(self.layout.loose_data_bytes);
        let len = bytes.len() as u32;
        let end = offset.checked_add(len).filter(|end| *end <= size).ok_or(
            ShaderBindingError::LooseDataOutOfRange { offset, len, size },
        )?;
        let base = self.layout.loose_data_offset();
        self.data[base + offset as usize..base + end as usize].copy_from_slice(bytes);
        Ok(())
    }

    /// Writes a plain-old-data value into the loose parameter block at `offset`.
    pub fn add_loose_value<T: bytemuck::Pod>(
        &mut self,
        offset: u32,
        value: &T,
    ) -> Result<(), ShaderBindingError> {
        self.add_loose_data(offset, bytemuck::bytes_of(value))
    }

    fn write_handle(
        &mut self,
        kind: BindingKind,
        base: usize,
        count: u32,
        slot: u32,
        handle: u64,
    ) -> Result<(), ShaderBindingError> {
        if slot >= count {
            return Err(ShaderBindingError::SlotOutOfRange { kind, slot, count });
        }
        let start = base + slot as usize * HANDLE_SIZE;
        let encoded = handle.wrapping_add(1).to_le_bytes();
        self.data[start..start + HANDLE_SIZE].copy_from_slice(&encoded);
        Ok(())
    }
}

/// A read-only view of the binding region of one stage.
#[derive(Debug, Clone, Copy)]
pub struct ShaderBindingsView<'a> {
    stage: ShaderStage,
    layout: ShaderBindingsLayout,
    data: &'a [u8],
}

impl<'a> ShaderBindingsView<'a> {
    /// The stage of this region.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// The layout of this region.
    pub fn layout(&self) -> ShaderBindingsLayout {
        self.layout
    }

    /// Iterates the bound uniform buffers as `(slot, buffer)`, skipping unbound slots.
    pub fn uniform_buffers(&self) -> impl Iterator<Item = (u32, BufferId)> + 'a {
        self.handles(0, self.layout.uniform_buffers)
            .map(|(slot, h)| (slot, BufferId(h as usize)))
    }

    /// Iterates the bound samplers as `(slot, sampler)`, skipping unbound slots.
    pub fn samplers(&self) -> impl Iterator<Item = (u32, SamplerId)> + 'a {
        self.handles(self.layout.samplers_offset(), self.layout.samplers)
            .map(|(slot, h)| (slot, SamplerId(h as usize)))
    }

    /// Iterates the bound textures as `(slot, texture)`, skipping unbound slots.
    pub fn textures(&self) -> impl Iterator<Item = (u32, TextureViewId)> + 'a {
        self.handles(self.layout.textures_offset(), self.layout.textures)
            .map(|(slot, h)| (slot, TextureViewId(h as usize)))
    }

    /// The loose parameter block.
    pub fn loose_data(&self) -> &'a [u8] {
        &self.data[self.layout.loose_data_offset()..]
    }

    fn handles(&self, base: usize, count: u8) -> impl Iterator<Item = (u32, u64)> + 'a {
        let data = self.data;
        (0..count as usize).filter_map(move |slot| {
            let start = base + slot * HANDLE_SIZE;
            let mut bytes = [0u8; HANDLE_SIZE];
            bytes.copy_from_slice(&data[start..start + HANDLE_SIZE]);
            match u64::from_le_bytes(bytes) {
                0 => None,
                encoded => Some((slot as u32, encoded - 1)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_layouts(loose: u16) -> Vec<(ShaderStage, ShaderBindingsLayout)> {
        vec![
            (ShaderStage::Fragment, ShaderBindingsLayout::new(1, 1, 1, loose)),
            (ShaderStage::Vertex, ShaderBindingsLayout::new(2, 0, 0, 0)),
        ]
    }

    fn write_sample(bindings: &mut MeshDrawShaderBindings, texture: usize) {
        let mut vs = bindings.stage_bindings(ShaderStage::Vertex).unwrap();
        vs.add_uniform_buffer(0, BufferId(7)).unwrap();
        let mut ps = bindings.stage_bindings(ShaderStage::Fragment).unwrap();
        ps.add_texture(0, TextureViewId(texture)).unwrap();
        ps.add_sampler(0, SamplerId(3)).unwrap();
    }

    #[test]
    fn test_small_layout_is_inline() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        // 2 + 3 handles of 8 bytes.
        assert_eq!(bindings.data_size(), 40);
        assert!(bindings.is_inline());
        assert_eq!(bindings.allocated_size(), 0);
    }

    #[test]
    fn test_large_layout_uses_one_heap_allocation() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(64)).unwrap();
        assert!(!bindings.is_inline());
        assert_eq!(bindings.allocated_size(), 104);
    }

    #[test]
    fn test_stages_must_be_requested_in_ascending_order() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        bindings.stage_bindings(ShaderStage::Fragment).unwrap();
        let err = bindings.stage_bindings(ShaderStage::Vertex).err();
        assert_eq!(
            err,
            Some(ShaderBindingError::StageOutOfOrder {
                requested: ShaderStage::Vertex,
                last: ShaderStage::Fragment,
            })
        );
    }

    #[test]
    fn test_same_stage_twice_is_rejected() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        bindings.stage_bindings(ShaderStage::Vertex).unwrap();
        assert!(bindings.stage_bindings(ShaderStage::Vertex).is_err());
    }

    #[test]
    fn test_unbound_stage_is_rejected() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        assert_eq!(
            bindings.stage_bindings(ShaderStage::Hull).err(),
            Some(ShaderBindingError::StageNotBound(ShaderStage::Hull))
        );
    }

    #[test]
    fn test_slot_and_loose_data_bounds_are_checked() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(8)).unwrap();
        let mut ps = bindings.stage_bindings(ShaderStage::Fragment).unwrap();
        assert!(matches!(
            ps.add_uniform_buffer(1, BufferId(0)),
            Err(ShaderBindingError::SlotOutOfRange { slot: 1, count: 1, .. })
        ));
        assert!(ps.add_loose_value(4, &1.5f32).is_ok());
        assert!(matches!(
            ps.add_loose_data(6, &[0; 4]),
            Err(ShaderBindingError::LooseDataOutOfRange { .. })
        ));
    }

    #[test]
    fn test_finalize_locks_bindings() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        bindings.finalize().unwrap();
        assert!(bindings.is_finalized());
        assert_eq!(bindings.finalize(), Err(ShaderBindingError::AlreadyFinalized));
        assert!(bindings.stage_bindings(ShaderStage::Vertex).is_err());
    }

    #[test]
    fn test_matching_bindings_hash_equal() {
        let mut a = MeshDrawShaderBindings::default();
        a.initialize(&two_stage_layouts(0)).unwrap();
        write_sample(&mut a, 5);
        let mut b = MeshDrawShaderBindings::default();
        b.initialize(&two_stage_layouts(0)).unwrap();
        write_sample(&mut b, 5);

        assert!(a.matches_for_dynamic_instancing(&b));
        assert_eq!(a.dynamic_instancing_hash(), b.dynamic_instancing_hash());

        let mut c = MeshDrawShaderBindings::default();
        c.initialize(&two_stage_layouts(0)).unwrap();
        write_sample(&mut c, 6);
        assert!(!a.matches_for_dynamic_instancing(&c));
    }

    #[test]
    fn test_match_implies_equal_hash_inline_and_heap() {
        fn build(loose: u16, texture: usize, value: f32) -> MeshDrawShaderBindings {
            let mut bindings = MeshDrawShaderBindings::default();
            bindings.initialize(&two_stage_layouts(loose)).unwrap();
            let mut vs = bindings.stage_bindings(ShaderStage::Vertex).unwrap();
            vs.add_uniform_buffer(0, BufferId(7)).unwrap();
            let mut ps = bindings.stage_bindings(ShaderStage::Fragment).unwrap();
            ps.add_texture(0, TextureViewId(texture)).unwrap();
            if loose > 0 {
                ps.add_loose_value(0, &value).unwrap();
            }
            bindings.finalize().unwrap();
            bindings
        }

        for loose in [0, 64] {
            let a = build(loose, 5, 1.0);
            let b = build(loose, 5, 1.0);
            assert_eq!(a.is_inline(), loose == 0);
            assert!(a.matches_for_dynamic_instancing(&b));
            assert_eq!(a.dynamic_instancing_hash(), b.dynamic_instancing_hash());

            let copy = a.clone();
            assert!(copy.matches_for_dynamic_instancing(&a));
            assert_eq!(copy.dynamic_instancing_hash(), a.dynamic_instancing_hash());

            assert!(!a.matches_for_dynamic_instancing(&build(loose, 6, 1.0)));
        }

        let heap = build(64, 5, 1.0);
        assert!(!heap.matches_for_dynamic_instancing(&build(64, 5, 2.0)));
        assert!(!heap.matches_for_dynamic_instancing(&build(0, 5, 1.0)));
    }

    #[test]
    fn test_views_read_back_bound_handles() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(0)).unwrap();
        write_sample(&mut bindings, 0);

        let views: Vec<_> = bindings.stages().collect();
        assert_eq!(views[0].stage(), ShaderStage::Vertex);
        let ubs: Vec<_> = views[0].uniform_buffers().collect();
        // Slot 1 was never written and reads back as unbound.
        assert_eq!(ubs, vec![(0, BufferId(7))]);
        let textures: Vec<_> = views[1].textures().collect();
        assert_eq!(textures, vec![(0, TextureViewId(0))]);
    }

    #[test]
    fn test_clone_is_deep_and_move_keeps_heap_region() {
        let mut bindings = MeshDrawShaderBindings::default();
        bindings.initialize(&two_stage_layouts(64)).unwrap();
        let before = bindings.storage.as_slice().as_ptr();

        let cloned = bindings.clone();
        assert_ne!(cloned.storage.as_slice().as_ptr(), before);

        let moved = bindings;
        assert_eq!(moved.storage.as_slice().as_ptr(), before);
    }
}
