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

//! Mesh pass identities, pass masks and pass flags.

use std::fmt;
use std::ops::BitOr;

/// A rendering stage that maintains its own list of mesh draw commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MeshPass {
    /// Depth-only prepass.
    DepthPass,
    /// Depth rendered from the rain occlusion view.
    RainDepthPass,
    /// Opaque and masked geometry writing the material attributes.
    BasePass,
    /// Sky geometry.
    SkyPass,
    /// Single-layer water surfaces.
    SingleLayerWaterPass,
    /// Cascaded shadow map depth.
    CsmShadowDepth,
    /// Refraction distortion.
    Distortion,
    /// Per-pixel velocity of moving opaque geometry.
    Velocity,
    /// Per-pixel velocity of translucent geometry.
    TranslucentVelocity,
    /// Translucency rendered before depth of field.
    TranslucencyStandard,
    /// Translucency rendered after depth of field.
    TranslucencyAfterDof,
    /// All translucency in a single pass.
    TranslucencyAll,
    /// Custom depth/stencil.
    CustomDepth,
    /// Mobile base pass receiving cascaded shadows.
    MobileBasePassCsm,
}

impl MeshPass {
    /// The number of mesh passes.
    pub const COUNT: usize = 14;

    /// Every pass, in declaration order.
    pub const ALL: [MeshPass; Self::COUNT] = [
        MeshPass::DepthPass,
        MeshPass::RainDepthPass,
        MeshPass::BasePass,
        MeshPass::SkyPass,
        MeshPass::SingleLayerWaterPass,
        MeshPass::CsmShadowDepth,
        MeshPass::Distortion,
        MeshPass::Velocity,
        MeshPass::TranslucentVelocity,
        MeshPass::TranslucencyStandard,
        MeshPass::TranslucencyAfterDof,
        MeshPass::TranslucencyAll,
        MeshPass::CustomDepth,
        MeshPass::MobileBasePassCsm,
    ];

    /// Returns the position of this pass in [`MeshPass::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the pass at `index`, if any.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Returns the display name of the pass.
    pub const fn name(self) -> &'static str {
        match self {
            MeshPass::DepthPass => "DepthPass",
            MeshPass::RainDepthPass => "RainDepthPass",
            MeshPass::BasePass => "BasePass",
            MeshPass::SkyPass => "SkyPass",
            MeshPass::SingleLayerWaterPass => "SingleLayerWaterPass",
            MeshPass::CsmShadowDepth => "CSMShadowDepth",
            MeshPass::Distortion => "Distortion",
            MeshPass::Velocity => "Velocity",
            MeshPass::TranslucentVelocity => "TranslucentVelocity",
            MeshPass::TranslucencyStandard => "TranslucencyStandard",
            MeshPass::TranslucencyAfterDof => "TranslucencyAfterDOF",
            MeshPass::TranslucencyAll => "TranslucencyAll",
            MeshPass::CustomDepth => "CustomDepth",
            MeshPass::MobileBasePassCsm => "MobileBasePassCSM",
        }
    }

    /// Returns `true` for the passes drawing translucent materials.
    pub const fn is_translucency(self) -> bool {
        matches!(
            self,
            MeshPass::TranslucencyStandard
                | MeshPass::TranslucencyAfterDof
                | MeshPass::TranslucencyAll
        )
    }
}

impl fmt::Display for MeshPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const _: () = assert!(MeshPass::COUNT <= u32::BITS as usize);

/// A set of mesh passes, one bit per pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshPassMask {
    data: u32,
}

impl MeshPassMask {
    /// An empty mask.
    pub const fn new() -> Self {
        Self { data: 0 }
    }

    /// Adds `pass` to the set.
    pub fn set(&mut self, pass: MeshPass) {
        self.data |= 1 << pass.index();
    }

    /// Returns `true` if `pass` is in the set.
    pub fn get(&self, pass: MeshPass) -> bool {
        self.data & (1 << pass.index()) != 0
    }

    /// Returns the first pass in the set at or after `start`.
    pub fn skip_empty(&self, start: MeshPass) -> Option<MeshPass> {
        let remaining = self.data & (u32::MAX << start.index());
        if remaining == 0 {
            None
        } else {
            MeshPass::from_index(remaining.trailing_zeros() as usize)
        }
    }

    /// Returns the number of passes in the set.
    pub fn count(&self) -> u32 {
        self.data.count_ones()
    }

    /// Adds every pass of this set to `other`.
    pub fn append_to(&self, other: &mut MeshPassMask) {
        other.data |= self.data;
    }

    /// Removes every pass.
    pub fn reset(&mut self) {
        self.data = 0;
    }

    /// Returns `true` if no pass is set.
    pub fn is_empty(&self) -> bool {
        self.data == 0
    }

    /// Iterates the passes in the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = MeshPass> + '_ {
        MeshPass::ALL.into_iter().filter(move |pass| self.get(*pass))
    }
}

impl FromIterator<MeshPass> for MeshPassMask {
    fn from_iter<I: IntoIterator<Item = MeshPass>>(iter: I) -> Self {
        let mut mask = MeshPassMask::new();
        for pass in iter {
            mask.set(pass);
        }
        mask
    }
}

/// Flags a pass processor is registered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MeshPassFlags {
    bits: u8,
}

impl MeshPassFlags {
    /// No flags.
    pub const NONE: Self = Self { bits: 0 };
    /// Static meshes of this pass are cached when a primitive is added.
    pub const CACHED_MESH_COMMANDS: Self = Self { bits: 1 << 0 };
    /// The pass renders for the main view.
    pub const MAIN_VIEW: Self = Self { bits: 1 << 1 };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// Returns the union of both sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }
}

impl BitOr for MeshPassFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}
