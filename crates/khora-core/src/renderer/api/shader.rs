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

//! Shader module handles and the graphics shader stages.

use std::fmt;

/// An opaque handle representing a compiled shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderModuleId(pub usize);

/// A programmable stage of the graphics pipeline.
///
/// The declaration order is the stage *frequency* order. Per-stage shader
/// bindings are laid out, written and submitted in this order, and the derived
/// `Ord` reflects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// The vertex shader stage.
    Vertex,
    /// The tessellation hull (control) stage.
    Hull,
    /// The tessellation domain (evaluation) stage.
    Domain,
    /// The fragment (or pixel) shader stage.
    Fragment,
    /// The geometry shader stage.
    Geometry,
}

impl ShaderStage {
    /// The number of graphics shader stages.
    pub const COUNT: usize = 5;

    /// Every stage, in ascending frequency order.
    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Vertex,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Fragment,
        ShaderStage::Geometry,
    ];

    /// Returns the position of this stage in [`ShaderStage::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns a short human-readable name for the stage.
    pub const fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Hull => "hull",
            ShaderStage::Domain => "domain",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Geometry => "geometry",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
