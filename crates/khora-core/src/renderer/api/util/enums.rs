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

//! Generic rendering enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Specifies the data type of indices in an index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// Indices are 16-bit unsigned integers.
    Uint16,
    /// Indices are 32-bit unsigned integers.
    Uint32,
}

impl IndexFormat {
    /// Returns the size in bytes of one index.
    pub const fn size(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// The renderer family a pass processor is registered for.
///
/// Each shading path has its own table of mesh pass processors; the same pass
/// may be implemented differently (or not at all) on each of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadingPath {
    /// The desktop deferred renderer.
    #[default]
    Deferred,
    /// The mobile forward renderer.
    Mobile,
}

impl ShadingPath {
    /// The number of shading paths.
    pub const COUNT: usize = 2;

    /// Every shading path.
    pub const ALL: [ShadingPath; Self::COUNT] = [ShadingPath::Deferred, ShadingPath::Mobile];

    /// Returns the position of this path in [`ShadingPath::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ShadingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShadingPath::Deferred => f.write_str("Deferred"),
            ShadingPath::Mobile => f.write_str("Mobile"),
        }
    }
}
