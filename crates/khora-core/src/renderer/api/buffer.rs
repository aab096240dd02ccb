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

//! Defines handles for GPU buffers and the bindings that reference them.

use super::util::IndexFormat;

/// An opaque handle to a GPU buffer resource.
///
/// The handle is created by a graphics backend and is only ever compared or
/// copied by the mesh pass pipeline. Its integer value is what gets written into
/// shader binding storage, so two draws that bind the same buffer produce the
/// same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub usize);

/// An index buffer together with the format of its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexBufferBinding {
    /// The buffer holding the indices.
    pub buffer: BufferId,
    /// The width of each index.
    pub format: IndexFormat,
}

impl IndexBufferBinding {
    /// Creates a new binding for `buffer` with elements of `format`.
    pub const fn new(buffer: BufferId, format: IndexFormat) -> Self {
        Self { buffer, format }
    }
}
