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

//! Defines the error types of the mesh draw command pipeline.

use crate::draw_list::StateBucketId;
use crate::mesh_pass::MeshPass;
use crate::pass::PassPhase;
use crate::pipeline_state_id::PipelineStateId;
use crate::scene::PrimitiveId;
use crate::shader_bindings::BindingKind;
use khora_core::renderer::{ShaderStage, ShadingPath};
use std::fmt;

/// An error raised while writing or finalizing shader bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderBindingError {
    /// A stage was requested after a later (or the same) stage was already written.
    StageOutOfOrder {
        /// The stage being requested.
        requested: ShaderStage,
        /// The most recently requested stage.
        last: ShaderStage,
    },
    /// The stage has no shader bound, so it has no binding region.
    StageNotBound(ShaderStage),
    /// A resource slot index exceeds the count declared by the stage layout.
    SlotOutOfRange {
        /// The kind of resource being bound.
        kind: BindingKind,
        /// The requested slot.
        slot: u32,
        /// The number of slots in the layout.
        count: u32,
    },
    /// A loose parameter write does not fit the stage's loose data block.
    LooseDataOutOfRange {
        /// Byte offset of the write.
        offset: u32,
        /// Length of the write.
        len: u32,
        /// Size of the loose data block.
        size: u32,
    },
    /// The bindings were already finalized and can no longer change.
    AlreadyFinalized,
    /// The total binding size does not fit the 16-bit layout offsets.
    Overflow {
        /// The size that was computed.
        size: usize,
    },
}

impl fmt::Display for ShaderBindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderBindingError::StageOutOfOrder { requested, last } => write!(
                f,
                "Shader bindings for stage '{requested}' requested after stage '{last}'"
            ),
            ShaderBindingError::StageNotBound(stage) => {
                write!(f, "No shader is bound to stage '{stage}'")
            }
            ShaderBindingError::SlotOutOfRange { kind, slot, count } => write!(
                f,
                "{kind} slot {slot} is out of range (layout has {count})"
            ),
            ShaderBindingError::LooseDataOutOfRange { offset, len, size } => write!(
                f,
                "Loose parameter write of {len} bytes at offset {offset} exceeds {size} bytes"
            ),
            ShaderBindingError::AlreadyFinalized => {
                write!(f, "Shader bindings are already finalized")
            }
            ShaderBindingError::Overflow { size } => {
                write!(f, "Shader bindings of {size} bytes exceed the layout limit")
            }
        }
    }
}

impl std::error::Error for ShaderBindingError {}

/// The top-level error type of the mesh draw command pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshPassError {
    /// A shader binding error.
    ShaderBindings(ShaderBindingError),
    /// A draw command was finalized twice.
    AlreadyFinalized,
    /// A draw command was stored or submitted before being finalized.
    NotFinalized,
    /// The stencil reference does not fit the command's 8-bit field.
    StencilRefOutOfRange(u32),
    /// A persistent pipeline state id was released but is not live in the table.
    UnknownPersistentId(PipelineStateId),
    /// A state bucket was released but does not exist.
    UnknownStateBucket(StateBucketId),
    /// A cached draw command was released but does not exist.
    UnknownCachedCommand,
    /// A visible command references a draw command that cannot be found.
    UnresolvedDrawCommand,
    /// A command's pipeline state id did not resolve against the provided tables.
    UnresolvedPipelineState(PipelineStateId),
    /// No processor is registered for the given shading path and pass.
    ProcessorNotRegistered {
        /// The shading path that was queried.
        shading_path: ShadingPath,
        /// The pass that was queried.
        pass: MeshPass,
    },
    /// A pass operation was called in the wrong phase.
    InvalidPhase {
        /// The phase the operation requires.
        expected: PassPhase,
        /// The phase the pass is in.
        actual: PassPhase,
    },
    /// The primitive id does not refer to a live primitive.
    UnknownPrimitive(PrimitiveId),
    /// A batch element index is outside the mesh batch.
    ElementOutOfRange {
        /// The requested element.
        index: usize,
        /// The number of elements in the batch.
        count: usize,
    },
    /// A draw's instance count or index range does not fit in 32 bits.
    DrawCountOverflow,
    /// Every pipeline state id index is in use.
    PipelineStateTableFull,
    /// The settings could not be parsed.
    Settings(String),
}

impl fmt::Display for MeshPassError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshPassError::ShaderBindings(err) => write!(f, "Shader binding error: {err}"),
            MeshPassError::AlreadyFinalized => write!(f, "Draw command is already finalized"),
            MeshPassError::NotFinalized => write!(f, "Draw command was never finalized"),
            MeshPassError::StencilRefOutOfRange(value) => {
                write!(f, "Stencil reference {value} does not fit in 8 bits")
            }
            MeshPassError::UnknownPersistentId(id) => {
                write!(f, "Persistent pipeline state id {id:?} is not live")
            }
            MeshPassError::UnknownStateBucket(id) => {
                write!(f, "State bucket {id:?} does not exist")
            }
            MeshPassError::UnknownCachedCommand => {
                write!(f, "Cached draw command does not exist")
            }
            MeshPassError::UnresolvedDrawCommand => {
                write!(f, "Visible command references a missing draw command")
            }
            MeshPassError::UnresolvedPipelineState(id) => {
                write!(f, "Pipeline state id {id:?} did not resolve")
            }
            MeshPassError::ProcessorNotRegistered { shading_path, pass } => write!(
                f,
                "No mesh pass processor registered for {pass} on the {shading_path} path"
            ),
            MeshPassError::InvalidPhase { expected, actual } => write!(
                f,
                "Pass operation requires phase {expected:?} but the pass is {actual:?}"
            ),
            MeshPassError::UnknownPrimitive(id) => write!(f, "Primitive {id:?} does not exist"),
            MeshPassError::ElementOutOfRange { index, count } => write!(
                f,
                "Batch element {index} is out of range (batch has {count})"
            ),
            MeshPassError::DrawCountOverflow => {
                write!(f, "Draw instance count or index range overflows 32 bits")
            }
            MeshPassError::PipelineStateTableFull => {
                write!(f, "No pipeline state id indices are left")
            }
            MeshPassError::Settings(msg) => write!(f, "Invalid mesh pass settings: {msg}"),
        }
    }
}

impl std::error::Error for MeshPassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MeshPassError::ShaderBindings(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderBindingError> for MeshPassError {
    fn from(err: ShaderBindingError) -> Self {
        MeshPassError::ShaderBindings(err)
    }
}
