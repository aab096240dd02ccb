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

//! # Khora Mesh Pass
//!
//! The mesh draw command pipeline. It turns the mesh batches of scene
//! primitives into sorted, merged draw calls on a
//! [`RenderCommandList`](khora_core::renderer::RenderCommandList).
//!
//! - **Processors** ([`processor`]) decide, per pass, whether a batch is drawn
//!   and with which shaders and fixed-function state, then build
//!   [`MeshDrawCommand`]s.
//! - **Draw list contexts** ([`draw_list`]) finalize those commands: either
//!   into the per-frame arena of a [`MeshDrawCommandPass`] or into the scene
//!   cache, where identical commands share a state bucket.
//! - **Pipeline state ids** ([`pipeline_state_id`]) give every distinct
//!   pipeline state a small integer so commands compare cheaply.
//! - **Submission** ([`submission`]) walks the sorted records, merges runs of
//!   matching commands into instanced draws and skips redundant binds.
//!
//! A [`Scene`] owns the cache and the processor registry; a frame builds one
//! [`MeshDrawCommandPass`] per pass and view.

#![warn(missing_docs)]

pub mod draw_command;
pub mod draw_list;
pub mod error;
pub mod material;
pub mod mesh_batch;
pub mod mesh_pass;
pub mod pass;
pub mod pipeline_state_id;
pub mod processor;
pub mod scene;
pub mod settings;
pub mod shader_bindings;
pub mod sort_key;
pub mod submission;
pub mod view;
pub mod visible;

pub use draw_command::{DrawArguments, MeshDrawCommand, VertexInputStream};
pub use error::{MeshPassError, ShaderBindingError};
pub use material::{BlendMode, MaterialRenderProxy, MeshProcessorShaders, MeshShader};
pub use mesh_batch::{MeshBatch, MeshBatchElement, VertexFactory};
pub use mesh_pass::{MeshPass, MeshPassFlags, MeshPassMask};
pub use pass::{MeshDrawCommandPass, PassPhase};
pub use pipeline_state_id::{PersistentPipelineStateTable, PipelineStateId};
pub use processor::{MeshPassProcessor, PassProcessorCreateInfo, PassProcessorRegistry};
pub use scene::{PrimitiveDesc, PrimitiveId, Scene};
pub use settings::MeshPassSettings;
pub use submission::{SubmitInfo, SubmitStats};
pub use view::ViewInfo;
pub use visible::VisibleMeshDrawCommand;
