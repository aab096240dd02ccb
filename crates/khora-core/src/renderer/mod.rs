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

//! Provides the public, backend-agnostic rendering contracts for the Khora Engine.
//!
//! This module defines the "common language" spoken between the mesh pass
//! pipeline and a graphics backend. It contains opaque resource handles, the
//! minimal pipeline state descriptor used as the identity of a pipeline state
//! object, and the [`RenderCommandList`] trait that receives the final, sorted
//! and merged draw calls.
//!
//! The 'how' of executing those calls is left to a concrete backend which
//! implements [`RenderCommandList`]. A [`RecordingCommandList`] is provided for
//! headless validation and tests.

pub mod api;
pub mod traits;

// Re-export the most important traits and types for easier use.
pub use self::api::*;
pub use self::traits::RenderCommandList;
