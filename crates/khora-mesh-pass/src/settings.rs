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

//! Settings that control how mesh draw commands are cached and submitted.

use crate::error::MeshPassError;
use khora_core::renderer::ShadingPath;
use serde::{Deserialize, Serialize};

/// A collection of settings for the mesh draw command pipeline.
///
/// All fields have defaults, so a settings file only needs to list what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshPassSettings {
    /// Merge adjacent matching draws into one instanced draw at submission.
    pub dynamic_instancing: bool,
    /// Build draw commands for static meshes once, when a primitive is added,
    /// instead of every frame.
    pub use_cached_mesh_draw_commands: bool,
    /// Shaders fetch per-primitive data through the primitive id stream.
    ///
    /// When disabled, each primitive's uniform buffer is bound directly. Its
    /// commands then differ per primitive, so they are cached in the unique
    /// list instead of being shared through state buckets.
    pub use_gpu_scene: bool,
    /// Multiplier applied to every instance count (e.g. 2 for instanced stereo).
    pub instance_factor: u32,
    /// Number of commands per chunk of the per-frame command arena.
    pub dynamic_storage_chunk_size: usize,
    /// The renderer family whose processors are used.
    pub shading_path: ShadingPath,
}

impl Default for MeshPassSettings {
    fn default() -> Self {
        Self {
            dynamic_instancing: true,
            use_cached_mesh_draw_commands: true,
            use_gpu_scene: true,
            instance_factor: 1,
            dynamic_storage_chunk_size: 256,
            shading_path: ShadingPath::Deferred,
        }
    }
}

impl MeshPassSettings {
    /// Parses settings from a RON document.
    ///
    /// Zero values for `instance_factor` and `dynamic_storage_chunk_size` are
    /// rejected, since they would silently drop every draw.
    pub fn from_ron_str(source: &str) -> Result<Self, MeshPassError> {
        let settings: Self =
            ron::from_str(source).map_err(|e| MeshPassError::Settings(e.to_string()))?;
        if settings.instance_factor == 0 {
            return Err(MeshPassError::Settings(
                "instance_factor must be at least 1".to_string(),
            ));
        }
        if settings.dynamic_storage_chunk_size == 0 {
            return Err(MeshPassError::Settings(
                "dynamic_storage_chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_enables_caching_and_instancing() {
        let settings = MeshPassSettings::default();
        assert!(settings.dynamic_instancing);
        assert!(settings.use_cached_mesh_draw_commands);
        assert_eq!(settings.instance_factor, 1);
    }

    #[test]
    fn test_partial_ron_keeps_defaults() {
        let settings =
            MeshPassSettings::from_ron_str("(dynamic_instancing: false, shading_path: Mobile)")
                .unwrap();
        assert!(!settings.dynamic_instancing);
        assert_eq!(settings.shading_path, ShadingPath::Mobile);
        assert_eq!(settings.dynamic_storage_chunk_size, 256);
    }

    #[test]
    fn test_zero_instance_factor_is_rejected() {
        let result = MeshPassSettings::from_ron_str("(instance_factor: 0)");
        assert!(matches!(result, Err(MeshPassError::Settings(_))));
    }

    #[test]
    fn test_malformed_ron_is_reported() {
        assert!(MeshPassSettings::from_ron_str("(dynamic_instancing: maybe)").is_err());
    }
}
