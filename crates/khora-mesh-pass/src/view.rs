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

use khora_core::renderer::BufferId;

/// The view a pass is rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewInfo {
    /// World-space position of the view.
    pub origin: [f32; 3],
    /// The view's uniform buffer.
    pub view_uniform_buffer: Option<BufferId>,
    /// Render every mesh as wireframe.
    pub wireframe: bool,
    /// Invert culling for every mesh (mirrored views).
    pub reverse_culling: bool,
}

impl ViewInfo {
    /// Creates a view at `origin` with no overrides.
    pub fn new(origin: [f32; 3]) -> Self {
        Self {
            origin,
            ..Default::default()
        }
    }

    /// Returns `true` if the view changes the rasterizer state of commands.
    pub fn has_rasterizer_overrides(&self) -> bool {
        self.wireframe || self.reverse_culling
    }

    /// Euclidean distance from the view origin to `point`. Never negative.
    pub fn distance_to(&self, point: [f32; 3]) -> f32 {
        let d = [
            point[0] - self.origin[0],
            point[1] - self.origin[1],
            point[2] - self.origin[2],
        ];
        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_is_never_negative() {
        let view = ViewInfo::new([0.0, 0.0, 5.0]);
        assert_eq!(view.distance_to([0.0, 0.0, 5.0]), 0.0);
        assert_eq!(view.distance_to([0.0, 3.0, 9.0]), 5.0);
        assert_eq!(
            view.distance_to([0.0, -3.0, 1.0]),
            5.0,
            "points behind the origin are not negative"
        );
    }
}
