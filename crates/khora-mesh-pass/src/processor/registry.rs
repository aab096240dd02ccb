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

//! The table of pass processor factories.

use super::{
    create_base_pass_processor, create_depth_pass_processor, create_translucency_processor,
    MeshPassProcessor, PassProcessorCreateInfo,
};
use crate::draw_list::MeshPassDrawListContext;
use crate::error::MeshPassError;
use crate::mesh_pass::{MeshPass, MeshPassFlags, MeshPassMask};
use khora_core::renderer::ShadingPath;
use std::fmt;

/// Creates a processor writing into `ctx`.
pub type PassProcessorCreateFn = for<'a> fn(
    PassProcessorCreateInfo<'a>,
    &'a mut dyn MeshPassDrawListContext,
) -> Box<dyn MeshPassProcessor + 'a>;

/// A registered processor factory.
#[derive(Clone, Copy)]
pub struct PassProcessorEntry {
    /// The factory.
    pub create: PassProcessorCreateFn,
    /// How the pass is used.
    pub flags: MeshPassFlags,
}

impl fmt::Debug for PassProcessorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassProcessorEntry")
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Processor factories per shading path and mesh pass.
///
/// Built explicitly and owned by whoever creates processors; there is no
/// global registry.
#[derive(Clone)]
pub struct PassProcessorRegistry {
    entries: [[Option<PassProcessorEntry>; MeshPass::COUNT]; ShadingPath::COUNT],
}

impl Default for PassProcessorRegistry {
    fn default() -> Self {
        Self {
            entries: [[None; MeshPass::COUNT]; ShadingPath::COUNT],
        }
    }
}

impl fmt::Debug for PassProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for path in ShadingPath::ALL {
            for pass in MeshPass::ALL {
                if let Some(entry) = self.entries[path.index()][pass.index()] {
                    list.entry(&(path, pass, entry.flags));
                }
            }
        }
        list.finish()
    }
}

impl PassProcessorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in processors.
    pub fn with_default_processors() -> Self {
        let mut registry = Self::new();
        let cached = MeshPassFlags::CACHED_MESH_COMMANDS;
        let main_view = MeshPassFlags::MAIN_VIEW;

        let depth = create_depth_pass_processor;
        registry.register(ShadingPath::Deferred, MeshPass::DepthPass, depth, cached);
        registry.register(ShadingPath::Mobile, MeshPass::RainDepthPass, depth, cached);

        for path in ShadingPath::ALL {
            let flags = cached | main_view;
            registry.register(path, MeshPass::BasePass, create_base_pass_processor, flags);
        }

        for pass in [
            MeshPass::TranslucencyStandard,
            MeshPass::TranslucencyAfterDof,
            MeshPass::TranslucencyAll,
        ] {
            let create = create_translucency_processor;
            registry.register(ShadingPath::Deferred, pass, create, main_view);
        }
        registry.register(
            ShadingPath::Mobile,
            MeshPass::TranslucencyAll,
            create_translucency_processor,
            main_view,
        );
        registry
    }

    /// Registers a factory, replacing any previous one for the same slot.
    pub fn register(
        &mut self,
        shading_path: ShadingPath,
        pass: MeshPass,
        create: PassProcessorCreateFn,
        flags: MeshPassFlags,
    ) {
        let slot = &mut self.entries[shading_path.index()][pass.index()];
        if slot.is_some() {
            log::debug!("Replacing {pass} processor for the {shading_path} shading path");
        } else {
            log::debug!("Registered {pass} processor for the {shading_path} shading path");
        }
        *slot = Some(PassProcessorEntry { create, flags });
    }

    /// Removes a factory, returning it.
    pub fn unregister(
        &mut self,
        shading_path: ShadingPath,
        pass: MeshPass,
    ) -> Option<PassProcessorEntry> {
        self.entries[shading_path.index()][pass.index()].take()
    }

    /// Creates the processor registered for `pass`.
    pub fn create_processor<'a>(
        &self,
        shading_path: ShadingPath,
        info: PassProcessorCreateInfo<'a>,
        ctx: &'a mut dyn MeshPassDrawListContext,
    ) -> Result<Box<dyn MeshPassProcessor + 'a>, MeshPassError> {
        let pass = info.pass;
        let entry = self.entries[shading_path.index()][pass.index()]
            .ok_or(MeshPassError::ProcessorNotRegistered { shading_path, pass })?;
        Ok((entry.create)(info, ctx))
    }

    /// The flags `pass` was registered with, or `None` if it is not registered.
    pub fn flags(&self, shading_path: ShadingPath, pass: MeshPass) -> Option<MeshPassFlags> {
        self.entries[shading_path.index()][pass.index()].map(|entry| entry.flags)
    }

    /// Returns `true` if a factory is registered for `pass`.
    pub fn is_registered(&self, shading_path: ShadingPath, pass: MeshPass) -> bool {
        self.entries[shading_path.index()][pass.index()].is_some()
    }

    /// The passes whose static meshes are cached on the given path.
    pub fn cached_passes(&self, shading_path: ShadingPath) -> MeshPassMask {
        MeshPass::ALL
            .into_iter()
            .filter(|pass| {
                self.flags(shading_path, *pass)
                    .is_some_and(|flags| flags.contains(MeshPassFlags::CACHED_MESH_COMMANDS))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MeshPassSettings;

    struct NullContext;

    impl MeshPassDrawListContext for NullContext {
        fn finalize_command(
            &mut self,
            _command: crate::draw_command::MeshDrawCommand,
            _info: crate::draw_list::FinalizeCommandInfo<'_>,
        ) -> Result<(), MeshPassError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_cached_passes() {
        let registry = PassProcessorRegistry::with_default_processors();
        let deferred = registry.cached_passes(ShadingPath::Deferred);
        assert!(deferred.get(MeshPass::DepthPass));
        assert!(deferred.get(MeshPass::BasePass));
        assert!(!deferred.get(MeshPass::TranslucencyAll));
        assert!(!deferred.get(MeshPass::RainDepthPass));

        let mobile = registry.cached_passes(ShadingPath::Mobile);
        assert!(mobile.get(MeshPass::RainDepthPass));
        assert!(!mobile.get(MeshPass::DepthPass));
    }

    #[test]
    fn test_unregistered_pass_is_an_error() {
        let mut registry = PassProcessorRegistry::with_default_processors();
        let settings = MeshPassSettings::default();
        let mut ctx = NullContext;
        let info = PassProcessorCreateInfo::new(MeshPass::SkyPass, &settings);
        let err = registry
            .create_processor(ShadingPath::Deferred, info, &mut ctx)
            .err();
        assert_eq!(
            err,
            Some(MeshPassError::ProcessorNotRegistered {
                shading_path: ShadingPath::Deferred,
                pass: MeshPass::SkyPass
            })
        );

        assert!(registry.unregister(ShadingPath::Deferred, MeshPass::BasePass).is_some());
        assert!(!registry.is_registered(ShadingPath::Deferred, MeshPass::BasePass));
        assert_eq!(registry.flags(ShadingPath::Deferred, MeshPass::BasePass), None);
    }
}
