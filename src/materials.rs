//! Materials available to a renderer.
//!
//! A [`MaterialRegistry`] is built by the caller and handed to
//! [`crate::renderer::Renderer`]; nothing is registered globally. Each entry
//! pairs the WGSL program with its software fragment stage so both backends
//! draw the same thing.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde_json::json;

use crate::error_codes::CodedError;
use crate::sampler::{self, FragmentFn};

pub const IMAGE_DEPTH: &str = "image_depth";
pub const IMAGE_DEPTH_STRETCH: &str = "image_depth_stretch";

const IMAGE_DEPTH_WGSL: &str = include_str!("../shaders/wgsl/image_depth.wgsl");

#[derive(Clone, Copy)]
pub struct MaterialDescriptor {
    pub name: &'static str,
    pub wgsl_source: &'static str,
    pub fragment_entry_point: &'static str,
    pub software_fragment: FragmentFn,
}

impl std::fmt::Debug for MaterialDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialDescriptor")
            .field("name", &self.name)
            .field("fragment_entry_point", &self.fragment_entry_point)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaterialRegistry {
    materials: BTreeMap<&'static str, MaterialDescriptor>,
}

impl MaterialRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the built-in depth materials.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(MaterialDescriptor {
            name: IMAGE_DEPTH,
            wgsl_source: IMAGE_DEPTH_WGSL,
            fragment_entry_point: "fs_cover",
            software_fragment: sampler::shade_image_depth,
        });
        registry.register(MaterialDescriptor {
            name: IMAGE_DEPTH_STRETCH,
            wgsl_source: IMAGE_DEPTH_WGSL,
            fragment_entry_point: "fs_stretch",
            software_fragment: sampler::shade_image_depth_stretch,
        });
        registry
    }

    /// Returns the descriptor previously registered under the same name, if any.
    pub fn register(&mut self, descriptor: MaterialDescriptor) -> Option<MaterialDescriptor> {
        self.materials.insert(descriptor.name, descriptor)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.materials.keys().copied()
    }

    pub fn resolve(&self, name: &str) -> Result<MaterialDescriptor> {
        self.materials.get(name).copied().ok_or_else(|| {
            anyhow!(CodedError::usage(
                "UNKNOWN_MATERIAL",
                format!("unknown material '{name}'"),
            )
            .with_details(json!({
                "provided": name,
                "allowed": self.names().collect::<Vec<_>>(),
            })))
        })
    }
}
