//! VM tuning knobs.
//!
//! Defaults are baked in; embedders may layer a TOML file and then
//! environment overrides on top.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::env::env_toggle_enabled;

/// Allocations of one heap kind between two automatic collections.
pub const DEFAULT_GC_THRESHOLD: usize = 1024;
pub const DEFAULT_MAX_STACK_DEPTH: usize = 64 * 1024;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub string_gc_threshold: usize,
    pub buffer_gc_threshold: usize,
    pub structure_gc_threshold: usize,
    pub gc_enabled: bool,
    pub max_stack_depth: usize,
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            string_gc_threshold: DEFAULT_GC_THRESHOLD,
            buffer_gc_threshold: DEFAULT_GC_THRESHOLD,
            structure_gc_threshold: DEFAULT_GC_THRESHOLD,
            gc_enabled: true,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl VmConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid VM configuration")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Applies `EPOCH_GC_THRESHOLD` (all kinds), `EPOCH_GC_DISABLE` and
    /// `EPOCH_MAX_STACK` from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// explicit variable source.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("EPOCH_GC_THRESHOLD") {
            let threshold: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("EPOCH_GC_THRESHOLD must be an integer, got {:?}", raw))?;
            self.string_gc_threshold = threshold;
            self.buffer_gc_threshold = threshold;
            self.structure_gc_threshold = threshold;
        }
        if let Some(raw) = lookup("EPOCH_GC_DISABLE") {
            self.gc_enabled = !env_toggle_enabled(&raw);
        }
        if let Some(raw) = lookup("EPOCH_MAX_STACK") {
            self.max_stack_depth = raw
                .trim()
                .parse()
                .with_context(|| format!("EPOCH_MAX_STACK must be an integer, got {:?}", raw))?;
        }
        Ok(self)
    }
}
