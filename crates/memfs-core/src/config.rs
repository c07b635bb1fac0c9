// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration types for memfs

use crate::error::{FsError, FsResult};
use crate::fault::FaultPolicy;
use crate::types::PERM_MASK;
use serde::{Deserialize, Serialize};

/// Ownership applied to nodes the engine creates on its own (the root)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    pub default_uid: u32,
    pub default_gid: u32,
}

/// Kernel cache hints consumed by FUSE hosts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub attr_ttl_ms: u32,
    pub entry_ttl_ms: u32,
    pub enable_readdir_plus: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            attr_ttl_ms: 1000,
            entry_ttl_ms: 1000,
            enable_readdir_plus: true,
        }
    }
}

/// Main filesystem configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Device id recorded in the root's stat block
    pub device_id: u64,
    /// Permission bits of the root directory
    pub root_mode: u32,
    pub security: SecurityPolicy,
    pub cache: CachePolicy,
    pub faults: FaultPolicy,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            root_mode: 0o777,
            security: SecurityPolicy::default(),
            cache: CachePolicy::default(),
            faults: FaultPolicy::default(),
        }
    }
}

impl FsConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn validate(&self) -> FsResult<()> {
        if self.root_mode & !PERM_MASK != 0 {
            return Err(FsError::InvalidArgument);
        }
        Ok(())
    }
}
