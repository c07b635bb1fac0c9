// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! memfs core: an in-memory POSIX-like filesystem state engine
//!
//! This crate provides the node graph, path resolution, handle table and
//! operation dispatcher behind a FUSE host, plus the errno-returning hook
//! surface such hosts call into.

pub mod config;
pub mod error;
pub mod fault;
pub mod hooks;
mod node;
pub mod payload;
mod resolve;
pub mod types;
pub mod vfs;

// Re-export key types for convenience
pub use config::{CachePolicy, FsConfig, SecurityPolicy};
pub use error::{FsError, FsResult, ENOATTR};
pub use fault::{FaultOp, FaultPolicy, FaultRule};
pub use hooks::{ContextProvider, FixedContext, HostBinding};
pub use types::*;
pub use vfs::{FsCore, FsStats, ROOT_INO};
