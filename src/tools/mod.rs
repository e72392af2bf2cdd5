//! Type-safe argument modules.
//!
//! This module contains structs that implement `ToolArgs` for each external
//! tool the recovery run invokes. Each struct maps Rust fields to the exact
//! flags and environment variables expected by the tool.

pub mod archive;
pub mod fs;
pub mod mysql;
pub mod service;
pub mod xtrabackup;
