// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tabula Filesystem Abstraction
//
// The commit log never touches disk directly; it goes through a `Filesystem`
// implementation that models a brokered, distributed filesystem client. This
// crate defines that contract plus implementations used in production and in
// tests.
//
// # Modules
//
// - [`filesystem`] -- The `Filesystem` trait, `SmartFd` handles and the write
//   retry policy.
// - [`error`] -- The `FsError` enum and its transient/not-found classification.
// - [`local`] -- A `Filesystem` over a local directory tree.
// - [`memory`] -- An in-memory filesystem with fault injection for tests.
// - [`metrics`] -- A transparent wrapper that counts filesystem operations.

//! # Examples
//!
//! ```rust
//! use tabula_fs::{AppendFlags, Filesystem, MemoryFilesystem, OpenFlags, SmartFd};
//!
//! let fs = MemoryFilesystem::new();
//! fs.mkdirs("/logs/user").unwrap();
//! let mut fd = SmartFd::new("/logs/user/0", OpenFlags::Overwrite);
//! fs.create(&mut fd, -1).unwrap();
//! fs.append(&fd, b"hello", AppendFlags::Sync).unwrap();
//! assert_eq!(fs.length("/logs/user/0").unwrap(), 5);
//! ```

pub mod error;
pub mod filesystem;
pub mod local;
pub mod memory;
pub mod metrics;

pub use error::{FsError, FsResult};
pub use filesystem::{
    join_path, AppendFlags, Dirent, Fd, Filesystem, OpenFlags, RetryPolicy, SmartFd,
};
pub use local::LocalFilesystem;
pub use memory::{FaultKind, MemoryFilesystem};
pub use metrics::{FsStats, MetricsFilesystem};
