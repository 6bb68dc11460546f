//! Core types, collaborator traits and the migration engine for Stratum.
//!
//! A *component* ships a directory of SQL schema files: one baseline and a
//! numbered sequence of updates, optionally specialised per SQL dialect. The
//! [`Installer`](install::Installer) brings a component's tables up to date on
//! every call, resuming from the last version the tracker recorded.
//!
//! This crate is deliberately free of database drivers. Backends implement
//! [`Connection`](store::Connection), [`VersionTracker`](store::VersionTracker)
//! and optionally [`SchemaLock`](store::SchemaLock).

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod cache;
pub mod classify;
pub mod dialect;
pub mod error;
pub mod execute;
pub mod install;
pub mod locate;
pub mod schema;
pub mod split;
pub mod store;

pub use dialect::Dialect;
pub use error::{InstallError, LocateError, ParseError};
pub use install::{Installer, InstallerOptions, UpdateReport};
pub use schema::{ComponentId, Version};
