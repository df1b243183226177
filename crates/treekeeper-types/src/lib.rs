//! # Treekeeper Types
//!
//! Shared types for the treekeeper coordination-service client. This crate provides
//! the foundational vocabulary the transport, client, and registry crates depend on.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Node values**: [`Stat`], [`Acl`], [`Perms`], [`CreateMode`]
//! - **Session lifecycle**: [`SessionState`]
//! - **Events**: [`SessionEvent`], [`TreeEvent`], [`KeeperEvent`]
//! - **Errors**: [`KeeperError`], [`KeeperResult`]
//! - **Config**: [`ConnectionConfig`]
//! - **Paths**: validation and manipulation helpers in [`path`]

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod events;
pub mod path;
mod types;

pub use config::ConnectionConfig;
pub use error::{KeeperError, KeeperResult};
pub use events::{KeeperEvent, SessionEvent, TreeEvent};
pub use types::{Acl, CreateMode, Perms, SessionState, Stat, VERSION_ANY};
