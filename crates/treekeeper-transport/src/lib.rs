//! # Treekeeper Transport
//!
//! The transport seam between the treekeeper client and a coordination service.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Trait**: [`Ensemble`] — the client-facing surface of a remote hierarchical
//!   store: versioned CRUD, one-shot watches, and a session event stream
//! - **Events**: [`EnsembleEvent`], [`EnsembleEventEmitter`]
//! - **Implementation**: [`MemoryEnsemble`] — a complete in-process store with
//!   fault injection, used by tests and local development
//!
//! ## Usage
//!
//! Transport implementations depend on this crate and implement [`Ensemble`]:
//!
//! ```rust,ignore
//! use treekeeper_transport::{Ensemble, EnsembleEvent};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct WireEnsemble { /* ... */ }
//!
//! #[async_trait]
//! impl Ensemble for WireEnsemble {
//!     // ... trait methods
//! }
//! ```

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

mod ensemble;
mod memory;

pub use ensemble::{Ensemble, EnsembleEvent, EnsembleEventEmitter};
pub use memory::MemoryEnsemble;
