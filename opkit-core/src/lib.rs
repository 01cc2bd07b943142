//! Crate with types and pure logic shared by opkit operators
//!
//! This crate holds everything that does not need a cluster connection:
//! the [`Workload`] contract that an operator's custom resource implements,
//! the status condition model written by the phase engine, and the equality
//! engine deciding whether a live object already matches a desired one.
//!
//! The same items are re-exported from `opkit` under `opkit::core`.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod conditions;
pub use conditions::{ChildResourceCondition, PhaseCondition, PhaseState};

pub mod equality;
pub use equality::{are_desired, are_equal};

pub mod identity;
pub use identity::ObjectKey;

pub mod workload;
pub use workload::{Workload, WorkloadStatus};

mod error;
pub use error::Error;

/// Convient alias for `Result<T, Error>`
pub type Result<T, E = Error> = std::result::Result<T, E>;
