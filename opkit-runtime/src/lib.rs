//! Reconcile engine for opkit operators
//!
//! This crate holds everything that talks to a cluster on behalf of a workload:
//!
//! - [`phases`] with the [`Registry`](phases::Registry) running the reconcile pipeline
//! - [`resources`] with the readiness checks and persistence of child resources
//! - [`dependency`] resolving dependencies between workloads
//! - [`finalizer`] holding on to a workload while it is deleted
//! - [`store`] with the [`ObjectStore`] boundary and its kube and in-memory stores
//! - [`events`] and [`watch`] for the event recorder and watch registrar boundaries
//! - [`predicate`] with event filters for the operator's watch streams
//! - [`wait`] for blocking on readiness outside the engine
//!
//! The same items are re-exported from `opkit` under `opkit::runtime`.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(unsafe_code)]

mod config;
pub use config::Config;

pub mod context;
pub use context::{Context, DriftPolicy, IntentDriftPolicy, Request, WorkloadHooks};

pub mod dependency;
pub mod events;
pub mod finalizer;

pub mod phases;
pub use phases::{LifecycleEvent, Outcome, Phase, PhaseHandler, Registry, ResourceOption};

pub mod predicate;
pub mod resources;

pub mod store;
pub use store::{KubeStore, MemoryStore, ObjectStore, StoreError};

pub mod wait;
pub mod watch;

mod error;
pub use error::{Error, Result};

pub use kube::runtime::controller::Action;

#[cfg(test)] mod testing;
