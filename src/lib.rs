//! Azure File Share Provisioner
//!
//! A Kubernetes controller that provisions one Azure File share per
//! PersistentVolumeClaim, binds it through a pre-bound PersistentVolume, and
//! tears both down when the claim is deleted.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │        kube::runtime::Controller (claims + labelled PVs)      │
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │ ClaimKey
//!                    ┌────────────┴────────────┐
//!                    │  Reconciler (dispatch,  │
//!                    │  timeout, outcomes)     │
//!                    └──────┬───────────┬──────┘
//!                 live      │           │   deleting
//!            ┌──────────────┴─┐       ┌─┴──────────────┐
//!            │  Provisioning  │       │    Deletion    │
//!            └───────┬────────┘       └────────┬───────┘
//!                    │  naming · claim · binding│
//! ┌──────────────────┴──────────────────────────┴─────────────────┐
//! │  ClusterStore      │   ShareService     │   EventPublisher    │
//! │  (kube / memory)   │  (Azure / memory)  │ (kube / recording)  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`naming`]: deterministic share and volume names
//! - [`claim`]: claim accessors, finalizer helpers and quota
//! - [`binding`]: PersistentVolume construction and matching
//! - [`controller`]: dispatcher, workflows, outcomes and runtime glue
//! - [`domain`]: literals and port traits
//! - [`store`], [`share`], [`events`]: adapters for the ports
//! - [`config`]: provisioner settings
//! - [`leader`]: Lease-based leader election gating the controller
//! - [`error`]: error types and handling

pub mod binding;
pub mod claim;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod leader;
pub mod naming;
pub mod share;
pub mod store;

// Re-export commonly used types
pub use binding::{build_volume, volume_matches, ShareLocation};
pub use config::ProvisionerConfig;
pub use controller::{
    Context, OutcomeKind, OutcomeRecorder, ReconcileMetrics, ReconcileOutcome, Reconciler,
};
pub use domain::ports::{
    ClaimKey, ClaimPatch, ClusterStore, ClusterStoreRef, EventPublisher, EventPublisherRef,
    ShareService, ShareServiceRef,
};
pub use error::{Error, ErrorAction, Result};
pub use events::{KubeEventPublisher, RecordingEventPublisher};
pub use share::{AzureFileShareClient, MemoryShareService, ShareFailure};
pub use store::{KubeStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
