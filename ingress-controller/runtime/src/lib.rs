//! Runs the ingress controller.
//!
//! Watches feed a shared resource index and queue a sync for each change. A single
//! reconcile task consumes the queue: each sync rebuilds the proxy configuration from
//! the index, hands it to the [`FileReloader`], and publishes the controller's
//! addresses on ingress status.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use ingress_controller_core as core;
pub use ingress_controller_k8s_api as k8s;
pub use ingress_controller_k8s_index as index;
pub use ingress_controller_k8s_status as status;

mod args;
mod index_list;
mod metrics;
mod queue;
mod reconcile;
mod reload;

pub use self::{
    args::Args,
    metrics::ReconcileMetrics,
    queue::WorkQueue,
    reconcile::{resync, Reconciler, SyncError, RESYNC_KEY},
    reload::{FileReloader, CONFIG_FILE},
};
