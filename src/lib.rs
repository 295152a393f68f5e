//! Vertica autoscaler operator
//!
//! Scales the subclusters of a VerticaDB from a VerticaAutoscaler policy.
//! The policy carries a target size in pods, either set by hand or driven
//! by an HPA or a KEDA ScaledObject that the operator generates; each
//! reconcile pass brings the database topology to that size.

pub mod builder;
pub mod client;
pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod leader_election;
pub mod metric;
pub mod names;
pub mod retry;
pub mod status;

pub use config::OperatorConfig;
pub use controllers::AutoscalerController;
pub use crd::{ScaledObject, TriggerAuthentication, VerticaAutoscaler, VerticaDB};
pub use error::{OperatorError, Result};
