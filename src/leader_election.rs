//! Lease-based leader election.
//!
//! With several operator replicas only the holder of the
//! `coordination.k8s.io/v1` Lease runs the controller; the others wait in
//! [`LeaderElector::acquire`] until the lease is released or expires.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_LEASE_NAME: &str = "vertica-autoscaler-operator-leader";

const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace for the Lease: the explicit value, else the pod's own
/// namespace, else `default`.
pub fn detect_namespace(explicit: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "default".to_string())
}

pub struct LeaderElector {
    leases: Api<Lease>,
    lease_name: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, lease_name: &str) -> Self {
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("vas-operator-{:08x}", rand::random::<u32>()));
        info!(identity = %identity, namespace, lease = lease_name, "Initialized leader elector");
        Self {
            leases: Api::namespaced(client, namespace),
            lease_name: lease_name.to_string(),
            identity,
        }
    }

    pub fn renew_interval(&self) -> Duration {
        RENEW_INTERVAL
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self) -> Result<()> {
        info!(identity = %self.identity, lease = %self.lease_name, "Waiting for leader lease");
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => debug!(retry_in = ?RETRY_INTERVAL, "Lease held elsewhere"),
                Err(e) => warn!(error = %e, retry_in = ?RETRY_INTERVAL, "Lease acquisition failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// `Ok(false)` once the lease belongs to someone else.
    pub async fn renew(&self) -> Result<bool> {
        let lease = self.get().await?;
        if !self.holds(&lease) {
            return Ok(false);
        }
        let mut updated = lease;
        if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }
        self.write(&updated).await
    }

    /// Clear the holder so a standby replica can take over right away.
    pub async fn release(&self) {
        let lease = match self.get().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "Could not read lease for release");
                return;
            }
        };
        if !self.holds(&lease) {
            return;
        }
        let mut updated = lease;
        if let Some(spec) = updated.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self.write(&updated).await {
            Ok(_) => info!(identity = %self.identity, "Released leader lease"),
            Err(e) => warn!(error = %e, "Failed to release leader lease"),
        }
    }

    async fn get(&self) -> Result<Lease> {
        self.leases
            .get(&self.lease_name)
            .await
            .map_err(|e| OperatorError::from_kube(e, format!("Lease {}", self.lease_name)))
    }

    /// Conditional replace; a conflict means another replica got there first.
    async fn write(&self, lease: &Lease) -> Result<bool> {
        match self.leases.replace(&self.lease_name, &PostParams::default(), lease).await {
            Ok(_) => Ok(true),
            Err(e) => match OperatorError::from_kube(e, format!("Lease {}", self.lease_name)) {
                err if err.is_conflict() => Ok(false),
                err => Err(err),
            },
        }
    }

    fn holds(&self, lease: &Lease) -> bool {
        lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref()) == Some(self.identity.as_str())
    }

    async fn try_acquire(&self) -> Result<bool> {
        let now = MicroTime(Utc::now());
        let existing = match self.get().await {
            Ok(lease) => lease,
            Err(e) if e.is_not_found() => return self.create(now).await,
            Err(e) => return Err(e),
        };

        let takeover = if self.holds(&existing) {
            false
        } else if is_expired(existing.spec.as_ref(), now.0) {
            true
        } else {
            return Ok(false);
        };

        let prev = existing.spec.clone().unwrap_or_default();
        let transitions = prev.lease_transitions.unwrap_or(0);
        let mut updated = existing;
        updated.spec = Some(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            acquire_time: if takeover { Some(now.clone()) } else { prev.acquire_time },
            renew_time: Some(now),
            lease_transitions: Some(transitions + i32::from(takeover)),
            ..prev
        });
        self.write(&updated).await
    }

    async fn create(&self, now: MicroTime) -> Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.leases.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) => match OperatorError::from_kube(e, format!("Lease {}", self.lease_name)) {
                err if err.is_conflict() => Ok(false),
                err => Err(err),
            },
        }
    }
}

/// A lease nobody renewed within its duration is up for grabs.
fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    match spec.and_then(|s| s.renew_time.as_ref()) {
        Some(MicroTime(renewed)) => now.signed_duration_since(*renewed).num_seconds() > i64::from(duration),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(renewed_secs_ago: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some("other".to_string()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            renew_time: Some(MicroTime(Utc::now() - chrono::Duration::seconds(renewed_secs_ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        assert!(!is_expired(Some(&spec(5)), now));
        assert!(is_expired(Some(&spec(60)), now));
        assert!(is_expired(None, now));
        assert!(is_expired(Some(&LeaseSpec::default()), now));
    }

    #[test]
    fn test_explicit_namespace_wins() {
        assert_eq!(detect_namespace("operators"), "operators");
    }
}
