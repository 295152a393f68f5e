//! Checks that the VerticaDB named by the autoscaler exists.

use super::{Context, ReconcileStep, StepOutcome};
use crate::crd::VerticaAutoscaler;
use crate::error::Result;
use crate::events::reasons;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

pub(super) struct VerifyDatabase;

#[async_trait]
impl ReconcileStep for VerifyDatabase {
    fn name(&self) -> &'static str {
        "verify-database"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        let ns = vas.namespace().unwrap_or_default();
        let db = &vas.spec.vertica_db_name;
        match ctx.client.get_verticadb(&ns, db).await {
            Ok(_) => Ok(StepOutcome::Continue),
            Err(e) if e.is_not_found() => {
                info!(namespace = %ns, verticadb = %db, "VerticaDB not found, requeueing");
                ctx.warn(
                    vas,
                    reasons::VERTICADB_NOT_FOUND,
                    format!("The VerticaDB named '{db}' was not found"),
                )
                .await;
                Ok(ctx.requeue())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockControlPlane;
    use crate::controllers::test_support::{context, vas, vdb};
    use crate::error::OperatorError;
    use crate::events::MockEventPublisher;
    use kube::runtime::events::EventType;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_missing_database_requeues_with_event() {
        let mut client = MockControlPlane::new();
        client
            .expect_get_verticadb()
            .with(eq("default"), eq("vdb"))
            .returning(|_, _| Err(OperatorError::not_found("VerticaDB default/vdb")));
        let mut events = MockEventPublisher::new();
        events
            .expect_publish()
            .withf(|_, t, reason, _| *t == EventType::Warning && reason == reasons::VERTICADB_NOT_FOUND)
            .times(1)
            .returning(|_, _, _, _| ());

        let ctx = context(client, events);
        let mut v = vas("s", 3);
        let outcome = VerifyDatabase.reconcile(&ctx, &mut v).await.unwrap();
        assert_eq!(outcome, StepOutcome::Requeue(ctx.config.requeue_delay));
    }

    #[tokio::test]
    async fn test_existing_database_continues() {
        let mut client = MockControlPlane::new();
        client.expect_get_verticadb().returning(|_, _| Ok(vdb(vec![])));
        let mut events = MockEventPublisher::new();
        events.expect_publish().never();

        let ctx = context(client, events);
        let mut v = vas("s", 3);
        let outcome = VerifyDatabase.reconcile(&ctx, &mut v).await.unwrap();
        assert_eq!(outcome, StepOutcome::Continue);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let mut client = MockControlPlane::new();
        client
            .expect_get_verticadb()
            .returning(|_, _| Err(OperatorError::InvalidState("boom".to_string())));

        let ctx = context(client, MockEventPublisher::new());
        let mut v = vas("s", 3);
        assert!(VerifyDatabase.reconcile(&ctx, &mut v).await.is_err());
    }
}
