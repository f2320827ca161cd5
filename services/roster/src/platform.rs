//! Platform client seam.
//!
//! # Purpose
//! The external platform mirrors roles onto members as tags. Workflows only
//! compute which tags to push; this module pushes them.
//!
//! # Key invariants
//! - Pushes are fire-and-forget: failures are logged and counted, never
//!   retried, and never fail the workflow that produced them.
use crate::model::{Member, Organization, TagPush};
use async_trait::async_trait;

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn add_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()>;

    async fn remove_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()>;
}

/// Client that only logs the pushes it is asked to make.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlatformClient;

#[async_trait]
impl PlatformClient for LoggingPlatformClient {
    async fn add_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()> {
        tracing::info!(organization, member, ?tags, "platform add tags");
        Ok(())
    }

    async fn remove_tags(
        &self,
        organization: &str,
        member: &str,
        tags: &[String],
    ) -> anyhow::Result<()> {
        tracing::info!(organization, member, ?tags, "platform remove tags");
        Ok(())
    }
}

/// Push `tags` for `member` in `organization`.
///
/// Entities without an external id have nothing to push to.
pub async fn push_tags(
    client: &dyn PlatformClient,
    organization: &Organization,
    member: &Member,
    tags: &TagPush,
) {
    if tags.is_empty() {
        return;
    }
    let (Some(organization_ref), Some(member_ref)) = (
        organization.external_id.as_deref(),
        member.external_id.as_deref(),
    ) else {
        tracing::debug!(
            organization = %organization.id,
            member = %member.id,
            "tag push skipped: no external id"
        );
        return;
    };

    if !tags.add.is_empty() {
        let add: Vec<String> = tags.add.iter().cloned().collect();
        if let Err(err) = client.add_tags(organization_ref, member_ref, &add).await {
            metrics::counter!("roster_tag_push_failures_total", "op" => "add").increment(1);
            tracing::warn!(error = %err, member = member_ref, ?add, "failed to add tags");
        }
    }
    if !tags.remove.is_empty() {
        let remove: Vec<String> = tags.remove.iter().cloned().collect();
        if let Err(err) = client
            .remove_tags(organization_ref, member_ref, &remove)
            .await
        {
            metrics::counter!("roster_tag_push_failures_total", "op" => "remove").increment(1);
            tracing::warn!(error = %err, member = member_ref, ?remove, "failed to remove tags");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberId, OrganizationId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FailingClient {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PlatformClient for FailingClient {
        async fn add_tags(&self, _: &str, _: &str, tags: &[String]) -> anyhow::Result<()> {
            self.calls.lock().expect("lock").push(format!("add {}", tags.join(",")));
            anyhow::bail!("platform unavailable")
        }

        async fn remove_tags(&self, _: &str, _: &str, tags: &[String]) -> anyhow::Result<()> {
            self.calls
                .lock()
                .expect("lock")
                .push(format!("remove {}", tags.join(",")));
            Ok(())
        }
    }

    fn organization(external_id: Option<&str>) -> Organization {
        Organization {
            id: OrganizationId(1),
            display_name: "org".into(),
            external_id: external_id.map(str::to_string),
            active: true,
        }
    }

    fn member() -> Member {
        Member {
            id: MemberId(2),
            display_name: "ada".into(),
            external_id: Some("u-2".into()),
            active: true,
        }
    }

    #[tokio::test]
    async fn failed_add_does_not_block_remove() {
        let client = FailingClient::default();
        let mut tags = TagPush::default();
        tags.add.insert("shared".into());
        tags.remove.insert("stale".into());

        push_tags(&client, &organization(Some("guild")), &member(), &tags).await;

        let calls = client.calls.lock().expect("lock").clone();
        assert_eq!(calls, vec!["add shared".to_string(), "remove stale".to_string()]);
    }

    #[tokio::test]
    async fn missing_external_ids_skip_the_push() {
        let client = FailingClient::default();
        let mut tags = TagPush::default();
        tags.add.insert("shared".into());

        push_tags(&client, &organization(None), &member(), &tags).await;

        assert!(client.calls.lock().expect("lock").is_empty());
    }
}
