/*!
 * Session switching.
 *
 * An agent's live session is the single agent.context.v1 breadcrumb that
 * carries the active consumer tag; every other context for that consumer
 * carries the paused variant. A switch is two optimistic updates: pause
 * the current, then activate the target. A conflict on either step aborts the
 * switch; if the first step already landed it is rolled back so the
 * invariant (exactly one active context) holds either way.
 */

use rcrt_client::{ListQuery, RcrtClient};
use rcrt_core::models::{Breadcrumb, BreadcrumbUpdate};
use rcrt_core::{schemas, RcrtError};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct SessionSwitcher {
    client: Arc<RcrtClient>,
}

impl SessionSwitcher {
    pub fn new(client: Arc<RcrtClient>) -> Self {
        SessionSwitcher { client }
    }

    pub async fn switch(&self, consumer: &str, target_id: Uuid) -> Result<(), RcrtError> {
        let active_tag = schemas::tags::consumer(consumer);
        let paused_tag = schemas::tags::consumer_paused(consumer);

        let target = self.client.get(target_id).await?;
        if target.has_tag(&active_tag) {
            info!("session {} already active for {}", target_id, consumer);
            return Ok(());
        }
        if !target.has_tag(&paused_tag) {
            return Err(RcrtError::Validation(format!(
                "breadcrumb {} is not a paused context for {}",
                target_id, consumer
            )));
        }

        let current = self.find_active(&active_tag).await?;

        // Step 1: pause the current context. A conflict here means another
        // writer touched it; nothing has changed yet, so just abort.
        if let Some(current) = &current {
            let paused_tags = swap_tag(&current.tags, &active_tag, &paused_tag);
            self.client
                .update(
                    current.id,
                    current.version,
                    &BreadcrumbUpdate {
                        tags: Some(paused_tags),
                        ..Default::default()
                    },
                )
                .await?;
        }

        // Step 2: activate the target. On conflict the pause from step 1
        // must not stand, or the consumer ends up with no live session.
        let active_tags = swap_tag(&target.tags, &paused_tag, &active_tag);
        let result = self
            .client
            .update(
                target.id,
                target.version,
                &BreadcrumbUpdate {
                    tags: Some(active_tags),
                    ..Default::default()
                },
            )
            .await;

        match result {
            Ok(_) => {
                info!("🔀 {} switched to session {}", consumer, target_id);
                Ok(())
            }
            Err(e) => {
                if let Some(current) = &current {
                    self.rollback_pause(current, &active_tag, &paused_tag).await;
                }
                Err(e)
            }
        }
    }

    async fn find_active(&self, active_tag: &str) -> Result<Option<Breadcrumb>, RcrtError> {
        let items = self
            .client
            .list(&ListQuery::schema(schemas::AGENT_CONTEXT_V1).tag(active_tag))
            .await?;
        match items.first() {
            Some(item) => Ok(Some(self.client.get(item.id).await?)),
            None => Ok(None),
        }
    }

    async fn rollback_pause(&self, current: &Breadcrumb, active_tag: &str, paused_tag: &str) {
        match self.client.get(current.id).await {
            Ok(fresh) => {
                let restored = swap_tag(&fresh.tags, paused_tag, active_tag);
                if let Err(e) = self
                    .client
                    .update(
                        fresh.id,
                        fresh.version,
                        &BreadcrumbUpdate {
                            tags: Some(restored),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    warn!("session switch rollback failed on {}: {}", fresh.id, e);
                }
            }
            Err(e) => warn!("session switch rollback could not re-read {}: {}", current.id, e),
        }
    }
}

fn swap_tag(tags: &[String], from: &str, to: &str) -> Vec<String> {
    let mut swapped: Vec<String> = tags
        .iter()
        .filter(|t| t.as_str() != from)
        .cloned()
        .collect();
    if !swapped.iter().any(|t| t == to) {
        swapped.push(to.to_string());
    }
    swapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_replaces_without_duplicating() {
        let tags = vec![
            "agent:context".to_string(),
            "consumer:x".to_string(),
            "session:s1".to_string(),
        ];
        let swapped = swap_tag(&tags, "consumer:x", "consumer:x-paused");
        assert!(!swapped.contains(&"consumer:x".to_string()));
        assert!(swapped.contains(&"consumer:x-paused".to_string()));
        assert!(swapped.contains(&"session:s1".to_string()));

        // Swapping back is symmetric.
        let restored = swap_tag(&swapped, "consumer:x-paused", "consumer:x");
        assert!(restored.contains(&"consumer:x".to_string()));
        assert_eq!(restored.len(), tags.len());
    }

    #[test]
    fn swap_is_idempotent_when_target_tag_present() {
        let tags = vec!["consumer:x".to_string(), "consumer:x-paused".to_string()];
        let swapped = swap_tag(&tags, "consumer:x", "consumer:x-paused");
        assert_eq!(swapped, vec!["consumer:x-paused".to_string()]);
    }
}
