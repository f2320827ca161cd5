//! Event dispatch.
//!
//! # Purpose
//! Feeds platform tag updates and membership actions to the handlers in
//! [`registry::EventRegistry`] on a fixed pool of worker tasks.
//!
//! # Key invariants
//! - Events about the same member land on the same worker and are applied in
//!   submission order, whatever their kind (see [`routing_key`]). Handlers
//!   additionally take the member's lock from [`locks::MemberLocks`].
//! - Retryable failures are replayed from scratch up to `max_attempts` times
//!   with linear backoff. Other failures are logged and dropped.
//! - The dispatcher, not the engine, logs the summary of each applied event.
pub mod locks;
pub mod registry;
pub mod source;

use crate::app::AppState;
use crate::config::RosterConfig;
use crate::model::{CategoryId, MemberId, OrganizationId, RequestId, SubGroupId};
use crate::store::{Activity, RosterStore};
use anyhow::anyhow;
use registry::{Delivery, EventRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One unit of work. Tag updates carry platform ids; membership actions carry
/// store ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    RoleTagsChanged {
        organization: String,
        member: String,
        #[serde(default)]
        added: BTreeSet<String>,
        #[serde(default)]
        removed: BTreeSet<String>,
    },
    RequestAccess {
        member: MemberId,
        organization: OrganizationId,
        category: CategoryId,
        #[serde(default)]
        sub_group: Option<SubGroupId>,
    },
    Accept {
        caller: MemberId,
        request: RequestId,
        sub_group: SubGroupId,
    },
    Decline {
        caller: MemberId,
        request: RequestId,
    },
    RemovePriorMembership {
        caller: MemberId,
        member: MemberId,
        sub_group: SubGroupId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RoleTagsChanged,
    RequestAccess,
    Accept,
    Decline,
    RemovePriorMembership,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RoleTagsChanged => "role_tags_changed",
            EventKind::RequestAccess => "request_access",
            EventKind::Accept => "accept",
            EventKind::Decline => "decline",
            EventKind::RemovePriorMembership => "remove_prior_membership",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RoleTagsChanged { .. } => EventKind::RoleTagsChanged,
            Event::RequestAccess { .. } => EventKind::RequestAccess,
            Event::Accept { .. } => EventKind::Accept,
            Event::Decline { .. } => EventKind::Decline,
            Event::RemovePriorMembership { .. } => EventKind::RemovePriorMembership,
        }
    }

    /// The member this event concerns, as far as the event itself says.
    pub fn subject(&self) -> Subject<'_> {
        match self {
            Event::RoleTagsChanged { member, .. } => Subject::Platform(member.as_str()),
            Event::RequestAccess { member, .. } | Event::RemovePriorMembership { member, .. } => {
                Subject::Member(*member)
            }
            Event::Accept { request, .. } | Event::Decline { request, .. } => {
                Subject::Request(*request)
            }
        }
    }
}

/// How an event names its member before any store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    Member(MemberId),
    /// Platform member id; unique across organizations.
    Platform(&'a str),
    Request(RequestId),
}

/// Key that pins an event to one worker.
///
/// Every kind of event about one member resolves to `member:{id}`, so the
/// member's events are applied in submission order whatever their kind. Events
/// whose member cannot be resolved yet keep a key of their own; their handlers
/// skip them or fail with a not-found error.
pub async fn routing_key(store: &dyn RosterStore, event: &Event) -> String {
    match event.subject() {
        Subject::Member(member) => member_key(member),
        Subject::Platform(external_id) => {
            match store
                .find_member_by_external_id(external_id, Activity::IncludeInactive)
                .await
            {
                Ok(Some(member)) => member_key(member.id),
                Ok(None) => format!("platform:{external_id}"),
                Err(err) => {
                    tracing::debug!(error = %err, "member lookup for routing failed");
                    format!("platform:{external_id}")
                }
            }
        }
        Subject::Request(request) => match store.get_request(request).await {
            Ok(request) => member_key(request.member_id),
            Err(err) => {
                tracing::debug!(%request, error = %err, "request lookup for routing failed");
                format!("request:{request}")
            }
        },
    }
}

fn member_key(member: MemberId) -> String {
    format!("member:{member}")
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&RosterConfig> for DispatchConfig {
    fn from(config: &RosterConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

pub struct Dispatcher {
    store: Arc<dyn RosterStore>,
    senders: Vec<mpsc::Sender<Event>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(state: AppState, registry: Arc<EventRegistry>, config: DispatchConfig) -> Self {
        let workers = config.workers.max(1);
        let config = Arc::new(config);
        let mut senders = Vec::with_capacity(workers);
        let mut tasks = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            senders.push(tx);
            tasks.push(tokio::spawn(run_worker(
                index,
                state.clone(),
                Arc::clone(&registry),
                Arc::clone(&config),
                rx,
            )));
        }
        tracing::info!(workers, "dispatcher started");
        Self {
            store: state.store,
            senders,
            tasks,
        }
    }

    /// Queue an event, waiting for room on its worker's queue.
    pub async fn submit(&self, event: Event) -> anyhow::Result<()> {
        let key = routing_key(self.store.as_ref(), &event).await;
        let shard = shard_for(&key, self.senders.len());
        self.senders[shard]
            .send(event)
            .await
            .map_err(|_| anyhow!("dispatcher worker {shard} stopped"))
    }

    /// Stop accepting events and wait until every queued event is handled.
    pub async fn shutdown(self) {
        drop(self.senders);
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "dispatcher worker panicked");
            }
        }
        tracing::info!("dispatcher drained");
    }
}

fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

async fn run_worker(
    index: usize,
    state: AppState,
    registry: Arc<EventRegistry>,
    config: Arc<DispatchConfig>,
    mut rx: mpsc::Receiver<Event>,
) {
    while let Some(event) = rx.recv().await {
        process(&state, &registry, &config, event).await;
    }
    tracing::debug!(worker = index, "dispatcher worker stopped");
}

async fn process(state: &AppState, registry: &EventRegistry, config: &DispatchConfig, event: Event) {
    let kind = event.kind();
    let Some(handler) = registry.handler(kind) else {
        metrics::counter!("roster_events_dropped_total", "reason" => "unhandled").increment(1);
        tracing::warn!(%kind, "no handler registered; event dropped");
        return;
    };

    let mut attempt = 1;
    loop {
        let delivery = Delivery {
            event: event.clone(),
            attempt,
        };
        match handler(state.clone(), delivery).await {
            Ok(Some(outcome)) => {
                metrics::counter!("roster_events_applied_total", "kind" => kind.as_str())
                    .increment(1);
                tracing::info!(
                    %kind,
                    attempt,
                    links_added = ?outcome.links_added.iter().map(|role| role.id).collect::<Vec<_>>(),
                    links_removed = ?outcome.links_removed.iter().map(|role| role.id).collect::<Vec<_>>(),
                    tags_added = ?outcome.tags.add,
                    tags_removed = ?outcome.tags.remove,
                    advisories = ?outcome.advisories,
                    held_roles = ?outcome.held_roles,
                    "event applied"
                );
                return;
            }
            Ok(None) => {
                tracing::debug!(%kind, "event skipped");
                return;
            }
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                tracing::warn!(%kind, attempt, error = %err, "event failed; retrying");
                tokio::time::sleep(config.retry_backoff * attempt).await;
                attempt += 1;
            }
            Err(err) => {
                metrics::counter!("roster_events_dropped_total", "reason" => err.code())
                    .increment(1);
                tracing::warn!(%kind, attempt, error = %err, details = ?err, "event dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_parse_from_tagged_json() {
        let event: Event = serde_json::from_str(
            r#"{"kind":"role_tags_changed","organization":"guild-1","member":"user-1","added":["a"]}"#,
        )
        .expect("parse");
        assert_eq!(event.kind(), EventKind::RoleTagsChanged);
        let Event::RoleTagsChanged { added, removed, .. } = &event else {
            panic!("wrong variant");
        };
        assert!(added.contains("a"));
        assert!(removed.is_empty());

        let event: Event =
            serde_json::from_str(r#"{"kind":"decline","caller":3,"request":9}"#).expect("parse");
        assert_eq!(
            event,
            Event::Decline {
                caller: MemberId(3),
                request: RequestId(9)
            }
        );
    }

    #[test]
    fn subjects_name_the_member_or_its_request() {
        let tags = Event::RoleTagsChanged {
            organization: "guild".into(),
            member: "user".into(),
            added: BTreeSet::from(["a".to_string()]),
            removed: BTreeSet::new(),
        };
        assert_eq!(tags.subject(), Subject::Platform("user"));
        let remove = Event::RemovePriorMembership {
            caller: MemberId(1),
            member: MemberId(5),
            sub_group: SubGroupId(2),
        };
        assert_eq!(remove.subject(), Subject::Member(MemberId(5)));
        let decline = Event::Decline {
            caller: MemberId(1),
            request: RequestId(7),
        };
        assert_eq!(decline.subject(), Subject::Request(RequestId(7)));
    }

    #[test]
    fn shards_are_stable() {
        assert_eq!(shard_for("member:5", 8), shard_for("member:5", 8));
        assert!(shard_for("member:5", 8) < 8);
        assert_eq!(shard_for("anything", 1), 0);
    }

    #[test]
    fn config_floors_at_one() {
        let config = DispatchConfig::from(&RosterConfig {
            workers: 0,
            max_attempts: 0,
            ..RosterConfig::default()
        });
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_attempts, 1);
    }
}
