//! Central registry of domain brokers.
//!
//! Every domain publish is mirrored, type-erased, onto the generic broker so
//! that a single `subscribe_all` sees the whole application's traffic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_protocol::{
    ChatEvent, ChatEventType, ContextEvent, ContextEventType, Domain, EventType, FileEvent,
    FileEventType, McpEvent, McpEventType, NotificationEvent, NotificationEventType,
    NotificationLevel, PermissionEvent, PermissionEventType, SystemEvent, SystemEventType,
    VectorEvent, VectorEventType,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::broker::{Broker, BrokerConfig, BrokerStats};
use crate::config::Settings;
use crate::error::{BusError, Result};
use crate::event::{Event, StoredEvent};
use crate::filter::EventFilter;
use crate::options::PublishOptions;
use crate::store::{PersistenceStats, PersistenceStore};

const GENERIC_BROKER: &str = "generic";
const MIN_RETENTION_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub active: bool,
    /// Keyed by broker name ("chat", ..., "generic").
    pub brokers: BTreeMap<String, BrokerStats>,
    /// `None` without a store, or if the store cannot report stats.
    pub persistence: Option<PersistenceStats>,
}

pub struct Manager {
    chat: Broker<ChatEvent>,
    context: Broker<ContextEvent>,
    permission: Broker<PermissionEvent>,
    notification: Broker<NotificationEvent>,
    system: Broker<SystemEvent>,
    file: Broker<FileEvent>,
    vector: Broker<VectorEvent>,
    mcp: Broker<McpEvent>,
    generic: Broker<Value>,

    persistence: RwLock<Option<Arc<dyn PersistenceStore>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    done: CancellationToken,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

// Typed pass-throughs for each domain broker. Domain publishes are mirrored
// to the generic broker with the same id and timestamp.
macro_rules! domain_api {
    ($($field:ident: $payload:ty, $kind:ty => $publish:ident, $subscribe:ident;)+) => {
        impl Manager {
            $(
                pub fn $field(&self) -> &Broker<$payload> {
                    &self.$field
                }

                pub fn $publish(
                    &self,
                    event_type: $kind,
                    payload: $payload,
                    opts: PublishOptions,
                ) -> Option<Event<$payload>> {
                    let event = self.$field.publish(event_type, payload, opts)?;
                    self.mirror(&event);
                    Some(event)
                }

                pub fn $subscribe(
                    &self,
                    token: CancellationToken,
                    filters: Vec<EventFilter>,
                ) -> mpsc::Receiver<Event<$payload>> {
                    self.$field.subscribe(token, filters)
                }
            )+
        }
    };
}

domain_api! {
    chat: ChatEvent, ChatEventType => publish_chat, subscribe_chat;
    context: ContextEvent, ContextEventType => publish_context, subscribe_context;
    permission: PermissionEvent, PermissionEventType => publish_permission, subscribe_permission;
    notification: NotificationEvent, NotificationEventType => publish_notification, subscribe_notification;
    system: SystemEvent, SystemEventType => publish_system, subscribe_system;
    file: FileEvent, FileEventType => publish_file, subscribe_file;
    vector: VectorEvent, VectorEventType => publish_vector, subscribe_vector;
    mcp: McpEvent, McpEventType => publish_mcp, subscribe_mcp;
}

impl Manager {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            chat: Broker::new(Domain::Chat.as_str(), config),
            context: Broker::new(Domain::Context.as_str(), config),
            permission: Broker::new(Domain::Permission.as_str(), config),
            notification: Broker::new(Domain::Notification.as_str(), config),
            system: Broker::new(Domain::System.as_str(), config),
            file: Broker::new(Domain::File.as_str(), config),
            vector: Broker::new(Domain::Vector.as_str(), config),
            mcp: Broker::new(Domain::Mcp.as_str(), config),
            generic: Broker::new(GENERIC_BROKER, config),
            persistence: RwLock::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            done: CancellationToken::new(),
        }
    }

    /// Build brokers sized by `settings` and attach the configured store.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let manager = Self::new(settings.broker_config());
        if let Some(store) = settings.build_store()? {
            manager.set_persistence(store);
        }
        Ok(manager)
    }

    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyStarted);
        }

        info!("Event manager started");
        self.publish_system(
            SystemEventType::Started,
            lifecycle_event("Event manager started"),
            PublishOptions::new(),
        );
        Ok(())
    }

    /// Announce shutdown, then close every broker. Only the first call has any effect.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.publish_system(
            SystemEventType::ShuttingDown,
            lifecycle_event("Event manager shutting down"),
            PublishOptions::new(),
        );

        self.chat.shutdown();
        self.context.shutdown();
        self.permission.shutdown();
        self.notification.shutdown();
        self.system.shutdown();
        self.file.shutdown();
        self.vector.shutdown();
        self.mcp.shutdown();
        self.generic.shutdown();
        self.done.cancel();

        info!("Event manager stopped");
    }

    pub fn is_active(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    fn mirror<T: Serialize>(&self, event: &Event<T>) {
        match event.erase() {
            Ok(stored) => {
                // Persistence already happened on the domain broker.
                self.generic.publish_event(&stored, false);
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "failed to mirror event to generic broker"
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Generic broker
    // ------------------------------------------------------------------------

    pub fn generic(&self) -> &Broker<Value> {
        &self.generic
    }

    /// Every event from every domain, plus custom events.
    pub fn subscribe_all(
        &self,
        token: CancellationToken,
        filters: Vec<EventFilter>,
    ) -> mpsc::Receiver<StoredEvent> {
        self.generic.subscribe(token, filters)
    }

    pub fn replay_all(
        &self,
        token: CancellationToken,
        since: DateTime<Utc>,
        filters: Vec<EventFilter>,
    ) -> mpsc::Receiver<StoredEvent> {
        self.generic.replay_events(token, since, filters)
    }

    /// Publish an event outside the well-known domains. Only generic subscribers see it.
    pub fn publish_custom(
        &self,
        event_type: impl Into<EventType>,
        payload: Value,
        opts: PublishOptions,
    ) -> Option<StoredEvent> {
        self.generic.publish(event_type, payload, opts)
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Auto-dismissed after 5 seconds.
    pub fn info(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Event<NotificationEvent>> {
        self.notify(NotificationLevel::Info, title.into(), message.into())
    }

    /// Auto-dismissed after 3 seconds.
    pub fn success(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Event<NotificationEvent>> {
        self.notify(NotificationLevel::Success, title.into(), message.into())
    }

    /// Auto-dismissed after 10 seconds.
    pub fn warning(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Event<NotificationEvent>> {
        self.notify(NotificationLevel::Warning, title.into(), message.into())
    }

    /// Stays until dismissed.
    pub fn error(
        &self,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Event<NotificationEvent>> {
        self.notify(NotificationLevel::Error, title.into(), message.into())
    }

    fn notify(
        &self,
        level: NotificationLevel,
        title: String,
        message: String,
    ) -> Option<Event<NotificationEvent>> {
        let (kind, duration_ms) = match level {
            NotificationLevel::Info => (NotificationEventType::Info, Some(5_000)),
            NotificationLevel::Success => (NotificationEventType::Success, Some(3_000)),
            NotificationLevel::Warning => (NotificationEventType::Warning, Some(10_000)),
            NotificationLevel::Error => (NotificationEventType::Error, None),
        };

        let payload = NotificationEvent {
            id: Uuid::new_v4().to_string(),
            level,
            title,
            message,
            duration_ms,
            actions: Vec::new(),
        };
        self.publish_notification(kind, payload, PublishOptions::new())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Attach one store to every broker. Events published earlier are not persisted.
    pub fn set_persistence(&self, store: Arc<dyn PersistenceStore>) {
        self.chat.set_persistence(Some(store.clone()));
        self.context.set_persistence(Some(store.clone()));
        self.permission.set_persistence(Some(store.clone()));
        self.notification.set_persistence(Some(store.clone()));
        self.system.set_persistence(Some(store.clone()));
        self.file.set_persistence(Some(store.clone()));
        self.vector.set_persistence(Some(store.clone()));
        self.mcp.set_persistence(Some(store.clone()));
        self.generic.set_persistence(Some(store.clone()));

        *self
            .persistence
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(store);
        debug!("Persistence store attached to all brokers");
    }

    fn store(&self) -> Result<Arc<dyn PersistenceStore>> {
        self.persistence
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BusError::NoPersistence)
    }

    pub fn events_for_session(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        Ok(self.store()?.events_for_session(session_id, since, limit)?)
    }

    pub fn events_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        Ok(self.store()?.events_for_user(user_id, since, limit)?)
    }

    pub fn events_by_type(
        &self,
        event_type: impl Into<EventType>,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        let event_type = event_type.into();
        Ok(self
            .store()?
            .events_by_type(event_type.as_str(), since, limit)?)
    }

    /// Delete persisted events older than `older_than`.
    pub fn cleanup(&self, older_than: Duration) -> Result<u64> {
        Ok(self.store()?.cleanup(older_than)?)
    }

    /// Prune the store every `interval` until the manager shuts down.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_retention(&self, interval: Duration, max_age: Duration) -> Result<JoinHandle<()>> {
        let store = self.store()?;
        let runtime = Handle::try_current().map_err(|_| BusError::NoRuntime)?;
        let token = self.done.clone();
        let period = interval.max(MIN_RETENTION_INTERVAL);

        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.cleanup(max_age)).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => info!(removed, "Retention cleanup removed events"),
                    Ok(Err(e)) => error!(error = %e, "Retention cleanup failed"),
                    Err(e) => error!(error = %e, "Retention cleanup task panicked"),
                }
            }
            debug!("Retention task stopped");
        }))
    }

    pub fn stats(&self) -> ManagerStats {
        let brokers = [
            (self.chat.name(), self.chat.stats()),
            (self.context.name(), self.context.stats()),
            (self.permission.name(), self.permission.stats()),
            (self.notification.name(), self.notification.stats()),
            (self.system.name(), self.system.stats()),
            (self.file.name(), self.file.stats()),
            (self.vector.name(), self.vector.stats()),
            (self.mcp.name(), self.mcp.stats()),
            (self.generic.name(), self.generic.stats()),
        ]
        .into_iter()
        .map(|(name, stats)| (name.to_string(), stats))
        .collect();

        let persistence = self.store().ok().and_then(|store| store.stats().ok());

        ManagerStats {
            active: self.is_active(),
            brokers,
            persistence,
        }
    }
}

fn lifecycle_event(message: &str) -> SystemEvent {
    SystemEvent {
        component: "event_manager".to_string(),
        message: message.to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter_by_type;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_start_publishes_system_started() {
        let manager = Manager::default();
        let mut rx = manager.subscribe_system(CancellationToken::new(), vec![]);

        manager.start().unwrap();
        assert!(manager.is_active());

        let event = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.event_type, EventType::System(SystemEventType::Started));
        assert_eq!(event.payload.component, "event_manager");

        assert!(matches!(manager.start(), Err(BusError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_domain_publish_is_mirrored() {
        let manager = Manager::default();
        let mut all = manager.subscribe_all(CancellationToken::new(), vec![]);

        let published = manager
            .publish_file(
                FileEventType::Created,
                FileEvent {
                    path: "src/main.rs".to_string(),
                    ..Default::default()
                },
                PublishOptions::new().with_session_id("s1"),
            )
            .unwrap();

        let mirrored = timeout(RECV_TIMEOUT, all.recv()).await.unwrap().unwrap();
        assert_eq!(mirrored.id, published.id);
        assert_eq!(mirrored.timestamp, published.timestamp);
        assert_eq!(mirrored.session_id.as_deref(), Some("s1"));
        assert_eq!(mirrored.payload["path"], "src/main.rs");
        assert_eq!(mirrored.decode::<FileEvent>().unwrap().payload, published.payload);
    }

    #[tokio::test]
    async fn test_notifier_defaults() {
        let manager = Manager::default();
        let mut rx = manager.subscribe_notification(CancellationToken::new(), vec![]);

        manager.info("Saved", "All changes saved");
        manager.success("Done", "Indexing finished");
        manager.warning("Slow", "Model is slow");
        manager.error("Failed", "Provider unreachable");

        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = timeout(RECV_TIMEOUT, rx.recv()).await.unwrap().unwrap();
            seen.push((event.event_type.to_string(), event.payload.duration_ms));
        }

        assert_eq!(
            seen,
            vec![
                ("notification.info".to_string(), Some(5_000)),
                ("notification.success".to_string(), Some(3_000)),
                ("notification.warning".to_string(), Some(10_000)),
                ("notification.error".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_custom_events_only_reach_generic() {
        let manager = Manager::default();
        let mut all = manager.subscribe_all(
            CancellationToken::new(),
            vec![filter_by_type(["plugin.loaded"])],
        );

        manager.publish_custom(
            "plugin.loaded",
            serde_json::json!({ "name": "git" }),
            PublishOptions::new(),
        );

        let event = timeout(RECV_TIMEOUT, all.recv()).await.unwrap().unwrap();
        assert_eq!(event.event_type, EventType::Custom("plugin.loaded".to_string()));
        assert_eq!(manager.system().history(&[]).len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_broker_once() {
        let manager = Manager::default();
        manager.start().unwrap();
        let mut chat = manager.subscribe_chat(CancellationToken::new(), vec![]);
        let mut all = manager.subscribe_all(CancellationToken::new(), vec![]);

        manager.shutdown();
        manager.shutdown();

        assert!(!manager.is_active());
        assert!(timeout(RECV_TIMEOUT, chat.recv()).await.unwrap().is_none());

        // The generic subscriber still sees the shutdown announcement first.
        let last = timeout(RECV_TIMEOUT, all.recv()).await.unwrap().unwrap();
        assert_eq!(last.event_type, EventType::System(SystemEventType::ShuttingDown));
        assert!(timeout(RECV_TIMEOUT, all.recv()).await.unwrap().is_none());

        let stats = manager.stats();
        assert_eq!(stats.brokers.len(), 9);
        assert!(stats.brokers.values().all(|b| b.shut_down));
        assert_eq!(stats.brokers["system"].published, 2);
        assert!(manager
            .publish_chat(ChatEventType::MessageSent, ChatEvent::default(), PublishOptions::new())
            .is_none());
    }

    #[test]
    fn test_retention_needs_a_runtime() {
        let manager = Manager::default();
        manager.set_persistence(Arc::new(crate::store::MemoryStore::default()));

        let result = manager.spawn_retention(Duration::from_secs(1), Duration::from_secs(60));
        assert!(matches!(result, Err(BusError::NoRuntime)));
    }
}
