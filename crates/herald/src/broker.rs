use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::thread;

use chrono::{DateTime, Utc};
use herald_protocol::EventType;
use serde::{Deserialize, Serialize};
use tokio::runtime::{self, Handle};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::event::Event;
use crate::filter::{EventFilter, matches_all};
use crate::options::PublishOptions;
use crate::store::PersistenceStore;

pub const DEFAULT_BUFFER_SIZE: usize = 64;
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Sizing for a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Capacity of each subscriber channel.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Number of events kept in history.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_max_events() -> usize {
    DEFAULT_MAX_EVENTS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

/// Public info about a live subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberInfo {
    pub id: String,
    /// ANDed; empty accepts everything.
    pub filters: Vec<EventFilter>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub subscriber_count: usize,
    pub history_size: usize,
    pub max_events: usize,
    pub buffer_size: usize,
    pub published: u64,
    /// Deliveries skipped because a subscriber channel was full.
    pub dropped: u64,
    pub shut_down: bool,
}

struct Subscriber<T> {
    info: SubscriberInfo,
    tx: mpsc::Sender<Event<T>>,
    /// The caller's token. Also checked during fan-out, so cancellation is
    /// honoured even where no watcher task could be spawned.
    token: CancellationToken,
    /// Cancelled when the entry leaves the registry, releasing its watcher.
    removed: CancellationToken,
}

struct BrokerInner<T> {
    name: String,
    config: BrokerConfig,
    /// subscriber_id -> Subscriber. Removing an entry drops its sender and
    /// closes the channel, so an entry can only ever be closed once.
    subscribers: RwLock<HashMap<String, Subscriber<T>>>,
    history: Mutex<VecDeque<Event<T>>>,
    store: RwLock<Option<Arc<dyn PersistenceStore>>>,
    done: CancellationToken,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<T> BrokerInner<T> {
    fn remove_subscriber(&self, id: &str, reason: &str) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);

        match removed {
            Some(sub) => {
                sub.removed.cancel();
                debug!(broker = %self.name, subscriber_id = %id, reason, "subscriber removed");
                true
            }
            None => false,
        }
    }
}

/// Publish-subscribe hub for one payload type.
///
/// Cloning is cheap and every clone refers to the same broker.
pub struct Broker<T> {
    inner: Arc<BrokerInner<T>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Broker<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                name: name.into(),
                config,
                subscribers: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                store: RwLock::new(None),
                done: CancellationToken::new(),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> BrokerConfig {
        self.inner.config
    }

    /// Attach (or detach) the persistence store. Only later publishes are persisted.
    pub fn set_persistence(&self, store: Option<Arc<dyn PersistenceStore>>) {
        *self
            .inner
            .store
            .write()
            .unwrap_or_else(PoisonError::into_inner) = store;
    }

    /// Build and publish an event.
    ///
    /// Never blocks: subscribers whose channel is full miss the event. Returns
    /// the published event, or `None` once the broker has shut down.
    pub fn publish(
        &self,
        event_type: impl Into<EventType>,
        payload: T,
        opts: PublishOptions,
    ) -> Option<Event<T>> {
        if self.inner.done.is_cancelled() {
            return None;
        }

        let persist = opts.persist;
        let mut event = Event::new(event_type, payload);
        opts.apply(&mut event);

        self.publish_event(&event, persist).then_some(event)
    }

    /// Record, optionally persist, and fan out an already-built event.
    ///
    /// Returns `false` if the broker has shut down.
    pub fn publish_event(&self, event: &Event<T>, persist: bool) -> bool {
        if self.inner.done.is_cancelled() {
            return false;
        }

        self.record(event);
        if persist {
            self.persist(event);
        }
        self.fan_out(event);
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn record(&self, event: &Event<T>) {
        let mut history = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        history.push_back(event.clone());
        while history.len() > self.inner.config.max_events {
            history.pop_front();
        }
    }

    fn persist(&self, event: &Event<T>) {
        let store = self
            .inner
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(store) = store else {
            return;
        };

        let result = match event.erase() {
            Ok(stored) => store.store(&stored),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(
                broker = %self.inner.name,
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "failed to persist event"
            );
        }
    }

    fn fan_out(&self, event: &Event<T>) {
        let mut closed = Vec::new();
        {
            let subscribers = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            for (id, sub) in subscribers.iter() {
                if sub.token.is_cancelled() {
                    closed.push((id.clone(), "subscription cancelled"));
                    continue;
                }
                if !matches_all(&sub.info.filters, event) {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            broker = %self.inner.name,
                            subscriber_id = %id,
                            event_id = %event.id,
                            event_type = %event.event_type,
                            "subscriber channel full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push((id.clone(), "receiver dropped")),
                }
            }
        }

        for (id, reason) in closed {
            self.inner.remove_subscriber(&id, reason);
        }
    }

    /// Register a subscriber and return its receiving end.
    ///
    /// The channel closes when `token` is cancelled, when the broker shuts
    /// down, or after the receiver is dropped. Inside a Tokio runtime a
    /// watcher closes it as soon as `token` is cancelled; called from a plain
    /// thread, cancellation takes effect at the next publish.
    pub fn subscribe(
        &self,
        token: CancellationToken,
        filters: Vec<EventFilter>,
    ) -> mpsc::Receiver<Event<T>> {
        let (tx, rx) = mpsc::channel(self.inner.config.buffer_size.max(1));
        let id = Uuid::new_v4().to_string();
        let removed = CancellationToken::new();

        {
            let mut subscribers = self
                .inner
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            // Checked under the registry lock so shutdown cannot miss this entry.
            if self.inner.done.is_cancelled() {
                return rx;
            }

            subscribers.insert(
                id.clone(),
                Subscriber {
                    info: SubscriberInfo {
                        id: id.clone(),
                        filters,
                        created: Utc::now(),
                    },
                    tx,
                    token: token.clone(),
                    removed: removed.clone(),
                },
            );
        }

        debug!(broker = %self.inner.name, subscriber_id = %id, "subscriber registered");

        let Ok(runtime) = Handle::try_current() else {
            return rx;
        };

        let inner: Weak<BrokerInner<T>> = Arc::downgrade(&self.inner);
        let done = self.inner.done.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(inner) = inner.upgrade() {
                        inner.remove_subscriber(&id, "subscription cancelled");
                    }
                }
                _ = removed.cancelled() => {}
                _ = done.cancelled() => {}
            }
        });

        rx
    }

    /// Snapshot of buffered history accepted by `filters`, oldest-first.
    pub fn history(&self, filters: &[EventFilter]) -> Vec<Event<T>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| matches_all(filters, e))
            .cloned()
            .collect()
    }

    /// Replay history newer than `since`, then keep streaming live events.
    ///
    /// The live subscription is registered before the history snapshot is
    /// taken; live events already present in the snapshot are skipped by id,
    /// so the boundary has neither gaps nor duplicates.
    ///
    /// Forwarding runs on the current Tokio runtime, or on a dedicated thread
    /// when called from outside one.
    pub fn replay_events(
        &self,
        token: CancellationToken,
        since: DateTime<Utc>,
        filters: Vec<EventFilter>,
    ) -> mpsc::Receiver<Event<T>> {
        let (out_tx, out_rx) = mpsc::channel(self.inner.config.buffer_size.max(1));
        if self.inner.done.is_cancelled() {
            return out_rx;
        }

        let live_token = token.child_token();
        let live = self.subscribe(live_token.clone(), filters.clone());

        let snapshot = self.history(&filters);
        let seen: HashSet<String> = snapshot.iter().map(|e| e.id.clone()).collect();
        let backlog: Vec<Event<T>> = snapshot.into_iter().filter(|e| e.timestamp > since).collect();

        debug!(
            broker = %self.inner.name,
            backlog = backlog.len(),
            since = %since,
            "replaying events"
        );

        let forward = forward_replay(
            token,
            self.inner.done.clone(),
            live_token,
            live,
            backlog,
            seen,
            out_tx,
        );
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(forward);
            }
            Err(_) => self.spawn_replay_thread(forward),
        }

        out_rx
    }

    fn spawn_replay_thread(&self, forward: impl Future<Output = ()> + Send + 'static) {
        let name = self.inner.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("herald-replay-{name}"))
            .spawn(move || {
                match runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(forward),
                    Err(e) => error!(broker = %name, error = %e, "failed to start replay runtime"),
                }
            });
        if let Err(e) = spawned {
            error!(broker = %self.inner.name, error = %e, "failed to spawn replay thread");
        }
    }

    /// Close every subscriber channel and stop accepting events. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.done.is_cancelled() {
            return;
        }
        self.inner.done.cancel();

        let drained: Vec<Subscriber<T>> = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, sub)| sub)
            .collect();

        let count = drained.len();
        for sub in drained {
            sub.removed.cancel();
        }

        info!(broker = %self.inner.name, subscribers = count, "broker shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.done.is_cancelled()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|sub| sub.info.clone())
            .collect()
    }

    pub fn clear_history(&self) {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> BrokerStats {
        let history_size = self
            .inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        BrokerStats {
            subscriber_count: self.subscriber_count(),
            history_size,
            max_events: self.inner.config.max_events,
            buffer_size: self.inner.config.buffer_size,
            published: self.inner.published.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            shut_down: self.is_shut_down(),
        }
    }
}

/// Send the replay backlog, then forward live events not already replayed.
async fn forward_replay<T>(
    token: CancellationToken,
    done: CancellationToken,
    live_token: CancellationToken,
    mut live: mpsc::Receiver<Event<T>>,
    backlog: Vec<Event<T>>,
    mut seen: HashSet<String>,
    out_tx: mpsc::Sender<Event<T>>,
) {
    let _live_guard = live_token.drop_guard();

    for event in backlog {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = done.cancelled() => return,
            sent = out_tx.send(event) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            _ = out_tx.closed() => break,
            received = live.recv() => match received {
                Some(event) => event,
                None => break,
            },
        };

        if seen.remove(&event.id) {
            continue;
        }

        tokio::select! {
            _ = token.cancelled() => break,
            sent = out_tx.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::StoreError;
    use crate::event::StoredEvent;
    use crate::filter::{filter_by_session_id, filter_by_type};
    use crate::store::{MemoryStore, StoreResult};
    use herald_protocol::{ChatEventType, SystemEventType};
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;
    use tracing_test::traced_test;

    const RECV_TIMEOUT: Duration = Duration::from_secs(1);

    fn broker(buffer_size: usize, max_events: usize) -> Broker<String> {
        Broker::new(
            "test",
            BrokerConfig {
                buffer_size,
                max_events,
            },
        )
    }

    async fn recv(rx: &mut mpsc::Receiver<Event<String>>) -> Event<String> {
        timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed")
    }

    async fn assert_closed(rx: &mut mpsc::Receiver<Event<String>>) {
        let next = timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for close");
        assert!(next.is_none(), "expected closed channel, got {next:?}");
    }

    #[test]
    fn test_history_keeps_most_recent_in_order() {
        let broker = broker(64, 3);
        for i in 0..5 {
            broker.publish(ChatEventType::MessageSent, format!("m{i}"), PublishOptions::new());
        }

        let history = broker.history(&[]);
        let payloads: Vec<_> = history.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["m2", "m3", "m4"]);
        assert_eq!(broker.stats().published, 5);
    }

    #[test]
    fn test_history_is_filtered_snapshot() {
        let broker = broker(64, 10);
        broker.publish(
            ChatEventType::MessageSent,
            "a".to_string(),
            PublishOptions::new().with_session_id("s1"),
        );
        broker.publish(
            ChatEventType::MessageSent,
            "b".to_string(),
            PublishOptions::new().with_session_id("s2"),
        );

        let s1 = broker.history(&[filter_by_session_id("s1")]);
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].payload, "a");
        assert_eq!(s1[0].session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_subscribe_from_plain_thread() {
        let broker = broker(8, 100);
        let token = CancellationToken::new();
        let mut rx = broker.subscribe(token.clone(), vec![]);

        broker.publish(ChatEventType::MessageSent, "a".to_string(), PublishOptions::new());
        assert_eq!(rx.try_recv().unwrap().payload, "a");

        // Without a runtime the cancellation is applied by the next publish.
        token.cancel();
        broker.publish(ChatEventType::MessageSent, "b".to_string(), PublishOptions::new());
        assert_eq!(broker.subscriber_count(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_replay_from_plain_thread() {
        let broker = broker(8, 100);
        let since = Utc::now() - chrono::Duration::seconds(1);
        broker.publish(ChatEventType::MessageSent, "h0".to_string(), PublishOptions::new());
        broker.publish(ChatEventType::MessageSent, "h1".to_string(), PublishOptions::new());

        let token = CancellationToken::new();
        let mut rx = broker.replay_events(token.clone(), since, vec![]);
        assert_eq!(rx.blocking_recv().unwrap().payload, "h0");
        assert_eq!(rx.blocking_recv().unwrap().payload, "h1");

        broker.publish(ChatEventType::MessageSent, "live".to_string(), PublishOptions::new());
        assert_eq!(rx.blocking_recv().unwrap().payload, "live");

        token.cancel();
        assert!(rx.blocking_recv().is_none());
    }

    #[tokio::test]
    async fn test_filtered_subscriber_receives_only_matching() {
        let broker = broker(64, 100);
        let token = CancellationToken::new();
        let mut rx = broker.subscribe(token.clone(), vec![filter_by_type([SystemEventType::Error])]);

        broker.publish(SystemEventType::Error, "boom".to_string(), PublishOptions::new());
        broker.publish(ChatEventType::MessageSent, "hi".to_string(), PublishOptions::new());

        let event = recv(&mut rx).await;
        assert_eq!(event.event_type, EventType::System(SystemEventType::Error));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let broker = broker(64, 100);
        let mut rx = broker.subscribe(CancellationToken::new(), vec![]);

        for i in 0..20 {
            broker.publish(ChatEventType::TextChunk, i.to_string(), PublishOptions::new());
        }
        for i in 0..20 {
            assert_eq!(recv(&mut rx).await.payload, i.to_string());
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_full_channel_drops_without_blocking() {
        let broker = broker(1, 100);
        let mut rx = broker.subscribe(CancellationToken::new(), vec![]);

        assert!(broker.publish(ChatEventType::MessageSent, "first".to_string(), PublishOptions::new()).is_some());
        assert!(broker.publish(ChatEventType::MessageSent, "second".to_string(), PublishOptions::new()).is_some());

        assert_eq!(recv(&mut rx).await.payload, "first");
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.stats().dropped, 1);
        assert!(logs_contain("subscriber channel full, dropping event"));
    }

    #[tokio::test]
    async fn test_cancel_closes_only_that_subscriber() {
        let broker = broker(64, 100);
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let mut rx1 = broker.subscribe(first.clone(), vec![]);
        let mut rx2 = broker.subscribe(second.clone(), vec![]);
        assert_eq!(broker.subscriber_count(), 2);

        first.cancel();
        assert_closed(&mut rx1).await;

        broker.publish(ChatEventType::MessageSent, "still here".to_string(), PublishOptions::new());
        assert_eq!(recv(&mut rx2).await.payload, "still here");
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let broker = broker(64, 100);
        let rx = broker.subscribe(CancellationToken::new(), vec![]);
        drop(rx);

        broker.publish(ChatEventType::MessageSent, "x".to_string(), PublishOptions::new());
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_closes_channels() {
        let broker = broker(64, 100);
        let token = CancellationToken::new();
        let mut rx = broker.subscribe(token.clone(), vec![]);

        broker.shutdown();
        broker.shutdown();

        assert_closed(&mut rx).await;
        assert!(broker.is_shut_down());
        assert_eq!(broker.subscriber_count(), 0);
        assert!(broker.publish(ChatEventType::MessageSent, "late".to_string(), PublishOptions::new()).is_none());
        assert!(broker.history(&[]).is_empty());

        // Cancelling after shutdown must not touch the already-closed channel.
        token.cancel();

        let mut late = broker.subscribe(CancellationToken::new(), vec![]);
        assert_closed(&mut late).await;
    }

    #[tokio::test]
    async fn test_replay_yields_history_then_live() {
        let broker = broker(64, 100);
        let first = broker
            .publish(ChatEventType::MessageSent, "h0".to_string(), PublishOptions::new())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        broker.publish(ChatEventType::MessageSent, "h1".to_string(), PublishOptions::new());
        broker.publish(ChatEventType::MessageSent, "h2".to_string(), PublishOptions::new());

        let token = CancellationToken::new();
        let mut rx = broker.replay_events(token.clone(), first.timestamp, vec![]);

        assert_eq!(recv(&mut rx).await.payload, "h1");
        assert_eq!(recv(&mut rx).await.payload, "h2");

        broker.publish(ChatEventType::MessageSent, "live".to_string(), PublishOptions::new());
        assert_eq!(recv(&mut rx).await.payload, "live");
        assert!(rx.try_recv().is_err());

        token.cancel();
        assert_closed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_replay_applies_filters_and_ends_on_shutdown() {
        let broker = broker(64, 100);
        let since = Utc::now() - chrono::Duration::seconds(1);
        broker.publish(SystemEventType::Started, "sys".to_string(), PublishOptions::new());
        broker.publish(ChatEventType::MessageSent, "chat".to_string(), PublishOptions::new());

        let mut rx = broker.replay_events(
            CancellationToken::new(),
            since,
            vec![filter_by_type([ChatEventType::MessageSent])],
        );
        assert_eq!(recv(&mut rx).await.payload, "chat");

        broker.shutdown();
        assert_closed(&mut rx).await;
    }

    #[tokio::test]
    async fn test_persistence_only_when_requested() {
        let broker = broker(64, 100);
        let store = Arc::new(MemoryStore::default());
        broker.set_persistence(Some(store.clone()));

        broker.publish(ChatEventType::MessageSent, "skip".to_string(), PublishOptions::new());
        let kept = broker
            .publish(
                ChatEventType::MessageSent,
                "keep".to_string(),
                PublishOptions::new().with_persistence(Duration::from_secs(60)),
            )
            .unwrap();

        let stored = store.retrieve(&EventFilter::Always, 0).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, kept.id);
        assert_eq!(stored[0].payload, "keep");
    }

    struct FailingStore;

    impl PersistenceStore for FailingStore {
        fn store(&self, event: &StoredEvent) -> StoreResult<()> {
            Err(StoreError::NotFound(event.id.clone()))
        }

        fn retrieve(&self, _filter: &EventFilter, _limit: usize) -> StoreResult<Vec<StoredEvent>> {
            Ok(Vec::new())
        }

        fn delete(&self, id: &str) -> StoreResult<()> {
            Err(StoreError::NotFound(id.to_string()))
        }

        fn cleanup(&self, _older_than: Duration) -> StoreResult<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_store_failure_does_not_abort_delivery() {
        let broker = broker(64, 100);
        broker.set_persistence(Some(Arc::new(FailingStore)));
        let mut rx = broker.subscribe(CancellationToken::new(), vec![]);

        broker.publish(
            ChatEventType::MessageSent,
            "delivered".to_string(),
            PublishOptions::new().with_persistence(None::<Duration>),
        );

        assert_eq!(recv(&mut rx).await.payload, "delivered");
        assert!(logs_contain("failed to persist event"));
    }
}
