//! Docker Event Deduplicator と通知リスナー
//!
//! エンジンのイベントストリームを読み、`(container_id, action)` ごとに
//! 一定時間内の重複を捨ててから Discord 連携へ通知する。

use crate::engine::{ContainerEngine, EngineEvent};
use berth_core::ProcessStore;
use berth_notify::{Notifier, dispatch_detached, event_message};
use futures_util::StreamExt;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 直近の `(container_id, action)` の時刻を覚えておく有界の台帳
pub struct EventDeduplicator {
    window: Duration,
    seen: LruCache<(String, String), Instant>,
}

impl EventDeduplicator {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            seen: LruCache::new(capacity),
        }
    }

    /// 前回から `window` 未満なら false。捨てたイベントでは時刻を更新しない
    pub fn should_dispatch(&mut self, container_id: &str, action: &str, now: Instant) -> bool {
        let key = (container_id.to_string(), action.to_string());
        if let Some(prior) = self.seen.peek(&key) {
            if now.saturating_duration_since(*prior) < self.window {
                return false;
            }
        }
        self.seen.put(key, now);
        true
    }

    /// 期限切れの記録を捨て、捨てた数を返す
    pub fn prune(&mut self, now: Instant) -> usize {
        let expired: Vec<(String, String)> = self
            .seen
            .iter()
            .filter(|(_, at)| now.saturating_duration_since(**at) >= self.window)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.seen.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// イベント1件の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDecision {
    Ignored,
    Duplicate,
    UnknownProcess(String),
    NoIntegration(String),
    NotSubscribed(String),
    Dispatched(String),
}

/// イベントを発したコンテナのプロセス名
///
/// compose のプロジェクトラベル、無ければコンテナ名の `_` より前。
pub fn process_name_for(event: &EngineEvent) -> Option<String> {
    if let Some(project) = event.attributes.get(COMPOSE_PROJECT_LABEL) {
        return Some(project.clone());
    }
    let name = event.attributes.get("name")?.trim_start_matches('/');
    let base = name.split('_').next().unwrap_or(name);
    (!base.is_empty()).then(|| base.to_string())
}

pub struct EventListener {
    store: Arc<ProcessStore>,
    notifier: Arc<dyn Notifier>,
    dedup: Mutex<EventDeduplicator>,
    window: Duration,
}

impl EventListener {
    pub fn new(
        store: Arc<ProcessStore>,
        notifier: Arc<dyn Notifier>,
        window: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            notifier,
            dedup: Mutex::new(EventDeduplicator::new(window, capacity)),
            window,
        }
    }

    pub async fn handle(&self, event: &EngineEvent, now: Instant) -> EventDecision {
        if !event.is_container() {
            return EventDecision::Ignored;
        }
        let fresh = self
            .dedup
            .lock()
            .should_dispatch(&event.actor_id, &event.action, now);
        if !fresh {
            tracing::debug!("Dropping duplicate {} for {}", event.action, event.actor_id);
            return EventDecision::Duplicate;
        }

        let Some(name) = process_name_for(event) else {
            return EventDecision::Ignored;
        };
        if self.store.find_process_by_name(&name).await.is_none() {
            return EventDecision::UnknownProcess(name);
        }
        let Some(integration) = self.store.integration_for(&name).await else {
            return EventDecision::NoIntegration(name);
        };
        if !integration.subscribes_to(&event.action) {
            return EventDecision::NotSubscribed(name);
        }

        let container = event
            .attributes
            .get("name")
            .map(String::as_str)
            .unwrap_or("Unknown");
        tracing::info!("Dispatching '{}' for {}", event.action, name);
        dispatch_detached(
            self.notifier.clone(),
            integration.webhook_url,
            event_message(&event.action, container),
        );
        EventDecision::Dispatched(name)
    }

    /// `shutdown` が立つまでイベントを処理し続ける。ストリームが切れたら再接続する
    pub async fn run(self, engine: Arc<dyn ContainerEngine>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Event listener started");
        let mut backoff = Duration::from_secs(1);
        let mut prune = tokio::time::interval(self.window.max(Duration::from_secs(1)));

        'outer: loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }
            match engine.events().await {
                Ok(mut events) => {
                    backoff = Duration::from_secs(1);
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break 'outer,
                            _ = prune.tick() => {
                                let pruned = self.dedup.lock().prune(Instant::now());
                                if pruned > 0 {
                                    tracing::debug!("Pruned {} event records", pruned);
                                }
                            }
                            next = events.next() => match next {
                                Some(Ok(event)) => {
                                    let decision = self.handle(&event, Instant::now()).await;
                                    tracing::trace!("{} {}: {:?}", event.kind, event.action, decision);
                                }
                                Some(Err(e)) => {
                                    tracing::warn!("Event stream failed: {}", e);
                                    break;
                                }
                                None => {
                                    tracing::debug!("Event stream ended");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => tracing::warn!("Failed to subscribe to events: {}", e),
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
        tracing::info!("Event listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, fake_config};
    use async_trait::async_trait;
    use berth_core::{DiscordIntegration, Process, ProcessType};
    use berth_notify::{Delivery, WebhookPayload};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    struct Recording(mpsc::UnboundedSender<(String, String)>);

    #[async_trait]
    impl Notifier for Recording {
        async fn deliver(&self, url: &str, payload: &WebhookPayload) -> berth_notify::Result<Delivery> {
            let _ = self.0.send((url.to_string(), payload.content.clone()));
            Ok(Delivery::Delivered)
        }
    }

    fn event(id: &str, action: &str, name: &str) -> EngineEvent {
        EngineEvent {
            kind: "container".into(),
            action: action.into(),
            actor_id: id.into(),
            attributes: HashMap::from([("name".to_string(), name.to_string())]),
        }
    }

    async fn listener() -> (
        EventListener,
        mpsc::UnboundedReceiver<(String, String)>,
        tempfile::TempDir,
    ) {
        let (config, dir) = fake_config();
        let store = Arc::new(ProcessStore::open(&config.state_file).await.unwrap());
        store
            .insert_process(Process::new("web", ProcessType::Nodejs, "node index.js", "/srv/web", 1))
            .await
            .unwrap();
        store
            .upsert_integration(DiscordIntegration {
                process_name: "web".into(),
                webhook_url: "https://discord.test/hook".into(),
                events: vec!["die".into(), "start".into()],
            })
            .await
            .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = EventListener::new(store, Arc::new(Recording(tx)), Duration::from_secs(30), 16);
        (listener, rx, dir)
    }

    #[test]
    fn test_dedup_window_slides_on_dispatch_only() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(30), 8);
        let t0 = Instant::now();
        assert!(dedup.should_dispatch("c1", "die", t0));
        assert!(!dedup.should_dispatch("c1", "die", t0 + Duration::from_secs(5)));
        assert!(!dedup.should_dispatch("c1", "die", t0 + Duration::from_secs(29)));
        assert!(dedup.should_dispatch("c1", "die", t0 + Duration::from_secs(35)));
        assert!(dedup.should_dispatch("c1", "start", t0 + Duration::from_secs(35)));
        assert!(dedup.should_dispatch("c2", "die", t0 + Duration::from_secs(35)));
    }

    #[test]
    fn test_dedup_is_bounded_and_prunes() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(30), 2);
        let t0 = Instant::now();
        dedup.should_dispatch("a", "die", t0);
        dedup.should_dispatch("b", "die", t0 + Duration::from_secs(10));
        dedup.should_dispatch("c", "die", t0 + Duration::from_secs(20));
        assert_eq!(dedup.len(), 2);
        assert_eq!(dedup.prune(t0 + Duration::from_secs(45)), 1);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_process_name_for() {
        assert_eq!(process_name_for(&event("c", "die", "web_web_1")).as_deref(), Some("web"));
        let mut labelled = event("c", "die", "web-web-1");
        labelled
            .attributes
            .insert(COMPOSE_PROJECT_LABEL.to_string(), "web".to_string());
        assert_eq!(process_name_for(&labelled).as_deref(), Some("web"));
        assert_eq!(process_name_for(&event("c", "die", "")), None);
    }

    async fn dispatched(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(Some((_, content))) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            out.push(content);
        }
        out
    }

    #[tokio::test]
    async fn test_events_five_seconds_apart_dispatch_once() {
        let (listener, mut rx, _dir) = listener().await;
        let t0 = Instant::now();
        let e = event("c1", "die", "web_web_1");

        assert_eq!(listener.handle(&e, t0).await, EventDecision::Dispatched("web".into()));
        assert_eq!(
            listener.handle(&e, t0 + Duration::from_secs(5)).await,
            EventDecision::Duplicate
        );
        assert_eq!(
            dispatched(&mut rx).await,
            vec!["Event triggered: die for container web_web_1"]
        );
    }

    #[tokio::test]
    async fn test_events_thirty_five_seconds_apart_dispatch_twice() {
        let (listener, mut rx, _dir) = listener().await;
        let t0 = Instant::now();
        let e = event("c1", "die", "web_web_1");

        listener.handle(&e, t0).await;
        listener.handle(&e, t0 + Duration::from_secs(35)).await;
        assert_eq!(dispatched(&mut rx).await.len(), 2);
    }

    #[tokio::test]
    async fn test_filtering() {
        let (listener, mut rx, _dir) = listener().await;
        let now = Instant::now();

        let network = EngineEvent {
            kind: "network".into(),
            ..event("n1", "connect", "web_web_1")
        };
        assert_eq!(listener.handle(&network, now).await, EventDecision::Ignored);
        assert_eq!(
            listener.handle(&event("c1", "pause", "web_web_1"), now).await,
            EventDecision::NotSubscribed("web".into())
        );
        assert_eq!(
            listener.handle(&event("c2", "die", "other_other_1"), now).await,
            EventDecision::UnknownProcess("other".into())
        );
        assert!(dispatched(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let (listener, mut rx, _dir) = listener().await;
        let engine = Arc::new(FakeEngine::new());
        engine.push_event(event("c1", "start", "web_web_1"));
        engine.push_event(event("c1", "start", "web_web_1"));

        let (tx, shutdown) = watch::channel(false);
        let task = tokio::spawn(listener.run(engine, shutdown));

        assert_eq!(dispatched(&mut rx).await.len(), 1);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
