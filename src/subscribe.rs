//! Activity feed subscriptions.
//!
//! The only shipped strategy is polling: a [`PollingSubscriber`] owns a
//! jittered timer loop that fetches a feed snapshot, sorts and dedupes the
//! items against a high-water-mark cursor, and pushes them into a channel
//! in ascending identifier order. Strategy selection is driven by the hub
//! types a feed advertises, through a [`SubscriberRegistry`].
//!
//! A subscriber is single-use: construction hands the session state to one
//! `subscribe` call, which consumes it. The output channel closes when the
//! sender passed to `subscribe` is dropped on return, on every exit path.

use crate::activity::{ActivityFeed, ActivityFeedQuery, ActivityItem, HUB_TYPE_POLL};
use crate::api::{ActivityApi, ApiError};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Poll interval used when the configuration supplies none.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that end a subscription.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// The caller's cancellation token fired, or the receiving side of the
    /// output channel went away.
    #[error("subscription cancelled")]
    Cancelled,
    /// A fetch failed with anything other than a rate-limit signal.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Immutable per-subscription configuration.
///
/// Resolved once at construction; the polling loop never consults the
/// environment or any other hidden source.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Base poll interval. Zero falls back to [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Duration,
    /// Jitter factor: each wait adds a uniformly random extra delay of up
    /// to `poll_interval * jitter` on top of the base interval.
    pub jitter: f64,
    /// Whether items carrying a failure reason are emitted.
    pub report_failed: bool,
    /// Type-tag restriction applied to every fetch.
    pub query: ActivityFeedQuery,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            jitter: 1.0,
            report_failed: false,
            query: ActivityFeedQuery::new(),
        }
    }
}

/// A subscription strategy ready to run.
///
/// Boxed so the registry can dispatch on hub type without knowing the
/// concrete strategy; consuming `self` makes the single-use lifecycle
/// explicit in the signature.
pub trait Subscriber: Send {
    fn subscribe(
        self: Box<Self>,
        cancel: CancellationToken,
        tx: mpsc::Sender<ActivityItem>,
    ) -> BoxFuture<'static, Result<(), SubscribeError>>;
}

/// Polling subscription session.
///
/// Owns its cursor and pending rate-limit state exclusively; the type is
/// deliberately not `Clone` and `subscribe` consumes it, so a session can
/// never be shared or reused across tasks.
pub struct PollingSubscriber<A> {
    api: A,
    feed_url: String,
    config: SubscriberConfig,
    /// Extra delay demanded by the server, applied to exactly one poll.
    rate_limit: Duration,
    /// High-water mark of emitted identifiers; items at or below it are
    /// already seen.
    last_id: Option<String>,
}

impl<A: ActivityApi + 'static> PollingSubscriber<A> {
    pub fn new(api: A, feed_url: impl Into<String>, config: SubscriberConfig) -> Self {
        PollingSubscriber {
            api,
            feed_url: feed_url.into(),
            config,
            rate_limit: Duration::ZERO,
            last_id: None,
        }
    }

    /// Runs the subscription loop until cancellation or a fatal fetch
    /// error.
    ///
    /// Items arrive on `tx` in ascending identifier order, within and
    /// across polls, assuming server identifiers are consistent with a
    /// total lexicographic order (a documented precondition of the feed).
    /// The channel closes when this returns, on every exit path, because
    /// `tx` is dropped here. Cancellation is observed only while waiting
    /// on the timer; an in-flight fetch or emit completes first.
    pub async fn subscribe(
        mut self,
        cancel: CancellationToken,
        tx: mpsc::Sender<ActivityItem>,
    ) -> Result<(), SubscribeError> {
        tracing::debug!(feed = %self.feed_url, "Starting poll loop");
        loop {
            let delay = self.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(feed = %self.feed_url, "Subscription cancelled");
                    return Err(SubscribeError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let feed = match self.api.list_activity(&self.feed_url, &self.config.query).await {
                Ok(feed) => feed,
                Err(ApiError::RateLimited { retry_after }) => {
                    // Absorbed, not surfaced: this iteration emits nothing
                    // and the cursor stays put.
                    tracing::debug!(feed = %self.feed_url, ?retry_after, "Rate limited, deferring next poll");
                    self.rate_limit = retry_after;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(feed = %self.feed_url, error = %e, "Fatal fetch error, ending subscription");
                    return Err(e.into());
                }
            };

            self.emit(&tx, feed.items).await?;
        }
    }

    /// Timer for the next poll: base interval, plus any pending
    /// server-requested delay (consumed here), plus uniform jitter in
    /// `[0, base * jitter)`.
    fn next_delay(&mut self) -> Duration {
        let base = if self.config.poll_interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            self.config.poll_interval
        };
        let rate_limit = std::mem::take(&mut self.rate_limit);
        let jitter = base.mul_f64(rand::rng().random_range(0.0..1.0) * self.config.jitter.max(0.0));
        base + rate_limit + jitter
    }

    /// Drains one fetched batch into the channel: sort ascending by id,
    /// suppress already-seen and (optionally) failed items, advance the
    /// cursor after each successful send. The send blocks on a slow
    /// consumer; a dropped receiver counts as cancellation.
    async fn emit(
        &mut self,
        tx: &mpsc::Sender<ActivityItem>,
        mut items: Vec<ActivityItem>,
    ) -> Result<(), SubscribeError> {
        items.sort_by(|a, b| a.id.cmp(&b.id));
        for item in items {
            if let Some(last) = &self.last_id {
                if item.id.as_str() <= last.as_str() {
                    continue;
                }
            }
            if !self.config.report_failed && item.failure_reason().is_some() {
                tracing::trace!(id = %item.id, "Suppressing failed activity");
                continue;
            }
            let id = item.id.clone();
            if tx.send(item).await.is_err() {
                tracing::debug!(feed = %self.feed_url, "Receiver dropped, ending subscription");
                return Err(SubscribeError::Cancelled);
            }
            self.last_id = Some(id);
        }
        Ok(())
    }
}

impl<A: ActivityApi + 'static> Subscriber for PollingSubscriber<A> {
    fn subscribe(
        self: Box<Self>,
        cancel: CancellationToken,
        tx: mpsc::Sender<ActivityItem>,
    ) -> BoxFuture<'static, Result<(), SubscribeError>> {
        (*self).subscribe(cancel, tx).boxed()
    }
}

type SubscriberFactory =
    Box<dyn Fn(String, SubscriberConfig) -> Box<dyn Subscriber> + Send + Sync>;

/// Capability-keyed strategy map: hub type to subscriber constructor.
///
/// `poll` is registered out of the box; alternative transports (push,
/// webhooks) slot in through [`SubscriberRegistry::register`] without
/// touching the dispatch logic.
pub struct SubscriberRegistry {
    factories: HashMap<String, SubscriberFactory>,
}

impl SubscriberRegistry {
    pub fn new<A: ActivityApi + Clone + 'static>(api: A) -> Self {
        let mut registry = SubscriberRegistry {
            factories: HashMap::new(),
        };
        registry.register(HUB_TYPE_POLL, move |url, config| {
            Box::new(PollingSubscriber::new(api.clone(), url, config))
        });
        registry
    }

    /// Registers a strategy for `hub_type` (matched case-insensitively),
    /// replacing any existing registration.
    pub fn register<F>(&mut self, hub_type: &str, factory: F)
    where
        F: Fn(String, SubscriberConfig) -> Box<dyn Subscriber> + Send + Sync + 'static,
    {
        self.factories
            .insert(hub_type.to_ascii_lowercase(), Box::new(factory));
    }

    /// Builds a subscriber for `feed`: the first advertised hub with a
    /// registered strategy wins; a feed with no usable hub is polled at
    /// its own feed URL.
    pub fn subscriber(&self, feed: &ActivityFeed, config: SubscriberConfig) -> Box<dyn Subscriber> {
        for hub in &feed.hubs {
            if let Some(factory) = self.factories.get(&hub.hub_type.to_ascii_lowercase()) {
                tracing::debug!(hub_type = %hub.hub_type, url = %hub.url, "Selected subscription strategy");
                return factory(hub.url.clone(), config);
            }
        }
        let poll = &self.factories[HUB_TYPE_POLL];
        poll(feed.feed_url.clone(), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityExt, Hub};
    use crate::meta::Metadata;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Scripted feed source: hands out one result per poll and records
    /// when each fetch happened (in paused-clock time).
    #[derive(Clone)]
    struct ScriptedFeed {
        batches: Arc<Mutex<Vec<Result<ActivityFeed, ApiError>>>>,
        fetch_times: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedFeed {
        fn new(batches: Vec<Result<ActivityFeed, ApiError>>) -> Self {
            ScriptedFeed {
                batches: Arc::new(Mutex::new(batches)),
                fetch_times: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ActivityApi for ScriptedFeed {
        fn list_activity<'a>(
            &'a self,
            _feed_url: &'a str,
            _query: &'a ActivityFeedQuery,
        ) -> BoxFuture<'a, Result<ActivityFeed, ApiError>> {
            async move {
                self.fetch_times.lock().unwrap().push(Instant::now());
                let mut batches = self.batches.lock().unwrap();
                if batches.is_empty() {
                    // Script exhausted: end the subscription.
                    Err(ApiError::Http(410))
                } else {
                    batches.remove(0)
                }
            }
            .boxed()
        }

        fn check_endpoint(&self) -> BoxFuture<'_, Result<Metadata, ApiError>> {
            async move { Ok(Metadata::default()) }.boxed()
        }
    }

    fn item(id: &str) -> ActivityItem {
        ActivityItem {
            id: id.to_string(),
            title: format!("item {id}"),
            ..Default::default()
        }
    }

    fn failed_item(id: &str, reason: &str) -> ActivityItem {
        ActivityItem {
            stormforge: Some(ActivityExt {
                failure_reason: reason.to_string(),
                failure_message: String::new(),
            }),
            ..item(id)
        }
    }

    fn feed_of(items: Vec<ActivityItem>) -> Result<ActivityFeed, ApiError> {
        Ok(ActivityFeed {
            items,
            ..Default::default()
        })
    }

    fn fast_config() -> SubscriberConfig {
        SubscriberConfig {
            poll_interval: Duration::from_secs(10),
            jitter: 0.0,
            ..Default::default()
        }
    }

    /// Runs a subscription over scripted batches to completion, returning
    /// the emitted ids and the final result.
    async fn run_scripted(
        config: SubscriberConfig,
        batches: Vec<Result<ActivityFeed, ApiError>>,
    ) -> (Vec<String>, Result<(), SubscribeError>) {
        let api = ScriptedFeed::new(batches);
        let subscriber = PollingSubscriber::new(api, "activity", config);
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(subscriber.subscribe(CancellationToken::new(), tx));

        let mut ids = Vec::new();
        while let Some(item) = rx.recv().await {
            ids.push(item.id);
        }
        (ids, handle.await.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_batches_are_deduplicated() {
        let (ids, result) = run_scripted(
            fast_config(),
            vec![
                feed_of(vec![item("a"), item("b"), item("c")]),
                feed_of(vec![item("b"), item("c"), item("d")]),
            ],
        )
        .await;

        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(matches!(result, Err(SubscribeError::Api(ApiError::Http(410)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_emitted_in_sorted_id_order() {
        let (ids, _) = run_scripted(
            fast_config(),
            vec![feed_of(vec![item("c"), item("a"), item("d"), item("b")])],
        )
        .await;

        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_items_suppressed_by_default() {
        let (ids, _) = run_scripted(
            fast_config(),
            vec![feed_of(vec![
                item("a"),
                failed_item("b", "InvalidManifest"),
                item("c"),
            ])],
        )
        .await;

        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_items_emitted_when_reporting_enabled() {
        let config = SubscriberConfig {
            report_failed: true,
            ..fast_config()
        };
        let (ids, _) = run_scripted(
            config,
            vec![feed_of(vec![
                item("a"),
                failed_item("b", "InvalidManifest"),
            ])],
        )
        .await;

        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_delay_applied_to_exactly_one_poll() {
        let api = ScriptedFeed::new(vec![
            feed_of(vec![item("a")]),
            Err(ApiError::RateLimited {
                retry_after: Duration::from_secs(5),
            }),
            feed_of(vec![item("b")]),
            feed_of(vec![item("c")]),
        ]);
        let subscriber = PollingSubscriber::new(api.clone(), "activity", fast_config());
        let (tx, mut rx) = mpsc::channel(64);
        let start = Instant::now();
        let handle = tokio::spawn(subscriber.subscribe(CancellationToken::new(), tx));
        while rx.recv().await.is_some() {}
        let _ = handle.await.unwrap();

        let times: Vec<Duration> = api
            .fetch_times
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start))
            .collect();
        // Polls at 10s and 20s, then 10s + 5s penalty at 35s, then back to
        // the plain interval: 45s, and the script-ending fetch at 55s.
        assert_eq!(
            times,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(20),
                Duration::from_secs(35),
                Duration::from_secs(45),
                Duration::from_secs(55),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_poll_does_not_advance_cursor() {
        let (ids, _) = run_scripted(
            fast_config(),
            vec![
                feed_of(vec![item("a")]),
                Err(ApiError::RateLimited {
                    retry_after: Duration::from_secs(1),
                }),
                feed_of(vec![item("a"), item("b")]),
            ],
        )
        .await;

        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting_closes_channel() {
        let api = ScriptedFeed::new(vec![feed_of(vec![item("a")])]);
        let subscriber = PollingSubscriber::new(
            api,
            "activity",
            SubscriberConfig {
                poll_interval: Duration::from_secs(3600),
                jitter: 0.0,
                ..Default::default()
            },
        );
        let (tx, mut rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(subscriber.subscribe(cancel.clone(), tx));

        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SubscribeError::Cancelled)));
        // Channel closed with no sends
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_receiver_ends_subscription() {
        let api = ScriptedFeed::new(vec![feed_of(vec![item("a"), item("b")])]);
        let subscriber = PollingSubscriber::new(api, "activity", fast_config());
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = subscriber.subscribe(CancellationToken::new(), tx).await;
        assert!(matches!(result, Err(SubscribeError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_extends_wait_up_to_one_interval() {
        // With full jitter the first poll lands in [10s, 20s).
        let api = ScriptedFeed::new(vec![]);
        let subscriber = PollingSubscriber::new(
            api.clone(),
            "activity",
            SubscriberConfig {
                poll_interval: Duration::from_secs(10),
                jitter: 1.0,
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::channel(1);
        let start = Instant::now();
        let _ = subscriber.subscribe(CancellationToken::new(), tx).await;

        let elapsed = api.fetch_times.lock().unwrap()[0].duration_since(start);
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(20));
    }

    #[test]
    fn test_registry_selects_poll_hub() {
        let api = ScriptedFeed::new(vec![]);
        let registry = SubscriberRegistry::new(api);
        let feed = ActivityFeed {
            feed_url: "https://api.example.com/activity".to_string(),
            hubs: vec![
                Hub {
                    hub_type: "websub".to_string(),
                    url: "https://api.example.com/push".to_string(),
                },
                Hub {
                    hub_type: "POLL".to_string(),
                    url: "https://api.example.com/hub".to_string(),
                },
            ],
            ..Default::default()
        };
        // Dispatch is exercised end-to-end in tests/watch.rs; here we only
        // care that an unknown hub type does not panic the selection.
        let _subscriber = registry.subscriber(&feed, SubscriberConfig::default());

        let no_hubs = ActivityFeed {
            feed_url: "https://api.example.com/activity".to_string(),
            ..Default::default()
        };
        let _fallback = registry.subscriber(&no_hubs, SubscriberConfig::default());
    }
}
