//! In-process live channel per booking.
//!
//! Each booking gets a broadcast channel for pushed events and a watch slot
//! holding the current provider position. The broadcast side never replays;
//! the watch slot is overwritten on every forwarded sample, so a late
//! subscriber can read the most recent position without seeing history.
//!
//! Providers also get a feed topic carrying new offers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::common::{BookingId, GeoPoint, ProviderId};
use crate::config::TrackingConfig;
use crate::domains::bookings::errors::DispatchError;
use crate::domains::bookings::machines::BookingStateMachine;
use crate::domains::bookings::models::BookingStatus;

use super::events::{LocationUpdate, ProviderFeedEvent, TrackingEvent};

/// What happened to a location sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
    Forwarded,
    /// Dropped at the source: inside the throttle interval.
    Throttled,
}

struct BookingChannel {
    events: broadcast::Sender<TrackingEvent>,
    latest: watch::Sender<Option<LocationUpdate>>,
    publisher: Option<ProviderId>,
    last_status: Option<BookingStatus>,
    last_forwarded: Option<Instant>,
}

impl BookingChannel {
    fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        let (latest, _) = watch::channel(None);
        Self {
            events,
            latest,
            publisher: None,
            last_status: None,
            last_forwarded: None,
        }
    }

    fn close(self, booking_id: BookingId) {
        // Dropping the senders afterwards ends every receiver
        let _ = self.events.send(TrackingEvent::Closed { booking_id });
    }
}

#[derive(Clone)]
pub struct TrackingHub {
    channels: Arc<RwLock<HashMap<BookingId, BookingChannel>>>,
    provider_feeds: Arc<RwLock<HashMap<ProviderId, broadcast::Sender<ProviderFeedEvent>>>>,
    config: TrackingConfig,
}

impl TrackingHub {
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            provider_feeds: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Open (or adopt) the channel for a booking and bind its location publisher.
    ///
    /// A channel created earlier by a subscriber is adopted. Binding a second,
    /// different provider is refused.
    pub async fn open(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
    ) -> Result<(), DispatchError> {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(booking_id)
            .or_insert_with(|| BookingChannel::new(self.config.channel_capacity));

        match channel.publisher {
            None => {
                channel.publisher = Some(provider_id);
                info!(booking_id = %booking_id, provider_id = %provider_id, "Tracking channel opened");
                Ok(())
            }
            Some(bound) if bound == provider_id => Ok(()),
            Some(bound) => {
                warn!(
                    booking_id = %booking_id,
                    bound = %bound,
                    provider_id = %provider_id,
                    "Refused to rebind tracking channel"
                );
                Err(DispatchError::UnauthorizedPublisher {
                    booking_id,
                    provider_id,
                })
            }
        }
    }

    /// Push a status change to subscribers.
    ///
    /// A status that is not a legal successor of the last one pushed is stale
    /// (a slower writer finishing late) and is dropped, so subscribers never
    /// see statuses out of mutation order. Terminal statuses close the channel.
    pub async fn publish_status(&self, booking_id: BookingId, status: BookingStatus) {
        self.push_status(booking_id, status, true).await
    }

    /// Push a status set by an admin override. Skips the ordering check.
    pub async fn publish_override_status(&self, booking_id: BookingId, status: BookingStatus) {
        self.push_status(booking_id, status, false).await
    }

    async fn push_status(&self, booking_id: BookingId, status: BookingStatus, ordered: bool) {
        let event = TrackingEvent::Status {
            booking_id,
            status,
            at: Utc::now(),
        };

        let mut channels = self.channels.write().await;
        let Some(channel) = channels.get_mut(&booking_id) else {
            return;
        };

        if ordered {
            if let Some(last) = channel.last_status {
                if !BookingStateMachine::can_transition(last, status) {
                    debug!(
                        booking_id = %booking_id,
                        last = %last,
                        status = %status,
                        "Dropped stale status event"
                    );
                    return;
                }
            }
        }

        channel.last_status = Some(status);
        let _ = channel.events.send(event);

        if status.is_terminal() {
            if let Some(channel) = channels.remove(&booking_id) {
                channel.close(booking_id);
                info!(booking_id = %booking_id, status = %status, "Tracking channel closed");
            }
        }
    }

    /// Forward a provider position, subject to the source throttle.
    ///
    /// Only the provider the channel was opened for may publish.
    pub async fn publish_location(
        &self,
        booking_id: BookingId,
        provider_id: ProviderId,
        point: GeoPoint,
    ) -> Result<PublishOutcome, DispatchError> {
        if !point.is_valid() {
            return Err(DispatchError::InvalidRequest(format!(
                "invalid coordinates ({}, {})",
                point.lat, point.lng
            )));
        }

        let mut channels = self.channels.write().await;
        let channel = match channels.get_mut(&booking_id) {
            Some(channel) if channel.publisher == Some(provider_id) => channel,
            _ => {
                warn!(
                    booking_id = %booking_id,
                    provider_id = %provider_id,
                    "Location from a provider not bound to this channel"
                );
                return Err(DispatchError::UnauthorizedPublisher {
                    booking_id,
                    provider_id,
                });
            }
        };

        let now = Instant::now();
        if let Some(last) = channel.last_forwarded {
            if now.duration_since(last) < self.config.location_throttle {
                debug!(booking_id = %booking_id, "Throttled location sample");
                return Ok(PublishOutcome::Throttled);
            }
        }

        let update = LocationUpdate::now(point);
        channel.last_forwarded = Some(now);
        channel.latest.send_replace(Some(update));
        let _ = channel.events.send(TrackingEvent::Location(update));

        Ok(PublishOutcome::Forwarded)
    }

    /// Subscribe to a booking's channel, creating it if needed.
    ///
    /// Nothing published before this call is pushed to the new subscriber.
    pub async fn subscribe(&self, booking_id: BookingId) -> Subscription {
        let mut channels = self.channels.write().await;
        let channel = channels
            .entry(booking_id)
            .or_insert_with(|| BookingChannel::new(self.config.channel_capacity));

        Subscription {
            booking_id,
            events: channel.events.subscribe(),
            latest: channel.latest.subscribe(),
            closed: false,
        }
    }

    /// Callback-style subscription. Dropping the handle unsubscribes.
    pub async fn subscribe_with<S, L>(
        &self,
        booking_id: BookingId,
        on_status: S,
        on_location: L,
    ) -> SubscriptionHandle
    where
        S: Fn(BookingStatus) + Send + 'static,
        L: Fn(LocationUpdate) + Send + 'static,
    {
        self.subscribe(booking_id)
            .await
            .with_callbacks(on_status, on_location)
    }

    /// Close a booking's channel without a final status.
    pub async fn close(&self, booking_id: BookingId) {
        if let Some(channel) = self.channels.write().await.remove(&booking_id) {
            channel.close(booking_id);
            info!(booking_id = %booking_id, "Tracking channel closed");
        }
    }

    pub async fn is_open(&self, booking_id: BookingId) -> bool {
        self.channels.read().await.contains_key(&booking_id)
    }

    pub async fn publisher(&self, booking_id: BookingId) -> Option<ProviderId> {
        self.channels
            .read()
            .await
            .get(&booking_id)
            .and_then(|channel| channel.publisher)
    }

    // =========================================================================
    // Provider request feeds
    // =========================================================================

    pub async fn subscribe_provider_requests(
        &self,
        provider_id: ProviderId,
    ) -> broadcast::Receiver<ProviderFeedEvent> {
        let mut feeds = self.provider_feeds.write().await;
        feeds
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .subscribe()
    }

    /// No-op when the provider has no connected feed.
    pub async fn publish_provider_event(&self, provider_id: ProviderId, event: ProviderFeedEvent) {
        let feeds = self.provider_feeds.read().await;
        if let Some(tx) = feeds.get(&provider_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop feeds nobody listens to and channels that were only ever
    /// subscribed to (no publisher bound) and have been abandoned.
    pub async fn cleanup(&self) {
        self.provider_feeds
            .write()
            .await
            .retain(|_, tx| tx.receiver_count() > 0);
        self.channels
            .write()
            .await
            .retain(|_, channel| channel.publisher.is_some() || channel.events.receiver_count() > 0);
    }

    /// Number of open booking channels
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for TrackingHub {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

/// Pull-style subscription to one booking's channel.
#[derive(Debug)]
pub struct Subscription {
    booking_id: BookingId,
    events: broadcast::Receiver<TrackingEvent>,
    latest: watch::Receiver<Option<LocationUpdate>>,
    closed: bool,
}

impl Subscription {
    pub fn booking_id(&self) -> BookingId {
        self.booking_id
    }

    /// Next pushed event, or `None` once the channel has closed.
    ///
    /// A subscriber that falls behind skips ahead instead of blocking the publisher.
    pub async fn next(&mut self) -> Option<TrackingEvent> {
        if self.closed {
            return None;
        }
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if matches!(event, TrackingEvent::Closed { .. }) {
                        self.closed = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(booking_id = %self.booking_id, skipped, "Subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    /// The current position slot. Reads the latest forwarded sample only.
    pub fn latest_location(&self) -> Option<LocationUpdate> {
        *self.latest.borrow()
    }

    /// Drive this subscription on a task, invoking the callbacks per event.
    pub fn with_callbacks<S, L>(mut self, on_status: S, on_location: L) -> SubscriptionHandle
    where
        S: Fn(BookingStatus) + Send + 'static,
        L: Fn(LocationUpdate) + Send + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = self.next().await {
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                match event {
                    TrackingEvent::Status { status, .. } => on_status(status),
                    TrackingEvent::Location(update) => on_location(update),
                    TrackingEvent::Closed { .. } => break,
                }
            }
        });

        SubscriptionHandle { active, task }
    }
}

/// Handle for a callback subscription.
pub struct SubscriptionHandle {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {}

    /// True once the channel closed or the handle was unsubscribed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn hub() -> TrackingHub {
        TrackingHub::new(TrackingConfig {
            location_throttle: Duration::from_secs(3),
            channel_capacity: 16,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_is_leading_edge() {
        let hub = hub();
        let booking_id = BookingId::new();
        let provider_id = ProviderId::new();
        hub.open(booking_id, provider_id).await.unwrap();

        let point = GeoPoint::new(19.07, 72.87);
        assert_eq!(
            hub.publish_location(booking_id, provider_id, point).await.unwrap(),
            PublishOutcome::Forwarded
        );
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            hub.publish_location(booking_id, provider_id, point).await.unwrap(),
            PublishOutcome::Throttled
        );
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            hub.publish_location(booking_id, provider_id, point).await.unwrap(),
            PublishOutcome::Forwarded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_sees_only_latest_location() {
        let hub = hub();
        let booking_id = BookingId::new();
        let provider_id = ProviderId::new();
        hub.open(booking_id, provider_id).await.unwrap();

        for i in 1..=3 {
            hub.publish_location(booking_id, provider_id, GeoPoint::new(19.0 + i as f64, 72.0))
                .await
                .unwrap();
            tokio::time::advance(Duration::from_secs(3)).await;
        }

        let mut sub = hub.subscribe(booking_id).await;
        assert_eq!(sub.latest_location().unwrap().lat, 22.0);

        hub.publish_location(booking_id, provider_id, GeoPoint::new(23.0, 72.0))
            .await
            .unwrap();
        match sub.next().await {
            Some(TrackingEvent::Location(update)) => assert_eq!(update.lat, 23.0),
            other => panic!("expected location, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_only_bound_provider_may_publish() {
        let hub = hub();
        let booking_id = BookingId::new();
        let bound = ProviderId::new();
        hub.open(booking_id, bound).await.unwrap();

        let err = hub
            .publish_location(booking_id, ProviderId::new(), GeoPoint::new(1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedPublisher { .. }));

        let err = hub.open(booking_id, ProviderId::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedPublisher { .. }));
        assert_eq!(hub.publisher(booking_id).await, Some(bound));
    }

    #[tokio::test]
    async fn test_publish_without_channel_is_unauthorized() {
        let hub = hub();
        let err = hub
            .publish_location(BookingId::new(), ProviderId::new(), GeoPoint::new(1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnauthorizedPublisher { .. }));
    }

    #[tokio::test]
    async fn test_terminal_status_then_closed() {
        let hub = hub();
        let booking_id = BookingId::new();
        hub.open(booking_id, ProviderId::new()).await.unwrap();
        let mut sub = hub.subscribe(booking_id).await;

        hub.publish_status(booking_id, BookingStatus::InProgress).await;
        hub.publish_status(booking_id, BookingStatus::Completed).await;

        assert!(matches!(
            sub.next().await,
            Some(TrackingEvent::Status { status: BookingStatus::InProgress, .. })
        ));
        assert!(matches!(
            sub.next().await,
            Some(TrackingEvent::Status { status: BookingStatus::Completed, .. })
        ));
        assert!(matches!(sub.next().await, Some(TrackingEvent::Closed { .. })));
        assert!(sub.next().await.is_none());
        assert!(!hub.is_open(booking_id).await);
    }

    #[tokio::test]
    async fn test_stale_status_is_not_reordered() {
        let hub = hub();
        let booking_id = BookingId::new();
        let mut sub = hub.subscribe(booking_id).await;

        hub.publish_status(booking_id, BookingStatus::Confirmed).await;
        hub.publish_status(booking_id, BookingStatus::InProgress).await;
        // Late writer for the earlier mutation
        hub.publish_status(booking_id, BookingStatus::EnRoute).await;
        hub.publish_status(booking_id, BookingStatus::Completed).await;

        let mut seen = Vec::new();
        while let Some(event) = sub.next().await {
            if let TrackingEvent::Status { status, .. } = event {
                seen.push(status);
            }
        }
        assert_eq!(
            seen,
            vec![
                BookingStatus::Confirmed,
                BookingStatus::InProgress,
                BookingStatus::Completed
            ]
        );
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_status() {
        let hub = hub();
        let booking_id = BookingId::new();
        let mut customer = hub.subscribe(booking_id).await;
        let mut admin = hub.subscribe(booking_id).await;

        hub.publish_status(booking_id, BookingStatus::Pending).await;

        for sub in [&mut customer, &mut admin] {
            assert!(matches!(
                sub.next().await,
                Some(TrackingEvent::Status { status: BookingStatus::Pending, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_callback_subscription_and_unsubscribe() {
        let hub = hub();
        let booking_id = BookingId::new();
        let provider_id = ProviderId::new();
        hub.open(booking_id, provider_id).await.unwrap();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        let handle = hub
            .subscribe_with(
                booking_id,
                move |status| sink.lock().unwrap().push(status),
                |_| {},
            )
            .await;

        hub.publish_status(booking_id, BookingStatus::EnRoute).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*statuses.lock().unwrap(), vec![BookingStatus::EnRoute]);

        handle.unsubscribe();
        hub.publish_status(booking_id, BookingStatus::InProgress).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*statuses.lock().unwrap(), vec![BookingStatus::EnRoute]);
    }

    #[tokio::test]
    async fn test_provider_feed_delivers_offers() {
        let hub = hub();
        let provider_id = ProviderId::new();
        let mut rx = hub.subscribe_provider_requests(provider_id).await;
        let booking_id = BookingId::new();

        hub.publish_provider_event(provider_id, ProviderFeedEvent::RequestWithdrawn { booking_id })
            .await;

        assert_eq!(
            rx.recv().await.unwrap(),
            ProviderFeedEvent::RequestWithdrawn { booking_id }
        );
    }

    #[tokio::test]
    async fn test_cleanup_keeps_opened_channels() {
        let hub = hub();
        let opened = BookingId::new();
        let abandoned = BookingId::new();
        hub.open(opened, ProviderId::new()).await.unwrap();
        drop(hub.subscribe(abandoned).await);

        hub.cleanup().await;

        assert!(hub.is_open(opened).await);
        assert!(!hub.is_open(abandoned).await);
    }
}
