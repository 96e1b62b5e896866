//! Server-sent event adapters for the tracking hub.
//!
//! Booking channels stream `status`, `location` and `closed` events and end
//! after `closed`. Provider feeds stream until the client disconnects.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::domains::tracking::{ProviderFeedEvent, Subscription, TrackingEvent};

fn json_event(name: &str, payload: &impl Serialize) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().event(name).data(data),
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// SSE response for one booking's channel.
///
/// A late subscriber first gets the current position slot (if any) as a
/// `location` event, then only live events.
pub fn booking_stream(
    subscription: Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let initial = subscription
        .latest_location()
        .map(|update| json_event("location", &TrackingEvent::Location(update)));

    let live = stream::unfold(Some(subscription), |state| async move {
        let mut subscription = state?;
        let event = subscription.next().await?;
        let sse = json_event(event.name(), &event);
        let next = match event {
            TrackingEvent::Closed { .. } => None,
            _ => Some(subscription),
        };
        Some((Ok::<_, Infallible>(sse), next))
    });

    let stream = stream::iter(initial.map(Ok)).chain(live);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE response for a provider's incoming-request feed.
pub fn provider_feed_stream(
    rx: broadcast::Receiver<ProviderFeedEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(json_event(event.name(), &event))),
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(_)) => {
            Some(Ok(Event::default().event("lagged").data("{}")))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
