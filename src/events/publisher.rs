use super::types::LifecycleEvent;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Push-style sink for lifecycle events
///
/// Observers are called synchronously, in emission order, with no publisher
/// lock held. An observer may publish (or trigger code that publishes); the
/// nested event is queued and delivered right after the current one. Slow
/// work should still be handed off.
pub trait LifecycleObserver: Send + Sync {
    fn on_event(&self, event: &PublishedEvent);
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    /// Monotonic per publisher; delivery order equals sequence order
    pub sequence: u64,
    pub event: LifecycleEvent,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl PublishedEvent {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }

    /// Flattened payload with `name`, `sequence` and `published_at` added
    pub fn to_json(&self) -> Result<Value, PublishError> {
        let mut payload = serde_json::to_value(&self.event)?;
        if let Value::Object(map) = &mut payload {
            map.insert("name".into(), Value::from(self.name()));
            map.insert("sequence".into(), Value::from(self.sequence));
            map.insert(
                "published_at".into(),
                Value::from(self.published_at.to_rfc3339()),
            );
        }
        Ok(payload)
    }
}

/// Lifecycle event publisher
///
/// Fans every event out to registered observers and to broadcast
/// subscribers. Events are sequenced into a queue and a single deliverer
/// drains it, so all sinks see one global order and re-entrant publishing
/// cannot deadlock.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
    observers: Arc<RwLock<Vec<Arc<dyn LifecycleObserver>>>>,
    delivery: Arc<Mutex<DeliveryQueue>>,
    sequence: Arc<AtomicU64>,
}

#[derive(Default)]
struct DeliveryQueue {
    pending: VecDeque<PublishedEvent>,
    draining: bool,
}

/// Releases the deliverer role if an observer panics mid-drain
struct DrainGuard<'a> {
    delivery: &'a Mutex<DeliveryQueue>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.delivery.lock().draining = false;
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("observers", &self.observers.read().len())
            .field("subscribers", &self.sender.receiver_count())
            .field("published", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

/// Snapshot of publisher activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPublisherStats {
    pub published: u64,
    pub observers: usize,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            observers: Arc::new(RwLock::new(Vec::new())),
            delivery: Arc::new(Mutex::new(DeliveryQueue::default())),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        {
            let mut delivery = self.delivery.lock();
            let published = PublishedEvent {
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
                event,
                published_at: chrono::Utc::now(),
            };
            trace!(event = published.name(), sequence = published.sequence, "Publishing lifecycle event");
            delivery.pending.push_back(published);

            // Whoever is already draining will deliver it
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        let mut guard = DrainGuard {
            delivery: &self.delivery,
            armed: true,
        };
        loop {
            let next = {
                let mut delivery = self.delivery.lock();
                match delivery.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        delivery.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            let observers = self.observers.read().clone();
            for observer in &observers {
                observer.on_event(&next);
            }

            // No subscribers is fine; events are still delivered to observers
            let _ = self.sender.send(next);
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.write().push(observer);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.sequence.load(Ordering::SeqCst),
            observers: self.observers.read().len(),
            subscribers: self.sender.receiver_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(crate::constants::defaults::EVENT_CHANNEL_CAPACITY)
    }
}

/// Observer that keeps every event in memory
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<PublishedEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(PublishedEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl LifecycleObserver for EventRecorder {
    fn on_event(&self, event: &PublishedEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn cancelled() -> LifecycleEvent {
        LifecycleEvent::OrchestrationCancelled {
            orchestration_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_observers_receive_in_emission_order() {
        let publisher = EventPublisher::new(16);
        let recorder = EventRecorder::new();
        publisher.add_observer(recorder.clone());

        publisher.publish(cancelled());
        publisher.publish(LifecycleEvent::StageStarted {
            orchestration_id: Uuid::new_v4(),
            stage: "build".into(),
            task_count: 2,
        });

        let sequences: Vec<u64> = recorder.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(recorder.names(), vec!["orchestration:cancelled", "stage:started"]);
        assert_eq!(publisher.stats().published, 2);
    }

    #[tokio::test]
    async fn test_broadcast_subscribers_receive_events() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        publisher.publish(cancelled());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name(), "orchestration:cancelled");
    }

    #[test]
    fn test_observer_may_publish_without_deadlock() {
        struct Echo {
            publisher: EventPublisher,
        }

        impl LifecycleObserver for Echo {
            fn on_event(&self, event: &PublishedEvent) {
                if let LifecycleEvent::StageStarted { orchestration_id, .. } = &event.event {
                    self.publisher.publish(LifecycleEvent::OrchestrationCancelled {
                        orchestration_id: *orchestration_id,
                    });
                }
            }
        }

        let publisher = EventPublisher::new(16);
        let recorder = EventRecorder::new();
        publisher.add_observer(Arc::new(Echo {
            publisher: publisher.clone(),
        }));
        publisher.add_observer(recorder.clone());

        publisher.publish(LifecycleEvent::StageStarted {
            orchestration_id: Uuid::new_v4(),
            stage: "build".into(),
            task_count: 1,
        });
        publisher.publish(cancelled());

        // The nested event is delivered after the one that caused it
        assert_eq!(
            recorder.names(),
            vec!["stage:started", "orchestration:cancelled", "orchestration:cancelled"]
        );
        let sequences: Vec<u64> = recorder.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let publisher = EventPublisher::default();
        publisher.publish(cancelled());
        assert_eq!(publisher.stats().published, 1);
    }

    #[test]
    fn test_to_json_flattens_metadata() {
        let publisher = EventPublisher::new(4);
        let recorder = EventRecorder::new();
        publisher.add_observer(recorder.clone());
        publisher.publish(cancelled());

        let json = recorder.events()[0].to_json().unwrap();
        assert_eq!(json["name"], "orchestration:cancelled");
        assert_eq!(json["sequence"], 1);
        assert!(json["orchestration_id"].is_string());
    }
}
