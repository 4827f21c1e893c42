//! Topic-keyed publish/subscribe bus
//!
//! Sessions attach their outbound frame queue, then subscribe to topics.
//! `publish` hands an encoded frame to every session subscribed at that
//! moment. Delivery is at most once with no replay: a late subscriber never
//! sees earlier publishes.
//!
//! Fan-out never waits on a subscriber. A session whose queue is full loses
//! that frame, and the drop is logged.

use std::collections::HashSet;
use std::fmt;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::game::entity::EntityId;
use crate::game::realm::{RealmId, RegionCoord};
use crate::net::session::SessionId;

/// A named channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Everything happening inside one region
    Region { realm: RealmId, coord: RegionCoord },
    /// Messages addressed to one entity
    Entity(EntityId),
    /// Realm-wide broadcast
    Realm(RealmId),
}

impl Topic {
    pub fn region(realm: RealmId, coord: RegionCoord) -> Self {
        Topic::Region { realm, coord }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Region { realm, coord } => write!(f, "region.{}.{}.{}", realm, coord.arx, coord.ary),
            Topic::Entity(id) => write!(f, "entity.{}", id),
            Topic::Realm(id) => write!(f, "realm.{}", id),
        }
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Subscribers whose queue was full or closed
    pub dropped: usize,
}

/// In-process publish/subscribe bus
#[derive(Default)]
pub struct PubSubBus {
    /// Topic to subscribed sessions
    topics: DashMap<Topic, HashSet<SessionId>>,
    /// Session to its subscribed topics, for detach
    memberships: DashMap<SessionId, HashSet<Topic>>,
    /// Session outbound queues
    outbound: DashMap<SessionId, mpsc::Sender<Bytes>>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's outbound queue
    pub fn attach(&self, session: SessionId, outbound: mpsc::Sender<Bytes>) {
        self.outbound.insert(session, outbound);
        debug!(session_id = session, "Attached to bus");
    }

    /// Drop a session's queue and every subscription it holds.
    ///
    /// Returns how many subscriptions were removed.
    pub fn detach(&self, session: SessionId) -> usize {
        self.outbound.remove(&session);
        let topics = self
            .memberships
            .remove(&session)
            .map(|(_, topics)| topics)
            .unwrap_or_default();
        for topic in &topics {
            self.remove_subscriber(topic, session);
        }
        debug!(session_id = session, topics = topics.len(), "Detached from bus");
        topics.len()
    }

    /// Subscribe a session to a topic. Returns false if it already was.
    pub fn subscribe(&self, session: SessionId, topic: Topic) -> bool {
        let added = self.topics.entry(topic).or_default().insert(session);
        self.memberships.entry(session).or_default().insert(topic);
        if added {
            trace!(session_id = session, topic = %topic, "Subscribed");
        }
        added
    }

    /// Unsubscribe a session from a topic. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, session: SessionId, topic: Topic) -> bool {
        if let Some(mut topics) = self.memberships.get_mut(&session) {
            topics.remove(&topic);
        }
        let removed = self.remove_subscriber(&topic, session);
        if removed {
            trace!(session_id = session, topic = %topic, "Unsubscribed");
        }
        removed
    }

    fn remove_subscriber(&self, topic: &Topic, session: SessionId) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(mut sessions) => sessions.remove(&session),
            None => false,
        };
        self.topics.remove_if(topic, |_, sessions| sessions.is_empty());
        removed
    }

    /// Hand a frame to every current subscriber of a topic
    pub fn publish(&self, topic: &Topic, frame: Bytes) -> Delivery {
        let subscribers: Vec<SessionId> = match self.topics.get(topic) {
            Some(sessions) => sessions.iter().copied().collect(),
            None => return Delivery::default(),
        };
        self.deliver(topic, subscribers, frame)
    }

    /// Hand a frame once to every session subscribed to any of `topics`
    pub fn publish_all(&self, topics: &[Topic], frame: Bytes) -> Delivery {
        let mut subscribers = HashSet::new();
        for topic in topics {
            if let Some(sessions) = self.topics.get(topic) {
                subscribers.extend(sessions.iter().copied());
            }
        }
        match topics.first() {
            Some(first) => self.deliver(first, subscribers.into_iter().collect(), frame),
            None => Delivery::default(),
        }
    }

    fn deliver(&self, topic: &Topic, subscribers: Vec<SessionId>, frame: Bytes) -> Delivery {
        let mut delivery = Delivery::default();
        for session in subscribers {
            let Some(outbound) = self.outbound.get(&session).map(|tx| tx.value().clone()) else {
                continue;
            };
            match outbound.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session_id = session, topic = %topic, "Outbound queue full, dropping frame");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(session_id = session, topic = %topic, "Outbound queue closed");
                    delivery.dropped += 1;
                }
            }
        }
        delivery
    }

    pub fn is_subscribed(&self, session: SessionId, topic: &Topic) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|sessions| sessions.contains(&session))
    }

    /// Sessions currently subscribed to a topic
    pub fn subscribers(&self, topic: &Topic) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Topics a session is subscribed to
    pub fn topics_of(&self, session: SessionId) -> Vec<Topic> {
        self.memberships
            .get(&session)
            .map(|topics| topics.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(arx: i32, ary: i32) -> Topic {
        Topic::region(RealmId(1), RegionCoord::new(arx, ary))
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(region(2, -3).to_string(), "region.1.2.-3");
        assert_eq!(Topic::Entity(EntityId(9)).to_string(), "entity.9");
        assert_eq!(Topic::Realm(RealmId(4)).to_string(), "realm.4");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = PubSubBus::new();
        let delivery = bus.publish(&region(0, 0), Bytes::from_static(b"hello"));
        assert_eq!(delivery, Delivery::default());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let bus = PubSubBus::new();
        assert!(bus.subscribe(1, region(0, 0)));
        assert!(!bus.subscribe(1, region(0, 0)));
        assert_eq!(bus.subscribers(&region(0, 0)), vec![1]);

        assert!(bus.unsubscribe(1, region(0, 0)));
        assert!(!bus.unsubscribe(1, region(0, 0)));
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_current_subscribers_only() {
        let bus = PubSubBus::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        bus.attach(1, tx1);
        bus.attach(2, tx2);

        bus.subscribe(1, region(0, 0));
        let delivery = bus.publish(&region(0, 0), Bytes::from_static(b"first"));
        assert_eq!(delivery.delivered, 1);

        // Late subscriber misses the earlier publish
        bus.subscribe(2, region(0, 0));
        bus.publish(&region(0, 0), Bytes::from_static(b"second"));

        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"first"));
        assert_eq!(rx1.recv().await.unwrap(), Bytes::from_static(b"second"));
        assert_eq!(rx2.recv().await.unwrap(), Bytes::from_static(b"second"));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let bus = PubSubBus::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        bus.attach(1, slow_tx);
        bus.attach(2, fast_tx);
        bus.subscribe(1, Topic::Realm(RealmId(1)));
        bus.subscribe(2, Topic::Realm(RealmId(1)));

        bus.publish(&Topic::Realm(RealmId(1)), Bytes::from_static(b"a"));
        let delivery = bus.publish(&Topic::Realm(RealmId(1)), Bytes::from_static(b"b"));
        assert_eq!(delivery, Delivery { delivered: 1, dropped: 1 });

        assert_eq!(fast_rx.recv().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(fast_rx.recv().await.unwrap(), Bytes::from_static(b"b"));
    }

    #[tokio::test]
    async fn test_publish_all_delivers_once_per_session() {
        let bus = PubSubBus::new();
        let (tx, mut rx) = mpsc::channel(8);
        bus.attach(1, tx);
        bus.subscribe(1, region(0, 0));
        bus.subscribe(1, region(1, 0));

        let delivery = bus.publish_all(&[region(0, 0), region(1, 0)], Bytes::from_static(b"e"));
        assert_eq!(delivery.delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"e"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_removes_everything() {
        let bus = PubSubBus::new();
        let (tx, _rx) = mpsc::channel(8);
        bus.attach(7, tx);
        bus.subscribe(7, region(0, 0));
        bus.subscribe(7, Topic::Entity(EntityId(3)));
        bus.subscribe(8, region(0, 0));

        assert_eq!(bus.detach(7), 2);
        assert!(bus.topics_of(7).is_empty());
        assert!(!bus.is_subscribed(7, &region(0, 0)));
        assert_eq!(bus.subscribers(&region(0, 0)), vec![8]);
        assert_eq!(bus.topic_count(), 1);
    }
}
