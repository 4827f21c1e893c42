//! Publishing world changes to bus topics

use crate::bus::{Delivery, PubSubBus, Topic};
use crate::error::Result;
use crate::game::entity::{Entity, EntityId};
use crate::game::realm::RegionCoord;
use crate::protocol::messages::{EntitySnapshot, Message};

/// Encode once and publish to one topic
pub fn publish_message(
    bus: &PubSubBus,
    topic: &Topic,
    origin: Option<EntityId>,
    message: impl Into<Message>,
) -> Delivery {
    let frame = message.into().to_frame(origin).encode();
    bus.publish(topic, frame)
}

/// Publish an entity's snapshot to every region topic it occupies.
///
/// A session watching several of those regions receives it once.
pub fn publish_entity(bus: &PubSubBus, entity: &Entity) -> Result<Delivery> {
    let topics: Vec<Topic> = RegionCoord::within(&entity.region_grid())
        .map(|coord| Topic::region(entity.realm_id, coord))
        .collect();
    let frame = Message::from(EntitySnapshot::of(entity)?)
        .to_frame(Some(entity.id))
        .encode();
    Ok(bus.publish_all(&topics, frame))
}
