// Publish/subscribe event channel
pub mod channel;

pub use channel::{
    EventCallback, EventChannel, EventMessage, EventSubscription, WILDCARD_TOPIC,
};
