pub mod consumer;
pub mod filter;
pub mod message;

pub use consumer::{AckKind, ConsumerId, ConsumerInfo, ConsumerType};
pub use filter::MessageFilter;
pub use message::{Delivery, Message, MessageId};
