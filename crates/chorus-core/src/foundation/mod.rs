//! Foundation layer - Core types shared by every other layer.
//!
//! - Capability taxonomy and declarations
//! - Error taxonomy and the default rate-limit classifier
//! - The normalized message model

pub mod capability;
pub mod error;
pub mod message;

pub use capability::{Capabilities, Capability, Category};
pub use error::{ChorusError, ChorusResult, RateLimitClassifier};
pub use message::{
    Annotations, Chat, ChatKind, Content, Media, MediaKind, Message, MessageId, MessageKind,
    Participant, Poll,
};
