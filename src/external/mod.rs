//! External collaborator contracts
//!
//! The coordinator reaches identity, business entities, media and the
//! conversational transport only through these traits, so every piece of
//! workflow logic can be exercised against the in-memory implementations.

pub mod business;
pub mod identity;
pub mod media;
pub mod memory;
pub mod transport;

pub use business::{
    BusinessApi, BusinessError, ItemRef, NewTask, Receipt, RemainsAdjustment, RouteCompletion,
    StockMovement,
};
pub use identity::{ActorProfile, ActorStatus, CachedIdentity, IdentityError, IdentityLookup};
pub use media::{MediaError, MediaIngestion};
pub use memory::{MemoryBusiness, MemoryIdentity, MemoryMedia, MemoryTransport, RecordedCall};
pub use transport::{parse_console_line, ConsoleTransport, Transport, TransportError};
