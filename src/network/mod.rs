//! Network subsystem: framed TCP transport, delivery and the client

pub mod receiver;
pub mod sender;
pub mod server;
pub mod transport;

pub use receiver::MusicClient;
pub use sender::{DeliveryConfig, DeliveryCoordinator};
pub use server::MusicServer;
pub use transport::{MessageReader, MessageWriter};
