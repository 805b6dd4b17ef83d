//! Ports Layer
//!
//! Driven ports the bus depends on. Backends (Redis, NATS, in-memory)
//! implement these traits; the core never names a concrete client.

pub mod lock;
pub mod transport;

pub use lock::{LockClient, LockHandle, LockService};
pub use transport::{SubscribeAck, Transport, TransportConnection, TransportEvent};
