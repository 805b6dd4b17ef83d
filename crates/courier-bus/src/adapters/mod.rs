//! Adapters Layer
//!
//! In-memory implementations of the driven ports. Suitable for single-process
//! deployments and for exercising multi-instance behavior in tests; distributed
//! deployments plug a networked backend into the same traits.

pub mod memory_lock;
pub mod memory_transport;

pub use memory_lock::{InMemoryLockClient, InMemoryLockService};
pub use memory_transport::{InMemoryConnection, InMemoryTransport};
