//! Backend connections: dialing, TLS, and reuse of idle HTTP/1.1 senders.

pub mod connector;
pub mod pool;

pub use connector::{BackendStream, Connector};
pub use pool::{ConnectionPool, Upstream};
