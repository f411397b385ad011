//! Discovery beacon.
//!
//! Periodically announces the balancer's private address to a multicast
//! group so backend instances can find where to register.

pub mod sender;

pub use sender::Beacon;
