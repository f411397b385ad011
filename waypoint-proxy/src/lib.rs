//! Waypoint Proxy Engine
//!
//! The Tokio engine that binds the public listener, directs requests to the
//! registered backends, tunnels upgraded connections and announces the
//! balancer over multicast.

#![deny(missing_docs)]

pub mod beacon;
pub mod config;
pub mod connection_pool;
pub mod director;
pub mod error;
pub mod logging;
pub mod server;
pub mod tls;
pub mod tunnel;
pub mod upstream;

pub use config::Config;
pub use director::Director;
pub use error::{ProxyError, Result};
pub use server::Balancer;
pub use upstream::Forwarder;
