//! Waypoint Core functionality.
//!
//! This crate contains the service registry, redirection policies, and prefix
//! routing primitives that power the Waypoint load balancer.

pub mod domain;
pub mod error;
pub mod load_balancer;
pub mod state;

pub use domain::policy::{RedirectionPolicy, Scheme};
pub use domain::routing::{Route, RoutingTable, SharedRoutingTable};
pub use error::{Error, Result};
pub use load_balancer::round_robin::{Registration, ServiceList};
pub use load_balancer::selector::{select, Selection};
