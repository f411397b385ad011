//! Domain models: redirection policies and the routing table.

pub mod policy;
pub mod routing;
