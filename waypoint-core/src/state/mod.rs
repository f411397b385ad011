//! Durable registry state.

mod store;

pub use store::StateStore;
