//! HTTP front door for the data-plane services: one listening socket,
//! prefix-routed dispatch to independently-built sub-services, and a
//! bounded-grace shutdown with a forced fallback.

pub mod config;
pub mod handler;
pub mod recovery;
pub mod router;

pub use handler::{BuildError, Handler, HandlerBuilder, LifecycleState, ServeError};
