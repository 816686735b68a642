//! Admission-controlling reverse proxy.
//!
//! Requests flowing through the proxy are checked against an ordered set of
//! [`bouncer::Bouncer`] rules before they reach the backend. Each bouncer
//! pairs a [`target::Target`] predicate with a chain of
//! [`decider::Decider`]s; the first decider to reject wins and the request
//! is answered with a synthetic response instead of being forwarded.
//! Rule sets are hot-swappable on the live transport without dropping
//! in-flight requests.
//!
//! The [`proxy::PipelineProxy`] wires the pieces together; the `bouncerd`
//! binary adds config loading, signal handling, and an admin server.

pub mod admin;
pub mod bouncer;
pub mod config;
pub mod decider;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod target;
pub mod telemetry;
pub mod transport;
