//! HTTP front door (spec.md §4.10, C10): wires every other crate into one
//! axum app. Module shape mirrors the teacher's server crate (`auth`,
//! `http`, plus a local `error`/`state`) with `metrics` added for the
//! Prometheus exporter this spec carries as ambient stack.

pub mod auth;
pub mod error;
pub mod http;
pub mod metrics;
pub mod state;

pub use http::create_router;
pub use state::AppState;
