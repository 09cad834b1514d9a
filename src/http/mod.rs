//! HTTP surface: router, health, and the public lobby listing

pub mod routes;

pub use routes::build_router;
