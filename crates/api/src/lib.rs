//! HTTP API: routing, the request pipeline, and error mapping.

pub mod app;
pub mod authz;
pub mod context;
pub mod middleware;
pub mod rate_limit;
