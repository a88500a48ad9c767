//! HTTP producer API: routing, request validation and queue submission.

pub mod app;
pub mod middleware;
