//! HTTP handlers. Route wiring lives in `api::openapi`.

pub mod auth;
pub mod health;

#[cfg(test)]
mod tests;
