// handlers/mod.rs
//
// Public: /health
// Portal (API key, optional JWT, tenant required): /portal/*
pub mod health;
pub mod portal;

pub use health::health;
