// src/lib.rs

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod grid;
pub mod normalize;
pub mod reconcile;
pub mod record;
