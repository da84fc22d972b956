//! Hikari Render Studio back end: turns 2D plans into photorealistic renders,
//! refines them through an undoable edit history, and batch-renders style
//! variants against a single plan.

pub mod batch;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod history;
pub mod models;
pub mod presets;
pub mod routes;
pub mod workspace;
