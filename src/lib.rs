//! Photo detection job pipeline
//!
//! A chat gateway submits user photos as jobs; independent workers pick them
//! off an at-least-once task queue, run object detection, persist exactly one
//! result per job, and push the summary back to the originating chat.
//! Storage, queue, model and notifier are injected as trait objects so each
//! can be swapped for the in-memory adapters in [`services::memory`].

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
