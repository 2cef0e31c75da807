//! netgauge - continuous network quality estimation
//!
//! Probes latency, jitter, loss and download/upload throughput against
//! public endpoints, folds the results into a single 0-100 score and tier,
//! and keeps a one-minute history for graphs.
//!
//! The [`engine::Engine`] runs the whole pipeline on a background task;
//! front ends read from and control it through an [`engine::EngineHandle`].

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod latency;
pub mod logging;
pub mod scoring;
pub mod stats;
pub mod throughput;
