//! Sentiment Ingest Library
//!
//! Client-side ingestion and job-tracking pipeline for the sentiment
//! analysis backend: staged-file lifecycle management, two-phase uploads
//! with retrying transfers, a background polling state machine for
//! long-running analysis jobs, and the zeno progress illusion used for
//! display.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod staging;
pub mod transport;
pub mod upload;
pub mod zeno;

pub use config::ClientConfig;
pub use error::{IngestError, Result};
pub use logging::Logger;
