//! semdrift - noise injection and semantic drift analysis for multi-stage
//! text transformation chains
//!
//! A batch corrupts one original text at several noise levels
//! ([`noise::NoiseInjector`]), pushes each corrupted copy through a chain of
//! transformation stages ([`pipeline::PipelineOrchestrator`]) and measures how
//! far the final output drifted from the original ([`analysis`]).

pub mod analysis;
pub mod cli;
pub mod config;
pub mod cost;
pub mod embedding;
pub mod error;
pub mod noise;
pub mod persistence;
pub mod pipeline;
pub mod service;
pub mod stats;

pub use error::{DriftError, Result};
