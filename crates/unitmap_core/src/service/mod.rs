//! Use-case services over the working store.
//!
//! # Responsibility
//! - Orchestrate repository calls and topology stages into runs.
//! - Keep the CLI decoupled from storage details.

pub mod dataset_service;
pub mod pipeline_service;
