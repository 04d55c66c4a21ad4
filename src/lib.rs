//! Mesh UV-Unwrapping Client
//!
//! This library drives the asynchronous job API of a mesh UV-unwrapping
//! service: it uploads a mesh, submits an unwrap job, polls it until a
//! terminal status, and downloads the unwrapped mesh.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::ClientConfig;
pub use error::WorkflowError;
pub use services::client::{UnwrapClient, WorkflowReport, WorkflowRequest};
