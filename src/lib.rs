//! Anomaly analysis job queue
//!
//! Images uploaded during an inspection are queued here for anomaly
//! detection. A single worker drains the queue in arrival order, hands each
//! image to an inference backend (a local model script or a remote HTTP
//! service), publishes the boxed image and detection JSON under the uploads
//! tree, and records the outcome on the job.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
