//! Asynchronous object-detection job pipeline.
//!
//! Jobs are submitted over HTTP, carried on a durable Redis queue, processed
//! by workers that call an external detection service, and persisted to
//! PostgreSQL where a read path reports their status.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
