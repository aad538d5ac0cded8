//! # podium-api
//!
//! HTTP control plane for the Podium evaluation orchestrator.
//!
//! JSON in, JSON out:
//!
//! - `POST /evaluate`: submit a plan; 202 with a pollable task
//! - `GET /tasks/{task_id}`: status, progress, result or error
//! - `PATCH /tasks/{task_id}`: cancel
//! - `GET /leaderboard`: filtered aggregate browsing
//! - `POST /leaderboard/quarantine`, `POST /leaderboard/restore`, and
//!   `DELETE /leaderboard/{row_id}`: admin moderation
//! - `GET /leaderboard/categories`: distinct slice values
//! - `GET /health` and `GET /stats`: operational surfaces
//! - `POST /maintenance/cleanup`: admin cleanup, tracked as a task

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;
