// src/lib.rs

//! Bodhi update lifecycle and compose coordination
//!
//! Updates (sets of builds) move from submission through testing to stable.
//! This crate holds the rules for those moves and the compose coordinator
//! that pushes updates to repositories.
//!
//! # Architecture
//!
//! - Database-first: all state lives in one SQLite database
//! - `update::Lifecycle`: requests, comments and karma, obsoletion, gating
//! - `karma`: pure karma and testing-requirement evaluation
//! - `resolver`: orders updates that share packages before a push
//! - `compose`: one compose per (release, request), with checkpoints so an
//!   interrupted compose resumes where it stopped
//! - External systems (build system, gating decisions, waivers, message bus,
//!   repository backend) sit behind traits collected in `services::Services`

#[macro_use]
mod macros;

pub mod buildsys;
pub mod compose;
pub mod config;
pub mod db;
mod error;
pub mod gating;
pub mod karma;
pub mod notifications;
pub mod resolver;
pub mod services;
pub mod update;
pub mod version;

pub use config::BodhiConfig;
pub use error::{Error, Result};
pub use services::Services;
pub use update::{Caveat, Lifecycle};
