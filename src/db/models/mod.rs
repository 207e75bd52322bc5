// src/db/models/mod.rs

//! Data models for Bodhi database entities
//!
//! Each struct corresponds to a table and provides methods for creating,
//! reading, updating and deleting its rows.

mod build;
mod comment;
mod compose;
mod release;
mod update;
mod user;

pub use build::{Build, BuildKind, ContentType};
pub use comment::{BugFeedback, Comment, TestCaseFeedback};
pub use compose::{Compose, ComposeState};
pub use release::{Release, ReleaseState};
pub use update::{
    TestGatingStatus, Update, UpdateFilter, UpdateRequest, UpdateSeverity, UpdateStatus,
    UpdateSuggestion, UpdateType,
};
pub use user::User;
