//! # forum-core
//!
//! Core types, message payloads, and collaborator traits for the forum's
//! asynchronous event core.
//!
//! This crate is the leaf of the workspace: the bus, the stores and the
//! workflows all build on the definitions here.

pub mod defaults;
pub mod error;
pub mod events;
pub mod ledger;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{
    AnswerAcceptChange, ChangeEvent, CommentChange, CommentLikeChange, DeleteInfo,
    DiscussionChange, Entity, EntityKind, KbDocumentChange, LivePush, Message, NotifyEvent,
    Operation, Transport,
};
pub use ledger::{
    AwardOutcome, AwardPlan, AwardRequest, PointConfig, RevokeOutcome, RevokePlan, RevokeRequest,
};
pub use models::*;
pub use traits::*;
