//! Rule matching and dedup engine.
//!
//! Takes an [`InboundEvent`](nudge_core::event::InboundEvent), validates its
//! fact bundle, buckets it in time, resolves the rules that answer its
//! scenario, evaluates them and persists at most one notification per dedup
//! scope. Every attempt, successful or not, leaves an audit row.
//!
//! The engine is generic over [`nudge_core::store::NudgeStore`]; it never
//! talks to a database directly.

pub mod contract;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod render;
pub mod resolve;
pub mod time_scope;

pub use engine::{CreatedNudge, Engine, EngineConfig, EngineResult};
pub use error::{EngineError, Result};
pub use resolve::{ResolverConfig, RuleResolver};
