//! Mail rule engine
//!
//! Rules pair a set of conditions (combined with `all` or `any`) with a list
//! of actions. A rule file is validated up front by [`RuleSet::load`]; the
//! [`RuleEngine`] then evaluates every rule against every candidate message
//! and applies the actions of each match through the message store and the
//! mail provider.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod model;
pub mod temporal;

pub use actions::{ActionExecutor, ActionOutcome, ExecutionResult};
pub use engine::{EngineOptions, RuleEngine, RunReport};
pub use error::RuleError;
pub use model::RuleSet;
