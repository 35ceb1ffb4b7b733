//! # bastion-policy
//!
//! Unified access-control policies for the Bastion gateway.
//!
//! A policy is a named, versioned, priority-ordered ruleset bound to
//! resources (servers, tools, users, groups, roles). Evaluation takes a
//! request context and yields an allow/deny decision plus the matched rule.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`model`] | Policy, rules, conditions, actions, lifecycle states |
//! | [`context`] | Evaluation context and result types |
//! | [`store`] | File-per-policy persistence with a resource index |
//! | [`evaluator`] | Priority-ordered rule evaluation |
//!
//! The store owns the on-disk representation exclusively; one YAML file per
//! policy, written atomically. Evaluation is deny-by-default: a context that
//! matches no active policy is denied.

pub mod context;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod store;

pub use context::{Decision, EvaluationContext, EvaluationResult};
pub use error::PolicyError;
pub use evaluator::PolicyEvaluator;
pub use model::{
    ActionType, ConditionOperator, ConditionType, EnforcementMode, Policy, PolicyDraft,
    PolicyRule, PolicyStatus, ResourceBinding, ResourceType, RuleAction, RuleCondition,
};
pub use store::{PolicyFilter, PolicyStore};
