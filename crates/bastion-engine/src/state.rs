//! Engine state and deploy modes.

use std::sync::Arc;

use bastion_core::Settings;
use bastion_policy::{PolicyEvaluator, PolicyStore};

use crate::error::EngineError;

/// What this engine node serves, derived from `ENABLE_EVALUATION` /
/// `ENABLE_MANAGEMENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// Evaluation and management on one node.
    Combined,
    /// Read-only store; serves `/evaluate`, rejects mutations.
    EvaluationOnly,
    /// Accepts mutations; does not serve `/evaluate`.
    ManagementOnly,
}

impl DeployMode {
    pub fn from_flags(evaluation: bool, management: bool) -> Option<Self> {
        match (evaluation, management) {
            (true, true) => Some(DeployMode::Combined),
            (true, false) => Some(DeployMode::EvaluationOnly),
            (false, true) => Some(DeployMode::ManagementOnly),
            (false, false) => None,
        }
    }

    pub fn allows_evaluation(self) -> bool {
        matches!(self, DeployMode::Combined | DeployMode::EvaluationOnly)
    }

    pub fn allows_management(self) -> bool {
        matches!(self, DeployMode::Combined | DeployMode::ManagementOnly)
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeployMode::Combined => "combined",
            DeployMode::EvaluationOnly => "evaluation-only",
            DeployMode::ManagementOnly => "management-only",
        };
        f.write_str(s)
    }
}

/// Shared engine state.
#[derive(Clone)]
pub struct EngineState {
    pub store: Arc<PolicyStore>,
    pub evaluator: PolicyEvaluator,
    pub mode: DeployMode,
}

impl EngineState {
    /// Open the store in the mode the settings ask for. Evaluation-only
    /// nodes open the policy directory read-only and never take write
    /// locks.
    pub async fn init(settings: &Settings) -> Result<Self, EngineError> {
        let mode = DeployMode::from_flags(settings.enable_evaluation, settings.enable_management)
            .ok_or_else(|| {
                EngineError::Internal(
                    "at least one of evaluation/management must be enabled".to_string(),
                )
            })?;
        let read_only = mode == DeployMode::EvaluationOnly;
        let store = Arc::new(
            PolicyStore::open(&settings.policy_dir, read_only)
                .await
                .map_err(|e| EngineError::Persistence(e.to_string()))?,
        );
        let evaluator = PolicyEvaluator::new(store.clone());
        tracing::info!(mode = %mode, dir = %settings.policy_dir.display(), "policy engine initialized");
        Ok(Self {
            store,
            evaluator,
            mode,
        })
    }

    pub fn require_management(&self) -> Result<(), EngineError> {
        if self.mode.allows_management() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{} node does not accept policy mutations",
                self.mode
            )))
        }
    }

    pub fn require_evaluation(&self) -> Result<(), EngineError> {
        if self.mode.allows_evaluation() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{} node does not serve evaluation",
                self.mode
            )))
        }
    }
}
