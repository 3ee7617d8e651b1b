//! Stage chain builder with validation.

use super::RetryPolicy;
use crate::core::StageKind;
use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Stage;
use std::collections::HashSet;
use std::sync::Arc;

/// One stage of a validated chain, with an optional retry override.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    /// The stage.
    pub stage: Arc<dyn Stage>,
    /// Overrides the configured retry defaults for this stage.
    pub policy: Option<RetryPolicy>,
}

/// A validated Extract → Transform → ProvisionSchema → Load chain.
#[derive(Debug, Clone)]
pub struct StageChain {
    name: String,
    entries: Vec<ChainEntry>,
}

impl StageChain {
    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the entries in execution order.
    #[must_use]
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a validated chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the stage of a kind.
    #[must_use]
    pub fn stage(&self, kind: StageKind) -> Option<&Arc<dyn Stage>> {
        self.entries
            .iter()
            .find(|e| e.stage.kind() == kind)
            .map(|e| &e.stage)
    }
}

/// Builder for creating validated stage chains.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    entries: Vec<ChainEntry>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.entries.push(ChainEntry { stage, policy: None });
        self
    }

    /// Appends a stage with its own retry policy.
    #[must_use]
    pub fn stage_with_policy(mut self, stage: Arc<dyn Stage>, policy: RetryPolicy) -> Self {
        self.entries.push(ChainEntry {
            stage,
            policy: Some(policy),
        });
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.entries.len()
    }

    /// Validates and builds the chain.
    ///
    /// # Errors
    ///
    /// Returns an error unless the stages are exactly Extract, Transform,
    /// ProvisionSchema and Load in that order, with unique names and
    /// upstream dependencies on earlier stages only.
    pub fn build(self) -> Result<StageChain, PipelineValidationError> {
        let names: Vec<String> = self.entries.iter().map(|e| e.stage.name().to_string()).collect();

        if self.entries.len() != StageKind::CHAIN.len() {
            return Err(PipelineValidationError::new(format!(
                "Pipeline '{}' has {} stages, expected {}",
                self.name,
                self.entries.len(),
                StageKind::CHAIN.len()
            ))
            .with_stages(names)
            .with_error_info(
                ContractErrorInfo::new("CHAIN-001-LENGTH", "Chain must have exactly four stages")
                    .with_fix_hint("Register one Extract, Transform, ProvisionSchema and Load stage."),
            ));
        }

        for (position, (entry, expected)) in self.entries.iter().zip(StageKind::CHAIN).enumerate() {
            let kind = entry.stage.kind();
            if kind != expected {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' at position {position} is {kind}, expected {expected}",
                    entry.stage.name()
                ))
                .with_stages(vec![entry.stage.name().to_string()])
                .with_error_info(
                    ContractErrorInfo::new("CHAIN-002-ORDER", "Stages out of chain order")
                        .with_fix_hint("Register stages as Extract, Transform, ProvisionSchema, Load.")
                        .with_context_entry("position", position.to_string())
                        .with_context_entry("expected", expected.to_string()),
                ));
            }
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(PipelineValidationError::new(format!("Duplicate stage name '{name}'"))
                    .with_stages(vec![name.clone()])
                    .with_error_info(
                        ContractErrorInfo::new("CHAIN-003-DUPLICATE", "Stage names must be unique")
                            .with_fix_hint("Give each stage a distinct name."),
                    ));
            }
        }

        for entry in &self.entries {
            let kind = entry.stage.kind();
            let upstream = entry.stage.upstream();
            let mut declared = HashSet::new();
            for dep in upstream {
                if dep.ordinal() >= kind.ordinal() || !declared.insert(*dep) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' declares invalid upstream {dep}",
                        entry.stage.name()
                    ))
                    .with_stages(vec![entry.stage.name().to_string()])
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CHAIN-004-UPSTREAM",
                            "Upstream must name distinct, earlier stages",
                        )
                        .with_context_entry("stage", kind.to_string())
                        .with_context_entry("upstream", dep.to_string()),
                    ));
                }
            }
            if let Some(policy) = &entry.policy {
                if policy.max_attempts == 0 {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' allows zero attempts",
                        entry.stage.name()
                    ))
                    .with_stages(vec![entry.stage.name().to_string()])
                    .with_error_info(ContractErrorInfo::new(
                        "CHAIN-005-POLICY",
                        "max_attempts must be at least 1",
                    )));
                }
            }
        }

        Ok(StageChain {
            name: self.name,
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStage;

    fn stage(name: &str, kind: StageKind) -> Arc<dyn Stage> {
        Arc::new(ScriptedStage::succeeding(name, kind))
    }

    fn full() -> PipelineBuilder {
        PipelineBuilder::new("p")
            .stage(stage("extract", StageKind::Extract))
            .stage(stage("transform", StageKind::Transform))
            .stage(stage("provision_schema", StageKind::ProvisionSchema))
            .stage(stage("load", StageKind::Load))
    }

    #[test]
    fn test_builds_valid_chain() {
        let chain = full().build().unwrap();
        assert_eq!(chain.name(), "p");
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.stage(StageKind::Load).unwrap().name(), "load");
    }

    #[test]
    fn test_rejects_missing_stage() {
        let err = PipelineBuilder::new("p")
            .stage(stage("extract", StageKind::Extract))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-001-LENGTH"));
    }

    #[test]
    fn test_rejects_wrong_order() {
        let err = PipelineBuilder::new("p")
            .stage(stage("extract", StageKind::Extract))
            .stage(stage("provision_schema", StageKind::ProvisionSchema))
            .stage(stage("transform", StageKind::Transform))
            .stage(stage("load", StageKind::Load))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-002-ORDER"));
        assert_eq!(err.stages, vec!["provision_schema".to_string()]);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let err = PipelineBuilder::new("p")
            .stage(stage("a", StageKind::Extract))
            .stage(stage("a", StageKind::Transform))
            .stage(stage("c", StageKind::ProvisionSchema))
            .stage(stage("d", StageKind::Load))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-003-DUPLICATE"));
    }

    #[test]
    fn test_rejects_forward_upstream() {
        let bad: Arc<dyn Stage> = Arc::new(
            ScriptedStage::succeeding("transform", StageKind::Transform)
                .with_upstream(&[StageKind::Load]),
        );
        let err = PipelineBuilder::new("p")
            .stage(stage("extract", StageKind::Extract))
            .stage(bad)
            .stage(stage("provision_schema", StageKind::ProvisionSchema))
            .stage(stage("load", StageKind::Load))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-004-UPSTREAM"));
    }

    #[test]
    fn test_rejects_zero_attempt_policy() {
        let mut policy = RetryPolicy::default();
        policy.max_attempts = 0;
        let err = PipelineBuilder::new("p")
            .stage_with_policy(stage("extract", StageKind::Extract), policy)
            .stage(stage("transform", StageKind::Transform))
            .stage(stage("provision_schema", StageKind::ProvisionSchema))
            .stage(stage("load", StageKind::Load))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), Some("CHAIN-005-POLICY"));
    }
}
