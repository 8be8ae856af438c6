//! QC status resolution across both evidence sources.

use scanledger_model::{Modality, QcStatus, SubjectId};

use crate::evidence::{ArtifactIndex, TabularEvidence};

/// Resolves a subject's status from tabular and artifact evidence.
///
/// Each source can lag behind the other, so a modality counts as present
/// when either source has it. Absence in one source is never authoritative.
#[derive(Debug, Clone, Default)]
pub struct QcEvaluator {
    tabular: TabularEvidence,
    artifacts: ArtifactIndex,
}

impl QcEvaluator {
    pub fn new(tabular: TabularEvidence, artifacts: ArtifactIndex) -> Self {
        if artifacts.is_degraded() {
            tracing::info!("QC status resolved from tabular evidence only");
        }
        Self { tabular, artifacts }
    }

    pub fn has_evidence(&self, subject: &SubjectId, modality: Modality) -> bool {
        self.tabular.has(subject, modality) || self.artifacts.has(subject, modality)
    }

    pub fn status(&self, subject: &SubjectId) -> QcStatus {
        QcStatus::from_evidence(
            self.has_evidence(subject, Modality::T1w),
            self.has_evidence(subject, Modality::Bold),
        )
    }

    pub fn is_degraded(&self) -> bool {
        self.artifacts.is_degraded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> SubjectId {
        SubjectId::parse(label).unwrap()
    }

    #[test]
    fn sources_are_combined_per_modality() {
        let mut tabular = TabularEvidence::new();
        tabular.insert(Modality::Bold, id("1001"));
        let artifacts = ArtifactIndex::from_names(["sub-1001_T1w.html"]);

        let evaluator = QcEvaluator::new(tabular, artifacts);
        assert_eq!(evaluator.status(&id("1001")), QcStatus::BothPresent);
    }

    #[test]
    fn each_source_alone_is_sufficient() {
        let mut tabular = TabularEvidence::new();
        tabular.insert(Modality::T1w, id("1001"));
        let artifacts = ArtifactIndex::from_names(["sub-1002_task-rest_bold.html"]);

        let evaluator = QcEvaluator::new(tabular, artifacts);
        assert_eq!(evaluator.status(&id("1001")), QcStatus::T1Only);
        assert_eq!(evaluator.status(&id("1002")), QcStatus::BoldOnly);
        assert_eq!(evaluator.status(&id("1003")), QcStatus::Neither);
    }

    #[test]
    fn followup_evidence_does_not_count_for_baseline() {
        let mut tabular = TabularEvidence::new();
        tabular.insert(Modality::T1w, id("10011"));
        tabular.insert(Modality::Bold, id("10011"));

        let evaluator = QcEvaluator::new(tabular, ArtifactIndex::default());
        assert_eq!(evaluator.status(&id("10011")), QcStatus::BothPresent);
        assert_eq!(evaluator.status(&id("1001")), QcStatus::Neither);
    }

    #[test]
    fn resolution_is_deterministic() {
        let mut tabular = TabularEvidence::new();
        tabular.insert(Modality::Bold, id("1001"));
        let evaluator = QcEvaluator::new(tabular, ArtifactIndex::from_names(["sub-1001_T1w.html"]));
        let first = evaluator.status(&id("1001"));
        for _ in 0..10 {
            assert_eq!(evaluator.status(&id("1001")), first);
        }
    }
}
