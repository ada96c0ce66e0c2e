//! Result types for the Iris project-health tools
//!
//! The server may omit optional fields; each one has a defined default
//! rather than being treated as an error, so a sparse payload still parses.

use serde::{Deserialize, Serialize};

/// Result of `iris_evaluate_project`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEvaluation {
    /// Overall health score, 0-100. Defaults to 0 when the server omits it.
    #[serde(default)]
    pub health_score: u32,

    /// Coarse status label ("healthy", "at-risk", ...)
    #[serde(default)]
    pub status: String,

    /// What the project is doing well
    #[serde(default)]
    pub strengths: Vec<String>,

    /// Identified risks
    #[serde(default)]
    pub risks: Vec<String>,

    /// Free-form evaluation summary
    #[serde(default)]
    pub summary: String,
}

/// Result of `iris_detect_drift`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
    /// Whether the project has drifted from its stated goals
    #[serde(default)]
    pub drift_detected: bool,

    /// Severity label ("none", "minor", "major")
    #[serde(default)]
    pub severity: String,

    /// Individual drift signals
    #[serde(default)]
    pub signals: Vec<DriftSignal>,
}

/// One observed drift signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftSignal {
    /// Which area drifted (scope, schedule, quality, ...)
    #[serde(default)]
    pub area: String,

    /// Human-readable description of the signal
    #[serde(default)]
    pub description: String,
}

/// One project as returned by `iris_list_projects`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    /// Project identifier, e.g. "nfl-predictor"
    pub project_id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Last recorded health score
    #[serde(default)]
    pub health_score: u32,
}

/// Acknowledgement from `iris_record_insight`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightAck {
    /// Whether the insight was stored
    #[serde(default)]
    pub recorded: bool,

    /// Server-assigned insight id, when provided
    #[serde(default)]
    pub insight_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_full_payload() {
        let json = r#"{
            "healthScore": 92,
            "status": "healthy",
            "strengths": ["clear scope"],
            "risks": ["single maintainer"],
            "summary": "On track."
        }"#;
        let eval: ProjectEvaluation = serde_json::from_str(json).unwrap();
        assert_eq!(eval.health_score, 92);
        assert_eq!(eval.status, "healthy");
        assert_eq!(eval.risks, vec!["single maintainer"]);
    }

    #[test]
    fn test_evaluation_sparse_payload_uses_defaults() {
        let eval: ProjectEvaluation = serde_json::from_str("{}").unwrap();
        assert_eq!(eval.health_score, 0);
        assert_eq!(eval.status, "");
        assert!(eval.strengths.is_empty());
        assert!(eval.risks.is_empty());
    }

    #[test]
    fn test_drift_report_defaults() {
        let report: DriftReport = serde_json::from_str("{}").unwrap();
        assert!(!report.drift_detected);
        assert!(report.signals.is_empty());
    }

    #[test]
    fn test_drift_report_with_signals() {
        let json = r#"{
            "driftDetected": true,
            "severity": "major",
            "signals": [{"area": "scope", "description": "feature creep"}]
        }"#;
        let report: DriftReport = serde_json::from_str(json).unwrap();
        assert!(report.drift_detected);
        assert_eq!(report.signals.len(), 1);
        assert_eq!(report.signals[0].area, "scope");
    }

    #[test]
    fn test_project_summary_requires_id() {
        let missing_id: Result<ProjectSummary, _> = serde_json::from_str("{}");
        assert!(missing_id.is_err());

        let summary: ProjectSummary =
            serde_json::from_str(r#"{"projectId":"nfl-predictor"}"#).unwrap();
        assert_eq!(summary.project_id, "nfl-predictor");
        assert_eq!(summary.health_score, 0);
    }
}
