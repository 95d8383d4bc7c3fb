//! The `report_phase` tool
//!
//! Phase changes are intercepted by the engine, which owns the node's phase.
//! The tool is still registered so its schema is advertised and so a
//! dispatcher used outside an engine gives a sensible answer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use arbor_core::{ArborError, Phase, Result};

use crate::tool::{parse_input, Tool, ToolContext, ToolOutput};

pub const REPORT_PHASE: &str = "report_phase";

/// A parsed phase report
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseReport {
    pub phase: Phase,
    pub summary: Option<String>,
    pub next_steps: Vec<String>,
}

#[derive(Deserialize)]
struct RawReport {
    phase: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    next_steps: Vec<String>,
}

impl PhaseReport {
    pub fn from_input(input: &Value) -> Result<Self> {
        let raw: RawReport = parse_input(REPORT_PHASE, input)?;
        let phase = raw
            .phase
            .parse::<Phase>()
            .map_err(|e| ArborError::InvalidInput(format!("{}: {}", REPORT_PHASE, e)))?;
        Ok(Self {
            phase,
            summary: raw.summary.filter(|s| !s.trim().is_empty()),
            next_steps: raw.next_steps,
        })
    }
}

pub struct ReportPhaseTool;

#[async_trait]
impl Tool for ReportPhaseTool {
    fn name(&self) -> &str {
        REPORT_PHASE
    }

    fn description(&self) -> &str {
        "Move to a later phase (EXPLORE, PLAN, FOUND, SUMMON, COMPLETE). Phases only move forward; \
         skipping ahead is allowed. Reporting COMPLETE runs the completion checks and is refused \
         while any blocker remains."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "phase": {"type": "string", "enum": ["EXPLORE", "PLAN", "FOUND", "SUMMON", "COMPLETE"]},
                "summary": {"type": "string", "description": "What was done in the phase being left"},
                "next_steps": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["phase"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: &Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let report = PhaseReport::from_input(input)?;
        Ok(ToolOutput::text(format!("Phase reported: {}", report.phase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report() {
        let report = PhaseReport::from_input(&json!({
            "phase": "plan",
            "summary": "mapped the repo",
            "next_steps": ["write module"]
        }))
        .unwrap();
        assert_eq!(report.phase, Phase::Plan);
        assert_eq!(report.summary.as_deref(), Some("mapped the repo"));
        assert_eq!(report.next_steps, vec!["write module"]);
    }

    #[test]
    fn test_parse_rejects_unknown_phase() {
        let err = PhaseReport::from_input(&json!({"phase": "DEPLOY"})).unwrap_err();
        assert!(matches!(err, ArborError::InvalidInput(_)));
        assert!(PhaseReport::from_input(&json!({})).is_err());
    }
}
