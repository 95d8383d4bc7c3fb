//! Session sinks: where node progress is persisted
//!
//! The engine emits [`SessionEvent`]s and node snapshots to a [`SessionSink`].
//! Calls go through `fail_open`, so a broken sink never stops an agent.
//! [`ActivityLogger`] renders events as human-readable markdown in
//! `.arbor/activity.md`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use arbor_core::{AgentId, AgentNode, Phase, Result, Specialization, StopReason, Usd};

/// Maximum characters of assistant text kept in the activity log
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

/// Something that happened to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    NodeStarted {
        node: AgentId,
        parent: Option<AgentId>,
        depth: u32,
        specialization: Specialization,
        branch: String,
        vision: String,
        budget_ceiling: Usd,
    },
    IterationCompleted {
        node: AgentId,
        iteration: u32,
        phase: Phase,
        cost_so_far: Usd,
        assistant_text: String,
        tools: Vec<ToolActivity>,
    },
    PhaseChanged {
        node: AgentId,
        from: Phase,
        to: Phase,
        summary: Option<String>,
    },
    GateChecked {
        node: AgentId,
        allowed: bool,
        blockers: Vec<String>,
        warnings: usize,
    },
    NodeFinished {
        node: AgentId,
        stop_reason: StopReason,
        cost: Usd,
        iterations: u32,
    },
}

/// One tool call, as recorded in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolActivity {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Append/update persistence for a tree's sessions
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Append an event to the node's history
    async fn append(&self, event: &SessionEvent) -> Result<()>;

    /// Replace the stored snapshot of a node
    async fn update(&self, node: &AgentNode) -> Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl SessionSink for NullSink {
    async fn append(&self, _event: &SessionEvent) -> Result<()> {
        Ok(())
    }

    async fn update(&self, _node: &AgentNode) -> Result<()> {
        Ok(())
    }
}

/// Markdown activity log shared by every node in a tree
pub struct ActivityLogger {
    output_path: PathBuf,
    /// Serializes appends from nested nodes
    write_lock: Mutex<()>,
}

impl ActivityLogger {
    /// Log into `<arbor_dir>/activity.md`
    pub fn new(arbor_dir: PathBuf) -> Self {
        Self {
            output_path: arbor_dir.join("activity.md"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.output_path
    }

    async fn append_internal(&self, content: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
        let truncated: String = text.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

fn render(event: &SessionEvent) -> String {
    let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    match event {
        SessionEvent::NodeStarted {
            node,
            parent,
            depth,
            specialization,
            branch,
            vision,
            budget_ceiling,
        } => {
            let heading = "#".repeat((*depth as usize + 2).min(6));
            let mut out = format!(
                "{} Agent {} ({})\n**Started**: {}\n**Branch**: {}\n**Budget**: {}\n",
                heading,
                node.short(),
                specialization,
                timestamp,
                branch,
                budget_ceiling
            );
            if let Some(parent) = parent {
                out.push_str(&format!("**Parent**: {}\n", parent.short()));
            }
            out.push_str(&format!("\n> {}\n\n", vision.lines().next().unwrap_or(vision)));
            out
        }
        SessionEvent::IterationCompleted {
            node,
            iteration,
            phase,
            cost_so_far,
            assistant_text,
            tools,
        } => {
            let mut out = format!(
                "**{} iteration {}** ({}, cost {})\n",
                node.short(),
                iteration,
                phase,
                cost_so_far
            );
            if !tools.is_empty() {
                let calls: Vec<String> = tools
                    .iter()
                    .map(|t| format!("{}={}", t.name, if t.success { "ok" } else { "FAIL" }))
                    .collect();
                out.push_str(&format!("Tools: {}\n", calls.join(", ")));
            }
            if !assistant_text.trim().is_empty() {
                out.push_str(&format!("\n```\n{}\n```\n", preview(assistant_text.trim())));
            }
            out.push('\n');
            out
        }
        SessionEvent::PhaseChanged { node, from, to, summary } => {
            let mut out = format!("**{} phase**: {} -> {}\n", node.short(), from, to);
            if let Some(summary) = summary {
                out.push_str(&format!("{}\n", summary));
            }
            out.push('\n');
            out
        }
        SessionEvent::GateChecked {
            node,
            allowed,
            blockers,
            warnings,
        } => {
            let mut out = format!(
                "**{} completion gate**: {} ({} warning(s))\n",
                node.short(),
                if *allowed { "PASS" } else { "BLOCKED" },
                warnings
            );
            for blocker in blockers {
                out.push_str(&format!("- {}\n", blocker));
            }
            out.push('\n');
            out
        }
        SessionEvent::NodeFinished {
            node,
            stop_reason,
            cost,
            iterations,
        } => format!(
            "**{} finished**: {} after {} iteration(s), cost {}\n\n---\n\n",
            node.short(),
            stop_reason.describe(),
            iterations,
            cost
        ),
    }
}

#[async_trait]
impl SessionSink for ActivityLogger {
    async fn append(&self, event: &SessionEvent) -> Result<()> {
        self.append_internal(&render(event)).await
    }

    /// Node snapshots are not kept in the markdown log
    async fn update(&self, _node: &AgentNode) -> Result<()> {
        Ok(())
    }
}
