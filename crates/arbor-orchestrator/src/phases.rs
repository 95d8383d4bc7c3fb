//! Pure phase transition rules
//!
//! No I/O and no async. The engine asks these functions whether a reported
//! phase is acceptable before it touches the node.

use arbor_core::{ArborError, Phase, Result};

/// What accepting a phase report requires of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move straight to the new phase
    Advance { from: Phase, to: Phase, skipped: usize },
    /// COMPLETE was requested; the completion gate decides
    RequestCompletion { from: Phase },
}

/// Validate a requested move from `current` to `requested`
///
/// Phases move strictly forward. Skipping ahead is allowed; staying put or
/// going back is rejected, as is any move out of COMPLETE.
pub fn validate_transition(current: Phase, requested: Phase) -> Result<Transition> {
    if current.is_terminal() || requested.ordinal() <= current.ordinal() {
        return Err(ArborError::InvalidPhaseTransition {
            from: current.to_string(),
            to: requested.to_string(),
        });
    }

    if requested == Phase::Complete {
        return Ok(Transition::RequestCompletion { from: current });
    }

    Ok(Transition::Advance {
        from: current,
        to: requested,
        skipped: (requested.ordinal() - current.ordinal() - 1) as usize,
    })
}

/// Phases still ahead of `current`, in order
pub fn remaining_phases(current: Phase) -> Vec<Phase> {
    Phase::ALL
        .iter()
        .copied()
        .filter(|p| p.ordinal() > current.ordinal())
        .collect()
}

/// Explanation returned to the agent when a report is rejected
pub fn rejection_message(current: Phase, requested: Phase) -> String {
    let ahead = remaining_phases(current);
    if ahead.is_empty() {
        return format!(
            "Rejected: already in {}; no further phase changes are possible.",
            current
        );
    }
    let names: Vec<String> = ahead.iter().map(Phase::to_string).collect();
    format!(
        "Rejected: cannot move from {} to {}. Phases only move forward; valid targets are {}.",
        current,
        requested,
        names.join(", ")
    )
}
