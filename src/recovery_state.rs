//! Recovery State Machine
//!
//! Authoritative record of how far a recovery run has progressed. Stages only
//! move forward, one at a time; the single exception is the optional backup
//! restore, which is skipped when the existing database is reused.
//!
//! # Stage Flow
//!
//! ```text
//! Idle
//!     ↓
//! ConfigDiscovered
//!     ↓
//! BackupMaterialized   (optional, destructive)
//!     ↓
//! LogsHarvested
//!     ↓
//! OwnershipFixed
//!     ↓
//! ReplicationBootstrapped
//!     ↓
//! Done
//!
//! (Any stage can transition to Failed)
//! ```

use std::fmt;
use thiserror::Error;

/// Recovery stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum RecoveryStage {
    /// Nothing has run yet
    #[default]
    Idle = 0,
    /// Engine configuration read and run preconditions checked
    ConfigDiscovered = 1,
    /// Base backup restored into a wiped data directory
    BackupMaterialized = 2,
    /// Relay logs and index staged in the data directory
    LogsHarvested = 3,
    /// Data directory owned by the service account
    OwnershipFixed = 4,
    /// Replay directive accepted by the engine
    ReplicationBootstrapped = 5,
    /// Run completed (terminal state)
    Done = 6,
    /// Run aborted (terminal state)
    Failed = 255,
}

impl RecoveryStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Stages that may be skipped
    #[inline]
    pub const fn is_optional(self) -> bool {
        matches!(self, Self::BackupMaterialized)
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::ConfigDiscovered),
            Self::ConfigDiscovered => Some(Self::BackupMaterialized),
            Self::BackupMaterialized => Some(Self::LogsHarvested),
            Self::LogsHarvested => Some(Self::OwnershipFixed),
            Self::OwnershipFixed => Some(Self::ReplicationBootstrapped),
            Self::ReplicationBootstrapped => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::ConfigDiscovered => "Engine configuration discovered",
            Self::BackupMaterialized => "Base backup restored",
            Self::LogsHarvested => "Binary logs staged",
            Self::OwnershipFixed => "Data directory ownership fixed",
            Self::ReplicationBootstrapped => "Relay log replay started",
            Self::Done => "Recovery complete",
            Self::Failed => "Recovery failed",
        }
    }
}

impl fmt::Display for RecoveryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryTransitionError {
    /// Attempted to skip a mandatory stage
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage {
        from: RecoveryStage,
        to: RecoveryStage,
    },

    /// Attempted to go backwards
    #[error("Cannot go backwards from {from} to {to} (recovery is forward-only)")]
    BackwardTransition {
        from: RecoveryStage,
        to: RecoveryStage,
    },

    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: RecoveryStage },

    /// Attempted to transition to the same state
    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: RecoveryStage },
}

impl From<RecoveryTransitionError> for crate::error::PitrError {
    fn from(err: RecoveryTransitionError) -> Self {
        crate::error::PitrError::transition(err.to_string())
    }
}

/// Tracks the progress of one recovery run.
///
/// # Example
///
/// ```
/// use pitr_bootstrap::recovery_state::{RecoveryContext, RecoveryStage};
///
/// let mut ctx = RecoveryContext::new();
/// ctx.transition_to(RecoveryStage::ConfigDiscovered).unwrap();
///
/// // The backup restore is optional
/// ctx.transition_to(RecoveryStage::LogsHarvested).unwrap();
/// assert_eq!(ctx.skipped(), &[RecoveryStage::BackupMaterialized]);
///
/// // Mandatory stages cannot be skipped
/// assert!(ctx.transition_to(RecoveryStage::Done).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    current: RecoveryStage,
    failed_at: Option<RecoveryStage>,
    /// (stage, unix timestamp) for every stage entered
    stage_history: Vec<(RecoveryStage, u64)>,
    skipped: Vec<RecoveryStage>,
}

impl RecoveryContext {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current_stage(&self) -> RecoveryStage {
        self.current
    }

    #[inline]
    pub fn failed_at(&self) -> Option<RecoveryStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == RecoveryStage::Done
    }

    pub fn stage_history(&self) -> &[(RecoveryStage, u64)] {
        &self.stage_history
    }

    /// Optional stages passed over
    pub fn skipped(&self) -> &[RecoveryStage] {
        &self.skipped
    }

    /// Move to `target`, which must be the next stage, or the one after an
    /// optional next stage.
    pub fn transition_to(
        &mut self,
        target: RecoveryStage,
    ) -> Result<RecoveryStage, RecoveryTransitionError> {
        if self.current.is_terminal() {
            return Err(RecoveryTransitionError::FromTerminalState { from: self.current });
        }

        if target == self.current {
            return Err(RecoveryTransitionError::AlreadyAtStage { stage: target });
        }

        // Failed is reached through fail() only
        if target == RecoveryStage::Failed {
            return Err(RecoveryTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        if target.order() < self.current.order() {
            return Err(RecoveryTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }

        let next = self.current.next();
        if next == Some(target) {
            self.enter(target);
            return Ok(target);
        }

        match next {
            Some(optional) if optional.is_optional() && optional.next() == Some(target) => {
                log::info!("Skipping stage: {}", optional);
                self.skipped.push(optional);
                self.enter(target);
                Ok(target)
            }
            _ => Err(RecoveryTransitionError::SkippedStage {
                from: self.current,
                to: target,
            }),
        }
    }

    /// Mark the run as failed at the current stage.
    pub fn fail(&mut self) -> Result<(), RecoveryTransitionError> {
        if self.current.is_terminal() {
            return Err(RecoveryTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.enter(RecoveryStage::Failed);
        Ok(())
    }

    fn enter(&mut self, stage: RecoveryStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.stage_history.push((stage, timestamp));
        self.current = stage;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(stage: RecoveryStage) -> RecoveryContext {
        let mut ctx = RecoveryContext::new();
        while ctx.current_stage() != stage {
            let next = ctx.current_stage().next().unwrap();
            ctx.transition_to(next).unwrap();
        }
        ctx
    }

    #[test]
    fn test_full_forward_sequence() {
        let ctx = at(RecoveryStage::Done);
        assert!(ctx.is_complete());
        assert_eq!(ctx.stage_history().len(), 6);
        assert!(ctx.skipped().is_empty());
    }

    #[test]
    fn test_skip_optional_backup_stage() {
        let mut ctx = at(RecoveryStage::ConfigDiscovered);
        ctx.transition_to(RecoveryStage::LogsHarvested).unwrap();
        assert_eq!(ctx.skipped(), &[RecoveryStage::BackupMaterialized]);
    }

    #[test]
    fn test_cannot_skip_mandatory_stage() {
        let mut ctx = at(RecoveryStage::LogsHarvested);
        let err = ctx
            .transition_to(RecoveryStage::ReplicationBootstrapped)
            .unwrap_err();
        assert_eq!(
            err,
            RecoveryTransitionError::SkippedStage {
                from: RecoveryStage::LogsHarvested,
                to: RecoveryStage::ReplicationBootstrapped,
            }
        );
    }

    #[test]
    fn test_cannot_skip_discovery() {
        let mut ctx = RecoveryContext::new();
        assert!(ctx.transition_to(RecoveryStage::BackupMaterialized).is_err());
    }

    #[test]
    fn test_backward_and_same_stage() {
        let mut ctx = at(RecoveryStage::LogsHarvested);
        assert!(matches!(
            ctx.transition_to(RecoveryStage::ConfigDiscovered),
            Err(RecoveryTransitionError::BackwardTransition { .. })
        ));
        assert!(matches!(
            ctx.transition_to(RecoveryStage::LogsHarvested),
            Err(RecoveryTransitionError::AlreadyAtStage { .. })
        ));
    }

    #[test]
    fn test_fail_records_stage() {
        let mut ctx = at(RecoveryStage::BackupMaterialized);
        ctx.fail().unwrap();
        assert_eq!(ctx.current_stage(), RecoveryStage::Failed);
        assert_eq!(ctx.failed_at(), Some(RecoveryStage::BackupMaterialized));
        assert!(ctx.fail().is_err());
        assert!(ctx.transition_to(RecoveryStage::LogsHarvested).is_err());
    }
}
