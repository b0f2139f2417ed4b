//! Send lifecycle state machine.
//!
//! ```text
//! Idle -> UserAppended -> PlaceholderAppended -> Streaming -> Finalized  -> Idle
//!                                  |                  |
//!                                  +------------------+----> RolledBack -> Idle
//! ```
//!
//! `Streaming` re-enters itself once per chunk. A send whose request fails
//! before any body arrives goes straight from `PlaceholderAppended` to
//! `RolledBack`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Where a single send currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    #[default]
    Idle,
    UserAppended,
    PlaceholderAppended,
    Streaming,
    Finalized,
    RolledBack,
}

impl SendPhase {
    /// Whether `self -> next` is a legal step.
    pub fn can_advance(self, next: SendPhase) -> bool {
        use SendPhase::*;
        matches!(
            (self, next),
            (Idle, UserAppended)
                | (UserAppended, PlaceholderAppended)
                | (PlaceholderAppended, Streaming)
                | (PlaceholderAppended, Finalized)
                | (PlaceholderAppended, RolledBack)
                | (Streaming, Streaming)
                | (Streaming, Finalized)
                | (Streaming, RolledBack)
                | (Finalized, Idle)
                | (RolledBack, Idle)
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn advance(self, next: SendPhase) -> Result<SendPhase> {
        if self.can_advance(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Finalized or rolled back.
    pub fn is_terminal(self) -> bool {
        matches!(self, SendPhase::Finalized | SendPhase::RolledBack)
    }
}
