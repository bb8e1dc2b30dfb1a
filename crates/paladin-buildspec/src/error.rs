//! Error taxonomy for buildspec coordination.
//!
//! Race losses are a separate variant from infrastructure failures: a
//! rejected push means another builder won the round and the whole
//! operation should simply be retried after a sync, while git or I/O
//! failures mean something is actually wrong.

use thiserror::Error;

use paladin_core::GitError;

#[derive(Debug, Error)]
pub enum BuildSpecError {
    /// The remote rejected our push (non-fast-forward). Another builder
    /// moved the coordination repo first; sync and retry.
    #[error("push rejected by the coordination repo: {0}")]
    PushRejected(String),

    /// Every retry round lost the race or failed.
    #[error("gave up after {attempts} attempts on the coordination repo")]
    ExhaustedRetries { attempts: u32 },

    #[error("malformed version data: {0}")]
    Version(String),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("coordination store I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildSpecError {
    /// Whether retrying the whole operation after a sync can succeed.
    pub fn is_race_loss(&self) -> bool {
        matches!(self, BuildSpecError::PushRejected(_))
    }
}

pub type BuildSpecResult<T> = std::result::Result<T, BuildSpecError>;
