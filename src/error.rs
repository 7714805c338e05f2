use thiserror::Error;

/// All failures a harvest run can surface.
///
/// The taxonomy is closed so callers can branch on kind: the variant tells
/// the operator whether the checkpoint survived and whether a retry is
/// semantically sound.
///
/// - [`Transport`](HarvestError::Transport) and
///   [`Protocol`](HarvestError::Protocol) leave the checkpoint intact, so a
///   re-run resumes from the last persisted token.
/// - [`TokenExpired`](HarvestError::TokenExpired) and
///   [`CorruptState`](HarvestError::CorruptState) are raised *after* the
///   checkpoint has been cleared; the run must restart from the beginning.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// HTTP-level failure or a response body that is not well-formed
    /// OAI-PMH XML. Distinct from a `<error>` element inside a well-formed
    /// response, which is [`Protocol`](HarvestError::Protocol).
    #[error("transport error: {0}")]
    Transport(String),

    /// The repository answered with a protocol-level `<error>` element.
    ///
    /// The checkpoint is preserved; whether a retry makes sense depends on
    /// the code (`noRecordsMatch`, `badArgument`, ...).
    #[error("OAI-PMH error [{code}]: {message}")]
    Protocol { code: String, message: String },

    /// The repository rejected a saved resumption token
    /// (`<error code="badResumptionToken">`).
    ///
    /// The saved window is no longer valid, so last_state.txt has been
    /// cleared before this error is raised.
    #[error(
        "the repository rejected the saved resumption token; \
         last_state.txt has been cleared, restart the harvest from the beginning"
    )]
    TokenExpired,

    /// The persisted checkpoint did not have exactly four fields.
    ///
    /// last_state.txt has been cleared before this error is raised.
    #[error(
        "corrupt checkpoint in last_state.txt; \
         the file has been cleared, restart the harvest from the beginning"
    )]
    CorruptState,

    /// The record writer failed. The checkpoint is preserved.
    #[error("record writer error: {0}")]
    Writer(String),

    /// Reading or writing harvest state on disk failed.
    #[error("state storage error: {0}")]
    State(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns an operator-friendly message suitable for CLI output.
    pub fn user_message(&self) -> String {
        match self {
            HarvestError::Transport(msg) => {
                if msg.contains("timed out") || msg.contains("timeout") {
                    format!(
                        "Request timed out: {}\n   The repository may be slow or unreachable. \
                         The checkpoint was kept; re-run to resume.",
                        msg
                    )
                } else {
                    format!(
                        "Cannot talk to the repository: {}\n   The checkpoint was kept; \
                         re-run to resume.",
                        msg
                    )
                }
            }
            HarvestError::Protocol { code, message } => {
                format!(
                    "The repository reported an error [{}]: {}\n   The checkpoint was kept.",
                    code, message
                )
            }
            HarvestError::TokenExpired | HarvestError::CorruptState => self.to_string(),
            HarvestError::Writer(msg) => {
                format!("Failed to persist records: {}\n   The checkpoint was kept.", msg)
            }
            HarvestError::State(e) => format!("Cannot access harvest state: {}", e),
        }
    }

    /// Returns true if re-running with the same configuration is sound and
    /// likely to make progress.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::Transport(_))
    }

    /// Returns true if the checkpoint (if any) survived this failure.
    pub fn preserves_checkpoint(&self) -> bool {
        !matches!(self, HarvestError::TokenExpired | HarvestError::CorruptState)
    }
}

impl From<reqwest::Error> for HarvestError {
    fn from(e: reqwest::Error) -> Self {
        HarvestError::Transport(e.to_string())
    }
}
