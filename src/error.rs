//! Error types shared across the server
//!
//! Every RPC handler renders failures into a human-readable string for the
//! calling agent; `caller_message` produces that string. Only startup errors
//! (bind, migration) propagate out of `main`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The sender must drain its inbox before producing new messages.
    #[error("BLOCKED: You have {0} unread message(s). Call check_inbox first.")]
    UnreadMailBlocked(i64),

    #[error("invalid room token, this server requires a valid auth token to register")]
    AuthRejected,

    /// A short recipient name matched several team-qualified agents.
    #[error("multiple agents named '{name}' across teams: {matches}; use the full team/agent name")]
    AmbiguousRecipient { name: String, matches: String },

    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },

    /// Task state machine violation. `valid` enumerates the reachable states
    /// from the current one.
    #[error("invalid transition {from} → {to}; valid next states: {valid}")]
    InvalidTransition {
        from: String,
        to: String,
        valid: String,
    },

    #[error("only a lead ({leads}) can {action}")]
    LeadOnly { leads: String, action: String },

    #[error("only the assigned agent ({assignee}) can {action}")]
    AssigneeOnly { assignee: String, action: String },

    #[error("invalid contract kind '{kind}'; must be one of: {valid}")]
    InvalidKind { kind: String, valid: String },

    #[error("no active (spawned) minion found for pilot '{0}'")]
    NoActiveMinion(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The operation is well-formed but the current state forbids it
    /// (duplicate ACK, already-completed handshake, empty target set).
    #[error("{0}")]
    Conflict(String),

    #[error("store failure: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render this error as the string returned to the calling agent.
    ///
    /// The unread gate keeps its `BLOCKED:` sentinel so sidecars can pattern
    /// match on it; everything else gets the uniform `Error: ` prefix.
    pub fn caller_message(&self) -> String {
        match self {
            Error::UnreadMailBlocked(_) => self.to_string(),
            other => format!("Error: {other}"),
        }
    }
}
