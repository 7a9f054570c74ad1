//! Error taxonomy shared by every core operation.
//!
//! Each variant maps to a distinct failure class from the caller's point of
//! view: what the user can fix, what an admin must fix, and what merely
//! needs a retry by a human. Side-effect failures after a successful store
//! mutation are surfaced through `Gateway`/`SideEffect`-style reporting by
//! the components, never by reverting state.

use std::borrow::Cow;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A required configuration mapping is absent; an admin must act.
    #[error("required configuration '{0}' is missing")]
    ConfigMissing(&'static str),

    /// The actor may not perform this operation.
    #[error("permission denied")]
    PermissionDenied,

    /// The referenced entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// The requested transition is not legal from the current status.
    #[error("{entity} is {current}; cannot {operation}")]
    InvalidState {
        entity: &'static str,
        current: String,
        operation: &'static str,
    },

    /// Lost a claim race; another staff member got there first.
    #[error("ticket already claimed")]
    AlreadyClaimed,

    /// A request failed validation before any side effect was attempted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// An external payment gateway call failed. Never auto-retried; the
    /// caller may re-invoke.
    #[error("payment gateway call failed")]
    Gateway(#[source] anyhow::Error),

    /// A chat gateway call failed.
    #[error("chat gateway call failed")]
    Chat(#[source] anyhow::Error),

    /// A persistence operation failed. No automatic retry.
    #[error("persistence failure")]
    Store(#[source] anyhow::Error),
}

impl CoreError {
    pub fn gateway(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Gateway(err.into())
    }

    pub fn chat(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Chat(err.into())
    }

    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Store(err.into())
    }

    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short text suitable for the originating interaction channel.
    #[must_use]
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            CoreError::ConfigMissing(key) => {
                Cow::Owned(format!("{key} is not configured. Please contact an administrator."))
            }
            CoreError::PermissionDenied => {
                Cow::Borrowed("You do not have permission to do that.")
            }
            CoreError::NotFound { entity, .. } => {
                Cow::Owned(format!("That {entity} could not be found."))
            }
            CoreError::InvalidState { entity, current, operation } => {
                Cow::Owned(format!("This {entity} is already {current}; cannot {operation}."))
            }
            CoreError::AlreadyClaimed => {
                Cow::Borrowed("This ticket has already been claimed.")
            }
            CoreError::Validation(message) => Cow::Owned(message.clone()),
            CoreError::Gateway(_) => {
                Cow::Borrowed("The payment provider could not be reached. Please try again.")
            }
            CoreError::Chat(_) => {
                Cow::Borrowed("The chat service failed to complete that action. Please try again.")
            }
            CoreError::Store(_) => {
                Cow::Borrowed("Something went wrong saving your request. Please try again.")
            }
        }
    }
}
