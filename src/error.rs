use agent_stream::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] StreamError),
    #[error("no session has been submitted")]
    NoActiveSession,
}
