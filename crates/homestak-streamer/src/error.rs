use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("failed to open remote channel: {0}")]
    ChannelFailed(String),

    #[error("command timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("internal streamer error: {0}")]
    Internal(String),
}
