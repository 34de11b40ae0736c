use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("config error: {0}")]
    Config(#[from] homestak_config::ConfigError),

    #[error("graph validation error: {0}")]
    Graph(#[from] homestak_graph::GraphError),

    #[error("store error: {0}")]
    Store(#[from] homestak_state::StoreError),

    #[error("action error: {0}")]
    Action(#[from] homestak_action::ActionError),

    #[error("token error: {0}")]
    Token(#[from] homestak_token::TokenError),

    #[error("server error: {0}")]
    Server(#[from] homestak_server::ServerError),

    #[error("internal executor error: {0}")]
    Internal(String),
}
