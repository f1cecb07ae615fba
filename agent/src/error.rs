use async_openai::error::OpenAIError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Yaml error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Openai error: {0}")]
    OpenaiError(#[from] OpenAIError),

    #[error("Http error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transient service error: {0}")]
    TransientServiceError(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("No response from llm: {0}")]
    LLMResponseError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing arg: {0}")]
    MissingArg(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Agent workflow error: {0}")]
    AgentWorkflowError(String),

    #[error("Task join error: {0}")]
    TaskJoinError(#[from] tokio::task::JoinError),

    #[error("Run cancelled")]
    CancelledError,

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientServiceError(_) => true,
            Error::HttpError(err) => is_transient_http(err),
            Error::OpenaiError(OpenAIError::Reqwest(_)) => true,
            _ => false,
        }
    }
}

fn is_transient_http(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        return true;
    }
    err.status()
        .is_some_and(|status| status.is_server_error() || status.as_u16() == 429)
}
