use std::path::PathBuf;

use thiserror::Error;

/// Startup errors: the bot can't run without a secret and GitHub credentials.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing webhook secret (set WEBHOOK_SECRET or `webhook_secret`)")]
    MissingWebhookSecret,

    #[error(
        "missing GitHub credentials: set GITHUB_TOKEN, or both APP_ID and PRIVATE_KEY_PATH"
    )]
    MissingCredentials,

    #[error("invalid value `{value}` for {name}")]
    InvalidValue { name: &'static str, value: String },

    #[error("couldn't read private key at {}", .path.display())]
    PrivateKey {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("private key isn't a valid RSA PEM key")]
    EncodingKey { source: jsonwebtoken::errors::Error },

    #[error("couldn't build HTTP client")]
    HttpClient { source: reqwest::Error },
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("couldn't launch deployment script {script}: {source}")]
    Launch {
        script: String,
        source: std::io::Error,
    },

    #[error("deployment script exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("deployment script didn't finish within {secs}s")]
    Timeout { secs: u64 },
}

impl DeploymentError {
    /// What went wrong, without the script's name, output, or exit status.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::Launch { .. } => "the deployment script couldn't be started",
            Self::Failed { .. } => "the deployment script failed",
            Self::Timeout { .. } => "the deployment timed out",
        }
    }
}

#[derive(Debug, Error)]
pub enum CommentPostError {
    #[error("request to GitHub failed: {source}")]
    Http { source: reqwest::Error },

    #[error("GitHub answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("couldn't authenticate as GitHub App: {reason}")]
    Auth { reason: String },
}

impl From<reqwest::Error> for CommentPostError {
    fn from(source: reqwest::Error) -> Self {
        Self::Http { source }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("couldn't decode `{event}` payload: {source}")]
    Payload {
        event: String,
        source: serde_json::Error,
    },

    #[error("event queue is closed")]
    QueueClosed,
}
