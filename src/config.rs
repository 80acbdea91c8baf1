use std::{fs, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::errors::ConfigurationError;

const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployBotConfig {
    /// Secret shared with GitHub, used to check the `X-Hub-Signature-256` of every delivery
    pub webhook_secret: Option<String>,
    /// Address the webhook listener binds to
    pub address: String,
    /// Port the webhook listener binds to
    pub port: u16,
    /// Post a comment on the pull request when its deployment fails, instead of only logging the
    /// failure
    pub notify_deployment_failure: bool,
    pub github: GitHubConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Root of the GitHub REST API, override it for GitHub Enterprise
    pub api_url: Url,
    /// Personal access token. Takes precedence over the App credentials when both are set.
    pub token: Option<String>,
    /// GitHub App identifier
    pub app_id: Option<u64>,
    /// Path to the PEM private key of the GitHub App
    pub private_key_path: Option<PathBuf>,
    /// Timeout for each request to the API
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Script called as `<script> <repository> <pull request number>`, printing the deployment
    /// URL on stdout
    pub script: String,
    /// Arguments passed before the repository and pull request number, e.g. the script path when
    /// `script` is an interpreter
    pub args: Vec<String>,
    /// Directory the script runs in, defaults to the bot's working directory
    pub working_dir: Option<PathBuf>,
    /// Seconds a deployment may run before the script is killed
    pub timeout_secs: u64,
    /// How many deployments may run at the same time, further ones wait for a slot
    pub max_concurrent: usize,
}

/// Credentials used to post comments, resolved from [`GitHubConfig`].
#[derive(Clone)]
pub enum GitHubCredentials {
    Token(String),
    App { app_id: u64, private_key: String },
}

impl std::fmt::Debug for GitHubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Token(..)"),
            Self::App { app_id, .. } => write!(f, "App {{ app_id: {} }}", app_id),
        }
    }
}

impl Default for DeployBotConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            address: "0.0.0.0".to_string(),
            port: 3000,
            notify_deployment_failure: false,
            github: GitHubConfig::default(),
            deploy: DeployConfig::default(),
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(GITHUB_API_URL).expect("static URL is valid"),
            token: None,
            app_id: None,
            private_key_path: None,
            timeout_secs: 30,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            script: "./deploy.sh".to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: 600,
            max_concurrent: 4,
        }
    }
}

impl DeployBotConfig {
    /// Overrides fields with the environment variables the bot understands. Empty variables are
    /// considered unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(secret) = var("WEBHOOK_SECRET") {
            self.webhook_secret = Some(secret);
        }
        if let Some(token) = var("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(app_id) = var("APP_ID") {
            self.github.app_id = Some(parse_var("APP_ID", &app_id)?);
        }
        if let Some(path) = var("PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(api_url) = var("GITHUB_API_URL") {
            self.github.api_url = parse_var("GITHUB_API_URL", &api_url)?;
        }
        if let Some(script) = var("DEPLOY_SCRIPT") {
            self.deploy.script = script;
        }
        if let Some(address) = var("HOST") {
            self.address = address;
        }
        if let Some(port) = var("PORT") {
            self.port = parse_var("PORT", &port)?;
        }

        Ok(())
    }

    pub fn webhook_secret(&self) -> Result<&str, ConfigurationError> {
        self.webhook_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigurationError::MissingWebhookSecret)
    }

    /// Picks the authentication strategy: a personal access token if one is configured, the
    /// GitHub App credentials otherwise. The App private key is read from disk here.
    pub fn credentials(&self) -> Result<GitHubCredentials, ConfigurationError> {
        let github = &self.github;

        if let Some(token) = github.token.as_ref().filter(|token| !token.is_empty()) {
            return Ok(GitHubCredentials::Token(token.clone()));
        }

        match (github.app_id, &github.private_key_path) {
            (Some(app_id), Some(path)) => {
                let private_key = fs::read_to_string(path).map_err(|source| {
                    ConfigurationError::PrivateKey {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(GitHubCredentials::App {
                    app_id,
                    private_key,
                })
            }
            _ => Err(ConfigurationError::MissingCredentials),
        }
    }
}

impl GitHubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_var<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigurationError> {
    value.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
