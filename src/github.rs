use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Client, RequestBuilder, Response,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    config::{GitHubConfig, GitHubCredentials},
    errors::{CommentPostError, ConfigurationError},
};

mod app;
pub use app::AppCommenter;

const GITHUB_API_VERSION: &str = "2022-11-28";

/// Something able to post a comment on an issue or a pull request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IssueCommenter: Send + Sync {
    async fn comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), CommentPostError>;
}

/// Builds the commenter matching the configured credentials.
pub fn build_commenter(
    config: &GitHubConfig,
    credentials: GitHubCredentials,
) -> Result<Arc<dyn IssueCommenter>, ConfigurationError> {
    let client = GitHubClient::new(config)?;

    Ok(match credentials {
        GitHubCredentials::Token(token) => {
            debug!("authenticating with a personal access token");
            Arc::new(TokenCommenter::new(client, token))
        }
        GitHubCredentials::App {
            app_id,
            private_key,
        } => {
            debug!("authenticating as GitHub App {}", app_id);
            Arc::new(AppCommenter::new(client, app_id, &private_key)?)
        }
    })
}

#[derive(Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Thin REST client shared by both authentication strategies.
#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, ConfigurationError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );

        let http = Client::builder()
            .user_agent(concat!("deploybot/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|source| ConfigurationError::HttpClient { source })?;

        Ok(Self {
            http,
            api_url: config.api_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str, bearer: &str) -> RequestBuilder {
        self.http.get(self.url(path)).bearer_auth(bearer)
    }

    fn post(&self, path: &str, bearer: &str) -> RequestBuilder {
        self.http.post(self.url(path)).bearer_auth(bearer)
    }

    /// `POST /repos/{owner}/{repo}/issues/{issue_number}/comments`
    pub async fn create_comment(
        &self,
        bearer: &str,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), CommentPostError> {
        let path = format!("/repos/{}/{}/issues/{}/comments", owner, repo, issue_number);
        trace!("posting comment to {}", path);

        let response = self
            .post(&path, bearer)
            .json(&CommentRequest { body })
            .send()
            .await?;
        check_status(response).await?;

        Ok(())
    }
}

/// Turns non-2xx answers into [`CommentPostError::Status`], using GitHub's error message when
/// the body has one.
async fn check_status(response: Response) -> Result<Response, CommentPostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|error| error.message)
        .unwrap_or(text);

    Err(CommentPostError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Posts comments with a personal access token.
pub struct TokenCommenter {
    client: GitHubClient,
    token: String,
}

impl TokenCommenter {
    pub fn new(client: GitHubClient, token: String) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl IssueCommenter for TokenCommenter {
    async fn comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), CommentPostError> {
        self.client
            .create_comment(&self.token, owner, repo, issue_number, body)
            .await
    }
}
