//! GitHub App authentication.
//!
//! The App signs a short-lived JWT with its private key, uses it to find the installation covering
//! a repository, then exchanges it for an installation access token. Installation ids and tokens
//! are cached; tokens are renewed once half of their lifetime has passed.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{check_status, GitHubClient, IssueCommenter};
use crate::errors::{CommentPostError, ConfigurationError};

const INSTALLATION_TOKEN_LIFETIME_IN_SECONDS: u64 = 3600;
const INSTALLATION_TOKEN_RENEW_THRESHOLD: u64 = INSTALLATION_TOKEN_LIFETIME_IN_SECONDS / 2;

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    iat: u64,
    exp: u64,
    iss: u64,
}

#[derive(Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
}

#[derive(Clone)]
struct InstallationToken {
    token: String,
    expiration: u64,
}

impl InstallationToken {
    fn is_fresh(&self, now: u64) -> bool {
        now < self
            .expiration
            .saturating_sub(INSTALLATION_TOKEN_RENEW_THRESHOLD)
    }
}

/// Posts comments as a GitHub App installation.
pub struct AppCommenter {
    client: GitHubClient,
    app_id: u64,
    key: EncodingKey,
    /// `owner/repo` to installation id
    installations: RwLock<HashMap<String, u64>>,
    tokens: RwLock<HashMap<u64, InstallationToken>>,
}

impl AppCommenter {
    pub fn new(
        client: GitHubClient,
        app_id: u64,
        private_key: &str,
    ) -> Result<Self, ConfigurationError> {
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|source| ConfigurationError::EncodingKey { source })?;

        Ok(Self {
            client,
            app_id,
            key,
            installations: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        })
    }

    fn app_token(&self) -> Result<String, CommentPostError> {
        // https://docs.github.com/en/apps/creating-github-apps/authenticating-with-a-github-app/generating-a-json-web-token-jwt-for-a-github-app
        let now = now_timestamp();
        let claims = JwtClaims {
            // backdated to allow for clock drift
            iat: now.saturating_sub(60),
            // GitHub refuses tokens living more than 10 minutes
            exp: now + 540,
            iss: self.app_id,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(|e| {
            CommentPostError::Auth {
                reason: format!("couldn't sign app token: {}", e),
            }
        })
    }

    async fn installation_id(&self, owner: &str, repo: &str) -> Result<u64, CommentPostError> {
        let full_name = format!("{}/{}", owner, repo);
        if let Some(id) = self.installations.read().await.get(&full_name) {
            return Ok(*id);
        }

        let app_token = self.app_token()?;
        let response = self
            .client
            .get(&format!("/repos/{}/installation", full_name), &app_token)
            .send()
            .await?;
        let installation: InstallationResponse = check_status(response).await?.json().await?;

        debug!(
            "repository {} is covered by installation {}",
            full_name, installation.id
        );
        self.installations
            .write()
            .await
            .insert(full_name, installation.id);

        Ok(installation.id)
    }

    async fn installation_token(&self, installation_id: u64) -> Result<String, CommentPostError> {
        let now = now_timestamp();
        if let Some(token) = self.tokens.read().await.get(&installation_id) {
            if token.is_fresh(now) {
                return Ok(token.token.clone());
            }
        }

        debug!("creating access token for installation {}", installation_id);
        let app_token = self.app_token()?;
        let response = self
            .client
            .post(
                &format!("/app/installations/{}/access_tokens", installation_id),
                &app_token,
            )
            .send()
            .await?;
        let created: InstallationTokenResponse = check_status(response).await?.json().await?;

        self.tokens.write().await.insert(
            installation_id,
            InstallationToken {
                token: created.token.clone(),
                expiration: now + INSTALLATION_TOKEN_LIFETIME_IN_SECONDS,
            },
        );

        Ok(created.token)
    }
}

#[async_trait]
impl IssueCommenter for AppCommenter {
    async fn comment(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), CommentPostError> {
        let installation_id = self.installation_id(owner, repo).await?;
        let token = self.installation_token(installation_id).await?;

        let result = self
            .client
            .create_comment(&token, owner, repo, issue_number, body)
            .await;

        if let Err(CommentPostError::Status { status: 401, .. }) = &result {
            warn!(
                "installation token for {} was rejected, dropping it",
                installation_id
            );
            self.tokens.write().await.remove(&installation_id);
        }

        result
    }
}

fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time collapsed")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
    use url::Url;

    use super::*;
    use crate::{
        config::GitHubConfig,
        github::testutils::{bearer, serve, serve_once},
    };

    const APP_KEY: &str = include_str!("testdata/app-key.pem");

    const INSTALLATION: &str = r#"{"id": 77}"#;
    const ACCESS_TOKEN: &str = r#"{"token": "ghs_fresh", "expires_at": "2030-01-01T00:00:00Z"}"#;
    const COMMENT: &str = r#"{"id": 1}"#;

    fn commenter(api_url: &str) -> AppCommenter {
        let client = GitHubClient::new(&GitHubConfig {
            api_url: Url::parse(api_url).unwrap(),
            ..GitHubConfig::default()
        })
        .unwrap();

        AppCommenter::new(client, 1234, APP_KEY).unwrap()
    }

    /// Commenter whose caches already hold installation 99 for `octo/repo1`, with a token
    /// expiring at `expiration`.
    async fn cached_commenter(api_url: &str, expiration: u64) -> AppCommenter {
        let commenter = commenter(api_url);
        commenter
            .installations
            .write()
            .await
            .insert("octo/repo1".to_string(), 99);
        commenter.tokens.write().await.insert(
            99,
            InstallationToken {
                token: "ghs_cached".to_string(),
                expiration,
            },
        );

        commenter
    }

    fn decode_app_token(token: &str) -> JwtClaims {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();

        decode(token, &DecodingKey::from_secret(&[]), &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn token_freshness() {
        let token = InstallationToken {
            token: "ghs".to_string(),
            expiration: 10_000,
        };

        assert!(token.is_fresh(10_000 - INSTALLATION_TOKEN_RENEW_THRESHOLD - 1));
        assert!(!token.is_fresh(10_000 - INSTALLATION_TOKEN_RENEW_THRESHOLD));
        assert!(!token.is_fresh(20_000));
    }

    #[test]
    fn rejects_invalid_private_key() {
        let client = GitHubClient::new(&GitHubConfig::default()).unwrap();

        assert!(matches!(
            AppCommenter::new(client, 1234, "not a pem key"),
            Err(ConfigurationError::EncodingKey { .. })
        ));
    }

    #[test]
    fn app_token_claims() {
        let commenter = commenter("https://api.github.com");

        let token = commenter.app_token().unwrap();
        let claims = decode_app_token(&token);

        assert_eq!(decode_header(&token).unwrap().alg, Algorithm::RS256);
        assert_eq!(claims.iss, 1234);
        assert_eq!(claims.exp - claims.iat, 600);
        assert!(claims.iat < now_timestamp());
    }

    #[tokio::test]
    async fn authenticates_as_installation_then_comments() {
        let (url, mut requests) =
            serve(vec![(200, INSTALLATION), (201, ACCESS_TOKEN), (201, COMMENT)]).await;
        let commenter = commenter(&url);

        commenter.comment("octo", "repo1", 42, "hello").await.unwrap();

        let lookup = requests.recv().await.unwrap();
        assert!(lookup.starts_with("GET /repos/octo/repo1/installation HTTP/1.1"));
        let exchange = requests.recv().await.unwrap();
        assert!(exchange.starts_with("POST /app/installations/77/access_tokens HTTP/1.1"));
        for request in [&lookup, &exchange] {
            let app_token = bearer(request).expect("app token should be sent");
            assert_eq!(decode_header(app_token).unwrap().alg, Algorithm::RS256);
            assert_eq!(decode_app_token(app_token).iss, 1234);
        }

        let comment = requests.recv().await.unwrap();
        assert!(comment.starts_with("POST /repos/octo/repo1/issues/42/comments HTTP/1.1"));
        assert_eq!(bearer(&comment), Some("ghs_fresh"));

        assert_eq!(
            commenter.installations.read().await.get("octo/repo1"),
            Some(&77)
        );
        assert_eq!(
            commenter.tokens.read().await.get(&77).map(|t| t.token.clone()),
            Some("ghs_fresh".to_string())
        );
    }

    #[tokio::test]
    async fn second_comment_reuses_installation_and_token() {
        let (url, mut requests) = serve(vec![
            (200, INSTALLATION),
            (201, ACCESS_TOKEN),
            (201, COMMENT),
            (201, COMMENT),
        ])
        .await;
        let commenter = commenter(&url);

        commenter.comment("octo", "repo1", 42, "hello").await.unwrap();
        commenter.comment("octo", "repo1", 43, "again").await.unwrap();

        for _ in 0..3 {
            requests.recv().await.unwrap();
        }
        let second = requests.recv().await.unwrap();
        assert!(second.starts_with("POST /repos/octo/repo1/issues/43/comments HTTP/1.1"));
        assert_eq!(bearer(&second), Some("ghs_fresh"));
    }

    #[tokio::test]
    async fn stale_token_is_renewed() {
        let (url, mut requests) = serve(vec![(201, ACCESS_TOKEN), (201, COMMENT)]).await;
        // past the renewal threshold, but not expired yet
        let expiration = now_timestamp() + INSTALLATION_TOKEN_RENEW_THRESHOLD - 10;
        let commenter = cached_commenter(&url, expiration).await;

        commenter.comment("octo", "repo1", 42, "hello").await.unwrap();

        let exchange = requests.recv().await.unwrap();
        assert!(exchange.starts_with("POST /app/installations/99/access_tokens HTTP/1.1"));
        let comment = requests.recv().await.unwrap();
        assert_eq!(bearer(&comment), Some("ghs_fresh"));
        assert!(commenter.tokens.read().await.get(&99).unwrap().expiration > expiration);
    }

    #[tokio::test]
    async fn posts_with_cached_installation_token() {
        let (url, mut requests) = serve_once(201, COMMENT).await;
        let commenter =
            cached_commenter(&url, now_timestamp() + INSTALLATION_TOKEN_LIFETIME_IN_SECONDS).await;

        commenter.comment("octo", "repo1", 42, "hello").await.unwrap();

        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /repos/octo/repo1/issues/42/comments HTTP/1.1"));
        assert_eq!(bearer(&request), Some("ghs_cached"));
    }

    #[tokio::test]
    async fn rejected_token_is_dropped() {
        let (url, _requests) = serve_once(401, r#"{"message": "Bad credentials"}"#).await;
        let commenter =
            cached_commenter(&url, now_timestamp() + INSTALLATION_TOKEN_LIFETIME_IN_SECONDS).await;

        let result = commenter.comment("octo", "repo1", 42, "hello").await;

        assert!(matches!(
            result,
            Err(CommentPostError::Status { status: 401, .. })
        ));
        assert!(commenter.tokens.read().await.get(&99).is_none());
    }
}
