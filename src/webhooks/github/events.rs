use std::fmt::Display;

use serde::Deserialize;

use crate::bot::utils::shorten_content;

mod ping;
mod pull_request;

pub use ping::*;
pub use pull_request::*;

#[derive(Debug)]
pub enum GitHubEvent {
    PullRequest(PullRequestEvent),
}

#[derive(Debug, Deserialize)]
pub struct GitHubUser {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct Repository {
    pub name: String,
    pub owner: GitHubUser,
}

impl Repository {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner.login, self.name)
    }
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: Option<String>,
    pub user: Option<GitHubUser>,
    #[serde(default)]
    pub merged: bool,
}

impl Display for PullRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PR #{}", self.number)?;
        if let Some(title) = &self.title {
            write!(f, ": {}", shorten_content(title))?;
        }
        if let Some(user) = &self.user {
            write!(f, " by {}", user.login)?;
        }
        Ok(())
    }
}
