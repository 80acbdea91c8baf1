use serde::Deserialize;

use crate::webhooks::github::events::{PullRequest, Repository};

#[derive(Debug, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub repository: Repository,
    pub pull_request: PullRequest,
}

/// Pull request actions the bot reacts to, every other action is [`PullRequestAction::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Closed,
    #[serde(other)]
    Other,
}

impl PullRequestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::Other => "other",
        }
    }
}
