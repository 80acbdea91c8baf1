//! Comment bodies posted by the bot.

use crate::errors::DeploymentError;

pub const WELCOME_MESSAGE: &str = "Thanks for opening a new PR! Please follow our contributing guidelines to make your PR easier to review.";

pub const CLOSE_MESSAGE: &str =
    "This PR has been closed without merging. Thanks for your contributions!";

pub fn deployment_message(url: &str) -> String {
    format!(
        "🚀 Deployment started for this PR! You can check it out here: [{url}]({url}) 🌟",
        url = url
    )
}

/// Body of the comment posted on a newly opened pull request once it's deployed.
pub fn opened_message(url: &str) -> String {
    format!("{}\n{}", WELCOME_MESSAGE, deployment_message(url))
}

/// Posted publicly, so it only names the kind of failure. Details stay in the logs.
pub fn deployment_failed_message(error: &DeploymentError) -> String {
    format!(
        "{}\n⚠️ Deployment of this PR failed: {}.",
        WELCOME_MESSAGE,
        error.summary()
    )
}
