use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, trace, warn};

use crate::{
    deploy::DeploymentRunner,
    github::IssueCommenter,
    webhooks::{github::PullRequestEvent, Event},
};

mod github;
use github::handle_github_event;

pub(crate) mod messages;
pub(crate) mod utils;

/// Everything needed to handle events: where to deploy, and how to comment back.
#[derive(Clone)]
pub struct DeployBot {
    commenter: Arc<dyn IssueCommenter>,
    deployer: Arc<dyn DeploymentRunner>,
    notify_deployment_failure: bool,
}

impl DeployBot {
    pub fn new(
        commenter: Arc<dyn IssueCommenter>,
        deployer: Arc<dyn DeploymentRunner>,
        notify_deployment_failure: bool,
    ) -> Self {
        Self {
            commenter,
            deployer,
            notify_deployment_failure,
        }
    }

    /// Handles events until every sender is dropped.
    ///
    /// Each event gets its own task, so a slow deployment doesn't hold back other deliveries.
    pub async fn run(self, mut events: UnboundedReceiver<Event>) {
        debug!("running...");

        loop {
            let event = match events.recv().await {
                Some(event) => event,
                None => {
                    info!("all channel senders were dropped, exiting receive loop");
                    break;
                }
            };
            debug!("received event: {}", event);

            let bot = self.clone();
            tokio::spawn(async move { bot.process(event).await });
        }
    }

    /// Handles one event, logging instead of propagating any error.
    async fn process(&self, event: Event) {
        let summary = event.to_string();

        if let Err(e) = self.handle_event(event).await {
            warn!("error processing {}: {:#}", summary, e);
        }
    }

    async fn handle_event(&self, event: Event) -> anyhow::Result<()> {
        let response = match event {
            Event::GitHub(event) => {
                handle_github_event(
                    event,
                    self.deployer.as_ref(),
                    self.notify_deployment_failure,
                )
                .await?
            }
        };

        let Response {
            owner,
            repo,
            issue_number,
            body,
        } = match response {
            Some(response) => response,
            // event doesn't need a comment from the bot
            None => {
                trace!("event didn't need a comment");
                return Ok(());
            }
        };

        trace!(
            "posting comment `{}` on {}/{}#{}",
            body,
            owner,
            repo,
            issue_number
        );
        self.commenter
            .comment(&owner, &repo, issue_number, &body)
            .await
            .with_context(|| {
                format!(
                    "couldn't post comment on {}/{}#{}",
                    owner, repo, issue_number
                )
            })?;

        Ok(())
    }
}

/// A comment to post on an issue or pull request.
#[derive(Debug)]
pub struct Response {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

impl Response {
    pub fn for_pull_request(event: &PullRequestEvent, body: String) -> Self {
        Self {
            owner: event.repository.owner.login.clone(),
            repo: event.repository.name.clone(),
            issue_number: event.pull_request.number,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::{
        deploy::MockDeploymentRunner,
        errors::{CommentPostError, DeploymentError},
        github::MockIssueCommenter,
        webhooks::GitHubEvent,
    };

    const OPENED_COMMENT: &str = "Thanks for opening a new PR! Please follow our contributing guidelines to make your PR easier to review.\n🚀 Deployment started for this PR! You can check it out here: [https://pr-42.example.com](https://pr-42.example.com) 🌟";

    fn event(action: &str, number: u64) -> Event {
        let payload = serde_json::json!({
            "action": action,
            "repository": {"name": "repo1", "owner": {"login": "octo"}},
            "pull_request": {"number": number},
        });

        Event::GitHub(GitHubEvent::PullRequest(
            serde_json::from_value(payload).unwrap(),
        ))
    }

    fn bot(commenter: MockIssueCommenter, deployer: MockDeploymentRunner) -> DeployBot {
        DeployBot::new(Arc::new(commenter), Arc::new(deployer), false)
    }

    #[tokio::test]
    async fn opened_posts_deployment_comment() {
        let mut deployer = MockDeploymentRunner::new();
        deployer
            .expect_deploy()
            .once()
            .returning(|_, _| Ok("https://pr-42.example.com".to_string()));

        let mut commenter = MockIssueCommenter::new();
        commenter
            .expect_comment()
            .withf(|owner, repo, number, body| {
                owner == "octo" && repo == "repo1" && number == &42 && body == OPENED_COMMENT
            })
            .once()
            .returning(|_, _, _, _| Ok(()));

        bot(commenter, deployer)
            .handle_event(event("opened", 42))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_deployment_posts_nothing() {
        let mut deployer = MockDeploymentRunner::new();
        deployer.expect_deploy().once().returning(|_, _| {
            Err(DeploymentError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "build failed".to_string(),
            })
        });

        let mut commenter = MockIssueCommenter::new();
        commenter.expect_comment().never();

        let err = bot(commenter, deployer)
            .handle_event(event("opened", 42))
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("build failed"));
    }

    #[tokio::test]
    async fn comment_failure_is_reported() {
        let mut deployer = MockDeploymentRunner::new();
        deployer.expect_deploy().never();

        let mut commenter = MockIssueCommenter::new();
        commenter.expect_comment().once().returning(|_, _, _, _| {
            Err(CommentPostError::Status {
                status: 403,
                message: "Resource not accessible by integration".to_string(),
            })
        });

        let err = bot(commenter, deployer)
            .handle_event(event("closed", 7))
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("octo/repo1#7"));
    }

    #[tokio::test]
    async fn run_handles_queued_events() {
        let mut deployer = MockDeploymentRunner::new();
        deployer.expect_deploy().never();

        let (done, mut posted) = unbounded_channel();
        let mut commenter = MockIssueCommenter::new();
        commenter
            .expect_comment()
            .times(2)
            .returning(move |_, _, number, _| {
                done.send(number).unwrap();
                Ok(())
            });

        let (sender, receiver) = unbounded_channel();
        sender.send(event("closed", 7)).unwrap();
        sender.send(event("closed", 8)).unwrap();
        drop(sender);

        bot(commenter, deployer).run(receiver).await;

        let mut numbers = Vec::new();
        for _ in 0..2 {
            let number = tokio::time::timeout(Duration::from_secs(5), posted.recv())
                .await
                .unwrap()
                .unwrap();
            numbers.push(number);
        }
        numbers.sort_unstable();
        assert_eq!(numbers, vec![7, 8]);
    }
}
