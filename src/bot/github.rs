use anyhow::Context;
use tracing::{error, info, trace};

use crate::{
    bot::{
        messages::{deployment_failed_message, opened_message, CLOSE_MESSAGE},
        Response,
    },
    deploy::DeploymentRunner,
    webhooks::github::{GitHubEvent, PullRequestAction, PullRequestEvent},
};

pub(crate) async fn handle_github_event(
    event: GitHubEvent,
    deployer: &dyn DeploymentRunner,
    notify_deployment_failure: bool,
) -> anyhow::Result<Option<Response>> {
    match event {
        GitHubEvent::PullRequest(event) => match event.action {
            PullRequestAction::Opened => {
                handle_opened(event, deployer, notify_deployment_failure).await
            }
            PullRequestAction::Closed => Ok(Some(handle_closed(event))),
            PullRequestAction::Other => Ok(None),
        },
    }
}

async fn handle_opened(
    event: PullRequestEvent,
    deployer: &dyn DeploymentRunner,
    notify_deployment_failure: bool,
) -> anyhow::Result<Option<Response>> {
    info!(
        "received a pull request event for #{}",
        event.pull_request.number
    );

    let body = match deployer
        .deploy(&event.repository.name, event.pull_request.number)
        .await
    {
        Ok(url) => opened_message(&url),
        Err(e) if notify_deployment_failure => {
            error!(
                "deployment of {} of {} failed, notifying the author: {}",
                event.pull_request,
                event.repository.full_name(),
                e
            );
            deployment_failed_message(&e)
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "couldn't deploy {} of {}",
                    event.pull_request,
                    event.repository.full_name()
                )
            })
        }
    };

    Ok(Some(Response::for_pull_request(&event, body)))
}

fn handle_closed(event: PullRequestEvent) -> Response {
    info!(
        "received a pull request closed event for #{}",
        event.pull_request.number
    );
    trace!("merged: {}", event.pull_request.merged);

    Response::for_pull_request(&event, CLOSE_MESSAGE.to_string())
}
