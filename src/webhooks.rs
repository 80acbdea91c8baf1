use tokio::sync::mpsc::UnboundedSender;

pub mod github;
pub use github::{github_webhook, GitHubEvent, GitHubSecret};

pub struct EventSender(pub UnboundedSender<Event>);

#[derive(Debug)]
pub enum Event {
    GitHub(GitHubEvent),
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::GitHub(GitHubEvent::PullRequest(event)) => write!(
                f,
                "GitHub pull_request.{} on {} {}",
                event.action.as_str(),
                event.repository.full_name(),
                event.pull_request
            ),
        }
    }
}
