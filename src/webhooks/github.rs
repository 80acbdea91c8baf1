use std::convert::Infallible;

use anyhow::anyhow;
use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request, State,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, trace, warn};

mod signing;
use signing::SignedGitHubPayload;

mod events;
pub use events::*;

use crate::{
    errors::DispatchError,
    webhooks::{Event, EventSender},
};

const X_GITHUB_EVENT: &str = "X-GitHub-Event";
const X_GITHUB_DELIVERY: &str = "X-GitHub-Delivery";

pub struct GitHubSecret(pub String);

#[rocket::post("/api/webhook", data = "<payload>")]
pub fn github_webhook(
    event: GitHubEventType,
    delivery: DeliveryId,
    payload: SignedGitHubPayload,
    sender: &State<EventSender>,
) -> Result<&'static str, Status> {
    info!(
        "received event {:?} (delivery {})",
        event,
        delivery.0.as_deref().unwrap_or("unknown")
    );
    trace!("payload: {}", payload.0);

    let event = match parse_event(&event, &payload.0) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok("OK"),
        Err(e) => {
            warn!("dropping delivery: {}", e);
            return Err(Status::BadRequest);
        }
    };

    if sender.0.send(Event::GitHub(event)).is_err() {
        warn!("dropping delivery: {}", DispatchError::QueueClosed);
        return Err(Status::ServiceUnavailable);
    }

    Ok("OK")
}

/// Decodes a delivery into the event the bot should handle, if any.
///
/// Unknown events and pull request actions the bot doesn't react to aren't errors, they're just
/// not forwarded. Pings are logged here and never reach the bot.
pub(crate) fn parse_event(
    event_type: &GitHubEventType,
    payload: &str,
) -> Result<Option<GitHubEvent>, DispatchError> {
    let event = match event_type {
        GitHubEventType::Ping => {
            let ping: PingEvent = decode("ping", payload)?;
            let hook = ping
                .hook_id
                .map_or_else(|| "unknown".to_string(), |id| id.to_string());
            info!("received ping for hook {}: {}", hook, ping.zen);
            return Ok(None);
        }
        GitHubEventType::PullRequest => {
            let event: PullRequestEvent = decode("pull_request", payload)?;
            if event.action == PullRequestAction::Other {
                debug!("ignoring pull request action for {}", event.pull_request);
                return Ok(None);
            }
            GitHubEvent::PullRequest(event)
        }
        GitHubEventType::Other(name) => {
            debug!("ignoring unsupported event `{}`", name);
            return Ok(None);
        }
    };

    Ok(Some(event))
}

fn decode<T: DeserializeOwned>(event: &str, payload: &str) -> Result<T, DispatchError> {
    serde_json::from_str(payload).map_err(|source| DispatchError::Payload {
        event: event.to_string(),
        source,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHubEventType {
    Ping,
    PullRequest,
    Other(String),
}

impl From<&str> for GitHubEventType {
    fn from(name: &str) -> Self {
        match name {
            "ping" => Self::Ping,
            "pull_request" => Self::PullRequest,
            other => Self::Other(other.to_string()),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for GitHubEventType {
    type Error = anyhow::Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let event_types = request.headers().get(X_GITHUB_EVENT).collect::<Vec<_>>();
        if event_types.len() != 1 {
            return Outcome::Error((
                Status::BadRequest,
                anyhow!("request header needs exactly one event type"),
            ));
        }

        Outcome::Success(GitHubEventType::from(event_types[0]))
    }
}

/// Value of the `X-GitHub-Delivery` header, only used to correlate logs.
pub struct DeliveryId(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for DeliveryId {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(DeliveryId(
            request.headers().get_one(X_GITHUB_DELIVERY).map(str::to_owned),
        ))
    }
}
