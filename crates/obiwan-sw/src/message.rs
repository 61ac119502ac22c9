//! Page ⇄ worker message protocol.
//!
//! | Direction | type | payload |
//! |---|---|---|
//! | page→worker | `SKIP_WAITING` | |
//! | page→worker | `CLIENTS_CLAIM` | |
//! | page→worker | `REFRESH` | |
//! | page→worker | `GET_GREETING` | |
//! | worker→page | `CLIENT_MESSAGE_ALLOWED` | |
//! | worker→page | `REFRESH_COMPLETE` | |
//! | worker→page | `GREETING_MESSAGE` | `message` |

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::clients::{Client, ClientId};
use crate::registry::CacheRole;
use crate::scope::ServiceWorkerGlobalScope;

/// Messages a page sends to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Activate a waiting worker now.
    SkipWaiting,
    /// Take control of open clients.
    ClientsClaim,
    /// Drop the document and image caches.
    Refresh,
    /// Ask for a random greeting.
    GetGreeting,
}

impl ClientMessage {
    /// Parse a structured message. Unknown or missing types yield `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn to_json(self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Messages the worker sends to a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Sent once after activation and claim.
    ClientMessageAllowed,
    /// Ack for `REFRESH`.
    RefreshComplete,
    /// Reply to `GET_GREETING`.
    GreetingMessage { message: String },
}

/// Which client receives replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyTarget {
    /// The longest-connected client, whoever sent the message.
    #[default]
    FirstClient,
    /// The client that sent the message.
    Sender,
}

/// Fixed greeting set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Greetings(Vec<String>);

impl Greetings {
    pub fn new(messages: Vec<String>) -> Self {
        Self(messages)
    }

    /// Uniformly random greeting.
    pub fn pick(&self) -> Option<&str> {
        self.0.choose(&mut rand::thread_rng()).map(String::as_str)
    }

    pub fn contains(&self, message: &str) -> bool {
        self.0.iter().any(|m| m == message)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl ServiceWorkerGlobalScope {
    /// Handle a message from `source`.
    ///
    /// Nothing happens for unknown types or when no client is connected.
    pub async fn handle_message(&self, source: ClientId, data: &JsonValue) {
        let Some(message) = ClientMessage::parse(data) else {
            debug!(%source, "Ignoring message without a known type");
            return;
        };
        let Some(client) = self.reply_client(source).await else {
            debug!(%source, ?message, "No client to reply to, ignoring");
            return;
        };

        info!(%source, reply_to = %client.id, ?message, "Message received");

        match message {
            ClientMessage::SkipWaiting => {
                if let Err(e) = self.skip_waiting().await {
                    warn!(error = %e, "skip_waiting failed");
                }
            }
            ClientMessage::ClientsClaim => {
                self.claim_clients().await;
            }
            ClientMessage::Refresh => {
                let (documents, images) = tokio::join!(
                    self.clear_role(CacheRole::Documents),
                    self.clear_role(CacheRole::Images)
                );
                debug!(documents, images, "Refresh cleared caches");
                reply(&client, WorkerMessage::RefreshComplete);
            }
            ClientMessage::GetGreeting => match self.greetings().pick() {
                Some(message) => reply(
                    &client,
                    WorkerMessage::GreetingMessage {
                        message: message.to_string(),
                    },
                ),
                None => warn!("No greetings configured"),
            },
        }
    }

    async fn reply_client(&self, source: ClientId) -> Option<Client> {
        let clients = self.clients().read().await;
        match self.config().reply_target {
            ReplyTarget::FirstClient => clients.first().cloned(),
            ReplyTarget::Sender => clients.get(source).cloned(),
        }
    }
}

fn reply(client: &Client, message: WorkerMessage) {
    if let Err(e) = client.post_message(message) {
        warn!(client = %client.id, error = %e, "Reply dropped");
    }
}
