// Command dispatch - host bridge method calls parsed into typed commands

use crate::{NearbyError, PeerSessionManager, Result, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Channel carrying host method calls
pub const METHOD_CHANNEL: &str = "tapcapsule/nearby";

/// Channel carrying outbound events
pub const EVENT_CHANNEL: &str = "tapcapsule/nearby/events";

/// Raw method call as delivered by a host bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    fn string_argument(&self, key: &str) -> Result<&str> {
        self.arguments
            .as_ref()
            .and_then(|args| args.get(key))
            .and_then(Value::as_str)
            .ok_or_else(|| NearbyError::InvalidArgument(format!("{} requires a string '{}'", self.method, key)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { role: Role },
    Stop,
    SendJson { json: String },
}

impl TryFrom<&MethodCall> for Command {
    type Error = NearbyError;

    fn try_from(call: &MethodCall) -> Result<Self> {
        match call.method.as_str() {
            "start" => Ok(Command::Start {
                role: call.string_argument("role")?.parse()?,
            }),
            "stop" => Ok(Command::Stop),
            "sendJson" => Ok(Command::SendJson {
                json: call.string_argument("json")?.to_string(),
            }),
            other => Err(NearbyError::NotImplemented(other.to_string())),
        }
    }
}

impl PeerSessionManager {
    /// Execute a parsed command
    pub async fn handle(&self, command: Command) -> Result<()> {
        match command {
            Command::Start { role } => self.start(role).await,
            Command::Stop => {
                self.stop().await;
                Ok(())
            }
            Command::SendJson { json } => {
                self.send(&json).await;
                Ok(())
            }
        }
    }

    /// Parse and execute a host method call. Rejected calls change nothing.
    pub async fn handle_method_call(&self, call: &MethodCall) -> Result<()> {
        let command = Command::try_from(call).map_err(|e| {
            debug!(method = %call.method, code = e.code(), "Rejected method call");
            e
        })?;
        self.handle(command).await
    }
}
