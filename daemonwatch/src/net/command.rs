//! Console command input. This is a plain write path next to the streams;
//! any output the command produces arrives on the console channel like every
//! other line, with no correlation to the request.

use super::endpoint::{Endpoint, EndpointError};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("command request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("command rejected with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl CommandSender {
    pub fn new(client: reqwest::Client, endpoint: Endpoint) -> CommandSender {
        CommandSender { client, endpoint }
    }

    /// Posts `command` as a JSON string to the target's console.
    pub async fn send(&self, target: Uuid, command: &str) -> Result<(), CommandError> {
        let url = self.endpoint.console_command(target)?;
        debug!("sending command to {}", url);

        let mut request = self.client.post(url).json(command);
        if let Some(token) = &self.endpoint.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Status(status.as_u16()));
        }
        Ok(())
    }
}
