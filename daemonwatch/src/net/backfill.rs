use super::endpoint::{Endpoint, EndpointError};
use crate::data::{EventEnvelope, MalformedMessage};

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BackfillError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("backfill request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backfill rejected with status {0}")]
    Status(u16),

    #[error("backfill body is not an event list: {0}")]
    Decode(#[from] MalformedMessage),
}

/// Issues the one-shot request for a target's console history.
#[derive(Debug, Clone)]
pub struct BackfillFetcher {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl BackfillFetcher {
    pub fn new(client: reqwest::Client, endpoint: Endpoint) -> BackfillFetcher {
        BackfillFetcher { client, endpoint }
    }

    pub async fn fetch(&self, target: Uuid) -> Result<Vec<EventEnvelope>, BackfillError> {
        let url = self.endpoint.console_buffer(target)?;
        debug!("fetching console backfill from {}", url);

        let mut request = self.client.get(url);
        if let Some(token) = &self.endpoint.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackfillError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        let batch = EventEnvelope::parse_batch(&body)?;
        debug!("backfill for {} returned {} envelopes", target, batch.len());
        Ok(batch)
    }
}
