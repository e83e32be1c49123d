// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Remote spots backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use thiserror::Error;

use super::Spot;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the spots backend
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned HTTP {0}")]
    Status(u16),
}

/// Source of spot changes
#[async_trait]
pub trait SpotsRemote: Send + Sync {
    /// Fetch every spot changed after `since`, or all spots when `None`.
    /// Deletions arrive as tombstones.
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Spot>, RemoteError>;
}

/// JSON-over-HTTP spots backend
#[derive(Debug, Clone)]
pub struct HttpSpotsRemote {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSpotsRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Builder method to send a bearer token
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn spots_url(&self) -> String {
        format!("{}/spots", self.base_url)
    }
}

#[async_trait]
impl SpotsRemote for HttpSpotsRemote {
    async fn fetch_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Spot>, RemoteError> {
        let url = self.spots_url();
        let mut request = self.client.get(&url).timeout(REQUEST_TIMEOUT);

        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))]);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Fetching spot changes from {} since {:?}", url, since);
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        Ok(response.json::<Vec<Spot>>().await?)
    }
}
