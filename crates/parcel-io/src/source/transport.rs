// Copyright 2025 eraflo
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

//! The pluggable HTTP-like transport used by the server-backed sources.

use async_trait::async_trait;
use parcel_core::FetchError;
use std::fmt;

/// Issues a single GET and returns the response body.
///
/// Kept separate from the sources so that tests, proxies or platform HTTP
/// stacks can stand in for `reqwest` without touching URL layout logic.
#[async_trait]
pub trait HttpTransport: Send + Sync + fmt::Debug {
    /// Fetches the body at `url`. A missing resource must be reported as
    /// [`parcel_core::FetchErrorKind::NotFound`].
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing client (custom TLS roots, proxies, user agent).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| map_error(url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::not_found(format!("{url} returned 404")));
        }
        if !status.is_success() {
            return Err(FetchError::transport(format!("{url} returned {status}")));
        }

        let body = response.bytes().await.map_err(|e| map_error(url, e))?;
        Ok(body.to_vec())
    }
}

fn map_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::timeout(format!("{url}: {err}"))
    } else {
        FetchError::transport(format!("{url}: {err}"))
    }
}
