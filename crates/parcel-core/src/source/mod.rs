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

//! The fetch capability that backs every bundle download.
//!
//! Which concrete source is active (simulated local content, a development
//! server on loopback, or the remote distribution endpoint) is decided once at
//! start-up. Every other component only ever sees a `dyn BundleSource`.

use crate::bundle::{BundleName, ContentVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The operating mode that selects a [`BundleSource`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Content already present on the local machine. Loads skip the on-disk
    /// cache and hash verification for fast iteration.
    #[default]
    Simulated,
    /// A development server reachable over loopback.
    LocalServer,
    /// The remote distribution endpoint.
    Remote,
}

impl SourceMode {
    /// Returns `true` if loads in this mode bypass the cache and verification.
    pub fn bypasses_cache(self) -> bool {
        matches!(self, SourceMode::Simulated)
    }

    /// Returns `true` if failed fetches in this mode are retried with backoff.
    pub fn retries(self) -> bool {
        matches!(self, SourceMode::Remote)
    }

    /// Parses the spelling used in configuration files and the environment.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "simulated" | "simulation" => Some(SourceMode::Simulated),
            "local-server" | "local_server" | "local" => Some(SourceMode::LocalServer),
            "remote" => Some(SourceMode::Remote),
            _ => None,
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceMode::Simulated => "simulated",
            SourceMode::LocalServer => "local-server",
            SourceMode::Remote => "remote",
        })
    }
}

/// The category of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The source does not have the requested item.
    NotFound,
    /// The attempt did not finish within its time limit.
    Timeout,
    /// The connection or the server failed.
    Transport,
    /// Local file access failed.
    Io,
}

/// A single failed fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    /// What went wrong.
    pub kind: FetchErrorKind,
    /// A human-readable description.
    pub message: String,
}

impl FetchError {
    /// Creates a fetch error.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a [`FetchErrorKind::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }

    /// Shorthand for a [`FetchErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    /// Shorthand for a [`FetchErrorKind::Transport`] error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transport, message)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => FetchErrorKind::NotFound,
            _ => FetchErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

/// A capability that returns the raw bytes of manifests and bundles.
///
/// Implementations must not block the calling thread: fetches run on the
/// async runtime and report completion by resolving their future. A single
/// call is one attempt; retries, timeouts and verification are the loader's
/// job, not the source's.
#[async_trait]
pub trait BundleSource: Send + Sync + fmt::Debug {
    /// The mode this source implements.
    fn mode(&self) -> SourceMode;

    /// Fetches the serialized manifest of a content version.
    ///
    /// # Arguments
    ///
    /// * `version`: the deployed content version whose manifest is wanted.
    async fn fetch_manifest(&self, version: &ContentVersion) -> Result<Vec<u8>, FetchError>;

    /// Fetches the payload of one bundle.
    ///
    /// # Arguments
    ///
    /// * `name`: the bundle to fetch.
    /// * `version`: the content version the bundle belongs to.
    async fn fetch(&self, name: &BundleName, version: &ContentVersion)
        -> Result<Vec<u8>, FetchError>;
}
