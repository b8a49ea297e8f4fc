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

//! The error taxonomy shared by every stage of the bundle lifecycle.

use crate::bundle::{BundleName, ContentHash, ContentVersion, LeaseId};
use thiserror::Error;

/// Errors produced while resolving, loading or releasing bundles.
///
/// The type is `Clone` because a single failed load operation delivers the
/// same error to every caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BundleError {
    /// The manifest for a content version could not be obtained, or no
    /// version has been activated yet.
    #[error("manifest for version '{version}' is unavailable: {reason}")]
    ManifestUnavailable {
        /// The version that was requested.
        version: ContentVersion,
        /// Why it could not be obtained.
        reason: String,
    },

    /// The manifest could be read but its contents are invalid (decode
    /// failure, duplicate entries, dangling dependency names).
    #[error("manifest is corrupt: {0}")]
    ManifestCorrupt(String),

    /// A dependency path revisits a bundle that is still being walked.
    #[error("cyclic dependency detected at bundle '{bundle}'")]
    CyclicDependency {
        /// The bundle at which the cycle closed.
        bundle: BundleName,
    },

    /// The requested bundle is not listed in the active manifest.
    #[error("bundle '{0}' is not listed in the active manifest")]
    UnknownBundle(BundleName),

    /// Fetching a payload failed and the retry budget is exhausted.
    #[error("failed to fetch bundle '{bundle}' after {attempts} attempt(s): {reason}")]
    FetchError {
        /// The bundle being fetched.
        bundle: BundleName,
        /// How many attempts were made.
        attempts: u32,
        /// The last failure reported by the source.
        reason: String,
    },

    /// A downloaded payload does not match the manifest hash. Never retried.
    #[error("content hash mismatch for bundle '{bundle}': expected {expected}, got {actual}")]
    HashMismatch {
        /// The bundle being verified.
        bundle: BundleName,
        /// The hash listed in the manifest.
        expected: ContentHash,
        /// The hash of the bytes actually received.
        actual: ContentHash,
    },

    /// A handle was released more than once.
    #[error("lease {lease} on bundle '{bundle}' was already released")]
    DoubleRelease {
        /// The bundle the handle referred to.
        bundle: BundleName,
        /// The lease that was released twice.
        lease: LeaseId,
    },

    /// Durable bookkeeping (patch history) could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// The manager is shutting down and no longer accepts requests.
    #[error("the bundle manager is shutting down")]
    ShutDown,
}

impl BundleError {
    /// The bundle an error is about, when there is one.
    pub fn bundle(&self) -> Option<&BundleName> {
        match self {
            BundleError::CyclicDependency { bundle }
            | BundleError::FetchError { bundle, .. }
            | BundleError::HashMismatch { bundle, .. }
            | BundleError::DoubleRelease { bundle, .. } => Some(bundle),
            BundleError::UnknownBundle(bundle) => Some(bundle),
            _ => None,
        }
    }
}

/// A specialized `Result` for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;
