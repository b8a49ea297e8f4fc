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

//! Notifications emitted while bundles load.

use parcel_core::{BundleError, BundleKey};

/// A loader event, sent to the optional channel attached with
/// [`BundleAgent::with_event_sender`](super::BundleAgent::with_event_sender).
#[derive(Debug, Clone, PartialEq)]
pub enum BundleEvent {
    /// A load operation was created for a bundle.
    Started {
        /// The payload being loaded.
        key: BundleKey,
    },
    /// A load operation reached `Ready`.
    Completed {
        /// The payload that was loaded.
        key: BundleKey,
        /// Whether the bytes came from the on-disk cache.
        from_cache: bool,
    },
    /// A load operation reached `Failed`.
    Failed {
        /// The payload that failed.
        key: BundleKey,
        /// Why it failed.
        error: BundleError,
    },
}
