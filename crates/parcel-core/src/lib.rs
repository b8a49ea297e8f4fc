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

//! # Parcel Core
//!
//! Foundational crate containing the bundle primitives, the manifest model and
//! the interface contracts shared by every other Parcel crate.
//!
//! Nothing in here performs I/O. Loading manifests, caching payloads on disk and
//! talking to a distribution server all live in higher-level crates that build
//! on these types.

#![warn(missing_docs)]

pub mod bundle;
pub mod error;
pub mod graph;
pub mod manifest;
pub mod patch;
pub mod resolver;
pub mod source;

pub use bundle::{BundleHandle, BundleKey, BundleLease, BundleName, ContentHash, ContentVersion, LeaseId};
pub use error::{BundleError, BundleResult};
pub use manifest::{Manifest, ManifestDocument, ManifestEntry, ManifestRecord};
pub use patch::{PatchHistory, PatchRecord};
pub use source::{BundleSource, FetchError, FetchErrorKind, SourceMode};
