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

//! # Parcel IO
//!
//! Everything that touches bytes outside the process: decoding manifests,
//! the quota-bounded on-disk bundle cache, the durable patch history file,
//! and the three content sources the loader can fetch from.

#![warn(missing_docs)]

pub mod cache;
pub mod manifest_store;
pub mod patch_store;
pub mod source;

pub use cache::{BundleCache, CacheEntry};
pub use manifest_store::ManifestStore;
pub use patch_store::PatchStore;
pub use source::{
    HttpTransport, LocalServerSource, RemoteSource, ReqwestTransport, SimulatedSource,
    SourceConfig, SourceStrategy,
};
