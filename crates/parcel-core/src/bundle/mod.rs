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

//! Primitive types describing a bundle and the handles through which loaded
//! bundles are shared.
//!
//! - [`BundleName`]: the stable, manifest-level identifier of a bundle.
//! - [`ContentHash`]: the digest a payload must match before it is trusted.
//! - [`ContentVersion`]: the opaque identifier of a deployed manifest.
//! - [`BundleHandle`]: what callers receive once a bundle and its whole
//!   dependency closure are ready.

mod handle;
mod hash;
mod name;

pub use handle::*;
pub use hash::*;
pub use name::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one concrete payload: a bundle name at a specific content hash.
///
/// Two manifest versions may ship different payloads under the same name, so
/// in-memory bookkeeping is keyed by the pair rather than the name alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleKey {
    /// The bundle name.
    pub name: BundleName,
    /// The content hash the payload was verified against.
    pub hash: ContentHash,
}

impl BundleKey {
    /// Creates a key from its parts.
    pub fn new(name: BundleName, hash: ContentHash) -> Self {
        Self { name, hash }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.hash.short())
    }
}
