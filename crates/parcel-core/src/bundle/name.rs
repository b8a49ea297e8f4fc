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

use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, fmt};

/// The stable name of a bundle as it appears in the manifest (e.g. `"ui/common"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleName(String);

impl BundleName {
    /// Creates a bundle name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BundleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BundleName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BundleName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for BundleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BundleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The opaque identifier of a deployed content version (usually a short
/// commit-style hash produced by the build pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentVersion(String);

impl ContentVersion {
    /// Creates a content version identifier.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first four characters, which is how deployments are
    /// labelled in diagnostics.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(4) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for ContentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentVersion {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContentVersion {
    fn from(value: String) -> Self {
        Self(value)
    }
}
