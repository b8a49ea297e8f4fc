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

//! # Parcel Data
//!
//! In-memory state owned by the bundle manager at runtime: which bundles are
//! resident and how many handles refer to each, plus the bounded log of
//! terminal failures surfaced to tooling.

#![warn(missing_docs)]

pub mod error_log;
pub mod registry;

pub use error_log::{ErrorLog, ErrorLogEntry};
pub use registry::{LoadedBundleInfo, ReleaseOutcome, ResidencyState, RuntimeRegistry, UnloadPolicy};
