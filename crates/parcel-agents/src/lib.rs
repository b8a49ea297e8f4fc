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

//! # Parcel Agents
//!
//! The agents drive the I/O services on behalf of the application. For now
//! there is one, the [`BundleAgent`](bundle_agent::BundleAgent), which owns
//! the whole bundle lifecycle.

#![warn(missing_docs)]

pub mod bundle_agent;

pub use bundle_agent::{
    BundleAgent, BundleEvent, Diagnostics, LoadOperation, LoadState, LoaderConfig,
    OperationRegistry, OperationSnapshot, Waiter,
};
