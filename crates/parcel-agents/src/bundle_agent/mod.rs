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

//! Acts as the agent for the bundle subsystem.
//!
//! The [`BundleAgent`] is the public-facing API for requesting and releasing
//! bundles, switching content versions and inspecting the loader. The actual
//! per-bundle work runs in [`LoadOperation`]s, one per in-flight bundle,
//! tracked by the [`OperationRegistry`] so that concurrent requests for the
//! same payload share a single fetch.

pub mod agent;
pub mod config;
pub mod diagnostics;
pub mod events;
mod loader;
pub mod operation;
pub mod operations;

pub use agent::BundleAgent;
pub use config::LoaderConfig;
pub use diagnostics::Diagnostics;
pub use events::BundleEvent;
pub use operation::{LoadOperation, LoadState, OperationSnapshot, Waiter};
pub use operations::OperationRegistry;
