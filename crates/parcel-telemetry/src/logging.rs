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

//! Logger installation.

/// Installs `env_logger` as the `log` backend.
///
/// `RUST_LOG` wins over `default_filter` when set. Calling this more than once
/// (or after another logger was installed) is harmless.
pub fn init(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    let installed = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
    match installed {
        Ok(()) => log::info!("Logging initialized (default filter '{default_filter}')."),
        Err(_) => log::debug!("A logger was already installed; keeping it."),
    }
}
