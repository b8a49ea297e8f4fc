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

//! The quota-bounded, persistent bundle cache.
//!
//! Each entry is a payload file plus a JSON sidecar ([`CacheEntry`]) naming
//! the hash the payload was verified against. The in-memory index is rebuilt
//! from the sidecars when the cache is opened; anything that does not check
//! out (missing payload, size mismatch, unreadable sidecar, leftover temp
//! file) is deleted.
//!
//! An entry is only served when its committed hash equals the hash the caller
//! expects. A stale entry is treated exactly like a miss.
//!
//! A commit drops the previous entry and its sidecar before the payload file
//! is overwritten, so no sidecar or index entry ever describes bytes it was
//! not committed with. File I/O runs outside the index lock.

mod entry;

pub use entry::CacheEntry;
pub(crate) use entry::write_atomic;

use entry::{payload_path, sidecar_path, PAYLOAD_EXTENSION, SIDECAR_EXTENSION, TEMP_EXTENSION};
use parcel_core::{BundleName, ContentHash};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
struct Indexed {
    entry: CacheEntry,
    last_used: u64,
    // Clock value at commit; a read is only served if it is unchanged.
    generation: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<BundleName, Indexed>,
    clock: u64,
}

impl CacheIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn occupied(&self) -> u64 {
        self.entries.values().map(|i| i.entry.size).sum()
    }
}

/// Persistent cache of verified bundle payloads.
#[derive(Debug)]
pub struct BundleCache {
    directory: PathBuf,
    quota_bytes: u64,
    index: Mutex<CacheIndex>,
    commits: Mutex<()>,
}

impl BundleCache {
    /// Opens (creating if needed) the cache rooted at `directory`.
    pub fn open(directory: impl Into<PathBuf>, quota_bytes: u64) -> io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let mut recovered = Vec::new();
        let mut payloads = Vec::new();
        for dir_entry in fs::read_dir(&directory)? {
            let path = dir_entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(SIDECAR_EXTENSION) => match Self::recover(&directory, &path) {
                    Some(entry) => recovered.push(entry),
                    None => remove_quietly(&path),
                },
                Some(PAYLOAD_EXTENSION) => payloads.push(path),
                Some(TEMP_EXTENSION) => remove_quietly(&path),
                _ => {}
            }
        }

        // Oldest commit gets the oldest clock value.
        recovered.sort_by_key(|e| e.committed_at);
        let mut index = CacheIndex::default();
        for entry in recovered {
            let last_used = index.tick();
            index.entries.insert(
                entry.name.clone(),
                Indexed {
                    entry,
                    last_used,
                    generation: last_used,
                },
            );
        }

        for payload in payloads {
            let owned = index
                .entries
                .keys()
                .any(|name| payload_path(&directory, name) == payload);
            if !owned {
                log::debug!("Removing orphaned cache payload {}", payload.display());
                remove_quietly(&payload);
            }
        }

        log::info!(
            "Opened bundle cache at {} with {} entr(ies), {} / {} bytes",
            directory.display(),
            index.entries.len(),
            index.occupied(),
            quota_bytes
        );

        Ok(Self {
            directory,
            quota_bytes,
            index: Mutex::new(index),
            commits: Mutex::new(()),
        })
    }

    fn recover(directory: &Path, sidecar: &Path) -> Option<CacheEntry> {
        let raw = fs::read(sidecar).ok()?;
        let entry: CacheEntry = serde_json::from_slice(&raw).ok()?;
        if sidecar_path(directory, &entry.name) != sidecar {
            return None;
        }
        let payload = payload_path(directory, &entry.name);
        match fs::metadata(&payload) {
            Ok(meta) if meta.len() == entry.size => Some(entry),
            _ => {
                log::debug!("Dropping cache entry '{}': payload missing or resized", entry.name);
                remove_quietly(&payload);
                None
            }
        }
    }

    /// The directory the cache lives in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The configured size quota in bytes.
    pub fn quota(&self) -> u64 {
        self.quota_bytes
    }

    /// Returns the cached payload of `name` if it was committed under
    /// `expected`. A stale or unreadable entry is reported as a miss, as is
    /// an entry replaced while its payload was being read.
    pub fn get(&self, name: &BundleName, expected: &ContentHash) -> Option<Vec<u8>> {
        let (size, generation) = match self.index.lock().entries.get(name) {
            Some(indexed) if &indexed.entry.hash == expected => {
                (indexed.entry.size, indexed.generation)
            }
            Some(indexed) => {
                log::debug!(
                    "Cache entry '{}' is stale ({} != {})",
                    name,
                    indexed.entry.hash.short(),
                    expected.short()
                );
                return None;
            }
            None => return None,
        };

        let read = fs::read(payload_path(&self.directory, name));

        let mut index = self.index.lock();
        if !index
            .entries
            .get(name)
            .is_some_and(|indexed| indexed.generation == generation)
        {
            log::debug!("Cache entry '{}' was replaced during the read", name);
            return None;
        }
        match read {
            Ok(bytes) if bytes.len() as u64 == size => {
                let now = index.tick();
                if let Some(indexed) = index.entries.get_mut(name) {
                    indexed.last_used = now;
                }
                Some(bytes)
            }
            _ => {
                log::warn!("Cache entry '{}' is unreadable; dropping it", name);
                index.entries.remove(name);
                self.remove_files(name);
                None
            }
        }
    }

    /// Returns `true` if a readable entry for `name` was committed under `hash`.
    pub fn contains_valid(&self, name: &BundleName, hash: &ContentHash) -> bool {
        self.index
            .lock()
            .entries
            .get(name)
            .is_some_and(|i| &i.entry.hash == hash)
    }

    /// Commits verified bytes, replacing any previous entry for `name`.
    ///
    /// The previous entry is gone as soon as this is called: if the commit
    /// fails, `name` is simply not cached.
    pub fn put(&self, name: &BundleName, hash: &ContentHash, bytes: &[u8]) -> io::Result<()> {
        let entry = CacheEntry {
            name: name.clone(),
            hash: hash.clone(),
            size: bytes.len() as u64,
            committed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        };
        let sidecar = serde_json::to_vec_pretty(&entry).map_err(io::Error::other)?;

        let _commit = self.commits.lock();
        let sidecar_file = sidecar_path(&self.directory, name);
        let payload_file = payload_path(&self.directory, name);

        self.index.lock().entries.remove(name);
        remove_if_present(&sidecar_file)?;

        // The payload lands before its sidecar: a sidecar always describes a
        // complete file.
        let written = write_atomic(&payload_file, bytes)
            .and_then(|()| write_atomic(&sidecar_file, &sidecar));
        if let Err(err) = written {
            remove_quietly(&sidecar_file);
            remove_quietly(&payload_file);
            return Err(err);
        }

        let mut index = self.index.lock();
        let last_used = index.tick();
        index.entries.insert(
            name.clone(),
            Indexed {
                entry,
                last_used,
                generation: last_used,
            },
        );
        log::debug!("Cached '{}' ({} bytes)", name, bytes.len());
        Ok(())
    }

    /// Removes the entry for `name`. Returns `false` if there was none.
    pub fn evict(&self, name: &BundleName) -> bool {
        let mut index = self.index.lock();
        let removed = index.entries.remove(name).is_some();
        if removed {
            self.remove_files(name);
            log::debug!("Evicted '{}' from the bundle cache", name);
        }
        removed
    }

    /// Total bytes held by committed entries.
    pub fn space_occupied(&self) -> u64 {
        self.index.lock().occupied()
    }

    /// The number of committed entries.
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// Returns `true` if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts least-recently-used entries until the cache fits its quota.
    ///
    /// Entries for which `in_use` returns `true` are never evicted, nor is
    /// `keep` (typically the entry that was just committed). If the quota
    /// cannot be met without touching those, the cache stays over quota.
    /// Returns the names that were evicted, in eviction order.
    pub fn trim_to_quota(
        &self,
        in_use: impl Fn(&BundleName) -> bool,
        keep: Option<&BundleName>,
    ) -> Vec<BundleName> {
        let mut evicted = Vec::new();
        let mut index = self.index.lock();
        while index.occupied() > self.quota_bytes {
            let victim = index
                .entries
                .iter()
                .filter(|(name, _)| Some(*name) != keep && !in_use(*name))
                .min_by_key(|(_, indexed)| indexed.last_used)
                .map(|(name, _)| name.clone());
            let Some(victim) = victim else {
                log::warn!(
                    "Bundle cache is over quota ({} / {} bytes) but every entry is in use",
                    index.occupied(),
                    self.quota_bytes
                );
                break;
            };
            index.entries.remove(&victim);
            self.remove_files(&victim);
            log::debug!("Evicted '{}' to stay under quota", victim);
            evicted.push(victim);
        }
        evicted
    }

    /// Every committed entry, sorted by name.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<_> = self
            .index
            .lock()
            .entries
            .values()
            .map(|i| i.entry.clone())
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut index = self.index.lock();
        for name in index.entries.keys() {
            self.remove_files(name);
        }
        index.entries.clear();
    }

    fn remove_files(&self, name: &BundleName) {
        remove_quietly(&sidecar_path(&self.directory, name));
        remove_quietly(&payload_path(&self.directory, name));
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn hash(bytes: &[u8]) -> ContentHash {
        ContentHash::of(bytes)
    }

    #[test]
    fn put_then_get_with_matching_hash() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        let name = BundleName::from("ui/atlas");

        cache.put(&name, &hash(b"atlas"), b"atlas").unwrap();
        assert_eq!(cache.get(&name, &hash(b"atlas")).unwrap(), b"atlas");
        assert_eq!(cache.space_occupied(), 5);
        assert!(cache.contains_valid(&name, &hash(b"atlas")));
    }

    #[test]
    fn stale_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        let name = BundleName::from("a");

        cache.put(&name, &hash(b"old"), b"old").unwrap();
        assert!(cache.get(&name, &hash(b"new")).is_none());
        assert!(!cache.contains_valid(&name, &hash(b"new")));
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let cache = BundleCache::open(dir.path(), 1024).unwrap();
            cache.put(&"a".into(), &hash(b"aaa"), b"aaa").unwrap();
            cache.put(&"b".into(), &hash(b"bb"), b"bb").unwrap();
        }
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.space_occupied(), 5);
        assert_eq!(cache.get(&"a".into(), &hash(b"aaa")).unwrap(), b"aaa");
    }

    #[test]
    fn failed_commit_never_serves_the_previous_hash() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        let name = BundleName::from("a");
        cache.put(&name, &hash(b"AAAA"), b"AAAA").unwrap();

        // A directory where the sidecar's temp file should go makes the
        // sidecar write fail after the payload was replaced.
        let blocker = entry::temp_path(&sidecar_path(dir.path(), &name));
        fs::create_dir(&blocker).unwrap();
        assert!(cache.put(&name, &hash(b"BBBB"), b"BBBB").is_err());

        assert!(cache.get(&name, &hash(b"AAAA")).is_none());
        assert!(cache.get(&name, &hash(b"BBBB")).is_none());
        assert!(!cache.contains_valid(&name, &hash(b"AAAA")));
        assert_eq!(cache.space_occupied(), 0);

        fs::remove_dir(&blocker).unwrap();
        drop(cache);
        let reopened = BundleCache::open(dir.path(), 1024).unwrap();
        assert!(reopened.is_empty());
        assert!(reopened.get(&name, &hash(b"AAAA")).is_none());
    }

    #[test]
    fn recommit_replaces_the_entry() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        let name = BundleName::from("a");
        cache.put(&name, &hash(b"v1"), b"v1").unwrap();
        cache.put(&name, &hash(b"v2!"), b"v2!").unwrap();

        assert!(cache.get(&name, &hash(b"v1")).is_none());
        assert_eq!(cache.get(&name, &hash(b"v2!")).unwrap(), b"v2!");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.space_occupied(), 3);
    }

    #[test]
    fn truncated_payload_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        {
            let cache = BundleCache::open(dir.path(), 1024).unwrap();
            cache.put(&"a".into(), &hash(b"abcdef"), b"abcdef").unwrap();
        }
        fs::write(payload_path(dir.path(), &"a".into()), b"abc").unwrap();
        fs::write(dir.path().join("leftover.bundle.tmp"), b"x").unwrap();

        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        assert!(cache.is_empty());
        assert!(!dir.path().join("leftover.bundle.tmp").exists());
    }

    #[test]
    fn trim_evicts_least_recently_used_first() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 10).unwrap();
        for name in ["a", "b", "c"] {
            cache.put(&name.into(), &hash(b"xxxx"), b"xxxx").unwrap();
        }
        // Touch "a" so that "b" is now the coldest.
        cache.get(&"a".into(), &hash(b"xxxx")).unwrap();

        let evicted = cache.trim_to_quota(|_| false, None);
        assert_eq!(evicted, vec![BundleName::from("b")]);
        assert!(cache.space_occupied() <= 10);
    }

    #[test]
    fn trim_never_evicts_in_use_or_kept_entries() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 4).unwrap();
        for name in ["a", "b", "c"] {
            cache.put(&name.into(), &hash(b"xxxx"), b"xxxx").unwrap();
        }
        let c = BundleName::from("c");
        let evicted = cache.trim_to_quota(|name| name.as_str() == "a", Some(&c));
        assert_eq!(evicted, vec![BundleName::from("b")]);
        assert!(cache.contains_valid(&"a".into(), &hash(b"xxxx")));
        assert!(cache.contains_valid(&c, &hash(b"xxxx")));
        assert_eq!(cache.space_occupied(), 8);
    }

    #[test]
    fn evict_and_clear_remove_files() {
        let dir = tempdir().unwrap();
        let cache = BundleCache::open(dir.path(), 1024).unwrap();
        cache.put(&"a".into(), &hash(b"a"), b"a").unwrap();
        cache.put(&"b".into(), &hash(b"b"), b"b").unwrap();

        assert!(cache.evict(&"a".into()));
        assert!(!cache.evict(&"a".into()));
        assert!(!payload_path(dir.path(), &"a".into()).exists());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
