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

//! Computes the dependency closure of a bundle and a safe order to load it in.

use crate::bundle::BundleName;
use crate::error::{BundleError, BundleResult};
use crate::graph::{depth_first_post_order, WalkError};
use crate::manifest::Manifest;

/// Resolves the load order for `root` against `manifest`.
///
/// The result lists every bundle in the transitive closure of `root` exactly
/// once, each dependency before the bundles that need it, with `root` last.
/// Siblings keep the order in which the manifest lists them, so the same
/// manifest always yields the same order.
///
/// # Errors
///
/// * [`BundleError::UnknownBundle`] if `root` (or, for a manifest that skipped
///   validation, any dependency) has no entry.
/// * [`BundleError::CyclicDependency`] if the walk revisits a bundle still on
///   its current path.
pub fn resolve(root: &BundleName, manifest: &Manifest) -> BundleResult<Vec<BundleName>> {
    if !manifest.contains(root) {
        return Err(BundleError::UnknownBundle(root.clone()));
    }

    let order = depth_first_post_order(std::iter::once(root.clone()), |name: &BundleName| {
        manifest.dependencies(name).map(|deps| deps.to_vec())
    })
    .map_err(|err| match err {
        WalkError::Cycle(bundle) => BundleError::CyclicDependency { bundle },
        WalkError::Missing(bundle) => BundleError::UnknownBundle(bundle),
    })?;

    log::trace!("Resolved '{}' to load order {:?}", root, order);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::ContentHash;
    use crate::manifest::ManifestRecord;

    fn manifest(rows: &[(&str, &[&str])]) -> Manifest {
        Manifest::from_records(
            "v1".into(),
            rows.iter().map(|(name, deps)| ManifestRecord {
                name: (*name).into(),
                hash: ContentHash::of(name.as_bytes()),
                dependencies: deps.iter().map(|d| BundleName::from(*d)).collect(),
            }),
        )
        .unwrap()
    }

    fn names(order: &[BundleName]) -> Vec<&str> {
        order.iter().map(BundleName::as_str).collect()
    }

    #[test]
    fn chain_resolves_dependencies_first() {
        let m = manifest(&[("A", &[]), ("B", &["A"]), ("C", &["B"])]);
        assert_eq!(names(&resolve(&"C".into(), &m).unwrap()), ["A", "B", "C"]);
    }

    #[test]
    fn leaf_resolves_to_itself() {
        let m = manifest(&[("A", &[]), ("B", &["A"])]);
        assert_eq!(names(&resolve(&"A".into(), &m).unwrap()), ["A"]);
    }

    #[test]
    fn diamond_collapses_shared_dependency() {
        let m = manifest(&[
            ("core", &[]),
            ("fonts", &["core"]),
            ("icons", &["core"]),
            ("hud", &["fonts", "icons"]),
        ]);
        assert_eq!(
            names(&resolve(&"hud".into(), &m).unwrap()),
            ["core", "fonts", "icons", "hud"]
        );
    }

    #[test]
    fn order_is_stable_across_runs() {
        let m = manifest(&[("x", &[]), ("y", &[]), ("z", &["y", "x"])]);
        let first = resolve(&"z".into(), &m).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&"z".into(), &m).unwrap(), first);
        }
        assert_eq!(names(&first), ["y", "x", "z"]);
    }

    #[test]
    fn cycle_is_reported_instead_of_looping() {
        let records = [("a", "b"), ("b", "c"), ("c", "a")]
            .iter()
            .map(|(name, dep)| ManifestRecord {
                name: (*name).into(),
                hash: ContentHash::of(name.as_bytes()),
                dependencies: vec![(*dep).into()],
            })
            .collect();
        let m = Manifest::unchecked("v1".into(), records);
        for root in ["a", "b", "c"] {
            assert!(matches!(
                resolve(&root.into(), &m),
                Err(BundleError::CyclicDependency { .. })
            ));
        }
    }

    #[test]
    fn dangling_dependency_is_unknown() {
        let m = Manifest::unchecked(
            "v1".into(),
            vec![ManifestRecord {
                name: "a".into(),
                hash: ContentHash::of(b"a"),
                dependencies: vec!["ghost".into()],
            }],
        );
        assert_eq!(
            resolve(&"a".into(), &m),
            Err(BundleError::UnknownBundle("ghost".into()))
        );
    }

    #[test]
    fn unknown_root_is_reported() {
        let m = manifest(&[("A", &[])]);
        assert_eq!(
            resolve(&"nope".into(), &m),
            Err(BundleError::UnknownBundle("nope".into()))
        );
    }
}
