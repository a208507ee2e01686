//! Bundle resolver and packer for Cairn.
//!
//! Turns a content index plus a set of named bundle definitions into
//! deployable bundle files. Each bundle owns the objects reachable from its
//! selected root assets that none of its dependencies already own; whatever
//! no bundle selects ends up in the synthesized `default` bundle, which every
//! other bundle depends on.
//!
//! # Architecture
//!
//! - **Definitions** ([`Bundle`], [`AssetSelector`]): what the user declares
//! - **Resolver** ([`BundlePacker::resolve`]): ownership passes over the reference graph
//! - **Backends** ([`BundleBackend`]): `db/bundles` directories bundles are routed to
//! - **Writer/Reader**: zstd-compressed, CRC-checked bundle files with
//!   optional incremental patches

pub mod backend;
pub mod definition;
pub mod error;
pub mod format;
pub mod packer;
pub mod reader;
pub mod resolved;
pub mod sort;
pub mod writer;

pub use backend::BundleBackend;
pub use definition::{AssetSelector, Bundle, PackSession, PathSelector, TagSelector, DEFAULT_BUNDLE_NAME};
pub use error::{BundleError, BundleResult};
pub use format::{BundleDescription, ObjectInfo, BUNDLE_EXTENSION};
pub use packer::BundlePacker;
pub use reader::BundleReader;
pub use resolved::{BackendSlot, BundleGraph, ResolvedBundle};
pub use writer::{BundleContent, BundleWriter, WriteOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet, HashSet};
    use std::path::{Path, PathBuf};

    use cairn_store::{encode_chunk, ChunkReference, ContentIndex, ObjectDatabase};
    use cairn_types::{LogLevel, MemoryLogger, ObjectId};
    use proptest::prelude::*;

    fn add_asset(db: &ObjectDatabase, url: &str, references: &[&str]) -> ObjectId {
        let refs: Vec<ChunkReference> = references
            .iter()
            .map(|r| ChunkReference::new("Asset", *r))
            .collect();
        let data = encode_chunk("Asset", url.as_bytes(), &refs).unwrap();
        let id = db.store().write(&data).unwrap();
        db.index().insert(url, id);
        id
    }

    fn select(urls: &[&str]) -> PathSelector {
        PathSelector::new(urls).unwrap()
    }

    fn resolve(db: &ObjectDatabase, bundles: &[Bundle]) -> BundleResult<BundleGraph> {
        BundlePacker::new().resolve(
            &MemoryLogger::new(),
            &PackSession::default(),
            bundles,
            &**db.index(),
            &**db.store(),
        )
    }

    fn build(
        db: &ObjectDatabase,
        session: &PackSession,
        bundles: &[Bundle],
        output: &Path,
        incremental: bool,
    ) -> BundleResult<Vec<PathBuf>> {
        BundlePacker::new().build(
            &MemoryLogger::new(),
            session,
            bundles,
            db,
            "main",
            output,
            &HashSet::new(),
            incremental,
        )
    }

    fn bundle_dir_listing(output: &Path) -> BTreeMap<String, Vec<u8>> {
        std::fs::read_dir(output.join("db/bundles"))
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (
                    e.file_name().to_string_lossy().into_owned(),
                    std::fs::read(e.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn scenario_reference_stays_with_selecting_bundle() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &["y"]);
        let y = add_asset(&db, "y", &[]);
        let z = add_asset(&db, "z", &[]);

        let graph = resolve(
            &db,
            &[Bundle::new("A").with_selector(select(&["x"])), Bundle::new("B")],
        )
        .unwrap();

        let a = graph.get("A").unwrap();
        let b = graph.get("B").unwrap();
        let default = graph.get(DEFAULT_BUNDLE_NAME).unwrap();

        assert_eq!(a.object_ids, BTreeSet::from([x, y]));
        assert!(b.object_ids.is_empty());
        assert_eq!(default.object_ids, BTreeSet::from([z]));
        assert_eq!(graph.dependency_names(b), vec![DEFAULT_BUNDLE_NAME]);
        assert!(default.dependencies.is_empty());
    }

    #[test]
    fn scenario_missing_dependency_is_configuration_error() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "x", &[]);
        let out = tempfile::tempdir().unwrap();

        let err = build(
            &db,
            &PackSession::default(),
            &[Bundle::new("C").with_dependency("Z")],
            out.path(),
            false,
        )
        .unwrap_err();
        match err {
            BundleError::UnresolvedDependency { dependency, bundle } => {
                assert_eq!(dependency, "Z");
                assert_eq!(bundle, "C");
            }
            other => panic!("expected unresolved dependency, got {other:?}"),
        }
        assert!(!out.path().join("db").exists());
    }

    #[test]
    fn every_bundle_depends_on_default() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "x", &[]);
        let graph = resolve(
            &db,
            &[
                Bundle::new("base"),
                Bundle::new("level").with_dependency("base"),
                Bundle::new("explicit").with_dependency(DEFAULT_BUNDLE_NAME),
            ],
        )
        .unwrap();

        for name in ["base", "level", "explicit"] {
            let deps = graph.dependency_names(graph.get(name).unwrap());
            assert_eq!(deps.iter().filter(|d| *d == DEFAULT_BUNDLE_NAME).count(), 1);
        }
        let order: Vec<&str> = graph.sorted().map(|b| b.name.as_str()).collect();
        assert_eq!(order[0], DEFAULT_BUNDLE_NAME);
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("base") < pos("level"));
    }

    #[test]
    fn dependency_owns_shared_objects() {
        let db = ObjectDatabase::in_memory("main");
        let shared = add_asset(&db, "textures/stone", &[]);
        let level = add_asset(&db, "levels/one", &["textures/stone"]);

        let graph = resolve(
            &db,
            &[
                Bundle::new("level")
                    .with_selector(select(&["levels/*"]))
                    .with_dependency("common"),
                Bundle::new("common").with_selector(select(&["textures/*"])),
            ],
        )
        .unwrap();

        let common = graph.get("common").unwrap();
        let lvl = graph.get("level").unwrap();
        assert_eq!(common.object_ids, BTreeSet::from([shared]));
        assert_eq!(lvl.object_ids, BTreeSet::from([level]));
        assert!(lvl.dependency_object_ids.contains(&shared));
        assert!(lvl.dependency_index_map.contains_key("textures/stone"));
        assert!(!lvl.index_map.contains_key("textures/stone"));
    }

    #[test]
    fn duplicate_and_reserved_names() {
        let db = ObjectDatabase::in_memory("main");
        assert!(matches!(
            resolve(&db, &[Bundle::new("a"), Bundle::new("a")]),
            Err(BundleError::DuplicateBundle(name)) if name == "a"
        ));
        assert!(matches!(
            resolve(&db, &[Bundle::new(DEFAULT_BUNDLE_NAME)]),
            Err(BundleError::ReservedBundleName(_))
        ));
    }

    #[test]
    fn bundle_cycle_is_fatal() {
        let db = ObjectDatabase::in_memory("main");
        let err = resolve(
            &db,
            &[
                Bundle::new("a").with_dependency("b"),
                Bundle::new("b").with_dependency("a"),
            ],
        )
        .unwrap_err();
        match err {
            BundleError::CyclicDependency(name) => assert!(name == "a" || name == "b"),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn missing_referenced_asset_is_integrity_error() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "x", &["ghost"]);
        let err = resolve(&db, &[Bundle::new("A").with_selector(select(&["x"]))]).unwrap_err();
        assert!(matches!(
            err,
            BundleError::MissingAsset { url, bundle } if url == "ghost" && bundle == "A"
        ));
    }

    #[test]
    fn reference_cycles_between_assets_terminate() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &["y"]);
        let y = add_asset(&db, "y", &["x"]);
        let graph = resolve(&db, &[Bundle::new("A").with_selector(select(&["x"]))]).unwrap();
        assert_eq!(graph.get("A").unwrap().object_ids, BTreeSet::from([x, y]));
        assert!(graph.get(DEFAULT_BUNDLE_NAME).unwrap().object_ids.is_empty());
    }

    #[test]
    fn urls_sharing_an_object_are_stored_once() {
        let db = ObjectDatabase::in_memory("main");
        let id = add_asset(&db, "a", &[]);
        db.index().insert("alias", id);
        let graph = resolve(&db, &[]).unwrap();
        let default = graph.get(DEFAULT_BUNDLE_NAME).unwrap();
        assert_eq!(default.object_ids.len(), 1);
        assert_eq!(default.index_map.len(), 2);
    }

    #[test]
    fn build_writes_readable_bundles() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &["y"]);
        let z = add_asset(&db, "z", &[]);
        add_asset(&db, "y", &[]);
        let out = tempfile::tempdir().unwrap();

        let files = build(
            &db,
            &PackSession::default(),
            &[Bundle::new("A").with_selector(select(&["x"]))],
            out.path(),
            false,
        )
        .unwrap();
        assert_eq!(files.len(), 2);

        let a = BundleReader::open(&out.path().join("db/bundles/A.bundle")).unwrap();
        assert_eq!(a.dependencies(), [DEFAULT_BUNDLE_NAME.to_string()]);
        assert_eq!(
            a.read_object(&x).unwrap().unwrap(),
            db.store().read_required(&x).unwrap()
        );

        let default = BundleReader::open(&out.path().join("db/bundles/default.bundle")).unwrap();
        assert!(default.contains(&z));
        assert!(!default.contains(&x));
    }

    #[test]
    fn output_groups_route_bundles() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "dlc/map", &[]);
        add_asset(&db, "extra/map", &[]);
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let session = PackSession::new(root.path()).with_output_group("dlc", "dlc-data");
        let logger = MemoryLogger::new();

        BundlePacker::new()
            .build(
                &logger,
                &session,
                &[
                    Bundle::new("dlc")
                        .with_selector(select(&["dlc/*"]))
                        .with_output_group("dlc"),
                    Bundle::new("extra")
                        .with_selector(select(&["extra/*"]))
                        .with_output_group("unknown"),
                ],
                &db,
                "main",
                &out,
                &HashSet::new(),
                false,
            )
            .unwrap();

        assert!(root.path().join("dlc-data/db/bundles/dlc.bundle").is_file());
        assert!(!out.join("db/bundles/dlc.bundle").exists());
        assert!(out.join("db/bundles/extra.bundle").is_file());
        assert!(logger
            .messages_at_least(LogLevel::Warning)
            .iter()
            .any(|m| m.text.contains("unknown")));
    }

    #[test]
    fn disabled_compression_ids_are_stored_raw() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &[]);
        let out = tempfile::tempdir().unwrap();
        BundlePacker::new()
            .build(
                &MemoryLogger::new(),
                &PackSession::default(),
                &[],
                &db,
                "main",
                out.path(),
                &HashSet::from([x]),
                false,
            )
            .unwrap();

        let reader = BundleReader::open(&out.path().join("db/bundles/default.bundle")).unwrap();
        let (_, info) = reader.description().objects[0];
        assert!(!info.is_compressed);
    }

    fn compressed_flags(
        db: &ObjectDatabase,
        output: &Path,
        disabled: &HashSet<ObjectId>,
        incremental: bool,
    ) -> BTreeMap<ObjectId, bool> {
        BundlePacker::new()
            .build(
                &MemoryLogger::new(),
                &PackSession::default(),
                &[],
                db,
                "main",
                output,
                disabled,
                incremental,
            )
            .unwrap();
        let reader = BundleReader::open(&output.join("db/bundles/default.bundle")).unwrap();
        for (id, _) in &reader.description().objects {
            reader.read_object(id).unwrap();
        }
        reader
            .description()
            .objects
            .iter()
            .map(|(id, info)| (*id, info.is_compressed))
            .collect()
    }

    #[test]
    fn changed_compression_set_rewrites_bundle() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &[]);
        let out = tempfile::tempdir().unwrap();

        assert!(compressed_flags(&db, out.path(), &HashSet::new(), false)[&x]);
        assert!(!compressed_flags(&db, out.path(), &HashSet::from([x]), false)[&x]);
        assert!(compressed_flags(&db, out.path(), &HashSet::new(), false)[&x]);
    }

    #[test]
    fn incremental_patch_is_not_reused_for_stale_encoding() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &[]);
        let y = add_asset(&db, "y", &[]);
        let out = tempfile::tempdir().unwrap();

        let first = compressed_flags(&db, out.path(), &HashSet::new(), true);
        assert!(first[&x] && first[&y]);

        let second = compressed_flags(&db, out.path(), &HashSet::from([x]), true);
        assert!(!second[&x]);
        assert!(second[&y]);
    }

    #[test]
    fn non_incremental_builds_are_idempotent() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "x", &["y"]);
        add_asset(&db, "y", &[]);
        add_asset(&db, "z", &[]);
        let out = tempfile::tempdir().unwrap();
        let bundles = [Bundle::new("A").with_selector(select(&["x"]))];

        let first_files = build(&db, &PackSession::default(), &bundles, out.path(), false).unwrap();
        let first = bundle_dir_listing(out.path());
        let second_files = build(&db, &PackSession::default(), &bundles, out.path(), false).unwrap();
        let second = bundle_dir_listing(out.path());

        assert_eq!(first_files, second_files);
        assert_eq!(first, second);
    }

    #[test]
    fn incremental_build_removes_stale_and_keeps_unchanged() {
        let db = ObjectDatabase::in_memory("main");
        add_asset(&db, "x", &[]);
        add_asset(&db, "w", &[]);
        let out = tempfile::tempdir().unwrap();
        let session = PackSession::default();

        let with_w = [
            Bundle::new("A").with_selector(select(&["x"])),
            Bundle::new("W").with_selector(select(&["w"])),
        ];
        build(&db, &session, &with_w, out.path(), true).unwrap();
        let a_path = out.path().join("db/bundles/A.bundle");
        let a_modified = std::fs::metadata(&a_path).unwrap().modified().unwrap();
        std::fs::write(out.path().join("db/bundles/leftover.tmp"), b"junk").unwrap();

        // Drop bundle W: its assets move to default.
        let files = build(&db, &session, &with_w[..1], out.path(), true).unwrap();
        let listing = bundle_dir_listing(out.path());

        assert!(!listing.contains_key("W.bundle"));
        assert!(!listing.keys().any(|name| name.starts_with("W.")));
        assert!(!listing.contains_key("leftover.tmp"));
        assert_eq!(listing.len(), files.len());
        assert_eq!(
            std::fs::metadata(&a_path).unwrap().modified().unwrap(),
            a_modified
        );
    }

    #[test]
    fn unreadable_default_bundle_is_replaced() {
        let db = ObjectDatabase::in_memory("main");
        let x = add_asset(&db, "x", &[]);
        let out = tempfile::tempdir().unwrap();
        let bundles_dir = out.path().join("db/bundles");
        std::fs::create_dir_all(&bundles_dir).unwrap();
        std::fs::write(bundles_dir.join("default.bundle"), b"garbage").unwrap();

        build(&db, &PackSession::default(), &[], out.path(), false).unwrap();
        let reader = BundleReader::open(&bundles_dir.join("default.bundle")).unwrap();
        assert!(reader.contains(&x));
    }

    fn graph_strategy() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<(Vec<usize>, Vec<usize>)>)> {
        (1usize..8, 1usize..5).prop_flat_map(|(urls, bundles)| {
            (
                prop::collection::vec(prop::collection::vec(0..urls, 0..3), urls),
                prop::collection::vec(
                    (
                        prop::collection::vec(0..urls, 0..3),
                        prop::collection::vec(0..bundles, 0..3),
                    ),
                    bundles,
                ),
            )
        })
    }

    fn closure(db: &ObjectDatabase, roots: &BTreeSet<String>, refs: &[Vec<usize>]) -> BTreeSet<ObjectId> {
        let mut seen = BTreeSet::new();
        let mut pending: Vec<String> = roots.iter().cloned().collect();
        let mut ids = BTreeSet::new();
        while let Some(url) = pending.pop() {
            if !seen.insert(url.clone()) {
                continue;
            }
            ids.insert(db.index().try_get(&url).unwrap());
            let n: usize = url[1..].parse().unwrap();
            pending.extend(refs[n].iter().map(|r| format!("u{r}")));
        }
        ids
    }

    fn with_transitive_deps(graph: &BundleGraph, start: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut pending = vec![start];
        while let Some(i) = pending.pop() {
            if seen.insert(i) {
                pending.extend(graph.bundles()[i].dependencies.iter().copied());
            }
        }
        seen
    }

    proptest! {
        #[test]
        fn every_reachable_object_has_exactly_one_owner((refs, defs) in graph_strategy()) {
            let db = ObjectDatabase::in_memory("main");
            for (i, targets) in refs.iter().enumerate() {
                let names: Vec<String> = targets.iter().map(|t| format!("u{t}")).collect();
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                add_asset(&db, &format!("u{i}"), &names);
            }

            let bundles: Vec<Bundle> = defs
                .iter()
                .enumerate()
                .map(|(i, (roots, deps))| {
                    let mut bundle = Bundle::new(format!("b{i}"));
                    if !roots.is_empty() {
                        let patterns: Vec<String> = roots.iter().map(|r| format!("u{r}")).collect();
                        bundle = bundle.with_selector(PathSelector::new(&patterns).unwrap());
                    }
                    for d in deps.iter().filter(|d| **d < i) {
                        bundle = bundle.with_dependency(format!("b{d}"));
                    }
                    bundle
                })
                .collect();

            let graph = resolve(&db, &bundles).unwrap();

            let mut all_owned = BTreeSet::new();
            for (i, bundle) in graph.bundles().iter().enumerate() {
                all_owned.extend(bundle.object_ids.iter().copied());

                let reachable = closure(&db, &bundle.asset_urls, &refs);
                for id in &reachable {
                    prop_assert!(bundle.object_ids.contains(id) || bundle.dependency_object_ids.contains(id));
                }

                let chain = with_transitive_deps(&graph, i);
                let mut owners: BTreeMap<ObjectId, usize> = BTreeMap::new();
                for j in chain {
                    for id in &graph.bundles()[j].object_ids {
                        *owners.entry(*id).or_default() += 1;
                    }
                }
                prop_assert!(owners.values().all(|count| *count == 1));
            }

            let indexed: BTreeSet<ObjectId> = db.index().snapshot().into_values().collect();
            prop_assert_eq!(all_owned, indexed);
        }
    }
}
