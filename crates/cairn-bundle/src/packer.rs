//! Assigns content objects to bundles and writes the bundle files.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use cairn_store::{read_references, ContentIndex, ObjectDatabase, ObjectStore};
use cairn_types::{Logger, ObjectId};
use tracing::{debug, info};

use crate::backend::BundleBackend;
use crate::definition::{Bundle, PackSession, DEFAULT_BUNDLE_NAME};
use crate::error::{BundleError, BundleResult};
use crate::format::parse_file_name;
use crate::reader::BundleReader;
use crate::resolved::{BackendSlot, BundleGraph, ResolvedBundle};
use crate::sort::topological_sort;
use crate::writer::{BundleContent, BundleWriter};

/// URLs referenced by each object, decoded once per packer.
#[derive(Debug, Default)]
struct ReferenceCache {
    by_object: HashMap<ObjectId, Vec<String>>,
}

impl ReferenceCache {
    fn references(&mut self, store: &dyn ObjectStore, id: &ObjectId) -> BundleResult<Vec<String>> {
        if let Some(urls) = self.by_object.get(id) {
            return Ok(urls.clone());
        }
        let data = store.read_required(id)?;
        let urls: Vec<String> = read_references(&data)?
            .into_iter()
            .map(|r| r.location)
            .collect();
        self.by_object.insert(*id, urls.clone());
        Ok(urls)
    }
}

/// Groups content objects into bundles.
///
/// Every object reachable from a bundle's roots is owned by exactly one
/// bundle along that bundle's dependency chain: bundles are processed in
/// dependency order and the first claimant wins.
#[derive(Debug, Default)]
pub struct BundlePacker {
    references: ReferenceCache,
}

impl BundlePacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve bundle definitions against an index and write bundle files.
    ///
    /// Returns every bundle file written or kept up to date. Configuration,
    /// integrity and cycle errors are raised before the output directory is
    /// touched.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        logger: &dyn Logger,
        session: &PackSession,
        bundle_definitions: &[Bundle],
        database: &ObjectDatabase,
        index_name: &str,
        output_directory: &Path,
        disabled_compression_ids: &HashSet<ObjectId>,
        incremental: bool,
    ) -> BundleResult<Vec<PathBuf>> {
        let index = database.content_index(index_name)?;
        let store: &dyn ObjectStore = &**database.store();

        logger.info("Generate bundles: Scan assets and their dependencies...");
        let mut graph = self.resolve(logger, session, bundle_definitions, &*index, store)?;

        logger.info("Generate bundles: Compress and save bundles to disk...");
        let default_backend = BundleBackend::open(output_directory)?;
        Self::discard_invalid_default(logger, &default_backend)?;

        let mut backends: BTreeMap<BackendSlot, BundleBackend> = BTreeMap::new();
        backends.insert(BackendSlot::Default, default_backend);
        for (group, dir) in &session.output_group_directories {
            let backend = BundleBackend::open(&session.root_directory.join(dir))?;
            backends.insert(BackendSlot::Group(group.clone()), backend);
        }

        // Pass 7: route each bundle to a backend.
        for bundle in &mut graph.bundles {
            bundle.backend = match &bundle.source.output_group {
                None => BackendSlot::Default,
                Some(group) if backends.contains_key(&BackendSlot::Group(group.clone())) => {
                    BackendSlot::Group(group.clone())
                }
                Some(group) => {
                    logger.warning(&format!(
                        "Generate bundles: Could not find output group {group} for bundle {}, using the output directory",
                        bundle.name
                    ));
                    BackendSlot::Default
                }
            };
        }

        for (slot, backend) in &backends {
            Self::clean_unknown_bundles(backend, slot, &graph)?;
        }

        // Pass 8: write bundle files in dependency order.
        let mut files = Vec::new();
        for bundle in graph.sorted() {
            let backend = &backends[&bundle.backend];
            let dependencies = graph.dependency_names(bundle);
            let writer = BundleWriter::new(backend, store, disabled_compression_ids);
            let outcome = writer.write(
                &BundleContent {
                    name: &bundle.name,
                    object_ids: &bundle.object_ids,
                    index_map: &bundle.index_map,
                    dependencies: &dependencies,
                },
                incremental,
            )?;
            files.extend(outcome.files().cloned());
        }

        info!(bundles = graph.len(), files = files.len(), "bundles generated");
        Ok(files)
    }

    /// Run the resolution passes without writing anything.
    pub fn resolve(
        &mut self,
        logger: &dyn Logger,
        session: &PackSession,
        bundle_definitions: &[Bundle],
        index: &dyn ContentIndex,
        store: &dyn ObjectStore,
    ) -> BundleResult<BundleGraph> {
        // Pass 1: one resolved bundle per definition.
        let mut bundles = Vec::with_capacity(bundle_definitions.len() + 1);
        let mut by_name = BTreeMap::new();
        for definition in bundle_definitions {
            if definition.name == DEFAULT_BUNDLE_NAME {
                return Err(BundleError::ReservedBundleName(definition.name.clone()));
            }
            if by_name.insert(definition.name.clone(), bundles.len()).is_some() {
                return Err(BundleError::DuplicateBundle(definition.name.clone()));
            }
            bundles.push(ResolvedBundle::new(definition.clone()));
        }

        // Pass 2: root selection and claim propagation.
        let mut claimed: HashSet<String> = HashSet::new();
        for bundle in &mut bundles {
            for selector in &bundle.source.selectors {
                bundle.asset_urls.extend(selector.select(session, index)?);
            }
            for url in &bundle.asset_urls {
                self.collect_references(index, store, &bundle.name, &mut claimed, url)?;
            }
            debug!(bundle = %bundle.name, roots = bundle.asset_urls.len(), "bundle roots selected");
        }

        // Pass 3: the default bundle takes everything nobody claimed.
        let mut default_bundle = ResolvedBundle::new(Bundle::new(DEFAULT_BUNDLE_NAME));
        default_bundle.asset_urls = index
            .snapshot()
            .into_keys()
            .filter(|url| !claimed.contains(url))
            .collect();
        let default_index = bundles.len();
        by_name.insert(DEFAULT_BUNDLE_NAME.to_string(), default_index);
        bundles.push(default_bundle);

        // Pass 4: dependency wiring.
        for i in 0..bundles.len() {
            if i != default_index {
                bundles[i].add_dependency(default_index);
            }
            for dependency in bundles[i].source.dependencies.clone() {
                let &target = by_name.get(&dependency).ok_or_else(|| {
                    BundleError::UnresolvedDependency {
                        dependency: dependency.clone(),
                        bundle: bundles[i].name.clone(),
                    }
                })?;
                bundles[i].add_dependency(target);
            }
        }

        logger.info("Generate bundles: Assign assets to bundles...");

        // Pass 5: build order.
        let order = topological_sort(&bundles)?;

        // Pass 6: ownership, in build order.
        for &i in &order {
            let mut dependency_object_ids = BTreeSet::new();
            let mut dependency_index_map = BTreeMap::new();
            for &dep in &bundles[i].dependencies {
                let dep = &bundles[dep];
                dependency_object_ids.extend(dep.dependency_object_ids.iter().copied());
                dependency_object_ids.extend(dep.object_ids.iter().copied());
                for (url, id) in dep.dependency_index_map.iter().chain(dep.index_map.iter()) {
                    dependency_index_map.entry(url.clone()).or_insert(*id);
                }
            }

            let bundle = &mut bundles[i];
            bundle.dependency_object_ids = dependency_object_ids;
            bundle.dependency_index_map = dependency_index_map;
            let roots: Vec<String> = bundle.asset_urls.iter().cloned().collect();
            for url in roots {
                self.collect_bundle(index, store, bundle, url)?;
            }
            debug!(
                bundle = %bundle.name,
                objects = bundle.object_ids.len(),
                assets = bundle.index_map.len(),
                "bundle contents assigned"
            );
        }

        Ok(BundleGraph {
            bundles,
            by_name,
            order,
        })
    }

    fn collect_references(
        &mut self,
        index: &dyn ContentIndex,
        store: &dyn ObjectStore,
        bundle: &str,
        claimed: &mut HashSet<String>,
        root: &str,
    ) -> BundleResult<()> {
        let mut pending = vec![root.to_string()];
        while let Some(url) = pending.pop() {
            if claimed.contains(&url) {
                continue;
            }
            let id = index.try_get(&url).ok_or_else(|| BundleError::MissingAsset {
                url: url.clone(),
                bundle: bundle.to_string(),
            })?;
            claimed.insert(url);
            let references = self.references.references(store, &id)?;
            pending.extend(references.into_iter().rev());
        }
        Ok(())
    }

    fn collect_bundle(
        &mut self,
        index: &dyn ContentIndex,
        store: &dyn ObjectStore,
        bundle: &mut ResolvedBundle,
        root: String,
    ) -> BundleResult<()> {
        let mut pending = vec![root];
        while let Some(url) = pending.pop() {
            if bundle.dependency_index_map.contains_key(&url) || bundle.index_map.contains_key(&url) {
                continue;
            }
            let id = index.try_get(&url).ok_or_else(|| BundleError::MissingAsset {
                url: url.clone(),
                bundle: bundle.name.clone(),
            })?;
            bundle.index_map.insert(url, id);

            // Already owned here or by a dependency: its references are too.
            if bundle.dependency_object_ids.contains(&id) || !bundle.object_ids.insert(id) {
                continue;
            }
            let references = self.references.references(store, &id)?;
            pending.extend(references.into_iter().rev());
        }
        Ok(())
    }

    /// Drop a previous `default` bundle that can no longer be read.
    fn discard_invalid_default(logger: &dyn Logger, backend: &BundleBackend) -> BundleResult<()> {
        let path = backend.bundle_path(DEFAULT_BUNDLE_NAME);
        if path.is_file() && BundleReader::open(&path).is_err() {
            logger.info("Generate bundles: Previous 'default' bundle is invalid, deleting it...");
            backend.delete_bundles(|p| {
                file_bundle_name(p).is_some_and(|name| name == DEFAULT_BUNDLE_NAME)
            })?;
        }
        Ok(())
    }

    /// Delete files that are not bundles, or whose bundle is not routed here.
    fn clean_unknown_bundles(
        backend: &BundleBackend,
        slot: &BackendSlot,
        graph: &BundleGraph,
    ) -> BundleResult<()> {
        let deleted = backend.delete_bundles(|path| match file_bundle_name(path) {
            None => true,
            Some(name) => graph.get(&name).map_or(true, |b| b.backend != *slot),
        })?;
        if !deleted.is_empty() {
            debug!(directory = %backend.directory().display(), deleted = deleted.len(), "stale bundle files removed");
        }
        Ok(())
    }
}

fn file_bundle_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_file_name)
        .map(|(name, _)| name)
}
