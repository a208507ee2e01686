use std::collections::{BTreeMap, BTreeSet};

use cairn_types::ObjectId;

use crate::definition::Bundle;

/// Output backend a bundle is routed to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendSlot {
    /// `<output_directory>/db/bundles`.
    #[default]
    Default,
    /// Directory of a named output group.
    Group(String),
}

/// Runtime state of one bundle while the packer runs.
#[derive(Clone, Debug)]
pub struct ResolvedBundle {
    pub name: String,
    pub source: Bundle,
    /// Root URLs picked by the selectors.
    pub asset_urls: BTreeSet<String>,
    /// Arena indexes of the bundles this one depends on.
    pub dependencies: Vec<usize>,
    /// Objects this bundle owns.
    pub object_ids: BTreeSet<ObjectId>,
    /// Objects owned by any transitive dependency.
    pub dependency_object_ids: BTreeSet<ObjectId>,
    pub index_map: BTreeMap<String, ObjectId>,
    pub dependency_index_map: BTreeMap<String, ObjectId>,
    pub backend: BackendSlot,
}

impl ResolvedBundle {
    pub fn new(source: Bundle) -> Self {
        Self {
            name: source.name.clone(),
            source,
            asset_urls: BTreeSet::new(),
            dependencies: Vec::new(),
            object_ids: BTreeSet::new(),
            dependency_object_ids: BTreeSet::new(),
            index_map: BTreeMap::new(),
            dependency_index_map: BTreeMap::new(),
            backend: BackendSlot::Default,
        }
    }

    pub(crate) fn add_dependency(&mut self, index: usize) {
        if !self.dependencies.contains(&index) {
            self.dependencies.push(index);
        }
    }
}

/// Every resolved bundle plus their dependency order.
#[derive(Clone, Debug)]
pub struct BundleGraph {
    pub(crate) bundles: Vec<ResolvedBundle>,
    pub(crate) by_name: BTreeMap<String, usize>,
    pub(crate) order: Vec<usize>,
}

impl BundleGraph {
    pub fn get(&self, name: &str) -> Option<&ResolvedBundle> {
        self.by_name.get(name).map(|&i| &self.bundles[i])
    }

    /// All bundles in definition order, `default` last.
    pub fn bundles(&self) -> &[ResolvedBundle] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Bundles in dependency order: each after all of its dependencies.
    pub fn sorted(&self) -> impl Iterator<Item = &ResolvedBundle> {
        self.order.iter().map(|&i| &self.bundles[i])
    }

    /// Names of the direct dependencies of a bundle.
    pub fn dependency_names(&self, bundle: &ResolvedBundle) -> Vec<String> {
        bundle
            .dependencies
            .iter()
            .map(|&i| self.bundles[i].name.clone())
            .collect()
    }
}
