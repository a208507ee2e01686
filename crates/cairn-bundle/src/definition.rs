//! User-facing bundle definitions and asset selectors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use cairn_store::ContentIndex;

use crate::error::{BundleError, BundleResult};

/// Name of the bundle synthesized for every asset no other bundle claims.
pub const DEFAULT_BUNDLE_NAME: &str = "default";

/// Package-level context selectors and backends are evaluated against.
#[derive(Clone, Debug, Default)]
pub struct PackSession {
    /// Root directory of the package; output group paths are relative to it.
    pub root_directory: PathBuf,
    /// Output group name to directory.
    pub output_group_directories: BTreeMap<String, PathBuf>,
    /// Tags attached to asset URLs.
    pub asset_tags: BTreeMap<String, BTreeSet<String>>,
}

impl PackSession {
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            ..Self::default()
        }
    }

    pub fn with_output_group(mut self, group: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.output_group_directories.insert(group.into(), dir.into());
        self
    }

    pub fn tag_asset(&mut self, url: impl Into<String>, tag: impl Into<String>) {
        self.asset_tags.entry(url.into()).or_default().insert(tag.into());
    }
}

/// Picks the root asset URLs of a bundle.
pub trait AssetSelector: fmt::Debug + Send + Sync {
    fn select(&self, session: &PackSession, index: &dyn ContentIndex) -> BundleResult<Vec<String>>;
}

/// Selects index URLs matching any of a set of glob patterns.
#[derive(Clone, Debug)]
pub struct PathSelector {
    patterns: Vec<glob::Pattern>,
}

impl PathSelector {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> BundleResult<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p.as_ref())
                    .map_err(|e| BundleError::InvalidSelector(format!("{}: {e}", p.as_ref())))
            })
            .collect::<BundleResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl AssetSelector for PathSelector {
    fn select(&self, _session: &PackSession, index: &dyn ContentIndex) -> BundleResult<Vec<String>> {
        Ok(index
            .snapshot()
            .into_keys()
            .filter(|url| self.patterns.iter().any(|p| p.matches(url)))
            .collect())
    }
}

/// Selects URLs carrying at least one of the given tags.
#[derive(Clone, Debug)]
pub struct TagSelector {
    tags: BTreeSet<String>,
}

impl TagSelector {
    pub fn new<S: Into<String>>(tags: impl IntoIterator<Item = S>) -> Self {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }
}

impl AssetSelector for TagSelector {
    fn select(&self, session: &PackSession, index: &dyn ContentIndex) -> BundleResult<Vec<String>> {
        Ok(session
            .asset_tags
            .iter()
            .filter(|(url, tags)| !tags.is_disjoint(&self.tags) && index.try_get(url).is_some())
            .map(|(url, _)| url.clone())
            .collect())
    }
}

/// A bundle as declared by the user.
#[derive(Clone, Debug)]
pub struct Bundle {
    pub name: String,
    pub selectors: Vec<Arc<dyn AssetSelector>>,
    /// Names of bundles this one depends on.
    pub dependencies: Vec<String>,
    pub output_group: Option<String>,
}

impl Bundle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selectors: Vec::new(),
            dependencies: Vec::new(),
            output_group: None,
        }
    }

    pub fn with_selector(mut self, selector: impl AssetSelector + 'static) -> Self {
        self.selectors.push(Arc::new(selector));
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn with_output_group(mut self, group: impl Into<String>) -> Self {
        self.output_group = Some(group.into());
        self
    }
}
