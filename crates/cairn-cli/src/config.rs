use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Context;
use cairn_bundle::{Bundle, BundleResult, PackSession, PathSelector, TagSelector};
use cairn_exec::{CommandStep, ExecutionMode, RemoteConfig, WriteContentCommand};
use cairn_store::ContentIndex;
use cairn_types::{ObjectId, DO_NOT_COMPRESS_TAG};
use serde::{Deserialize, Serialize};

/// Contents of `cairn.toml`.
///
/// Relative paths are resolved against the directory holding the file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CairnConfig {
    pub build_path: PathBuf,
    pub index_name: String,
    /// Where `db/bundles` is created. Defaults to `build_path`.
    pub output_directory: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    pub incremental: bool,
    pub output_groups: BTreeMap<String, PathBuf>,
    pub asset_tags: BTreeMap<String, Vec<String>>,
    pub bundles: Vec<BundleConfig>,
    pub steps: Vec<StepConfig>,
    #[serde(skip)]
    pub root_directory: PathBuf,
}

impl Default for CairnConfig {
    fn default() -> Self {
        Self {
            build_path: PathBuf::from("build"),
            index_name: "main".to_string(),
            output_directory: None,
            max_concurrency: None,
            incremental: false,
            output_groups: BTreeMap::new(),
            asset_tags: BTreeMap::new(),
            bundles: Vec::new(),
            steps: Vec::new(),
            root_directory: PathBuf::from("."),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,
    #[serde(default)]
    pub selectors: Vec<SelectorConfig>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub output_group: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SelectorConfig {
    Path { patterns: Vec<String> },
    Tag { tags: Vec<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(flatten)]
    pub command: WriteContentCommand,
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl CairnConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::parse(&text, root).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str, root_directory: &Path) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.root_directory = root_directory.to_path_buf();
        config.build_path = config.resolve(&config.build_path);
        if let Some(output) = &config.output_directory {
            config.output_directory = Some(config.resolve(output));
        }
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_directory.join(path)
        }
    }

    pub fn output_directory(&self) -> &Path {
        self.output_directory.as_deref().unwrap_or(&self.build_path)
    }

    pub fn pack_session(&self) -> PackSession {
        let mut session = PackSession::new(&self.root_directory);
        for (group, dir) in &self.output_groups {
            session = session.with_output_group(group, dir);
        }
        for (url, tags) in &self.asset_tags {
            for tag in tags {
                session.tag_asset(url, tag);
            }
        }
        session
    }

    pub fn bundle_definitions(&self) -> BundleResult<Vec<Bundle>> {
        self.bundles
            .iter()
            .map(|config| {
                let mut bundle = Bundle::new(&config.name);
                for selector in &config.selectors {
                    bundle = match selector {
                        SelectorConfig::Path { patterns } => {
                            bundle.with_selector(PathSelector::new(patterns)?)
                        }
                        SelectorConfig::Tag { tags } => bundle.with_selector(TagSelector::new(tags.iter().cloned())),
                    };
                }
                for dependency in &config.dependencies {
                    bundle = bundle.with_dependency(dependency);
                }
                if let Some(group) = &config.output_group {
                    bundle = bundle.with_output_group(group);
                }
                Ok(bundle)
            })
            .collect()
    }

    pub fn remote_config(&self) -> RemoteConfig {
        let mut remote = RemoteConfig::default();
        if let Some(max) = self.max_concurrency {
            remote.max_concurrency = max;
        }
        remote
    }

    /// Objects the steps tag `DoNotCompress`, resolved through `index`.
    ///
    /// Steps whose URL is not in the index are skipped.
    pub fn disabled_compression_ids(&self, index: &dyn ContentIndex) -> HashSet<ObjectId> {
        self.steps
            .iter()
            .filter(|step| step.command.tags.iter().any(|t| t == DO_NOT_COMPRESS_TAG))
            .filter_map(|step| index.try_get(&step.command.url))
            .collect()
    }

    /// Build steps, all forced remote when `remote` is set.
    pub fn command_steps(&self, remote: bool) -> Vec<CommandStep> {
        self.steps
            .iter()
            .map(|step| {
                let mode = if remote { ExecutionMode::Remote } else { step.mode };
                CommandStep::new(step.command.clone(), mode)
            })
            .collect()
    }
}
