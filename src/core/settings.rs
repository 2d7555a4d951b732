//! Engine settings - region, artifact root, scheduling and image catalog

use crate::execution::scheduler::SchedulingStrategy;
use crate::executor::image::CatalogImageResolver;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable overriding `region`
pub const REGION_ENV: &str = "LAZYPIPE_REGION";

/// Environment variable overriding `artifact_root`
pub const ARTIFACT_ROOT_ENV: &str = "LAZYPIPE_ARTIFACT_ROOT";

/// Scheduling strategy as written in settings files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sequential,
    #[default]
    Parallel,
    Limited,
}

/// Settings passed explicitly to the engine, image resolver and executors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Region used to derive framework image URIs
    pub region: String,

    /// Directory holding job outputs
    pub artifact_root: PathBuf,

    pub strategy: StrategyKind,

    /// Concurrency bound for the `limited` strategy
    pub max_parallel: usize,

    /// Default per-step timeout in seconds (`None` = no timeout)
    pub step_timeout_secs: Option<u64>,

    /// Registry host for framework images; `{region}` is substituted
    pub image_registry: String,

    /// Custom image name -> URI
    pub images: BTreeMap<String, String>,

    /// Run history database (defaults to the user data directory)
    pub history_db: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            artifact_root: default_data_dir().join("artifacts"),
            strategy: StrategyKind::default(),
            max_parallel: 4,
            step_timeout_secs: Some(3600),
            image_registry: "registry.{region}.lazypipe.local".to_string(),
            images: BTreeMap::new(),
            history_db: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lazypipe")
}

impl EngineSettings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string; missing fields take defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: EngineSettings =
            serde_yaml::from_str(yaml).context("Failed to parse engine settings")?;
        Ok(settings)
    }

    /// Defaults, or the given file, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(settings.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply `LAZYPIPE_*` overrides read through `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(region) = lookup(REGION_ENV).filter(|v| !v.is_empty()) {
            self.region = region;
        }
        if let Some(root) = lookup(ARTIFACT_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.artifact_root = PathBuf::from(root);
        }
        self
    }

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            StrategyKind::Sequential => SchedulingStrategy::Sequential,
            StrategyKind::Parallel => SchedulingStrategy::Parallel,
            StrategyKind::Limited => SchedulingStrategy::LimitedParallel(self.max_parallel),
        }
    }

    pub fn image_resolver(&self) -> CatalogImageResolver {
        CatalogImageResolver::new(self.image_registry.clone()).with_catalog(self.images.clone())
    }

    pub fn history_db_path(&self) -> PathBuf {
        self.history_db
            .clone()
            .unwrap_or_else(|| default_data_dir().join("runs.db"))
    }
}
