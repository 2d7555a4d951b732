//! Container image resolution
//!
//! A step may name a custom image. If the catalog has no such image, the
//! resolver falls back to a framework image derived from the request's
//! fallback spec and region.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image '{0}' not found and no fallback given")]
    NotFound(String),

    #[error("image request names neither an image nor a fallback")]
    EmptyRequest,
}

/// Framework image used when no custom image exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkImage {
    pub framework: String,
    pub version: String,
    #[serde(default)]
    pub py_version: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
}

impl FrameworkImage {
    pub fn new(framework: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
            version: version.into(),
            py_version: None,
            instance_type: None,
        }
    }

    pub fn with_py_version(mut self, py_version: impl Into<String>) -> Self {
        self.py_version = Some(py_version.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    /// Accelerated instance families get GPU images
    fn processor(&self) -> &'static str {
        match self.instance_type.as_deref() {
            Some(t) if t.starts_with("ml.p") || t.starts_with("ml.g") => "gpu",
            _ => "cpu",
        }
    }

    fn tag(&self) -> String {
        match &self.py_version {
            Some(py) => format!("{}-{}-{}", self.version, self.processor(), py),
            None => format!("{}-{}", self.version, self.processor()),
        }
    }
}

/// What a step asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Custom image name to look up first
    pub name: Option<String>,
    pub region: String,
    pub fallback: Option<FrameworkImage>,
}

/// Where a resolved image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Custom,
    Framework,
}

/// Resolved image, forwarded verbatim to the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub uri: String,
    pub source: ImageSource,
}

/// Resolves image requests to concrete descriptors
pub trait ImageResolver: Send + Sync {
    fn resolve(&self, request: &ImageRequest) -> Result<ImageDescriptor, ImageError>;
}

/// Looks up custom images in a fixed catalog, else builds a framework URI
#[derive(Debug, Clone, Default)]
pub struct CatalogImageResolver {
    /// Registry host for framework images; `{region}` is substituted
    registry: String,

    /// Custom image name -> URI
    catalog: BTreeMap<String, String>,
}

impl CatalogImageResolver {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            catalog: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.catalog.insert(name.into(), uri.into());
        self
    }

    pub fn with_catalog(mut self, catalog: BTreeMap<String, String>) -> Self {
        self.catalog.extend(catalog);
        self
    }

    fn framework_uri(&self, region: &str, image: &FrameworkImage) -> String {
        let registry = self.registry.replace("{region}", region);
        format!("{}/{}:{}", registry, image.framework, image.tag())
    }
}

impl ImageResolver for CatalogImageResolver {
    fn resolve(&self, request: &ImageRequest) -> Result<ImageDescriptor, ImageError> {
        if let Some(uri) = request.name.as_ref().and_then(|n| self.catalog.get(n)) {
            return Ok(ImageDescriptor {
                uri: uri.clone(),
                source: ImageSource::Custom,
            });
        }

        match (&request.fallback, &request.name) {
            (Some(fallback), _) => Ok(ImageDescriptor {
                uri: self.framework_uri(&request.region, fallback),
                source: ImageSource::Framework,
            }),
            (None, Some(name)) => Err(ImageError::NotFound(name.clone())),
            (None, None) => Err(ImageError::EmptyRequest),
        }
    }
}
