//! Pipeline configuration from YAML

use crate::core::{
    condition::{Condition, ConditionOperator},
    error::DefinitionError,
    parameter::{Parameter, ParameterRegistry},
    pipeline::PipelineGraph,
    property::{PropertyFile, PropertyReference, StepInput},
    step::{ExecutorSpec, Step},
};
use crate::executor::image::{
    FrameworkImage, ImageDescriptor, ImageRequest, ImageResolver, ImageSource,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Typed parameters with defaults, overridable per run
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepConfig {
    Job(JobStepConfig),
    Condition(ConditionStepConfig),
}

impl StepConfig {
    pub fn name(&self) -> &str {
        match self {
            StepConfig::Job(job) => &job.name,
            StepConfig::Condition(condition) => &condition.name,
        }
    }
}

/// A data job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStepConfig {
    /// Unique step name
    pub name: String,

    /// Optional step description
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_job_type")]
    pub job_type: String,

    #[serde(default)]
    pub image: Option<ImageConfig>,

    /// Command run by the subprocess executor
    #[serde(default)]
    pub command: Vec<String>,

    /// Executor-specific settings, passed through untouched
    #[serde(default)]
    pub settings: serde_json::Value,

    #[serde(default)]
    pub inputs: BTreeMap<String, InputConfig>,

    #[serde(default)]
    pub outputs: Vec<String>,

    #[serde(default)]
    pub property_files: Vec<PropertyFileConfig>,

    /// List of step names this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Timeout for this step (overrides engine default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_job_type() -> String {
    "job".to_string()
}

/// A conditional step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionStepConfig {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// All must hold for the `if` branch
    pub conditions: Vec<ConditionConfig>,

    #[serde(default)]
    pub if_steps: Vec<String>,

    #[serde(default)]
    pub else_steps: Vec<String>,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub operator: ConditionOperator,
    pub left: InputConfig,
    pub right: InputConfig,
}

/// Container image: a direct URI, or a custom image name with a framework fallback
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub uri: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fallback: Option<FrameworkImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFileConfig {
    pub name: String,
    /// Output slot containing the file
    pub output: String,
    /// File path inside the slot
    pub path: String,
}

/// `{parameter: Name}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterInput {
    pub parameter: String,
}

/// `{step: Name, property_file: Optional, path: a.b[0]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceInput {
    pub step: String,
    #[serde(default)]
    pub property_file: Option<String>,
    #[serde(default)]
    pub path: String,
}

/// Step input or condition operand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputConfig {
    Parameter(ParameterInput),
    Reference(ReferenceInput),
    Literal(serde_json::Value),
}

impl InputConfig {
    fn to_input(&self) -> Result<StepInput, DefinitionError> {
        Ok(match self {
            InputConfig::Parameter(p) => StepInput::parameter(&p.parameter),
            InputConfig::Reference(r) => match &r.property_file {
                Some(file) => PropertyReference::file(&r.step, file, &r.path)?.into(),
                None => PropertyReference::new(&r.step, &r.path)?.into(),
            },
            InputConfig::Literal(value) => StepInput::Literal(value.clone()),
        })
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Build the graph without resolving images
    pub fn validate(&self) -> Result<PipelineGraph, DefinitionError> {
        self.build(None)
    }

    /// Build the graph, resolving every step image for `region`
    pub fn to_graph(
        &self,
        images: &dyn ImageResolver,
        region: &str,
    ) -> Result<PipelineGraph, DefinitionError> {
        self.build(Some((images, region)))
    }

    fn build(
        &self,
        images: Option<(&dyn ImageResolver, &str)>,
    ) -> Result<PipelineGraph, DefinitionError> {
        let mut registry = ParameterRegistry::new();
        for parameter in &self.parameters {
            registry.declare(
                parameter.name.clone(),
                parameter.parameter_type,
                parameter.default.clone(),
            )?;
        }

        let steps = self
            .steps
            .iter()
            .map(|step| match step {
                StepConfig::Job(job) => Self::build_job(job, images),
                StepConfig::Condition(condition) => Self::build_condition(condition),
            })
            .collect::<Result<Vec<_>, _>>()?;

        PipelineGraph::construct(self.name.clone(), registry, steps)
    }

    fn build_job(
        job: &JobStepConfig,
        images: Option<(&dyn ImageResolver, &str)>,
    ) -> Result<Step, DefinitionError> {
        let image = match (&job.image, images) {
            (Some(config), Some((resolver, region))) => {
                Some(Self::resolve_image(&job.name, config, resolver, region)?)
            }
            (Some(ImageConfig { uri: Some(uri), .. }), None) => Some(ImageDescriptor {
                uri: uri.clone(),
                source: ImageSource::Custom,
            }),
            _ => None,
        };

        let mut builder = Step::job(&job.name).executor(ExecutorSpec {
            job_type: job.job_type.clone(),
            image,
            command: job.command.clone(),
            settings: job.settings.clone(),
            timeout_secs: job.timeout_secs,
        });

        if let Some(description) = &job.description {
            builder = builder.description(description);
        }
        for (name, input) in &job.inputs {
            builder = builder.input(name, input.to_input()?);
        }
        for slot in &job.outputs {
            builder = builder.output(slot);
        }
        for file in &job.property_files {
            builder = builder.property_file(PropertyFile::new(&file.name, &file.output, &file.path));
        }
        for dep in &job.depends_on {
            builder = builder.depends_on(dep);
        }

        builder.build()
    }

    fn build_condition(condition: &ConditionStepConfig) -> Result<Step, DefinitionError> {
        let mut builder = Step::condition(&condition.name);

        if let Some(description) = &condition.description {
            builder = builder.description(description);
        }
        for c in &condition.conditions {
            builder = builder.when(Condition::new(
                c.operator,
                c.left.to_input()?,
                c.right.to_input()?,
            ));
        }
        for step in &condition.if_steps {
            builder = builder.if_step(step);
        }
        for step in &condition.else_steps {
            builder = builder.else_step(step);
        }
        for dep in &condition.depends_on {
            builder = builder.depends_on(dep);
        }

        builder.build()
    }

    fn resolve_image(
        step: &str,
        config: &ImageConfig,
        resolver: &dyn ImageResolver,
        region: &str,
    ) -> Result<ImageDescriptor, DefinitionError> {
        if let Some(uri) = &config.uri {
            return Ok(ImageDescriptor {
                uri: uri.clone(),
                source: ImageSource::Custom,
            });
        }

        resolver
            .resolve(&ImageRequest {
                name: config.name.clone(),
                region: region.to_string(),
                fallback: config.fallback.clone(),
            })
            .map_err(|e| DefinitionError::InvalidStep {
                step: step.to_string(),
                reason: e.to_string(),
            })
    }
}
