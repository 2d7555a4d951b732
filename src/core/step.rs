//! Step domain model

use crate::core::{
    condition::{Condition, ConditionalStep},
    error::DefinitionError,
    property::{PropertyFile, PropertyReference, StepInput},
};
use crate::executor::image::ImageDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Opaque binding handed to the external executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Kind of job, e.g. "processing", "training", "register"
    pub job_type: String,

    /// Resolved container image, if the job needs one
    #[serde(default)]
    pub image: Option<ImageDescriptor>,

    /// Command the executor runs
    #[serde(default)]
    pub command: Vec<String>,

    /// Executor-specific settings, forwarded untouched
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Timeout override for this step, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ExecutorSpec {
    fn default() -> Self {
        Self {
            job_type: "job".to_string(),
            image: None,
            command: Vec::new(),
            settings: serde_json::Value::Null,
            timeout_secs: None,
        }
    }
}

/// What a step does when its turn comes
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// Runs on the external executor
    DataJob(ExecutorSpec),
    /// Evaluated by the driver to select a branch
    Conditional(ConditionalStep),
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique step name
    pub name: String,

    /// Optional human-readable description
    pub description: Option<String>,

    pub kind: StepKind,

    /// Input name -> literal, parameter or deferred reference
    pub inputs: BTreeMap<String, StepInput>,

    /// Declared output slots, in order
    pub outputs: Vec<String>,

    /// Structured documents found inside output slots
    pub property_files: Vec<PropertyFile>,

    /// Extra ordering edges not implied by references
    pub depends_on: Vec<String>,
}

impl Step {
    /// Start building a data job step
    pub fn job(name: impl Into<String>) -> StepBuilder {
        StepBuilder::new(name)
    }

    /// Start building a conditional step
    pub fn condition(name: impl Into<String>) -> ConditionalStepBuilder {
        ConditionalStepBuilder::new(name)
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, StepKind::Conditional(_))
    }

    pub fn executor(&self) -> Option<&ExecutorSpec> {
        match &self.kind {
            StepKind::DataJob(spec) => Some(spec),
            StepKind::Conditional(_) => None,
        }
    }

    pub fn conditional(&self) -> Option<&ConditionalStep> {
        match &self.kind {
            StepKind::Conditional(conditional) => Some(conditional),
            StepKind::DataJob(_) => None,
        }
    }

    pub fn property_file(&self, name: &str) -> Option<&PropertyFile> {
        self.property_files.iter().find(|f| f.name == name)
    }

    /// Every value this step consumes: inputs plus condition operands
    pub fn consumed_inputs(&self) -> Vec<&StepInput> {
        let mut consumed: Vec<&StepInput> = self.inputs.values().collect();
        if let StepKind::Conditional(conditional) = &self.kind {
            consumed.extend(conditional.conditions.iter().flat_map(Condition::operands));
        }
        consumed
    }

    /// Deferred references among the consumed inputs
    pub fn references(&self) -> Vec<&PropertyReference> {
        self.consumed_inputs()
            .into_iter()
            .filter_map(|input| match input {
                StepInput::Deferred(reference) => Some(reference),
                _ => None,
            })
            .collect()
    }

    /// Parameters named by the consumed inputs
    pub fn parameters_used(&self) -> Vec<&str> {
        self.consumed_inputs()
            .into_iter()
            .filter_map(|input| match input {
                StepInput::Parameter(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Steps this step depends on through references or `depends_on`
    pub fn referenced_steps(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.step.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .collect()
    }
}

/// Builder for data job steps
#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: String,
    description: Option<String>,
    inputs: BTreeMap<String, StepInput>,
    outputs: Vec<String>,
    property_files: Vec<PropertyFile>,
    depends_on: Vec<String>,
    spec: ExecutorSpec,
}

impl StepBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            property_files: Vec::new(),
            depends_on: Vec::new(),
            spec: ExecutorSpec::default(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn input(mut self, name: impl Into<String>, input: impl Into<StepInput>) -> Self {
        self.inputs.insert(name.into(), input.into());
        self
    }

    pub fn output(mut self, slot: impl Into<String>) -> Self {
        self.outputs.push(slot.into());
        self
    }

    pub fn property_file(mut self, file: PropertyFile) -> Self {
        self.property_files.push(file);
        self
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.spec.job_type = job_type.into();
        self
    }

    pub fn image(mut self, image: ImageDescriptor) -> Self {
        self.spec.image = Some(image);
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn settings(mut self, settings: serde_json::Value) -> Self {
        self.spec.settings = settings;
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.spec.timeout_secs = Some(timeout_secs);
        self
    }

    /// Replace the whole executor spec
    pub fn executor(mut self, spec: ExecutorSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn build(self) -> Result<Step, DefinitionError> {
        check_name(&self.name)?;

        let mut seen = HashSet::new();
        for slot in &self.outputs {
            if !seen.insert(slot) {
                return Err(DefinitionError::DuplicateOutput {
                    step: self.name.clone(),
                    output: slot.clone(),
                });
            }
        }

        let mut files = HashSet::new();
        for file in &self.property_files {
            if !self.outputs.contains(&file.output_slot) {
                return Err(DefinitionError::UnknownOutputSlot {
                    step: self.name.clone(),
                    property_file: file.name.clone(),
                    output: file.output_slot.clone(),
                });
            }
            if !files.insert(&file.name) {
                return Err(DefinitionError::InvalidStep {
                    step: self.name.clone(),
                    reason: format!("property file '{}' declared twice", file.name),
                });
            }
        }

        Ok(Step {
            name: self.name,
            description: self.description,
            kind: StepKind::DataJob(self.spec),
            inputs: self.inputs,
            outputs: self.outputs,
            property_files: self.property_files,
            depends_on: self.depends_on,
        })
    }
}

/// Builder for conditional steps
#[derive(Debug, Clone)]
pub struct ConditionalStepBuilder {
    name: String,
    description: Option<String>,
    conditions: Vec<Condition>,
    if_steps: Vec<String>,
    else_steps: Vec<String>,
    depends_on: Vec<String>,
}

impl ConditionalStepBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            conditions: Vec::new(),
            if_steps: Vec::new(),
            else_steps: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a condition; all conditions must hold for the `if` branch
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn if_step(mut self, step: impl Into<String>) -> Self {
        self.if_steps.push(step.into());
        self
    }

    pub fn else_step(mut self, step: impl Into<String>) -> Self {
        self.else_steps.push(step.into());
        self
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn build(self) -> Result<Step, DefinitionError> {
        check_name(&self.name)?;

        if self.conditions.is_empty() {
            return Err(DefinitionError::EmptyCondition(self.name));
        }

        let mut members = HashSet::new();
        for member in self.if_steps.iter().chain(self.else_steps.iter()) {
            if *member == self.name {
                return Err(DefinitionError::InvalidStep {
                    step: self.name.clone(),
                    reason: "a conditional step cannot gate itself".to_string(),
                });
            }
            if !members.insert(member) {
                return Err(DefinitionError::BranchConflict {
                    step: member.clone(),
                    first: self.name.clone(),
                    second: self.name.clone(),
                });
            }
        }

        Ok(Step {
            name: self.name,
            description: self.description,
            kind: StepKind::Conditional(ConditionalStep {
                conditions: self.conditions,
                if_steps: self.if_steps,
                else_steps: self.else_steps,
            }),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            property_files: Vec::new(),
            depends_on: self.depends_on,
        })
    }
}

fn check_name(name: &str) -> Result<(), DefinitionError> {
    if name.trim().is_empty() {
        return Err(DefinitionError::InvalidStep {
            step: name.to_string(),
            reason: "step name cannot be empty".to_string(),
        });
    }
    Ok(())
}
