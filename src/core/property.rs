//! Deferred step properties and their resolution
//!
//! A [`PropertyReference`] names a value that only exists once its producing
//! step has succeeded. Resolution is a pure function of a [`Run`]'s step
//! states: it never waits and never mutates anything. The driver guarantees
//! it only resolves references whose producers have succeeded.
//!
//! Paths use a dotted/indexed syntax:
//!
//! ```text
//! regression_metrics.mse.value
//! outputs['train']
//! Outputs[0].S3Output.S3Uri
//! ```

use crate::core::{
    error::{DefinitionError, ResolutionError},
    run::Run,
    state::{ArtifactCapture, StepState},
};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// One step into a JSON document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// `.name`
    Field(String),
    /// `[3]`
    Index(usize),
    /// `['key']`
    Key(String),
}

/// Ordered accessor sequence into a properties document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyPath(Vec<Accessor>);

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r#"^(?:(\.)?([A-Za-z_][A-Za-z0-9_\-]*)|\[(\d+)\]|\['([^']*)'\]|\["([^"]*)"\])"#)
            .expect("property path token regex is valid")
    })
}

impl PropertyPath {
    /// Parse a textual path. The empty string addresses the whole document.
    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut accessors = Vec::new();
        let mut pos = 0;

        while pos < raw.len() {
            let caps = token_regex()
                .captures(&raw[pos..])
                .ok_or_else(|| invalid(&format!("unexpected input at offset {}", pos)))?;

            if let Some(field) = caps.get(2) {
                let dotted = caps.get(1).is_some();
                if pos == 0 && dotted {
                    return Err(invalid("path cannot start with '.'"));
                }
                if pos > 0 && !dotted {
                    return Err(invalid(&format!("expected '.' before '{}'", field.as_str())));
                }
                accessors.push(Accessor::Field(field.as_str().to_string()));
            } else if let Some(index) = caps.get(3) {
                let index = index
                    .as_str()
                    .parse()
                    .map_err(|_| invalid("index out of range"))?;
                accessors.push(Accessor::Index(index));
            } else if let Some(key) = caps.get(4).or_else(|| caps.get(5)) {
                accessors.push(Accessor::Key(key.as_str().to_string()));
            }

            pos += caps.get(0).map(|m| m.end()).unwrap_or(0);
        }

        Ok(PropertyPath(accessors))
    }

    pub fn accessors(&self) -> &[Accessor] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Walk `document` along this path
    pub fn apply<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(document, |current, accessor| match accessor {
            Accessor::Field(name) | Accessor::Key(name) => current.as_object()?.get(name),
            Accessor::Index(index) => current.as_array()?.get(*index),
        })
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, accessor) in self.0.iter().enumerate() {
            match accessor {
                Accessor::Field(name) if i == 0 => write!(f, "{}", name)?,
                Accessor::Field(name) => write!(f, ".{}", name)?,
                Accessor::Index(index) => write!(f, "[{}]", index)?,
                Accessor::Key(key) => write!(f, "['{}']", key)?,
            }
        }
        Ok(())
    }
}

/// Declares that an output slot of a step holds a JSON document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyFile {
    pub name: String,
    /// Output slot whose location contains the file
    pub output_slot: String,
    /// Path of the file relative to the slot's location
    pub relative_path: String,
}

impl PropertyFile {
    pub fn new(
        name: impl Into<String>,
        output_slot: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            output_slot: output_slot.into(),
            relative_path: relative_path.into(),
        }
    }
}

/// Handle to a value produced by a specific step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyReference {
    /// Producing step
    pub step: String,
    /// Property file to read, or `None` for the step's own properties
    pub property_file: Option<String>,
    pub path: PropertyPath,
}

impl PropertyReference {
    /// Reference into a step's properties document
    pub fn new(step: impl Into<String>, path: &str) -> Result<Self, DefinitionError> {
        Ok(Self {
            step: step.into(),
            property_file: None,
            path: PropertyPath::parse(path)?,
        })
    }

    /// Reference into a property file produced by a step
    pub fn file(
        step: impl Into<String>,
        property_file: impl Into<String>,
        path: &str,
    ) -> Result<Self, DefinitionError> {
        Ok(Self {
            step: step.into(),
            property_file: Some(property_file.into()),
            path: PropertyPath::parse(path)?,
        })
    }
}

impl fmt::Display for PropertyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.property_file {
            Some(file) => write!(f, "{}[{}]:{}", self.step, file, self.path),
            None => write!(f, "{}:{}", self.step, self.path),
        }
    }
}

/// Value bound to a step input or condition operand
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    Literal(Value),
    Parameter(String),
    Deferred(PropertyReference),
}

impl StepInput {
    pub fn literal(value: impl Into<Value>) -> Self {
        StepInput::Literal(value.into())
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        StepInput::Parameter(name.into())
    }

    /// Step this input waits on, if any
    pub fn referenced_step(&self) -> Option<&str> {
        match self {
            StepInput::Deferred(reference) => Some(&reference.step),
            _ => None,
        }
    }
}

impl From<PropertyReference> for StepInput {
    fn from(reference: PropertyReference) -> Self {
        StepInput::Deferred(reference)
    }
}

impl From<f64> for StepInput {
    fn from(value: f64) -> Self {
        StepInput::literal(value)
    }
}

impl From<i64> for StepInput {
    fn from(value: i64) -> Self {
        StepInput::literal(value)
    }
}

/// Properties document of a succeeded step: executor properties plus an
/// `outputs` object mapping slot names to locations.
///
/// `outputs` is reserved. An executor property of that name is replaced by
/// the output map.
pub fn properties_document(outputs: &BTreeMap<String, String>, properties: &Value) -> Value {
    let mut document = match properties {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };

    let outputs = outputs
        .iter()
        .map(|(slot, location)| (slot.clone(), Value::String(location.clone())))
        .collect();
    if let Some(shadowed) = document.insert("outputs".to_string(), Value::Object(outputs)) {
        tracing::warn!(
            "Executor property 'outputs' ({}) replaced by the step's output locations",
            shadowed
        );
    }

    Value::Object(document)
}

/// Resolve a reference against the run's step states
pub fn resolve(run: &Run, reference: &PropertyReference) -> Result<Value, ResolutionError> {
    let state = run
        .state(&reference.step)
        .ok_or_else(|| ResolutionError::Unresolvable {
            step: reference.step.clone(),
            state: "undeclared".to_string(),
        })?;

    let (outputs, properties, property_files) = match state {
        StepState::Succeeded {
            outputs,
            properties,
            property_files,
            ..
        } => (outputs, properties, property_files),
        other => {
            return Err(ResolutionError::Unresolvable {
                step: reference.step.clone(),
                state: other.label().to_string(),
            })
        }
    };

    let document = match &reference.property_file {
        None => properties_document(outputs, properties),
        Some(name) => match property_files.get(name) {
            Some(ArtifactCapture::Loaded(bytes)) => {
                serde_json::from_slice(bytes).map_err(|e| ResolutionError::MalformedArtifact {
                    step: reference.step.clone(),
                    property_file: name.clone(),
                    reason: e.to_string(),
                })?
            }
            Some(ArtifactCapture::Unavailable(reason)) => {
                return Err(ResolutionError::ArtifactUnavailable {
                    step: reference.step.clone(),
                    property_file: name.clone(),
                    reason: reason.clone(),
                })
            }
            None => {
                return Err(ResolutionError::ArtifactUnavailable {
                    step: reference.step.clone(),
                    property_file: name.clone(),
                    reason: "not captured".to_string(),
                })
            }
        },
    };

    reference
        .path
        .apply(&document)
        .cloned()
        .ok_or_else(|| ResolutionError::PathNotFound {
            step: reference.step.clone(),
            path: reference.path.to_string(),
        })
}

/// Resolve any step input to a concrete JSON value
pub fn resolve_input(run: &Run, input: &StepInput) -> Result<Value, ResolutionError> {
    match input {
        StepInput::Literal(value) => Ok(value.clone()),
        StepInput::Parameter(name) => run
            .parameter(name)
            .map(|value| value.to_json())
            .ok_or_else(|| ResolutionError::UnknownParameter(name.clone())),
        StepInput::Deferred(reference) => resolve(run, reference),
    }
}
