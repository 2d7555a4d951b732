//! Error taxonomy for pipeline definition, binding and resolution

use crate::core::parameter::ParameterType;
use thiserror::Error;

/// Problems detected while building a pipeline graph.
///
/// These are always fatal and surface before any step is dispatched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    #[error("default for parameter '{name}' is {actual}, expected {expected}")]
    InvalidDefault {
        name: String,
        expected: ParameterType,
        actual: ParameterType,
    },

    #[error("step '{0}' is declared more than once")]
    DuplicateStep(String),

    #[error("step '{step}' declares output '{output}' more than once")]
    DuplicateOutput { step: String, output: String },

    #[error("property file '{property_file}' on step '{step}' names undeclared output '{output}'")]
    UnknownOutputSlot {
        step: String,
        property_file: String,
        output: String,
    },

    #[error("step '{step}' references undeclared parameter '{parameter}'")]
    UnknownParameter { step: String, parameter: String },

    #[error("step '{step}' references undeclared step '{target}'")]
    UnknownReference { step: String, target: String },

    #[error("step '{step}' references property file '{property_file}' which step '{target}' does not declare")]
    UnknownPropertyFile {
        step: String,
        target: String,
        property_file: String,
    },

    #[error("invalid property path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("step '{step}' cannot belong to both '{first}' and '{second}' branches")]
    BranchConflict {
        step: String,
        first: String,
        second: String,
    },

    #[error("conditional step '{0}' has no conditions")]
    EmptyCondition(String),

    #[error("dependency cycle detected: {}", steps.join(" -> "))]
    Cycle { steps: Vec<String> },

    #[error("invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },
}

/// Problems binding run-time parameter values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("parameter '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParameterType,
        actual: String,
    },
}

/// Failure to turn a deferred input into a concrete value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("cannot resolve reference to step '{step}' in state {state}")]
    Unresolvable { step: String, state: String },

    #[error("property file '{property_file}' of step '{step}' is not valid JSON: {reason}")]
    MalformedArtifact {
        step: String,
        property_file: String,
        reason: String,
    },

    #[error("property file '{property_file}' of step '{step}' could not be read: {reason}")]
    ArtifactUnavailable {
        step: String,
        property_file: String,
        reason: String,
    },

    #[error("path '{path}' not found in properties of step '{step}'")]
    PathNotFound { step: String, path: String },

    #[error("parameter '{0}' has no value in this run")]
    UnknownParameter(String),

    #[error("cannot compare {left} with {right} using {operator}")]
    Incomparable {
        operator: String,
        left: String,
        right: String,
    },
}

/// Illegal change to a step's run state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("step '{0}' is not part of this run")]
    UnknownStep(String),

    #[error("step '{step}' cannot move from {from} to {to}")]
    Illegal {
        step: String,
        from: String,
        to: String,
    },
}
