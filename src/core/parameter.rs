//! Pipeline parameters - typed, default-valued inputs substitutable per run

use crate::core::{
    error::{BindingError, DefinitionError},
    run::Run,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Integer,
    Float,
    String,
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterType::Integer => write!(f, "integer"),
            ParameterType::Float => write!(f, "float"),
            ParameterType::String => write!(f, "string"),
        }
    }
}

/// A concrete parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Float(f64),
    String(String),
}

impl ParameterValue {
    /// Type carried by this value
    pub fn parameter_type(&self) -> ParameterType {
        match self {
            ParameterValue::Integer(_) => ParameterType::Integer,
            ParameterValue::Float(_) => ParameterType::Float,
            ParameterValue::String(_) => ParameterType::String,
        }
    }

    /// Whether this value may be bound to a parameter of type `ty`.
    ///
    /// Integers widen to floats; nothing else converts. Floats must be
    /// finite, since conditions compare them as JSON numbers.
    pub fn fits(&self, ty: ParameterType) -> bool {
        match (self, ty) {
            (ParameterValue::Float(f), ParameterType::Float) => f.is_finite(),
            (ParameterValue::Integer(_), ParameterType::Integer)
            | (ParameterValue::Integer(_), ParameterType::Float)
            | (ParameterValue::String(_), ParameterType::String) => true,
            _ => false,
        }
    }

    /// How a rejected value is named in binding errors
    fn describe(&self) -> String {
        match self {
            ParameterValue::Float(f) if !f.is_finite() => format!("'{}'", f),
            other => other.parameter_type().to_string(),
        }
    }

    /// Coerce to the declared type (only integer -> float changes anything)
    fn coerce(self, ty: ParameterType) -> Self {
        match (self, ty) {
            (ParameterValue::Integer(i), ParameterType::Float) => ParameterValue::Float(i as f64),
            (value, _) => value,
        }
    }

    /// Parse a raw string (e.g. from `--param key=value`) as the given type
    pub fn parse(ty: ParameterType, raw: &str) -> Option<Self> {
        match ty {
            ParameterType::Integer => raw.trim().parse().ok().map(ParameterValue::Integer),
            ParameterType::Float => raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(ParameterValue::Float),
            ParameterType::String => Some(ParameterValue::String(raw.to_string())),
        }
    }

    /// JSON form handed to executors and conditions
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParameterValue::Integer(i) => serde_json::Value::from(*i),
            ParameterValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ParameterValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Integer(i) => write!(f, "{}", i),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::String(s) => write!(f, "{}", s),
        }
    }
}

/// A named, typed pipeline input with a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub parameter_type: ParameterType,
    pub default: ParameterValue,
}

/// The set of parameters a pipeline declares, in declaration order
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    parameters: Vec<Parameter>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new parameter
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        parameter_type: ParameterType,
        default: ParameterValue,
    ) -> Result<Parameter, DefinitionError> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(DefinitionError::DuplicateParameter(name));
        }
        if !default.fits(parameter_type) {
            return Err(DefinitionError::InvalidDefault {
                name,
                expected: parameter_type,
                actual: default.parameter_type(),
            });
        }

        let parameter = Parameter {
            name,
            parameter_type,
            default: default.coerce(parameter_type),
        };
        self.parameters.push(parameter.clone());
        Ok(parameter)
    }

    /// Bind a run-time value, replacing the default for this run only
    pub fn bind(
        &self,
        run: &mut Run,
        name: &str,
        value: ParameterValue,
    ) -> Result<(), BindingError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| BindingError::UnknownParameter(name.to_string()))?;

        if !value.fits(parameter.parameter_type) {
            return Err(BindingError::TypeMismatch {
                name: name.to_string(),
                expected: parameter.parameter_type,
                actual: value.describe(),
            });
        }

        run.parameters
            .insert(name.to_string(), value.coerce(parameter.parameter_type));
        Ok(())
    }

    /// Parse a raw string (e.g. from the command line) as the declared type
    pub fn parse_value(&self, name: &str, raw: &str) -> Result<ParameterValue, BindingError> {
        let parameter = self
            .get(name)
            .ok_or_else(|| BindingError::UnknownParameter(name.to_string()))?;

        ParameterValue::parse(parameter.parameter_type, raw).ok_or_else(|| {
            BindingError::TypeMismatch {
                name: name.to_string(),
                expected: parameter.parameter_type,
                actual: format!("'{}'", raw),
            }
        })
    }

    /// Bind a raw string value, parsing it as the declared type
    pub fn bind_str(&self, run: &mut Run, name: &str, raw: &str) -> Result<(), BindingError> {
        let value = self.parse_value(name, raw)?;
        self.bind(run, name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}
