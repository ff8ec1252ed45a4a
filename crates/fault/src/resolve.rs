//! Parameter annotation resolution.
//!
//! Each annotation is evaluated, not just inspected, in the environment the
//! definition lives in, so an annotation may call functions with side
//! effects.

use crate::circuit::CircuitRef;
use crate::compile;
use crate::environment::Environment;
use crate::ir::Definition;
use crate::value::{EvalError, Value};
use std::fmt;
use thiserror::Error;

/// What a parameter annotation means to the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    /// Draw uniformly distributed values of `width` bits.
    Random { width: usize },
    /// Bind to a simulation of the referenced circuit.
    SimulationBound(CircuitRef),
    /// Any other annotation value; the synthesizer rejects it.
    Other(Box<Value>),
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Random { width } => write!(f, "Random({width})"),
            TypeDescriptor::SimulationBound(circuit) => f.write_str(circuit.name()),
            TypeDescriptor::Other(value) => write!(f, "{}", value.to_source()),
        }
    }
}

impl From<Value> for TypeDescriptor {
    fn from(value: Value) -> Self {
        match value {
            Value::Type(descriptor) => descriptor,
            Value::Circuit(circuit) => TypeDescriptor::SimulationBound(circuit),
            other => TypeDescriptor::Other(Box::new(other)),
        }
    }
}

/// Parameter descriptors in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeTable {
    entries: Vec<(String, TypeDescriptor)>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: impl Into<String>, descriptor: TypeDescriptor) {
        let param = param.into();
        match self.entries.iter_mut().find(|(name, _)| *name == param) {
            Some((_, slot)) => *slot = descriptor,
            None => self.entries.push((param, descriptor)),
        }
    }

    pub fn get(&self, param: &str) -> Option<&TypeDescriptor> {
        self.entries
            .iter()
            .find(|(name, _)| name == param)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypeDescriptor)> {
        self.entries.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot resolve annotation `{annotation}` of parameter `{param}`: {source}")]
pub struct ResolutionError {
    pub param: String,
    pub annotation: String,
    pub source: EvalError,
}

/// Evaluates every parameter annotation of `definition` in `env`.
pub fn resolve_types(definition: &Definition, env: &Environment) -> Result<TypeTable, ResolutionError> {
    let mut table = TypeTable::new();
    for param in &definition.params {
        let value = compile::evaluate(&param.annotation, env).map_err(|source| ResolutionError {
            param: param.name.clone(),
            annotation: param.annotation.to_string(),
            source,
        })?;
        let descriptor = TypeDescriptor::from(value);
        log::trace!("{}: {} -> {}", definition.name, param.name, descriptor);
        table.insert(param.name.clone(), descriptor);
    }
    Ok(table)
}
