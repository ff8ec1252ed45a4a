//! Variant synthesis: turns resolved parameter descriptors into concrete
//! value lists and the adapter binding the rewritten body talks to.

use crate::bitvector::{BitVector, MAX_WIDTH};
use crate::circuit::{Circuit, CircuitRef};
use crate::environment::Environment;
use crate::resolve::{TypeDescriptor, TypeTable};
use crate::simulation::{AdapterRef, SimulationError, SimulationHandle};
use crate::value::Value;
use num_bigint::RandBigInt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use thiserror::Error;

/// How random parameter values are drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RandomStrategy {
    /// Every value in `[0, 2^width)` is equally likely.
    #[default]
    Uniform,
}

impl RandomStrategy {
    pub fn sample<R: Rng + ?Sized>(self, rng: &mut R, width: usize) -> BitVector {
        match self {
            RandomStrategy::Uniform => BitVector::new(rng.gen_biguint(width as u64), width),
        }
    }
}

impl fmt::Display for RandomStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RandomStrategy::Uniform => f.write_str("Uniform"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOptions {
    /// Samples drawn for every random parameter.
    pub num_tests: usize,
    pub random_strategy: RandomStrategy,
    /// Fixes the sample sequence; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            num_tests: 16,
            random_strategy: RandomStrategy::Uniform,
            seed: None,
        }
    }
}

/// Concrete values one parameter takes across the generated cases.
#[derive(Debug, Clone, PartialEq)]
pub enum VariantSet {
    Random(Vec<BitVector>),
    Bound(CircuitRef),
}

impl VariantSet {
    pub fn values(&self) -> Vec<Value> {
        match self {
            VariantSet::Random(samples) => samples.iter().cloned().map(Value::Bits).collect(),
            VariantSet::Bound(circuit) => vec![Value::Circuit(circuit.clone())],
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VariantSet::Random(samples) => samples.len(),
            VariantSet::Bound(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runner metadata: one parameter and the values it ranges over.
#[derive(Debug, Clone, PartialEq)]
pub struct ParametrizeMarker {
    pub param: String,
    pub values: Vec<Value>,
}

/// The adapter instance registered in the environment and the name the
/// rewritten body refers to it by.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterBinding {
    pub name: String,
    pub adapter: AdapterRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub variants: Vec<(String, VariantSet)>,
    pub markers: Vec<ParametrizeMarker>,
    pub binding: Option<AdapterBinding>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("parameter `{param}` has unsupported type `{found}`")]
pub struct UnsupportedTypeError {
    pub param: String,
    pub found: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error(transparent)]
    UnsupportedType(#[from] UnsupportedTypeError),
    #[error(
        "parameters `{first}` and `{second}` are both simulation-bound; at most one is allowed"
    )]
    MultipleSimulationBound { first: String, second: String },
    #[error("cannot simulate `{circuit}` for parameter `{param}`: {source}")]
    Instantiate {
        param: String,
        circuit: String,
        source: SimulationError,
    },
    #[error("parameter `{param}` asks for {width} bits; the limit is {MAX_WIDTH}")]
    WidthTooLarge { param: String, width: usize },
    #[error("num_tests must be at least 1")]
    NoSamples,
}

/// Environment name of the adapter for `circuit`.
pub fn binding_name(circuit: &Circuit) -> String {
    let sanitized: String = circuit
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("__sim_{sanitized}")
}

/// Produces a variant set per parameter and registers the adapter, if any,
/// in `env`.
pub fn synthesize(
    table: &TypeTable,
    options: &SynthesisOptions,
    env: &mut Environment,
) -> Result<Synthesis, SynthesisError> {
    if options.num_tests == 0 {
        return Err(SynthesisError::NoSamples);
    }
    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut variants = Vec::with_capacity(table.len());
    let mut binding: Option<(String, AdapterBinding)> = None;

    for (param, descriptor) in table.iter() {
        let set = match descriptor {
            TypeDescriptor::Random { width } if *width > MAX_WIDTH => {
                return Err(SynthesisError::WidthTooLarge {
                    param: param.to_string(),
                    width: *width,
                });
            }
            TypeDescriptor::Random { width } => VariantSet::Random(
                (0..options.num_tests)
                    .map(|_| options.random_strategy.sample(&mut rng, *width))
                    .collect(),
            ),
            TypeDescriptor::SimulationBound(circuit) => {
                if let Some((first, _)) = &binding {
                    return Err(SynthesisError::MultipleSimulationBound {
                        first: first.clone(),
                        second: param.to_string(),
                    });
                }
                let handle =
                    SimulationHandle::new(circuit).map_err(|source| SynthesisError::Instantiate {
                        param: param.to_string(),
                        circuit: circuit.name().to_string(),
                        source,
                    })?;
                let name = binding_name(circuit.circuit());
                let adapter = AdapterRef::new(name.as_str(), handle);
                env.define_global(name.clone(), Value::Adapter(adapter.clone()));
                log::debug!("bound `{param}` to adapter `{name}` for {circuit}");
                binding = Some((param.to_string(), AdapterBinding { name, adapter }));
                VariantSet::Bound(circuit.clone())
            }
            TypeDescriptor::Other(value) => {
                return Err(UnsupportedTypeError {
                    param: param.to_string(),
                    found: value.to_source(),
                }
                .into());
            }
        };
        variants.push((param.to_string(), set));
    }

    let markers = variants
        .iter()
        .map(|(param, set)| ParametrizeMarker {
            param: param.clone(),
            values: set.values(),
        })
        .collect();

    Ok(Synthesis {
        variants,
        markers,
        binding: binding.map(|(_, binding)| binding),
    })
}
