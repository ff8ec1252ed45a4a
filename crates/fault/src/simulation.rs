use crate::bitvector::BitVector;
use crate::circuit::{BackendError, Circuit, CircuitRef, Direction, Port, SimulatorBackend};
use crate::value::Value;
use num_bigint::BigInt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Hierarchical context for a state access. The default is the root scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scope {
    path: Vec<String>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self, instance: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(instance.into());
        Self { path }
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    #[error("circuit `{circuit}` has no port named `{port}`")]
    UnknownPort { circuit: String, port: String },
    #[error("port `{port}` of `{circuit}` is an output and cannot be driven")]
    NotAnInput { circuit: String, port: String },
    #[error("value {value} does not fit in port `{port}` ({width} bits)")]
    OutOfRange {
        port: String,
        value: String,
        width: usize,
    },
    #[error("cannot drive port `{port}` with a {found}")]
    InvalidValue { port: String, found: &'static str },
    #[error("simulation handle for `{0}` is poisoned by an earlier panic")]
    Poisoned(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Uniform `evaluate` / `set_value` / `get_value` adapter over a simulator
/// backend for one circuit definition.
pub struct SimulationHandle {
    circuit: Arc<Circuit>,
    backend: Box<dyn SimulatorBackend>,
}

impl fmt::Debug for SimulationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("circuit", &self.circuit.name)
            .finish()
    }
}

impl SimulationHandle {
    pub fn new(circuit: &CircuitRef) -> Result<Self, SimulationError> {
        let backend = circuit.instantiate()?;
        Ok(Self {
            circuit: circuit.circuit().clone(),
            backend,
        })
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    fn port(&self, name: &str) -> Result<&Port, SimulationError> {
        self.circuit
            .port(name)
            .ok_or_else(|| SimulationError::UnknownPort {
                circuit: self.circuit.name.clone(),
                port: name.to_string(),
            })
    }

    pub fn evaluate(&mut self) -> Result<(), SimulationError> {
        log::trace!("{}: evaluate", self.circuit.name);
        self.backend.evaluate()?;
        Ok(())
    }

    pub fn set_value(&mut self, port: &str, value: &Value, scope: &Scope) -> Result<(), SimulationError> {
        let port = self.port(port)?.clone();
        if port.direction == Direction::Out {
            return Err(SimulationError::NotAnInput {
                circuit: self.circuit.name.clone(),
                port: port.name,
            });
        }
        let bits = coerce(&port, value)?;
        log::trace!("{}: set {} = {}", self.circuit.name, port.name, bits);
        self.backend.set_value(&port, &bits, scope)?;
        Ok(())
    }

    pub fn get_value(&mut self, port: &str, scope: &Scope) -> Result<BitVector, SimulationError> {
        let port = self.port(port)?.clone();
        let bits = self.backend.get_value(&port, scope)?;
        log::trace!("{}: get {} -> {}", self.circuit.name, port.name, bits);
        Ok(bits)
    }
}

/// Converts a runtime value to the width of `port`. Narrower bit-vectors are
/// zero-extended; anything that would lose bits is rejected.
fn coerce(port: &Port, value: &Value) -> Result<BitVector, SimulationError> {
    let out_of_range = |value: String| SimulationError::OutOfRange {
        port: port.name.clone(),
        value,
        width: port.width,
    };
    match value {
        Value::Bits(bits) if bits.width() <= port.width => Ok(bits.resize(port.width)),
        Value::Bits(bits) if bits.value().bits() <= port.width as u64 => Ok(bits.resize(port.width)),
        Value::Bits(bits) => Err(out_of_range(bits.to_string())),
        Value::Int(i) if BitVector::fits(i, port.width) => Ok(BitVector::from_int(i, port.width)),
        Value::Int(i) => Err(out_of_range(i.to_string())),
        Value::Bool(b) => Ok(BitVector::from_int(&BigInt::from(u8::from(*b)), port.width)),
        other => Err(SimulationError::InvalidValue {
            port: port.name.clone(),
            found: other.type_name(),
        }),
    }
}

/// Shared, lockable handle registered in an environment under its binding
/// name.
#[derive(Clone)]
pub struct AdapterRef {
    name: Arc<str>,
    handle: Arc<Mutex<SimulationHandle>>,
}

impl AdapterRef {
    pub fn new(name: impl Into<Arc<str>>, handle: SimulationHandle) -> Self {
        Self {
            name: name.into(),
            handle: Arc::new(Mutex::new(handle)),
        }
    }

    /// The binding name this adapter is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SimulationHandle>, SimulationError> {
        self.handle
            .lock()
            .map_err(|_| SimulationError::Poisoned(self.name.to_string()))
    }
}

impl PartialEq for AdapterRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for AdapterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AdapterRef").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{BackendCall, RecordingBackend};
    use test_case::test_case;

    fn handle() -> (SimulationHandle, Arc<Mutex<Vec<BackendCall>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let circuit = CircuitRef::new(
            Circuit::new("Dut", vec![Port::input("a", 4), Port::output("y", 4)]),
            RecordingBackend::factory(log.clone()),
        );
        (SimulationHandle::new(&circuit).unwrap(), log)
    }

    #[test]
    fn test_set_then_get_passes_port_through() {
        let (mut sim, log) = handle();
        sim.set_value("a", &Value::Int(5.into()), &Scope::new()).unwrap();
        let value = sim.get_value("a", &Scope::new()).unwrap();
        assert_eq!(value, BitVector::new(5u32, 4));
        sim.evaluate().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                BackendCall::Set {
                    port: "a".into(),
                    value: BitVector::new(5u32, 4)
                },
                BackendCall::Get {
                    port: "a".into(),
                    value: BitVector::new(5u32, 4)
                },
                BackendCall::Evaluate,
            ]
        );
    }

    #[test]
    fn test_unknown_port() {
        let (mut sim, _) = handle();
        let err = sim.get_value("nope", &Scope::new()).unwrap_err();
        assert_eq!(
            err,
            SimulationError::UnknownPort {
                circuit: "Dut".into(),
                port: "nope".into()
            }
        );
    }

    #[test]
    fn test_output_not_drivable() {
        let (mut sim, _) = handle();
        let err = sim.set_value("y", &Value::Int(1.into()), &Scope::new()).unwrap_err();
        assert!(matches!(err, SimulationError::NotAnInput { .. }));
    }

    #[test_case(Value::Int(15.into()), true ; "max int")]
    #[test_case(Value::Int(16.into()), false ; "int overflow")]
    #[test_case(Value::Int((-8).into()), true ; "negative in range")]
    #[test_case(Value::Bits(BitVector::new(3u32, 2)), true ; "narrow bits extend")]
    #[test_case(Value::Bits(BitVector::new(3u32, 8)), true ; "wide bits small value")]
    #[test_case(Value::Bits(BitVector::new(200u32, 8)), false ; "wide bits overflow")]
    #[test_case(Value::Str("x".into()), false ; "string")]
    fn test_coerce(value: Value, ok: bool) {
        let (mut sim, _) = handle();
        assert_eq!(sim.set_value("a", &value, &Scope::new()).is_ok(), ok);
    }

    #[test]
    fn test_scope_child() {
        let scope = Scope::new().child("u0").child("u1");
        assert_eq!(scope.path(), ["u0".to_string(), "u1".to_string()]);
        assert!(Scope::default().is_root());
    }
}
