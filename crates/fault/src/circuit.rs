use crate::bitvector::BitVector;
use crate::simulation::Scope;
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[serde(alias = "input")]
    In,
    #[serde(alias = "output")]
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Port {
    pub name: String,
    pub width: usize,
    pub direction: Direction,
}

impl Port {
    pub fn input(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            direction: Direction::In,
        }
    }

    pub fn output(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            direction: Direction::Out,
        }
    }
}

/// A hardware design under test: a name and its named ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Circuit {
    pub name: String,
    #[serde(default)]
    pub ports: Vec<Port>,
}

impl Circuit {
    pub fn new(name: impl Into<String>, ports: Vec<Port>) -> Self {
        Self {
            name: name.into(),
            ports,
        }
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, port) in self.ports.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            let dir = match port.direction {
                Direction::In => "In",
                Direction::Out => "Out",
            };
            write!(f, "{}: {}({})", port.name, dir, port.width)?;
        }
        f.write_str(")")
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend failed to instantiate `{circuit}`: {reason}")]
    Instantiate { circuit: String, reason: String },
    #[error("backend error on port `{port}`: {reason}")]
    Port { port: String, reason: String },
    #[error("backend evaluation failed: {0}")]
    Evaluate(String),
}

/// The three operations a circuit simulator must offer.
pub trait SimulatorBackend: Send {
    fn evaluate(&mut self) -> Result<(), BackendError>;
    fn set_value(&mut self, port: &Port, value: &BitVector, scope: &Scope) -> Result<(), BackendError>;
    fn get_value(&mut self, port: &Port, scope: &Scope) -> Result<BitVector, BackendError>;
}

/// Creates a fresh backend instance for a circuit.
pub trait BackendFactory: Send + Sync {
    fn instantiate(&self, circuit: &Circuit) -> Result<Box<dyn SimulatorBackend>, BackendError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&Circuit) -> Result<Box<dyn SimulatorBackend>, BackendError> + Send + Sync,
{
    fn instantiate(&self, circuit: &Circuit) -> Result<Box<dyn SimulatorBackend>, BackendError> {
        self(circuit)
    }
}

/// A circuit definition together with the means to simulate it.
///
/// This is what a simulation-bound parameter annotation evaluates to.
#[derive(Clone)]
pub struct CircuitRef {
    circuit: Arc<Circuit>,
    factory: Arc<dyn BackendFactory>,
}

impl CircuitRef {
    pub fn new(circuit: Circuit, factory: impl BackendFactory + 'static) -> Self {
        Self {
            circuit: Arc::new(circuit),
            factory: Arc::new(factory),
        }
    }

    pub fn with_factory(circuit: Arc<Circuit>, factory: Arc<dyn BackendFactory>) -> Self {
        Self { circuit, factory }
    }

    pub fn circuit(&self) -> &Arc<Circuit> {
        &self.circuit
    }

    pub fn name(&self) -> &str {
        &self.circuit.name
    }

    pub fn instantiate(&self) -> Result<Box<dyn SimulatorBackend>, BackendError> {
        self.factory.instantiate(&self.circuit)
    }
}

impl PartialEq for CircuitRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.circuit, &other.circuit)
    }
}

impl fmt::Debug for CircuitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CircuitRef").field(&self.circuit.name).finish()
    }
}

impl fmt::Display for CircuitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.circuit, f)
    }
}

/// One protocol call observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Evaluate,
    Set { port: String, value: BitVector },
    Get { port: String, value: BitVector },
}

/// A value-store backend that reads back the last value written to a port
/// (zero if never written). Backends built with a log record every call they
/// receive into it.
///
/// It performs no logic evaluation; it exists for dry runs and protocol
/// checks.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    values: crate::HashMap<String, BitVector>,
    log: Option<Arc<Mutex<Vec<BackendCall>>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose call log is shared with `log`.
    pub fn with_log(log: Arc<Mutex<Vec<BackendCall>>>) -> Self {
        Self {
            values: Default::default(),
            log: Some(log),
        }
    }

    /// A factory producing plain value stores that record nothing.
    pub fn store_factory() -> impl BackendFactory + 'static {
        |_: &Circuit| -> Result<Box<dyn SimulatorBackend>, BackendError> {
            Ok(Box::new(RecordingBackend::new()))
        }
    }

    /// A factory producing recording backends that all append to `log`.
    pub fn factory(log: Arc<Mutex<Vec<BackendCall>>>) -> impl BackendFactory + 'static {
        move |_: &Circuit| -> Result<Box<dyn SimulatorBackend>, BackendError> {
            Ok(Box::new(RecordingBackend::with_log(log.clone())))
        }
    }

    fn record(&self, call: BackendCall) {
        if let Some(Ok(mut log)) = self.log.as_ref().map(|log| log.lock()) {
            log.push(call);
        }
    }
}

impl SimulatorBackend for RecordingBackend {
    fn evaluate(&mut self) -> Result<(), BackendError> {
        self.record(BackendCall::Evaluate);
        Ok(())
    }

    fn set_value(&mut self, port: &Port, value: &BitVector, _scope: &Scope) -> Result<(), BackendError> {
        self.values.insert(port.name.clone(), value.clone());
        self.record(BackendCall::Set {
            port: port.name.clone(),
            value: value.clone(),
        });
        Ok(())
    }

    fn get_value(&mut self, port: &Port, _scope: &Scope) -> Result<BitVector, BackendError> {
        let value = self
            .values
            .get(&port.name)
            .cloned()
            .unwrap_or_else(|| BitVector::zero(port.width));
        self.record(BackendCall::Get {
            port: port.name.clone(),
            value: value.clone(),
        });
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adder() -> Circuit {
        Circuit::new(
            "Adder",
            vec![Port::input("a", 4), Port::input("b", 4), Port::output("out", 5)],
        )
    }

    #[test]
    fn test_display_like_port_listing() {
        assert_eq!(adder().to_string(), "Adder(a: In(4), b: In(4), out: Out(5))");
    }

    #[test]
    fn test_recording_backend_reads_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let circuit = adder();
        let mut backend = RecordingBackend::with_log(log.clone());
        let a = circuit.port("a").unwrap();
        let out = circuit.port("out").unwrap();
        backend.set_value(a, &BitVector::new(3u32, 4), &Scope::default()).unwrap();
        assert_eq!(backend.get_value(a, &Scope::default()).unwrap().to_u64(), Some(3));
        assert_eq!(backend.get_value(out, &Scope::default()).unwrap(), BitVector::zero(5));
        backend.evaluate().unwrap();
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_store_factory_keeps_values_without_log() {
        let circuit = adder();
        let factory = RecordingBackend::store_factory();
        let mut backend = factory.instantiate(&circuit).unwrap();
        let b = circuit.port("b").unwrap();
        backend.set_value(b, &BitVector::new(9u32, 4), &Scope::default()).unwrap();
        backend.evaluate().unwrap();
        assert_eq!(backend.get_value(b, &Scope::default()).unwrap().to_u64(), Some(9));
        assert!(RecordingBackend::new().log.is_none());
    }

    #[test]
    fn test_circuit_ref_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = CircuitRef::new(adder(), RecordingBackend::factory(log.clone()));
        let b = CircuitRef::new(adder(), RecordingBackend::factory(log));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
