//! Lexical environment in which annotations are evaluated and rewritten
//! definitions are compiled.

use crate::HashMap;
use crate::bitvector::{BitVector, MAX_WIDTH};
use crate::circuit::CircuitRef;
use crate::resolve::TypeDescriptor;
use crate::simulation::Scope;
use crate::synth::{ParametrizeMarker, RandomStrategy};
use crate::value::{EvalError, NativeFunction, Value};
use num_bigint::BigInt;
use num_traits::Num;

/// Global and local bindings. Locals shadow globals.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    globals: HashMap<String, Value>,
    locals: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// An environment holding the builtins test definitions can refer to:
    /// `Random`, `Uniform`, `BitVector`, `Scope`, `parametrize`, `int` and
    /// `len`.
    pub fn with_prelude() -> Self {
        let mut env = Self::new();
        env.install_runtime();
        env.define_global("Random", Value::Function(NativeFunction::new("Random", random)));
        env.define_global("Uniform", Value::Strategy(RandomStrategy::Uniform));
        env.define_global("int", Value::Function(NativeFunction::new("int", int)));
        env.define_global("len", Value::Function(NativeFunction::new("len", len)));
        env
    }

    /// Defines the constructors a rewritten definition needs at run time.
    pub fn install_runtime(&mut self) {
        self.define_global("BitVector", Value::Function(NativeFunction::new("BitVector", bitvector)));
        self.define_global("Scope", Value::Function(NativeFunction::new("Scope", scope)));
        self.define_global(
            "parametrize",
            Value::Function(NativeFunction::new("parametrize", parametrize)),
        );
    }

    /// A copy whose bindings can change without affecting `self`.
    pub fn isolated(&self) -> Self {
        self.clone()
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Binds a circuit under its own name.
    pub fn define_circuit(&mut self, circuit: CircuitRef) {
        self.define_global(circuit.name().to_string(), Value::Circuit(circuit));
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// All visible names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .globals
            .keys()
            .chain(self.locals.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn argument(name: &str, reason: impl Into<String>) -> EvalError {
    EvalError::Argument {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn random(args: &[Value]) -> Result<Value, EvalError> {
    arity("Random", args, 1)?;
    let width = args[0].expect_usize()?;
    if width == 0 {
        return Err(argument("Random", "width must be positive"));
    }
    if width > MAX_WIDTH {
        return Err(argument("Random", format!("width {width} exceeds {MAX_WIDTH}")));
    }
    Ok(Value::Type(TypeDescriptor::Random { width }))
}

fn bitvector(args: &[Value]) -> Result<Value, EvalError> {
    arity("BitVector", args, 2)?;
    let width = args[1].expect_usize()?;
    if width > MAX_WIDTH {
        return Err(argument("BitVector", format!("width {width} exceeds {MAX_WIDTH}")));
    }
    let value = args[0].expect_int()?;
    if !BitVector::fits(&value, width) {
        return Err(argument("BitVector", format!("{value} does not fit in {width} bits")));
    }
    Ok(Value::Bits(BitVector::from_int(&value, width)))
}

fn scope(args: &[Value]) -> Result<Value, EvalError> {
    let mut scope = Scope::new();
    for arg in args {
        match arg {
            Value::Str(part) => scope = scope.child(part.as_str()),
            other => {
                return Err(EvalError::Type {
                    expected: "str",
                    found: other.type_name(),
                });
            }
        }
    }
    Ok(Value::Scope(scope))
}

fn parametrize(args: &[Value]) -> Result<Value, EvalError> {
    arity("parametrize", args, 2)?;
    let param = match &args[0] {
        Value::Str(param) => param.clone(),
        other => {
            return Err(EvalError::Type {
                expected: "str",
                found: other.type_name(),
            });
        }
    };
    let values = match &args[1] {
        Value::List(values) | Value::Tuple(values) => values.clone(),
        other => {
            return Err(EvalError::Type {
                expected: "list",
                found: other.type_name(),
            });
        }
    };
    Ok(Value::Marker(ParametrizeMarker { param, values }))
}

fn int(args: &[Value]) -> Result<Value, EvalError> {
    arity("int", args, 1)?;
    match &args[0] {
        Value::Str(s) => {
            let s = s.trim();
            let parsed = match s.get(..2) {
                Some("0x") => BigInt::from_str_radix(&s[2..], 16),
                Some("0b") => BigInt::from_str_radix(&s[2..], 2),
                _ => BigInt::from_str_radix(s, 10),
            };
            parsed
                .map(Value::Int)
                .map_err(|_| argument("int", format!("invalid literal `{s}`")))
        }
        other => other.expect_int().map(Value::Int),
    }
}

fn len(args: &[Value]) -> Result<Value, EvalError> {
    arity("len", args, 1)?;
    let len = match &args[0] {
        Value::List(items) | Value::Tuple(items) => items.len(),
        Value::Str(s) => s.chars().count(),
        Value::Bits(bits) => bits.width(),
        other => {
            return Err(EvalError::Type {
                expected: "sized value",
                found: other.type_name(),
            });
        }
    };
    Ok(Value::Int(len.into()))
}
