use crate::bitvector::{BitVector, MAX_WIDTH};
use crate::circuit::CircuitRef;
use crate::ir::{BinaryOp, UnaryOp, write_string};
use crate::resolve::TypeDescriptor;
use crate::simulation::{AdapterRef, Scope, SimulationError};
use crate::synth::{ParametrizeMarker, RandomStrategy};
use num_bigint::{BigInt, Sign};
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("name `{0}` is not defined")]
    UndefinedName(String),
    #[error("unsupported operand types for `{op}`: {left} and {right}")]
    Operands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },
    #[error("expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} is not callable")]
    NotCallable(&'static str),
    #[error("`{name}` takes {expected} argument(s) but {found} were given")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid argument to `{name}`: {reason}")]
    Argument { name: String, reason: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: BigInt, len: usize },
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    #[error("{0}")]
    Unsupported(String),
}

pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync;

/// A callable value: a prelude builtin or a compiled test function.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<Arc<str>>,
        func: impl Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        (self.func)(args)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && std::ptr::addr_eq(Arc::as_ptr(&self.func), Arc::as_ptr(&other.func))
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name)
    }
}

/// A runtime value of the test-definition language.
///
/// Derived equality is structural; the language-level `==` is numeric across
/// `Int` and `Bits` (see [`binary`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(BigInt),
    Bits(BitVector),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Scope(Scope),
    Type(TypeDescriptor),
    Strategy(RandomStrategy),
    Circuit(CircuitRef),
    Adapter(AdapterRef),
    Function(NativeFunction),
    Marker(ParametrizeMarker),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i.into())
    }
}

impl From<BitVector> for Value {
    fn from(bits: BitVector) -> Self {
        Value::Bits(bits)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit => "unit",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Bits(_) => "BitVector",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Scope(_) => "Scope",
            Value::Type(_) => "type",
            Value::Strategy(_) => "strategy",
            Value::Circuit(_) => "circuit",
            Value::Adapter(_) => "adapter",
            Value::Function(_) => "function",
            Value::Marker(_) => "marker",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Unit => false,
            Value::Bool(b) => *b,
            Value::Int(i) => !i.is_zero(),
            Value::Bits(bits) => !bits.is_zero(),
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Numeric view of integers, bit-vectors and booleans.
    pub fn as_int(&self) -> Option<BigInt> {
        match self {
            Value::Int(i) => Some(i.clone()),
            Value::Bits(bits) => Some(bits.to_bigint()),
            Value::Bool(b) => Some(BigInt::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn expect_int(&self) -> Result<BigInt, EvalError> {
        self.as_int().ok_or(EvalError::Type {
            expected: "int",
            found: self.type_name(),
        })
    }

    pub fn expect_usize(&self) -> Result<usize, EvalError> {
        let i = self.expect_int()?;
        i.to_usize().ok_or(EvalError::Argument {
            name: "usize".into(),
            reason: format!("{i} is not a valid size"),
        })
    }

    pub fn index(&self, index: &Value) -> Result<Value, EvalError> {
        let i = index.expect_int()?;
        let out_of_range = |len| EvalError::IndexOutOfRange {
            index: i.clone(),
            len,
        };
        match self {
            Value::List(items) | Value::Tuple(items) => i
                .to_usize()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| out_of_range(items.len())),
            Value::Bits(bits) => i
                .to_usize()
                .and_then(|i| bits.bit(i))
                .map(|b| Value::Int(BigInt::from(u8::from(b))))
                .ok_or_else(|| out_of_range(bits.width())),
            // Two's complement view, so negative integers have infinitely many set bits.
            Value::Int(value) => {
                let bit = i.to_u64().ok_or_else(|| out_of_range(0))?;
                Ok(Value::Int(BigInt::from(u8::from(value.bit(bit)))))
            }
            other => Err(EvalError::Type {
                expected: "indexable value",
                found: other.type_name(),
            }),
        }
    }

    /// Renders the value as an expression that evaluates back to it in the
    /// prelude environment.
    pub fn to_source(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write(&mut out, true);
        out
    }

    fn write(&self, out: &mut impl fmt::Write, quote: bool) -> fmt::Result {
        match self {
            Value::Unit => out.write_str("()"),
            Value::Bool(b) => write!(out, "{b}"),
            Value::Int(i) => write!(out, "{i}"),
            Value::Bits(bits) => write!(out, "{bits}"),
            Value::Str(s) if quote => write_string(out, s),
            Value::Str(s) => out.write_str(s),
            Value::List(items) => {
                out.write_char('[')?;
                write_items(out, items)?;
                out.write_char(']')
            }
            Value::Tuple(items) => {
                out.write_char('(')?;
                write_items(out, items)?;
                if items.len() == 1 {
                    out.write_char(',')?;
                }
                out.write_char(')')
            }
            Value::Scope(scope) => {
                out.write_str("Scope(")?;
                for (i, part) in scope.path().iter().enumerate() {
                    if i > 0 {
                        out.write_str(", ")?;
                    }
                    write_string(out, part)?;
                }
                out.write_char(')')
            }
            Value::Type(ty) => write!(out, "{ty}"),
            Value::Strategy(strategy) => write!(out, "{strategy}"),
            Value::Circuit(circuit) => out.write_str(circuit.name()),
            Value::Adapter(adapter) => out.write_str(adapter.name()),
            Value::Function(func) => out.write_str(func.name()),
            Value::Marker(marker) => {
                out.write_str("parametrize(")?;
                write_string(out, &marker.param)?;
                out.write_str(", [")?;
                write_items(out, &marker.values)?;
                out.write_str("])")
            }
        }
    }
}

fn write_items(out: &mut impl fmt::Write, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        item.write(out, true)?;
    }
    Ok(())
}

/// Strings display without quotes; everything else displays as source.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, false)
    }
}

fn operands(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::Operands {
        op: op.symbol(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

/// Amount for a left shift of an unbounded integer.
fn shift_amount(amount: &BigInt) -> Result<usize, EvalError> {
    match amount.to_usize() {
        Some(n) if n <= MAX_WIDTH => Ok(n),
        _ => Err(invalid_shift(amount)),
    }
}

/// Amount for shifts whose result cannot grow; anything past the operand
/// width shifts everything out.
fn saturating_shift_amount(amount: &BigInt) -> Result<usize, EvalError> {
    if amount.sign() == Sign::Minus {
        return Err(invalid_shift(amount));
    }
    Ok(amount.to_usize().unwrap_or(usize::MAX))
}

fn invalid_shift(amount: &BigInt) -> EvalError {
    EvalError::Argument {
        name: "shift".into(),
        reason: format!("invalid shift amount {amount}"),
    }
}

fn int_op(op: BinaryOp, a: &BigInt, b: &BigInt) -> Result<BigInt, EvalError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b.is_zero() => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Rem if b.is_zero() => return Err(EvalError::DivisionByZero),
        BinaryOp::Rem => a % b,
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::Shl => a << shift_amount(b)?,
        BinaryOp::Shr => a >> saturating_shift_amount(b)?,
        _ => return Err(EvalError::Unsupported(format!("`{}` on integers", op.symbol()))),
    })
}

fn bits_op(op: BinaryOp, a: &BitVector, b: &BitVector) -> Result<BitVector, EvalError> {
    let width = a.width().max(b.width());
    let (a, b) = (a.resize(width), b.resize(width));
    Ok(match op {
        BinaryOp::Add => a.add(&b),
        BinaryOp::Sub => a.sub(&b),
        BinaryOp::Mul => a.mul(&b),
        BinaryOp::Div => a.div(&b).ok_or(EvalError::DivisionByZero)?,
        BinaryOp::Rem => a.rem(&b).ok_or(EvalError::DivisionByZero)?,
        BinaryOp::BitAnd => a.and(&b),
        BinaryOp::BitOr => a.or(&b),
        BinaryOp::BitXor => a.xor(&b),
        BinaryOp::Shl => a.shl(saturating_shift_amount(&b.to_bigint())?),
        BinaryOp::Shr => a.shr(saturating_shift_amount(&b.to_bigint())?),
        _ => return Err(EvalError::Unsupported(format!("`{}` on bit-vectors", op.symbol()))),
    })
}

fn compare(op: BinaryOp, ordering: Ordering) -> bool {
    match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        _ => false,
    }
}

/// Applies a strict binary operator. `&&` and `||` short-circuit and are
/// handled by the compiler before reaching here.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinaryOp::*;
    match op {
        And => Ok(Value::Bool(left.truthy() && right.truthy())),
        Or => Ok(Value::Bool(left.truthy() || right.truthy())),
        Eq | Ne | Lt | Le | Gt | Ge => {
            let ordering = match (left, right) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => match (left.as_int(), right.as_int()) {
                    (Some(a), Some(b)) => Some(a.cmp(&b)),
                    _ => None,
                },
            };
            match (ordering, op) {
                (Some(ordering), _) => Ok(Value::Bool(compare(op, ordering))),
                (None, Eq) => Ok(Value::Bool(left == right)),
                (None, Ne) => Ok(Value::Bool(left != right)),
                (None, _) => Err(operands(op, left, right)),
            }
        }
        Add | Sub | Mul | Div | Rem | BitAnd | BitOr | BitXor | Shl | Shr => match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(op, a, b)?)),
            (Value::Bits(a), Value::Bits(b)) => Ok(Value::Bits(bits_op(op, a, b)?)),
            (Value::Bits(a), Value::Int(b)) => {
                let b = match op {
                    // Shift amounts are not truncated to the operand width.
                    Shl => return Ok(Value::Bits(a.shl(saturating_shift_amount(b)?))),
                    Shr => return Ok(Value::Bits(a.shr(saturating_shift_amount(b)?))),
                    _ => BitVector::from_int(b, a.width()),
                };
                Ok(Value::Bits(bits_op(op, a, &b)?))
            }
            (Value::Int(a), Value::Bits(b)) => {
                let a = BitVector::from_int(a, b.width());
                Ok(Value::Bits(bits_op(op, &a, b)?))
            }
            (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::Str(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) if op == Add => {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            _ => Err(operands(op, left, right)),
        },
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    match (op, operand) {
        (UnaryOp::Not, value) => Ok(Value::Bool(!value.truthy())),
        (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
        (UnaryOp::Neg, Value::Bits(bits)) => Ok(Value::Bits(bits.neg())),
        (UnaryOp::BitNot, Value::Int(i)) => Ok(Value::Int(!i)),
        (UnaryOp::BitNot, Value::Bits(bits)) => Ok(Value::Bits(bits.not())),
        (_, other) => Err(EvalError::Type {
            expected: "int or BitVector",
            found: other.type_name(),
        }),
    }
}
