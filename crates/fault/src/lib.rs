mod bitvector;
mod circuit;
mod compile;
mod config;
mod driver;
mod environment;
mod error;
mod ir;
mod parser;
pub mod process;
mod resolve;
mod rewrite;
mod simulation;
mod synth;
mod value;

pub(crate) use fxhash::FxHashMap as HashMap;

pub use bitvector::{BitVector, MAX_WIDTH};
pub use circuit::{
    BackendCall, BackendError, BackendFactory, Circuit, CircuitRef, Direction, Port, RecordingBackend,
    SimulatorBackend,
};
pub use compile::{CompileError, CompiledFunction, compile_definition, evaluate};
pub use config::{CONFIG_FILE, ConfigError, FaultConfig, ProcessSection, SynthesisSection};
pub use driver::{Case, PARAMETRIZE, SynthesisBuilder, SynthesizedTest, TestReport, synthesize_source};
pub use environment::Environment;
pub use error::FaultError;
pub use ir::{BinaryOp, Definition, Expr, ExprKind, Marker, Param, Span, Stmt, StmtKind, UnaryOp};
pub use parser::{ParseError, parse_definition, parse_expr, parse_module};
pub use process::{CompletedProcess, DisplayMode, ProcessError, RunOptions};
pub use resolve::{ResolutionError, TypeDescriptor, TypeTable, resolve_types};
pub use rewrite::{EVAL_FIELD, UnsupportedStatementError, rewrite_body, rewrite_definition};
pub use simulation::{AdapterRef, Scope, SimulationError, SimulationHandle};
pub use synth::{
    AdapterBinding, ParametrizeMarker, RandomStrategy, Synthesis, SynthesisError, SynthesisOptions,
    UnsupportedTypeError, VariantSet, binding_name, synthesize,
};
pub use value::{EvalError, NativeFunction, Value};
