use crate::compile::CompileError;
use crate::config::ConfigError;
use crate::parser::ParseError;
use crate::process::ProcessError;
use crate::resolve::ResolutionError;
use crate::rewrite::UnsupportedStatementError;
use crate::synth::SynthesisError;
use crate::value::EvalError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaultError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    UnsupportedStatement(#[from] UnsupportedStatementError),

    /// The rewritten definition did not compile. This is an internal defect,
    /// never a user error.
    #[error("recompiling `{function}` failed: {source}")]
    Recompilation {
        function: String,
        source: CompileError,
    },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
