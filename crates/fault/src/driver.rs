//! Synthesis driver: resolve, synthesize, rewrite and recompile one test
//! definition into a [`SynthesizedTest`].

use crate::compile::{self, CompileError};
use crate::environment::Environment;
use crate::error::FaultError;
use crate::ir::{Definition, Expr, ExprKind, Marker};
use crate::parser;
use crate::resolve::resolve_types;
use crate::rewrite::rewrite_definition;
use crate::synth::{AdapterBinding, ParametrizeMarker, RandomStrategy, SynthesisOptions, synthesize};
use crate::value::{EvalError, NativeFunction, Value};
use itertools::Itertools;

/// Name of the runner marker carrying one parameter's values.
pub const PARAMETRIZE: &str = "parametrize";

/// Builder for a [`SynthesizedTest`].
pub struct SynthesisBuilder {
    definition: Definition,
    options: SynthesisOptions,
}

impl SynthesisBuilder {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            options: SynthesisOptions::default(),
        }
    }

    /// Number of samples per random parameter (default 16).
    pub fn num_tests(mut self, num_tests: usize) -> Self {
        self.options.num_tests = num_tests;
        self
    }

    pub fn random_strategy(mut self, strategy: RandomStrategy) -> Self {
        self.options.random_strategy = strategy;
        self
    }

    /// Makes sampling reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    pub fn options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    /// Synthesizes the test in an isolated copy of `env`; `env` itself is
    /// never modified.
    pub fn build(self, env: &Environment) -> Result<SynthesizedTest, FaultError> {
        let Self {
            mut definition,
            options,
        } = self;
        let name = definition.name.clone();
        log::debug!("synthesizing `{name}` ({} tests per random parameter)", options.num_tests);

        let mut env = env.isolated();
        let table = resolve_types(&definition, &env)?;
        let synthesis = synthesize(&table, &options, &mut env)?;

        definition.markers.retain(|marker| marker.name != PARAMETRIZE);
        let span = definition.span;
        definition
            .markers
            .extend(synthesis.markers.iter().map(|marker| Marker {
                name: PARAMETRIZE.to_string(),
                args: vec![
                    Expr::new(ExprKind::Const(Value::Str(marker.param.clone())), span),
                    Expr::new(ExprKind::Const(Value::List(marker.values.clone())), span),
                ],
                span,
            }));

        let binding = synthesis.binding.as_ref().map(|b| b.name.as_str());
        let rewritten = rewrite_definition(definition, binding)?;
        log::debug!("rewritten definition:\n{rewritten}");

        env.install_runtime();
        let recompilation = |source: CompileError| FaultError::Recompilation {
            function: name.clone(),
            source,
        };
        let compiled = compile::compile_definition(&rewritten, &env).map_err(recompilation)?;
        env.define_global(name.clone(), Value::Function(compiled.into_native()));
        let function = match env.lookup(&name) {
            Some(Value::Function(function)) => function.clone(),
            _ => return Err(recompilation(CompileError::MissingFunction(name.clone()))),
        };

        let markers = rewritten
            .markers
            .iter()
            .filter(|marker| marker.name == PARAMETRIZE)
            .map(|marker| evaluate_marker(marker, &env))
            .collect::<Result<Vec<_>, _>>()
            .map_err(recompilation)?;

        Ok(SynthesizedTest {
            params: rewritten.params.iter().map(|p| p.name.clone()).collect(),
            definition: rewritten,
            markers,
            adapter: synthesis.binding,
            function,
            environment: env,
        })
    }
}

fn evaluate_marker(marker: &Marker, env: &Environment) -> Result<ParametrizeMarker, CompileError> {
    let invalid = |reason: String| CompileError::InvalidMarker {
        marker: marker.to_string(),
        reason,
    };
    let call = Expr::new(
        ExprKind::Call {
            callee: Box::new(Expr::ident(marker.name.clone(), marker.span)),
            args: marker.args.clone(),
        },
        marker.span,
    );
    match compile::evaluate(&call, env) {
        Ok(Value::Marker(marker)) => Ok(marker),
        Ok(other) => Err(invalid(format!("evaluated to a {}", other.type_name()))),
        Err(err) => Err(invalid(err.to_string())),
    }
}

/// One invocation of a synthesized test.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    /// `name[a0-dut0]`, one `param index` pair per parameter.
    pub id: String,
    pub args: Vec<Value>,
}

/// Outcome of [`SynthesizedTest::run_all`].
#[derive(Debug, Default)]
pub struct TestReport {
    pub passed: Vec<String>,
    pub failed: Vec<(String, EvalError)>,
}

impl TestReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len()
    }
}

/// A test definition after synthesis. To callers it looks like the original
/// function: same name, same documentation, same parameters.
#[derive(Debug)]
pub struct SynthesizedTest {
    params: Vec<String>,
    definition: Definition,
    markers: Vec<ParametrizeMarker>,
    adapter: Option<AdapterBinding>,
    function: NativeFunction,
    environment: Environment,
}

impl SynthesizedTest {
    pub fn builder(definition: Definition) -> SynthesisBuilder {
        SynthesisBuilder::new(definition)
    }

    /// Synthesizes with default options.
    pub fn new(definition: Definition, env: &Environment) -> Result<Self, FaultError> {
        SynthesisBuilder::new(definition).build(env)
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn doc(&self) -> Option<&str> {
        self.definition.doc.as_deref()
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn markers(&self) -> &[ParametrizeMarker] {
        &self.markers
    }

    /// The rewritten definition, including its `parametrize` markers.
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn adapter(&self) -> Option<&AdapterBinding> {
        self.adapter.as_ref()
    }

    /// The isolated environment the test was compiled in.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn function(&self) -> &NativeFunction {
        &self.function
    }

    /// Every combination of parameter values, parameters in declaration
    /// order and the last parameter varying fastest.
    pub fn cases(&self) -> Vec<Case> {
        let columns: Vec<Vec<(usize, &Value)>> = self
            .params
            .iter()
            .map(|param| {
                self.markers
                    .iter()
                    .find(|marker| &marker.param == param)
                    .map(|marker| marker.values.iter().enumerate().collect())
                    .unwrap_or_default()
            })
            .collect();

        if columns.is_empty() {
            return vec![Case {
                id: self.name().to_string(),
                args: Vec::new(),
            }];
        }

        columns
            .into_iter()
            .multi_cartesian_product()
            .map(|row| {
                let id = self
                    .params
                    .iter()
                    .zip(&row)
                    .map(|(param, (index, _))| format!("{param}{index}"))
                    .join("-");
                Case {
                    id: format!("{}[{id}]", self.name()),
                    args: row.into_iter().map(|(_, value)| value.clone()).collect(),
                }
            })
            .collect()
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        self.function.call(args)
    }

    pub fn run(&self, case: &Case) -> Result<Value, EvalError> {
        let result = self.call(&case.args);
        match &result {
            Ok(_) => log::trace!("{} passed", case.id),
            Err(err) => log::trace!("{} failed: {err}", case.id),
        }
        result
    }

    /// Runs every case in order, collecting failures instead of stopping.
    pub fn run_all(&self) -> TestReport {
        let mut report = TestReport::default();
        for case in self.cases() {
            match self.run(&case) {
                Ok(_) => report.passed.push(case.id),
                Err(err) => report.failed.push((case.id, err)),
            }
        }
        report
    }
}

/// Parses `source` and synthesizes every definition in it.
pub fn synthesize_source(
    source: &str,
    env: &Environment,
    options: &SynthesisOptions,
) -> Result<Vec<SynthesizedTest>, FaultError> {
    parser::parse_module(source)?
        .into_iter()
        .map(|definition| {
            SynthesizedTest::builder(definition)
                .options(options.clone())
                .build(env)
        })
        .collect()
}
