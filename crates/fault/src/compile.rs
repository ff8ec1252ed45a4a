//! Compiles IR into nested closures.
//!
//! Locals live in numbered frame slots assigned at compile time. A name bound
//! anywhere in a body (by `let`, `for` or assignment) is local throughout that
//! body, and reading it before it is bound is an error. Any other name is
//! looked up in the environment once, when the closure is built, so a
//! compiled function keeps the adapter it was compiled against even if the
//! environment later changes.

use crate::HashMap;
use crate::environment::Environment;
use crate::ir::{BinaryOp, Definition, Expr, ExprKind, Stmt, StmtKind};
use crate::simulation::AdapterRef;
use crate::value::{self, EvalError, NativeFunction, Value};
use num_bigint::BigInt;
use num_traits::One;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("attribute access `{0}` was not rewritten")]
    ResidualAttribute(String),
    #[error("adapter binding `{0}` is not defined")]
    MissingBinding(String),
    #[error("`{name}` is a {found}, not a simulation adapter")]
    NotAnAdapter { name: String, found: &'static str },
    #[error("invalid assignment target `{0}`")]
    InvalidTarget(String),
    #[error("function `{0}` is missing from the environment after compilation")]
    MissingFunction(String),
    #[error("marker `{marker}` is invalid: {reason}")]
    InvalidMarker { marker: String, reason: String },
}

/// Local variable storage of one call.
pub(crate) struct Frame {
    slots: Vec<Option<Value>>,
}

enum Flow {
    Next,
    Return(Value),
}

type ExprFn = Box<dyn Fn(&mut Frame) -> Result<Value, EvalError> + Send + Sync>;
type StmtFn = Box<dyn Fn(&mut Frame) -> Result<Flow, EvalError> + Send + Sync>;

struct Compiler<'env> {
    env: &'env Environment,
    locals: HashMap<String, usize>,
}

impl<'env> Compiler<'env> {
    fn new(env: &'env Environment) -> Self {
        Self {
            env,
            locals: HashMap::default(),
        }
    }

    fn declare(&mut self, name: &str) -> usize {
        let next = self.locals.len();
        *self.locals.entry(name.to_string()).or_insert(next)
    }

    /// Assigns slots to every name `body` binds, including nested blocks.
    fn declare_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Let { name, .. } => {
                    self.declare(name);
                }
                StmtKind::Assign { targets, .. } => {
                    for target in targets {
                        self.declare_target(target);
                    }
                }
                StmtKind::If {
                    then_body, else_body, ..
                } => {
                    self.declare_block(then_body);
                    if let Some(body) = else_body {
                        self.declare_block(body);
                    }
                }
                StmtKind::For { var, body, .. } => {
                    self.declare(var);
                    self.declare_block(body);
                }
                _ => {}
            }
        }
    }

    fn declare_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Ident(name) => {
                self.declare(name);
            }
            ExprKind::Tuple(items) => items.iter().for_each(|item| self.declare_target(item)),
            _ => {}
        }
    }

    fn adapter(&self, binding: &str) -> Result<AdapterRef, CompileError> {
        match self.env.lookup(binding) {
            Some(Value::Adapter(adapter)) => Ok(adapter.clone()),
            Some(other) => Err(CompileError::NotAnAdapter {
                name: binding.to_string(),
                found: other.type_name(),
            }),
            None => Err(CompileError::MissingBinding(binding.to_string())),
        }
    }

    fn exprs(&mut self, items: &[Expr]) -> Result<Vec<ExprFn>, CompileError> {
        items.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&mut self, expr: &Expr) -> Result<ExprFn, CompileError> {
        Ok(match &expr.kind {
            ExprKind::Int(value) => {
                let value = Value::Int(BigInt::from(value.clone()));
                Box::new(move |_| Ok(value.clone()))
            }
            ExprKind::Str(s) => {
                let value = Value::Str(s.clone());
                Box::new(move |_| Ok(value.clone()))
            }
            ExprKind::Bool(b) => {
                let b = *b;
                Box::new(move |_| Ok(Value::Bool(b)))
            }
            ExprKind::Const(value) => {
                let value = value.clone();
                Box::new(move |_| Ok(value.clone()))
            }
            ExprKind::Ident(name) => {
                if let Some(&slot) = self.locals.get(name) {
                    let name = name.clone();
                    Box::new(move |frame| {
                        frame.slots[slot]
                            .clone()
                            .ok_or_else(|| EvalError::UndefinedName(name.clone()))
                    })
                } else if let Some(value) = self.env.lookup(name) {
                    let value = value.clone();
                    Box::new(move |_| Ok(value.clone()))
                } else {
                    let name = name.clone();
                    Box::new(move |_| Err(EvalError::UndefinedName(name.clone())))
                }
            }
            ExprKind::List(items) => {
                let items = self.exprs(items)?;
                Box::new(move |frame| {
                    let values = items.iter().map(|f| f(frame)).collect::<Result<_, _>>()?;
                    Ok(Value::List(values))
                })
            }
            ExprKind::Tuple(items) => {
                let items = self.exprs(items)?;
                Box::new(move |frame| {
                    let values = items.iter().map(|f| f(frame)).collect::<Result<_, _>>()?;
                    Ok(Value::Tuple(values))
                })
            }
            ExprKind::Attribute { .. } => {
                return Err(CompileError::ResidualAttribute(expr.to_string()));
            }
            ExprKind::Call { callee, args } => {
                let callee = self.expr(callee)?;
                let args = self.exprs(args)?;
                Box::new(move |frame| {
                    let callee = callee(frame)?;
                    let args: Vec<Value> = args.iter().map(|f| f(frame)).collect::<Result<_, _>>()?;
                    match callee {
                        Value::Function(func) => func.call(&args),
                        other => Err(EvalError::NotCallable(other.type_name())),
                    }
                })
            }
            ExprKind::Index { object, index } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                Box::new(move |frame| {
                    let object = object(frame)?;
                    object.index(&index(frame)?)
                })
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let operand = self.expr(operand)?;
                Box::new(move |frame| value::unary(op, &operand(frame)?))
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                match op {
                    BinaryOp::And => Box::new(move |frame| {
                        Ok(Value::Bool(left(frame)?.truthy() && right(frame)?.truthy()))
                    }),
                    BinaryOp::Or => Box::new(move |frame| {
                        Ok(Value::Bool(left(frame)?.truthy() || right(frame)?.truthy()))
                    }),
                    _ => Box::new(move |frame| {
                        let left = left(frame)?;
                        value::binary(op, &left, &right(frame)?)
                    }),
                }
            }
            ExprKind::SimGet {
                binding,
                port,
                scope,
            } => {
                let adapter = self.adapter(binding)?;
                let port = port.clone();
                let scope = self.expr(scope)?;
                Box::new(move |frame| {
                    let scope = expect_scope(scope(frame)?)?;
                    let bits = adapter.lock()?.get_value(&port, &scope)?;
                    Ok(Value::Bits(bits))
                })
            }
            ExprKind::SimEvaluate { binding } => {
                let adapter = self.adapter(binding)?;
                Box::new(move |_| {
                    adapter.lock()?.evaluate()?;
                    Ok(Value::Unit)
                })
            }
        })
    }

    fn block(&mut self, body: &[Stmt]) -> Result<Vec<StmtFn>, CompileError> {
        body.iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn assign_target(&mut self, target: &Expr) -> Result<Target, CompileError> {
        match &target.kind {
            ExprKind::Ident(name) => Ok(Target::Slot(self.declare(name))),
            ExprKind::Tuple(items) => Ok(Target::Unpack(
                items
                    .iter()
                    .map(|item| self.assign_target(item))
                    .collect::<Result<_, _>>()?,
            )),
            ExprKind::Attribute { .. } => Err(CompileError::ResidualAttribute(target.to_string())),
            _ => Err(CompileError::InvalidTarget(target.to_string())),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<StmtFn, CompileError> {
        Ok(match &stmt.kind {
            StmtKind::Let { name, value } => {
                let value = self.expr(value)?;
                let slot = self.declare(name);
                Box::new(move |frame| {
                    frame.slots[slot] = Some(value(frame)?);
                    Ok(Flow::Next)
                })
            }
            StmtKind::Assign { targets, value } => {
                let value = self.expr(value)?;
                let targets: Vec<Target> = targets
                    .iter()
                    .map(|t| self.assign_target(t))
                    .collect::<Result<_, _>>()?;
                Box::new(move |frame| {
                    let value = value(frame)?;
                    for target in &targets {
                        target.store(frame, value.clone())?;
                    }
                    Ok(Flow::Next)
                })
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = self.expr(cond)?;
                let then_body = self.block(then_body)?;
                let else_body = match else_body {
                    Some(body) => self.block(body)?,
                    None => Vec::new(),
                };
                Box::new(move |frame| {
                    if cond(frame)?.truthy() {
                        run(&then_body, frame)
                    } else {
                        run(&else_body, frame)
                    }
                })
            }
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => {
                let start = self.expr(start)?;
                let end = self.expr(end)?;
                let slot = self.declare(var);
                let body = self.block(body)?;
                Box::new(move |frame| {
                    let mut i = start(frame)?.expect_int()?;
                    let end = end(frame)?.expect_int()?;
                    while i < end {
                        frame.slots[slot] = Some(Value::Int(i.clone()));
                        if let Flow::Return(value) = run(&body, frame)? {
                            return Ok(Flow::Return(value));
                        }
                        i += BigInt::one();
                    }
                    Ok(Flow::Next)
                })
            }
            StmtKind::Assert { cond, message } => {
                let source = cond.to_string();
                let cond = self.expr(cond)?;
                let message = message.as_ref().map(|m| self.expr(m)).transpose()?;
                Box::new(move |frame| {
                    if cond(frame)?.truthy() {
                        return Ok(Flow::Next);
                    }
                    let text = match &message {
                        Some(message) => message(frame)?.to_string(),
                        None => source.clone(),
                    };
                    Err(EvalError::AssertionFailed(text))
                })
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|v| self.expr(v)).transpose()?;
                Box::new(move |frame| {
                    let value = match &value {
                        Some(value) => value(frame)?,
                        None => Value::Unit,
                    };
                    Ok(Flow::Return(value))
                })
            }
            StmtKind::Expr(expr) => {
                let expr = self.expr(expr)?;
                Box::new(move |frame| {
                    expr(frame)?;
                    Ok(Flow::Next)
                })
            }
            StmtKind::SimSet {
                binding,
                port,
                value,
                scope,
            } => {
                let adapter = self.adapter(binding)?;
                let port = port.clone();
                let value = self.expr(value)?;
                let scope = self.expr(scope)?;
                Box::new(move |frame| {
                    let value = value(frame)?;
                    let scope = expect_scope(scope(frame)?)?;
                    adapter.lock()?.set_value(&port, &value, &scope)?;
                    Ok(Flow::Next)
                })
            }
        })
    }
}

enum Target {
    Slot(usize),
    Unpack(Vec<Target>),
}

impl Target {
    fn store(&self, frame: &mut Frame, value: Value) -> Result<(), EvalError> {
        match self {
            Target::Slot(slot) => frame.slots[*slot] = Some(value),
            Target::Unpack(targets) => {
                let items = match value {
                    Value::Tuple(items) | Value::List(items) => items,
                    other => {
                        return Err(EvalError::Type {
                            expected: "tuple",
                            found: other.type_name(),
                        });
                    }
                };
                if items.len() != targets.len() {
                    return Err(EvalError::Unsupported(format!(
                        "cannot unpack {} values into {} targets",
                        items.len(),
                        targets.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    target.store(frame, item)?;
                }
            }
        }
        Ok(())
    }
}

fn expect_scope(value: Value) -> Result<crate::simulation::Scope, EvalError> {
    match value {
        Value::Scope(scope) => Ok(scope),
        other => Err(EvalError::Type {
            expected: "Scope",
            found: other.type_name(),
        }),
    }
}

fn run(body: &[StmtFn], frame: &mut Frame) -> Result<Flow, EvalError> {
    for stmt in body {
        if let Flow::Return(value) = stmt(frame)? {
            return Ok(Flow::Return(value));
        }
    }
    Ok(Flow::Next)
}

/// A definition compiled against one environment.
pub struct CompiledFunction {
    name: String,
    params: Vec<String>,
    slots: usize,
    body: Vec<StmtFn>,
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

impl CompiledFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Runs the body with `args` bound to the parameters in order.
    pub fn call(&self, args: &[Value]) -> Result<Value, EvalError> {
        if args.len() != self.params.len() {
            return Err(EvalError::Arity {
                name: self.name.clone(),
                expected: self.params.len(),
                found: args.len(),
            });
        }
        let mut frame = Frame {
            slots: vec![None; self.slots],
        };
        for (slot, arg) in args.iter().enumerate() {
            frame.slots[slot] = Some(arg.clone());
        }
        match run(&self.body, &mut frame)? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(Value::Unit),
        }
    }

    /// Wraps the function as a callable environment value.
    pub fn into_native(self) -> NativeFunction {
        let name = self.name.clone();
        let function = Arc::new(self);
        NativeFunction::new(name, move |args| function.call(args))
    }
}

/// Compiles `definition`, resolving free names and adapter bindings in `env`.
pub fn compile_definition(definition: &Definition, env: &Environment) -> Result<CompiledFunction, CompileError> {
    let mut compiler = Compiler::new(env);
    for param in &definition.params {
        compiler.declare(&param.name);
    }
    compiler.declare_block(&definition.body);
    let body = compiler.block(&definition.body)?;
    Ok(CompiledFunction {
        name: definition.name.clone(),
        params: definition.params.iter().map(|p| p.name.clone()).collect(),
        slots: compiler.locals.len(),
        body,
    })
}

/// Evaluates a standalone expression in `env`.
pub fn evaluate(expr: &Expr, env: &Environment) -> Result<Value, EvalError> {
    let mut compiler = Compiler::new(env);
    let compiled = compiler
        .expr(expr)
        .map_err(|err| EvalError::Unsupported(err.to_string()))?;
    let mut frame = Frame {
        slots: vec![None; compiler.locals.len()],
    };
    compiled(&mut frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_definition, parse_expr};
    use test_case::test_case;

    fn call(src: &str, args: &[Value]) -> Result<Value, EvalError> {
        let def = parse_definition(src).unwrap();
        let env = Environment::with_prelude();
        compile_definition(&def, &env).unwrap().call(args)
    }

    #[test_case("1 + 2 * 3", Value::from(7) ; "precedence")]
    #[test_case("BitVector(15, 4) + 1", Value::Bits(crate::bitvector::BitVector::zero(4)) ; "wrapping")]
    #[test_case("len([1, 2, 3])", Value::from(3) ; "builtin call")]
    #[test_case("(1, 2)[1]", Value::from(2) ; "tuple index")]
    #[test_case("false && missing", Value::Bool(false) ; "short circuit")]
    fn test_evaluate(src: &str, expected: Value) {
        let expr = parse_expr(src).unwrap();
        assert_eq!(evaluate(&expr, &Environment::with_prelude()).unwrap(), expected);
    }

    #[test]
    fn test_undefined_name_at_run_time() {
        let expr = parse_expr("missing + 1").unwrap();
        assert_eq!(
            evaluate(&expr, &Environment::new()),
            Err(EvalError::UndefinedName("missing".into()))
        );
    }

    #[test]
    fn test_loop_and_return() {
        let src = "fn f(n: Random(8)) { let acc = 0; for i in 0..n { acc = acc + i; } return acc; }";
        assert_eq!(call(src, &[Value::from(5)]).unwrap(), Value::from(10));
    }

    #[test]
    fn test_early_return_from_loop() {
        let src = "fn f() { for i in 0..10 { if i == 3 { return i; } } return -1; }";
        assert_eq!(call(src, &[]).unwrap(), Value::from(3));
    }

    #[test]
    fn test_tuple_unpack() {
        let src = "fn f() { (a, b) = (1, 2); return b - a; }";
        assert_eq!(call(src, &[]).unwrap(), Value::from(1));
    }

    #[test]
    fn test_local_bound_later_in_loop_body() {
        let src = "fn f() { for i in 0..2 { if i == 1 { assert prev == 0; } let prev = i; } }";
        assert_eq!(call(src, &[]).unwrap(), Value::Unit);

        let src = "fn g() { let acc = 0; for i in 0..3 { if i > 0 { acc = acc + last; } last = i; } return acc; }";
        assert_eq!(call(src, &[]).unwrap(), Value::from(1));
    }

    #[test]
    fn test_local_shadows_global_in_whole_body() {
        let src = "fn f() { for i in 0..2 { if i == 1 { return len; } let len = 7; } }";
        assert_eq!(call(src, &[]).unwrap(), Value::from(7));

        let err = call("fn f() { let x = len; let len = 1; }", &[]).unwrap_err();
        assert_eq!(err, EvalError::UndefinedName("len".into()));
    }

    #[test]
    fn test_unpack_targets_declared_up_front() {
        let src = "fn f() { for i in 0..2 { if i == 1 { return a + b; } (a, b) = (i + 1, 10); } }";
        assert_eq!(call(src, &[]).unwrap(), Value::from(11));
    }

    #[test]
    fn test_assert_message() {
        let err = call("fn f(x: Random(1)) { assert x == 1, \"x was \" + \"zero\"; }", &[Value::from(0)])
            .unwrap_err();
        assert_eq!(err, EvalError::AssertionFailed("x was zero".into()));
        let err = call("fn f(x: Random(1)) { assert x == 1; }", &[Value::from(0)]).unwrap_err();
        assert_eq!(err, EvalError::AssertionFailed("x == 1".into()));
    }

    #[test]
    fn test_arity_checked() {
        let err = call("fn f(a: Random(1)) {}", &[]).unwrap_err();
        assert!(matches!(err, EvalError::Arity { expected: 1, found: 0, .. }));
    }

    #[test]
    fn test_residual_attribute_rejected() {
        let def = parse_definition("fn f(d: C) { d.x = 1; }").unwrap();
        let err = compile_definition(&def, &Environment::new()).unwrap_err();
        assert_eq!(err, CompileError::ResidualAttribute("d.x".into()));
    }

    #[test]
    fn test_missing_binding_rejected() {
        let def = crate::rewrite::rewrite_definition(
            parse_definition("fn f(d: C) { d.eval(); }").unwrap(),
            Some("__sim_C"),
        )
        .unwrap();
        let err = compile_definition(&def, &Environment::new()).unwrap_err();
        assert_eq!(err, CompileError::MissingBinding("__sim_C".into()));
    }
}
