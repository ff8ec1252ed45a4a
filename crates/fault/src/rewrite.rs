//! Body rewriting: attribute-style circuit access becomes explicit calls on
//! the simulation adapter.
//!
//! | source                | rewritten                                   |
//! |-----------------------|---------------------------------------------|
//! | `dut.port = e;`       | `__sim_C.set_value("port", e, Scope());`    |
//! | `dut.port`            | `__sim_C.get_value("port", Scope())`        |
//! | `dut.eval()`          | `__sim_C.evaluate()`                        |
//!
//! `eval` is reserved: a port literally named `eval` cannot be reached.

use crate::ir::{Definition, Expr, ExprKind, Span, Stmt, StmtKind};
use thiserror::Error;

/// Field name that means "advance the simulation" instead of a port.
pub const EVAL_FIELD: &str = "eval";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot rewrite `{statement}`: {reason}")]
pub struct UnsupportedStatementError {
    pub statement: String,
    pub reason: String,
    pub span: Span,
}

struct Rewriter<'a> {
    binding: Option<&'a str>,
}

impl Rewriter<'_> {
    fn error(&self, stmt: &Stmt, reason: impl Into<String>) -> UnsupportedStatementError {
        UnsupportedStatementError {
            statement: stmt.to_string().trim_end().to_string(),
            reason: reason.into(),
            span: stmt.span,
        }
    }

    fn binding(&self, stmt: &Stmt) -> Result<String, UnsupportedStatementError> {
        self.binding
            .map(str::to_string)
            .ok_or_else(|| self.error(stmt, "attribute access needs a simulation-bound parameter"))
    }

    /// Only `ident.field` is part of the grammar.
    fn check_base(&self, stmt: &Stmt, object: &Expr) -> Result<(), UnsupportedStatementError> {
        match &object.kind {
            ExprKind::Ident(_) => Ok(()),
            ExprKind::Attribute { .. } => Err(self.error(stmt, "nested attribute access")),
            _ => Err(self.error(stmt, format!("attribute on `{object}`"))),
        }
    }

    fn block(&self, body: Vec<Stmt>) -> Result<Vec<Stmt>, UnsupportedStatementError> {
        body.into_iter().map(|stmt| self.stmt(stmt)).collect()
    }

    fn stmt(&self, stmt: Stmt) -> Result<Stmt, UnsupportedStatementError> {
        let span = stmt.span;
        let kind = match &stmt.kind {
            StmtKind::Assign { targets, .. } if targets.len() > 1 => {
                return Err(self.error(&stmt, "multi-target assignment"));
            }
            StmtKind::Assign { targets, value } => {
                let Some(target) = targets.first() else {
                    return Err(self.error(&stmt, "assignment without a target"));
                };
                match &target.kind {
                    ExprKind::Attribute { object, field } => {
                        self.check_base(&stmt, object)?;
                        if field == EVAL_FIELD {
                            return Err(self.error(&stmt, "`eval` is reserved and cannot be assigned"));
                        }
                        StmtKind::SimSet {
                            binding: self.binding(&stmt)?,
                            port: field.clone(),
                            value: self.expr(&stmt, value.clone())?,
                            scope: Expr::call0("Scope", target.span),
                        }
                    }
                    ExprKind::Ident(_) => StmtKind::Assign {
                        targets: targets.clone(),
                        value: self.expr(&stmt, value.clone())?,
                    },
                    ExprKind::Tuple(_) => return Err(self.error(&stmt, "tuple destructuring")),
                    _ => return Err(self.error(&stmt, "assignment to an index or expression")),
                }
            }
            StmtKind::Let { name, value } => StmtKind::Let {
                name: name.clone(),
                value: self.expr(&stmt, value.clone())?,
            },
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => StmtKind::If {
                cond: self.expr(&stmt, cond.clone())?,
                then_body: self.block(then_body.clone())?,
                else_body: else_body.clone().map(|body| self.block(body)).transpose()?,
            },
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => StmtKind::For {
                var: var.clone(),
                start: self.expr(&stmt, start.clone())?,
                end: self.expr(&stmt, end.clone())?,
                body: self.block(body.clone())?,
            },
            StmtKind::Assert { cond, message } => StmtKind::Assert {
                cond: self.expr(&stmt, cond.clone())?,
                message: message.clone().map(|m| self.expr(&stmt, m)).transpose()?,
            },
            StmtKind::Return(value) => {
                StmtKind::Return(value.clone().map(|v| self.expr(&stmt, v)).transpose()?)
            }
            StmtKind::Expr(expr) => StmtKind::Expr(self.expr(&stmt, expr.clone())?),
            StmtKind::SimSet { .. } => return Ok(stmt),
        };
        Ok(Stmt::new(kind, span))
    }

    /// Rewrites children before their parent.
    fn expr(&self, stmt: &Stmt, expr: Expr) -> Result<Expr, UnsupportedStatementError> {
        let span = expr.span;
        let exprs = |items: Vec<Expr>| -> Result<Vec<Expr>, UnsupportedStatementError> {
            items.into_iter().map(|e| self.expr(stmt, e)).collect()
        };
        let kind = match expr.kind {
            ExprKind::Call { callee, args } => match *callee {
                Expr {
                    kind: ExprKind::Attribute { object, field },
                    ..
                } if field == EVAL_FIELD => {
                    self.check_base(stmt, &object)?;
                    if !args.is_empty() {
                        return Err(self.error(stmt, "`eval()` takes no arguments"));
                    }
                    ExprKind::SimEvaluate {
                        binding: self.binding(stmt)?,
                    }
                }
                callee => ExprKind::Call {
                    callee: Box::new(self.expr(stmt, callee)?),
                    args: exprs(args)?,
                },
            },
            ExprKind::Attribute { object, field } => {
                self.check_base(stmt, &object)?;
                if field == EVAL_FIELD {
                    return Err(self.error(stmt, "`eval` must be called, as in `dut.eval()`"));
                }
                ExprKind::SimGet {
                    binding: self.binding(stmt)?,
                    port: field,
                    scope: Box::new(Expr::call0("Scope", span)),
                }
            }
            ExprKind::List(items) => ExprKind::List(exprs(items)?),
            ExprKind::Tuple(items) => ExprKind::Tuple(exprs(items)?),
            ExprKind::Index { object, index } => ExprKind::Index {
                object: Box::new(self.expr(stmt, *object)?),
                index: Box::new(self.expr(stmt, *index)?),
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op,
                operand: Box::new(self.expr(stmt, *operand)?),
            },
            ExprKind::Binary { op, left, right } => ExprKind::Binary {
                op,
                left: Box::new(self.expr(stmt, *left)?),
                right: Box::new(self.expr(stmt, *right)?),
            },
            ExprKind::SimGet {
                binding,
                port,
                scope,
            } => ExprKind::SimGet {
                binding,
                port,
                scope: Box::new(self.expr(stmt, *scope)?),
            },
            kind @ (ExprKind::Int(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::Ident(_)
            | ExprKind::Const(_)
            | ExprKind::SimEvaluate { .. }) => kind,
        };
        Ok(Expr::new(kind, span))
    }
}

/// Rewrites a statement sequence against the adapter named `binding`.
pub fn rewrite_body(body: Vec<Stmt>, binding: Option<&str>) -> Result<Vec<Stmt>, UnsupportedStatementError> {
    Rewriter { binding }.block(body)
}

/// Rewrites the body of `definition`; name, doc, markers and parameters are
/// kept as they are.
pub fn rewrite_definition(
    definition: Definition,
    binding: Option<&str>,
) -> Result<Definition, UnsupportedStatementError> {
    let Definition {
        name,
        doc,
        markers,
        params,
        body,
        span,
    } = definition;
    Ok(Definition {
        name,
        doc,
        markers,
        params,
        body: rewrite_body(body, binding)?,
        span,
    })
}
