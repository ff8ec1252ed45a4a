use crate::value::Value;
use num_bigint::BigUint;
use std::fmt::{self, Display, Write as _};

/// Byte range of a construct in the definition source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn join(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

/// One test-function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub doc: Option<String>,
    pub markers: Vec<Marker>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub annotation: Expr,
    pub span: Span,
}

/// `#[name(args)]` placed in front of a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub name: String,
    pub args: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::BitAnd => "&",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    /// Binding strength; higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 10,
            BinaryOp::And => 20,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => 30,
            BinaryOp::BitOr => 40,
            BinaryOp::BitXor => 50,
            BinaryOp::BitAnd => 60,
            BinaryOp::Shl | BinaryOp::Shr => 70,
            BinaryOp::Add | BinaryOp::Sub => 80,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(BigUint),
    Str(String),
    Bool(bool),
    Ident(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Attribute {
        object: Box<Expr>,
        field: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// A value computed during synthesis and spliced into the definition.
    Const(Value),
    /// `binding.get_value("port", scope)`
    SimGet {
        binding: String,
        port: String,
        scope: Box<Expr>,
    },
    /// `binding.evaluate()`
    SimEvaluate {
        binding: String,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Ident(name.into()), span)
    }

    /// A zero-argument call of a global constructor, e.g. `Scope()`.
    pub fn call0(callee: &str, span: Span) -> Self {
        Self::new(
            ExprKind::Call {
                callee: Box::new(Self::ident(callee, span)),
                args: Vec::new(),
            },
            span,
        )
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        value: Expr,
    },
    /// `t1 = t2 = ... = value`; `targets` holds every left-hand side.
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        var: String,
        start: Expr,
        end: Expr,
        body: Vec<Stmt>,
    },
    Assert {
        cond: Expr,
        message: Option<Expr>,
    },
    Return(Option<Expr>),
    Expr(Expr),
    /// `binding.set_value("port", value, scope);`
    SimSet {
        binding: String,
        port: String,
        value: Expr,
        scope: Expr,
    },
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Writes `s` as a string literal the lexer reads back unchanged.
pub(crate) fn write_string(f: &mut impl fmt::Write, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

impl Expr {
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8) -> fmt::Result {
        match &self.kind {
            ExprKind::Binary { op, .. } if op.precedence() <= parent => write!(f, "({self})"),
            _ => write!(f, "{self}"),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Int(v) => write!(f, "{v}"),
            ExprKind::Str(s) => write_string(f, s),
            ExprKind::Bool(b) => write!(f, "{b}"),
            ExprKind::Ident(name) => f.write_str(name),
            ExprKind::List(items) => {
                f.write_char('[')?;
                write_list(f, items)?;
                f.write_char(']')
            }
            ExprKind::Tuple(items) => {
                f.write_char('(')?;
                write_list(f, items)?;
                if items.len() == 1 {
                    f.write_char(',')?;
                }
                f.write_char(')')
            }
            ExprKind::Attribute { object, field } => write!(f, "{object}.{field}"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                write_list(f, args)?;
                f.write_char(')')
            }
            ExprKind::Index { object, index } => write!(f, "{object}[{index}]"),
            ExprKind::Unary { op, operand } => {
                f.write_str(op.symbol())?;
                match operand.kind {
                    ExprKind::Binary { .. } => write!(f, "({operand})"),
                    _ => write!(f, "{operand}"),
                }
            }
            ExprKind::Binary { op, left, right } => {
                // Left operands of equal precedence need no parentheses.
                left.fmt_operand(f, op.precedence() - 1)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f, op.precedence())
            }
            ExprKind::Const(value) => write!(f, "{}", value.to_source()),
            ExprKind::SimGet {
                binding,
                port,
                scope,
            } => {
                write!(f, "{binding}.get_value(")?;
                write_string(f, port)?;
                write!(f, ", {scope})")
            }
            ExprKind::SimEvaluate { binding } => write!(f, "{binding}.evaluate()"),
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], indent: usize) -> fmt::Result {
    f.write_str("{\n")?;
    for stmt in body {
        stmt.fmt_indented(f, indent + 1)?;
    }
    write!(f, "{}}}", "    ".repeat(indent))
}

impl Stmt {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "    ".repeat(indent);
        f.write_str(&pad)?;
        match &self.kind {
            StmtKind::Let { name, value } => writeln!(f, "let {name} = {value};"),
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    write!(f, "{target} = ")?;
                }
                writeln!(f, "{value};")
            }
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                write!(f, "if {cond} ")?;
                write_block(f, then_body, indent)?;
                if let Some(else_body) = else_body {
                    f.write_str(" else ")?;
                    write_block(f, else_body, indent)?;
                }
                f.write_char('\n')
            }
            StmtKind::For {
                var,
                start,
                end,
                body,
            } => {
                write!(f, "for {var} in {start}..{end} ")?;
                write_block(f, body, indent)?;
                f.write_char('\n')
            }
            StmtKind::Assert { cond, message } => match message {
                Some(message) => writeln!(f, "assert {cond}, {message};"),
                None => writeln!(f, "assert {cond};"),
            },
            StmtKind::Return(Some(value)) => writeln!(f, "return {value};"),
            StmtKind::Return(None) => writeln!(f, "return;"),
            StmtKind::Expr(expr) => writeln!(f, "{expr};"),
            StmtKind::SimSet {
                binding,
                port,
                value,
                scope,
            } => {
                write!(f, "{binding}.set_value(")?;
                write_string(f, port)?;
                writeln!(f, ", {value}, {scope});")
            }
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#[{}", self.name)?;
        if !self.args.is_empty() {
            f.write_char('(')?;
            write_list(f, &self.args)?;
            f.write_char(')')?;
        }
        f.write_char(']')
    }
}

impl Display for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(doc) = &self.doc {
            for line in doc.lines() {
                writeln!(f, "/// {line}")?;
            }
        }
        for marker in &self.markers {
            writeln!(f, "{marker}")?;
        }
        write!(f, "fn {}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", param.name, param.annotation)?;
        }
        f.write_str(") ")?;
        write_block(f, &self.body, 0)?;
        f.write_char('\n')
    }
}
