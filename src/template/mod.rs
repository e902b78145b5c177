//! Text templates for download URLs, destination keys and conditions.
//!
//! The grammar is a small subset of Go's `text/template`:
//!
//! - `{{ .name }}`, `{{ .version }}`, `{{ .os }}`, `{{ .arch }}`, `{{ .bin }}`
//!   and `{{ .github }}` substitute fields of the [`Context`]
//! - string literals (`"..."` or `` `...` ``) and `true` / `false`
//! - helper calls (`{{ eq .os "linux" }}`), parenthesized sub-expressions
//!   and pipelines (`{{ .version | trimPrefix "v" }}`)
//! - `{{if ...}}`, `{{else if ...}}`, `{{else}}`, `{{end}}`
//! - `{{-` and `-}}` trim whitespace next to an action
//!
//! Templates are parsed once; references to unknown variables are rejected
//! at parse time. Rendering only reads the context.
//!
//! # Example
//!
//! ```
//! use s3_mirror::template::{Context, Template};
//!
//! let ctx = Context::new("kubectl", "v1.28.0", "linux", "amd64", "kubectl", "https://github.com/kubernetes/kubernetes");
//! let tpl = Template::parse("{{.bin}}/{{.version}}/{{.os}}/{{.arch}}/{{.bin}}").unwrap();
//! assert_eq!(tpl.render(&ctx).unwrap(), "kubectl/v1.28.0/linux/amd64/kubectl");
//! ```

mod funcs;
mod parse;

use parse::{Command, Node, Operand, Pipeline};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which step of template handling failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The template source is malformed.
    Parse,
    /// The template is well-formed but failed while rendering.
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Parse => f.write_str("parse"),
            Phase::Execute => f.write_str("execute"),
        }
    }
}

/// A template parse or render failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("template {phase} error: {message}")]
pub struct TemplateError {
    pub phase: Phase,
    pub message: String,
}

impl TemplateError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Parse,
            message: format!("at offset {offset}: {}", message.into()),
        }
    }

    pub(crate) fn execute(message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Execute,
            message: message.into(),
        }
    }
}

/// A variable available to templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Version,
    Os,
    Arch,
    Bin,
    Github,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Name,
        Field::Version,
        Field::Os,
        Field::Arch,
        Field::Bin,
        Field::Github,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Version => "version",
            Field::Os => "os",
            Field::Arch => "arch",
            Field::Bin => "bin",
            Field::Github => "github",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

/// The substitution context for one (version, os, arch, bin) combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    name: String,
    version: String,
    os: String,
    arch: String,
    bin: String,
    github: String,
}

impl Context {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        os: impl Into<String>,
        arch: impl Into<String>,
        bin: impl Into<String>,
        github: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            os: os.into(),
            arch: arch.into(),
            bin: bin.into(),
            github: github.into(),
        }
    }

    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Version => &self.version,
            Field::Os => &self.os,
            Field::Arch => &self.arch,
            Field::Bin => &self.bin,
            Field::Github => &self.github,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn os(&self) -> &str {
        &self.os
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn bin(&self) -> &str {
        &self.bin
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{} ({})",
            self.name, self.version, self.os, self.arch, self.bin
        )
    }
}

/// A value produced while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Str(String),
    Bool(bool),
}

impl Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            source: source.to_string(),
            nodes: parse::parse(source)?,
        })
    }

    pub fn render(&self, ctx: &Context) -> Result<String, TemplateError> {
        let mut out = String::new();
        exec(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }

    /// The source text the template was parsed from.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and renders `source` in one step.
pub fn render(source: &str, ctx: &Context) -> Result<String, TemplateError> {
    Template::parse(source)?.render(ctx)
}

/// Renders a condition; only output that trims to exactly `true` counts as true.
pub fn evaluate_condition(condition: &Template, ctx: &Context) -> Result<bool, TemplateError> {
    Ok(condition.render(ctx)?.trim() == "true")
}

fn exec(nodes: &[Node], ctx: &Context, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(pipeline) => out.push_str(&eval_pipeline(pipeline, ctx)?.to_string()),
            Node::If {
                cond,
                then,
                otherwise,
            } => {
                if eval_pipeline(cond, ctx)?.is_truthy() {
                    exec(then, ctx, out)?;
                } else {
                    exec(otherwise, ctx, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval_pipeline(pipeline: &Pipeline, ctx: &Context) -> Result<Value, TemplateError> {
    let mut piped = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, ctx, piped)?);
    }
    piped.ok_or_else(|| TemplateError::execute("empty pipeline"))
}

fn eval_command(
    command: &Command,
    ctx: &Context,
    piped: Option<Value>,
) -> Result<Value, TemplateError> {
    match command {
        Command::Value(operand) => {
            if piped.is_some() {
                return Err(TemplateError::execute(
                    "can't give argument to non-function",
                ));
            }
            eval_operand(operand, ctx)
        }
        Command::Call { name, args } => {
            let mut values = args
                .iter()
                .map(|arg| eval_operand(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            values.extend(piped);
            funcs::call(name, values)
        }
    }
}

fn eval_operand(operand: &Operand, ctx: &Context) -> Result<Value, TemplateError> {
    match operand {
        Operand::Field(field) => Ok(Value::Str(ctx.get(*field).to_string())),
        Operand::Str(s) => Ok(Value::Str(s.clone())),
        Operand::Bool(b) => Ok(Value::Bool(*b)),
        Operand::Pipeline(inner) => eval_pipeline(inner, ctx),
    }
}
