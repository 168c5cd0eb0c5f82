//! Program interpreter.
//!
//! Executes a compiled [`Program`] against a private copy of the caller's
//! bindings. Output accumulates in a local buffer that is only returned on
//! success, so a failure part-way through never leaks partial output.
//!
//! Loops push a scope frame holding the loop variables (and a `loop` object with
//! `index`, `index0`, `first`, `last` and `length`), which shadows outer bindings
//! and is popped when the loop ends.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::error::{RenderError, RenderErrorKind};
use super::expr::{self, EvalError, Expr, Scope};
use super::filters::{Filter, FilterRegistry, escape_html, stringify, suggest, value_kind};
use super::program::{LoopKind, Node, Program};
use crate::constants::PROGRAM_FORMAT_VERSION;

/// Executes compiled programs.
#[derive(Debug)]
pub struct Renderer<'r> {
    registry: &'r FilterRegistry,
    strict_variables: bool,
}

impl<'r> Renderer<'r> {
    pub fn new(registry: &'r FilterRegistry, strict_variables: bool) -> Self {
        Self {
            registry,
            strict_variables,
        }
    }

    /// Render `program`; `template` names it in errors.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] on the first failing expression, loop or filter.
    /// No output is produced in that case.
    pub fn render(
        &self,
        template: &str,
        program: &Program,
        bindings: &Map<String, Value>,
    ) -> Result<String, RenderError> {
        if program.version != PROGRAM_FORMAT_VERSION {
            return Err(RenderError::new(
                template,
                RenderErrorKind::InvalidProgram {
                    message: format!(
                        "program format version {} (expected {})",
                        program.version, PROGRAM_FORMAT_VERSION
                    ),
                },
            ));
        }

        let mut execution = Execution {
            renderer: self,
            frames: Frames {
                frames: vec![bindings.clone()],
            },
            exprs: HashMap::new(),
            out: String::new(),
        };

        match execution.run(&program.nodes) {
            Ok(()) => Ok(execution.out),
            Err(kind) => {
                tracing::debug!(
                    "Discarding {} bytes of partial output for '{}'",
                    execution.out.len(),
                    template
                );
                Err(RenderError::new(template, kind))
            }
        }
    }
}

/// Scope frames, innermost last.
struct Frames {
    frames: Vec<Map<String, Value>>,
}

impl Frames {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.frames.iter().flat_map(|f| f.keys().map(String::as_str))
    }

    fn innermost(&mut self) -> Option<&mut Map<String, Value>> {
        self.frames.last_mut()
    }
}

impl Scope for Frames {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|f| f.get(name))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct LoopHeader<'h> {
    iterable: &'h str,
    key: Option<&'h str>,
    value: &'h str,
}

fn loop_variable<'h>(raw: &'h str, header: &str) -> Result<&'h str, RenderErrorKind> {
    let name = raw.trim();
    let name = name.strip_prefix('$').unwrap_or(name);
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(RenderErrorKind::InvalidLoop {
            header: header.to_string(),
            message: format!("'{}' is not a valid loop variable", raw.trim()),
        })
    }
}

/// Split a loop header into iterable expression and variable names.
///
/// `foreach`: `items as item`, `items as key => value`.
/// `for`: `item in items`, `key, value in items`.
fn parse_loop_header(kind: LoopKind, header: &str) -> Result<LoopHeader<'_>, RenderErrorKind> {
    let malformed = |expected: &str| RenderErrorKind::InvalidLoop {
        header: header.to_string(),
        message: format!("expected '{expected}'"),
    };

    let (iterable, vars) = match kind {
        LoopKind::ForEach => {
            let (iterable, vars) =
                header.rsplit_once(" as ").ok_or_else(|| malformed("<expr> as <name>"))?;
            (iterable, vars)
        }
        LoopKind::For => {
            let (vars, iterable) =
                header.split_once(" in ").ok_or_else(|| malformed("<name> in <expr>"))?;
            (iterable, vars)
        }
    };

    let separator = match kind {
        LoopKind::ForEach => "=>",
        LoopKind::For => ",",
    };
    let (key, value) = match vars.split_once(separator) {
        Some((k, v)) => (Some(loop_variable(k, header)?), loop_variable(v, header)?),
        None => (None, loop_variable(vars, header)?),
    };

    let iterable = iterable.trim();
    if iterable.is_empty() {
        return Err(malformed("an iterable expression"));
    }

    Ok(LoopHeader {
        iterable,
        key,
        value,
    })
}

struct Execution<'a, 'p> {
    renderer: &'a Renderer<'a>,
    frames: Frames,
    /// Parsed expressions, keyed by source text.
    exprs: HashMap<&'p str, Expr>,
    out: String,
}

impl<'a, 'p> Execution<'a, 'p> {
    fn run(&mut self, nodes: &'p [Node]) -> Result<(), RenderErrorKind> {
        for node in nodes {
            match node {
                Node::Text { text } => self.out.push_str(text),
                Node::Echo {
                    expr,
                    filters,
                    escape,
                } => {
                    let mut value = self.eval(expr)?;
                    for name in filters {
                        value = self.apply_filter(name, value)?;
                    }
                    let text = stringify(&value);
                    if *escape {
                        self.out.push_str(&escape_html(&text));
                    } else {
                        self.out.push_str(&text);
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = false;
                    for branch in branches {
                        if expr::is_truthy(&self.eval(&branch.condition)?) {
                            self.run(&branch.body)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        if let Some(body) = otherwise {
                            self.run(body)?;
                        }
                    }
                }
                Node::Loop { kind, header, body } => self.run_loop(*kind, header, body)?,
                Node::Block { body, .. } => self.run(body)?,
                Node::Parent => {
                    tracing::debug!("Unresolved {{% parent %}} renders nothing");
                }
                Node::Extends { name, .. } | Node::Include { name, .. } => {
                    return Err(RenderErrorKind::InvalidProgram {
                        message: format!("unresolved reference to template '{name}'"),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_loop(&mut self, kind: LoopKind, header: &'p str, body: &'p [Node]) -> Result<(), RenderErrorKind> {
        let parsed = parse_loop_header(kind, header)?;
        let items: Vec<(Value, Value)> = match self.eval(parsed.iterable)? {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(RenderErrorKind::NotIterable {
                    expr: parsed.iterable.to_string(),
                    found: value_kind(&other),
                });
            }
        };

        let length = items.len();
        self.frames.frames.push(Map::new());
        let result = items.into_iter().enumerate().try_for_each(|(i, (key, value))| {
            if let Some(frame) = self.frames.innermost() {
                frame.clear();
                if let Some(key_name) = parsed.key {
                    frame.insert(key_name.to_string(), key);
                }
                frame.insert(parsed.value.to_string(), value);
                frame.insert(
                    "loop".to_string(),
                    serde_json::json!({
                        "index": i + 1,
                        "index0": i,
                        "first": i == 0,
                        "last": i + 1 == length,
                        "length": length,
                    }),
                );
            }
            self.run(body)
        });
        self.frames.frames.pop();
        result
    }

    fn apply_filter(&self, name: &str, value: Value) -> Result<Value, RenderErrorKind> {
        match self.renderer.registry.resolve(name) {
            Some(Filter::Raw) => Ok(value),
            Some(Filter::Transform(f)) => f(&value).map_err(|e| RenderErrorKind::Filter {
                name: name.to_string(),
                message: e.to_string(),
            }),
            None => Err(RenderErrorKind::UnknownFilter {
                name: name.to_string(),
            }),
        }
    }

    fn eval(&mut self, source: &'p str) -> Result<Value, RenderErrorKind> {
        if !self.exprs.contains_key(source) {
            let parsed = expr::parse(source).map_err(|e| self.eval_error(source, e))?;
            self.exprs.insert(source, parsed);
        }
        let Some(parsed) = self.exprs.get(source) else {
            return Err(RenderErrorKind::Expression {
                expr: source.to_string(),
                message: "expression cache miss".into(),
            });
        };
        expr::evaluate(parsed, &self.frames, self.renderer.strict_variables)
            .map_err(|e| self.eval_error(source, e))
    }

    fn eval_error(&self, source: &str, error: EvalError) -> RenderErrorKind {
        match error {
            EvalError::Undefined(name) => {
                let suggestions = suggest(&name, self.frames.names());
                RenderErrorKind::UndefinedVariable { name, suggestions }
            }
            EvalError::Invalid(message) => RenderErrorKind::Expression {
                expr: source.to_string(),
                message,
            },
        }
    }
}

#[cfg(test)]
#[path = "renderer_tests.rs"]
mod renderer_tests;
