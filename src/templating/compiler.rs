//! Template compiler.
//!
//! Turns template source into a [`CompilationResult`]: the serialized
//! [`Program`] plus every file it was built from. Each file goes through the
//! same pipeline:
//!
//! 1. embedded script spans are stripped
//! 2. the text is parsed into nodes
//! 3. filter chains are validated against the registry and `raw` is folded
//!    into the node's escape flag
//! 4. `include` directives are located, compiled recursively and spliced in
//! 5. if the file `extends` a parent, the parent is processed recursively and
//!    the file's blocks are merged into it
//!
//! A single processing stack spans steps 4 and 5, so cycles through any mix of
//! `extends` and `include` are reported as
//! [`CompileErrorKind::CircularDependency`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::{CompileError, CompileErrorKind};
use super::filters::FilterRegistry;
use super::parser::{self, strip_script_blocks};
use super::program::{Node, Program, find_block};

/// Generated code plus dependency list from one `compile` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    /// Serialized [`Program`].
    pub code: String,
    /// Extended and included files, deduplicated, in first-seen order.
    pub dependencies: Vec<PathBuf>,
    /// How each `extends`/`include` name was located.
    pub resolutions: Vec<Resolution>,
}

/// Outcome of locating one `extends`/`include` name.
///
/// A name can resolve differently once a new file appears earlier in the
/// search order, so callers that reuse compiled output re-check these with
/// [`Compiler::locate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub name: String,
    /// Template containing the directive; `None` for inline source.
    pub from: Option<PathBuf>,
    pub resolved: PathBuf,
}

impl Resolution {
    /// Whether `name` still resolves to the same file.
    pub fn holds(&self, compiler: &Compiler<'_>) -> bool {
        compiler.locate(&self.name, self.from.as_deref()).is_ok_and(|path| path == self.resolved)
    }
}

/// Settings that affect compiled output.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Fallback directory for `extends`/`include` lookups.
    pub template_dir: PathBuf,
    /// Extension appended to names that do not resolve as written.
    pub extension: String,
    /// Escape interpolations unless the chain contains `raw`.
    pub auto_escape: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from(crate::constants::DEFAULT_TEMPLATE_DIR),
            extension: crate::constants::DEFAULT_EXTENSION.to_string(),
            auto_escape: true,
        }
    }
}

type BlockMap = HashMap<String, Vec<Node>>;

#[derive(Debug, Default)]
struct CompileState {
    stack: Vec<PathBuf>,
    dependencies: Vec<PathBuf>,
    resolutions: Vec<Resolution>,
}

impl CompileState {
    fn enter(&mut self, path: &Path) -> Result<(), CompileErrorKind> {
        if self.stack.iter().any(|p| p == path) {
            let mut chain = self.stack.clone();
            chain.push(path.to_path_buf());
            return Err(CompileErrorKind::CircularDependency {
                path: path.to_path_buf(),
                chain,
            });
        }
        self.stack.push(path.to_path_buf());
        Ok(())
    }

    fn leave(&mut self) {
        self.stack.pop();
    }

    fn record(&mut self, name: &str, from: Option<&Path>, path: &Path) {
        if !self.dependencies.iter().any(|p| p == path) {
            self.dependencies.push(path.to_path_buf());
        }
        if !self.resolutions.iter().any(|r| r.name == name && r.from.as_deref() == from) {
            self.resolutions.push(Resolution {
                name: name.to_string(),
                from: from.map(Path::to_path_buf),
                resolved: path.to_path_buf(),
            });
        }
    }
}

/// Compiles templates against a filter registry.
#[derive(Debug)]
pub struct Compiler<'r> {
    registry: &'r FilterRegistry,
    options: CompilerOptions,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r FilterRegistry, options: CompilerOptions) -> Self {
        Self { registry, options }
    }

    /// Compile `source`.
    ///
    /// `source_path` is the file the text came from; it anchors relative
    /// `extends`/`include` lookups and seeds cycle detection. Without it, lookups
    /// use the configured template directory.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] naming the template in which the failure
    /// occurred.
    pub fn compile(
        &self,
        source: &str,
        source_path: Option<&Path>,
    ) -> Result<CompilationResult, CompileError> {
        let mut state = CompileState::default();
        let source_path = source_path.map(absolute);

        let nodes = match source_path.as_deref() {
            Some(path) => {
                state.enter(path).map_err(|kind| CompileError::new(Some(path), kind))?;
                let nodes = self.process_source(source, Some(path), &mut state);
                state.leave();
                nodes?
            }
            None => self.process_source(source, None, &mut state)?,
        };

        let program = Program::new(nodes);
        let code = program
            .to_code()
            .map_err(|e| CompileError::new(source_path.as_deref(), e.into()))?;

        tracing::debug!(
            "Compiled {} ({} bytes of code, {} dependencies)",
            source_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".into()),
            code.len(),
            state.dependencies.len()
        );

        Ok(CompilationResult {
            code,
            dependencies: state.dependencies,
            resolutions: state.resolutions,
        })
    }

    /// Locate a template by name relative to `current` (a template file), then
    /// the configured template directory.
    ///
    /// Returns the absolute path, or every candidate that was tried.
    pub fn locate(&self, name: &str, current: Option<&Path>) -> Result<PathBuf, Vec<PathBuf>> {
        let mut dirs: Vec<&Path> = Vec::with_capacity(2);
        if let Some(dir) = current.and_then(Path::parent) {
            dirs.push(dir);
        }
        if !dirs.contains(&self.options.template_dir.as_path()) {
            dirs.push(&self.options.template_dir);
        }

        let mut searched = Vec::new();
        for dir in dirs {
            for candidate in candidates(dir, name, &self.options.extension) {
                if candidate.is_file() {
                    return Ok(absolute(&candidate));
                }
                searched.push(candidate);
            }
        }
        Err(searched)
    }

    fn process_file(&self, path: &Path, state: &mut CompileState) -> Result<Vec<Node>, CompileError> {
        state.enter(path).map_err(|kind| CompileError::new(Some(path), kind))?;
        let result = std::fs::read_to_string(path)
            .map_err(|source| {
                CompileError::new(
                    Some(path),
                    CompileErrorKind::Io {
                        path: path.to_path_buf(),
                        source,
                    },
                )
            })
            .and_then(|text| self.process_source(&text, Some(path), state));
        state.leave();
        result
    }

    fn process_source(
        &self,
        source: &str,
        path: Option<&Path>,
        state: &mut CompileState,
    ) -> Result<Vec<Node>, CompileError> {
        let err = |kind| CompileError::new(path, kind);

        let stripped = strip_script_blocks(source);
        if stripped.len() != source.len() {
            tracing::warn!(
                "Stripped embedded script code from {}",
                path.map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".into())
            );
        }

        let mut nodes = parser::parse(&stripped).map_err(|e| {
            err(CompileErrorKind::Syntax {
                line: e.line,
                message: e.message,
            })
        })?;
        self.expand_filters(&mut nodes, &stripped).map_err(err)?;

        match take_extends(&nodes).map_err(err)? {
            Some((parent_name, line)) => {
                let blocks = self.resolve_includes(collect_top_blocks(nodes), path, state)?;
                let mut overrides = BlockMap::new();
                index_blocks(&blocks, &mut overrides);

                let parent_path = self.locate(&parent_name, path).map_err(|searched| {
                    tracing::debug!("extends target '{}' not found (line {})", parent_name, line);
                    err(CompileErrorKind::TemplateNotFound {
                        name: parent_name.clone(),
                        searched,
                    })
                })?;
                state.record(&parent_name, path, &parent_path);

                let parent_nodes = self.process_file(&parent_path, state)?;
                tracing::debug!(
                    "Merging {} block override(s) into {}",
                    overrides.len(),
                    parent_path.display()
                );
                Ok(merge_blocks(parent_nodes, &overrides))
            }
            None => self.resolve_includes(nodes, path, state),
        }
    }

    /// Validate filter names and fold `raw`/`escape` into each echo's escape flag.
    fn expand_filters(&self, nodes: &mut [Node], source: &str) -> Result<(), CompileErrorKind> {
        for node in nodes.iter_mut() {
            if let Node::Echo { expr, filters, escape } = node {
                if let Some(unknown) = filters.iter().find(|f| !self.registry.contains(f)) {
                    return Err(CompileErrorKind::UnknownFilter {
                        name: unknown.clone(),
                        line: line_of(source, expr),
                        suggestions: self.registry.suggestions(unknown),
                    });
                }
                let raw = filters.iter().any(|f| f == "raw");
                filters.retain(|f| f != "raw");
                // an explicit escape only replaces auto-escaping when nothing transforms it afterwards
                let escaped_last = filters.last().is_some_and(|f| f == "escape" || f == "e");
                *escape = self.options.auto_escape && !raw && !escaped_last;
            }
            for children in node.children_mut() {
                self.expand_filters(children, source)?;
            }
        }
        Ok(())
    }

    fn resolve_includes(
        &self,
        nodes: Vec<Node>,
        current: Option<&Path>,
        state: &mut CompileState,
    ) -> Result<Vec<Node>, CompileError> {
        let mut out = Vec::with_capacity(nodes.len());
        for mut node in nodes {
            if let Node::Include { name, line } = &node {
                let path = self.locate(name, current).map_err(|searched| {
                    tracing::debug!("include target '{}' not found (line {})", name, line);
                    CompileError::new(
                        current,
                        CompileErrorKind::TemplateNotFound {
                            name: name.clone(),
                            searched,
                        },
                    )
                })?;
                state.record(name, current, &path);
                out.extend(self.process_file(&path, state)?);
                continue;
            }

            for children in node.children_mut() {
                let taken = std::mem::take(children);
                *children = self.resolve_includes(taken, current, state)?;
            }
            out.push(node);
        }
        Ok(out)
    }
}

fn absolute(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

fn candidates(dir: &Path, name: &str, extension: &str) -> Vec<PathBuf> {
    let exact = dir.join(name);
    if Path::new(name).extension().is_some() || extension.is_empty() {
        vec![exact]
    } else {
        vec![exact, dir.join(format!("{name}.{extension}"))]
    }
}

/// Best-effort line number of an echo expression, for error messages.
fn line_of(source: &str, expr: &str) -> usize {
    source
        .find(expr)
        .map(|pos| source[..pos].matches('\n').count() + 1)
        .unwrap_or(1)
}

/// The top-level `extends` target, if any.
///
/// `extends` nested inside a block, conditional or loop is rejected.
fn take_extends(nodes: &[Node]) -> Result<Option<(String, usize)>, CompileErrorKind> {
    let mut found = None;
    for node in nodes {
        if let Node::Extends { name, line } = node {
            if found.is_some() {
                return Err(CompileErrorKind::Syntax {
                    line: *line,
                    message: "a template may only extend one parent".into(),
                });
            }
            found = Some((name.clone(), *line));
        } else if let Some(line) = nested_extends(node) {
            return Err(CompileErrorKind::Syntax {
                line,
                message: "'extends' must appear at the top level of a template".into(),
            });
        }
    }
    Ok(found)
}

/// Line of the first `extends` anywhere below `node`.
fn nested_extends(node: &Node) -> Option<usize> {
    let scan = |nodes: &[Node]| {
        nodes.iter().find_map(|child| match child {
            Node::Extends { line, .. } => Some(*line),
            other => nested_extends(other),
        })
    };
    match node {
        Node::If { branches, otherwise } => branches
            .iter()
            .find_map(|b| scan(&b.body))
            .or_else(|| otherwise.as_deref().and_then(|body| scan(body))),
        Node::Loop { body, .. } | Node::Block { body, .. } => scan(body),
        _ => None,
    }
}

/// Outermost blocks of a child template; everything outside them is dropped.
fn collect_top_blocks(nodes: Vec<Node>) -> Vec<Node> {
    let mut blocks = Vec::new();
    for mut node in nodes {
        match node {
            Node::Block { .. } => blocks.push(node),
            _ => {
                for children in node.children_mut() {
                    blocks.extend(collect_top_blocks(std::mem::take(children)));
                }
            }
        }
    }
    blocks
}

/// Every block (nested ones included) by name; the first definition wins.
fn index_blocks(nodes: &[Node], map: &mut BlockMap) {
    for node in nodes {
        if let Node::Block { name, body } = node {
            map.entry(name.clone()).or_insert_with(|| body.clone());
            index_blocks(body, map);
        }
    }
}

/// Replace parent blocks with child overrides, recursing into everything else.
fn merge_blocks(parent: Vec<Node>, overrides: &BlockMap) -> Vec<Node> {
    parent
        .into_iter()
        .map(|mut node| {
            if let Node::Block { name, body } = &mut node {
                let parent_body = std::mem::take(body);
                *body = match overrides.get(name.as_str()) {
                    Some(child_body) => substitute_parent(child_body.clone(), &parent_body),
                    None => merge_blocks(parent_body, overrides),
                };
                return node;
            }
            for children in node.children_mut() {
                *children = merge_blocks(std::mem::take(children), overrides);
            }
            node
        })
        .collect()
}

/// Replace `{% parent %}` in a child block body with the parent block's body.
///
/// A nested block inside the child body resolves its own `{% parent %}` against
/// the same-named block inside `parent_body`; if there is none the placeholder is
/// kept for a later merge level.
fn substitute_parent(child: Vec<Node>, parent_body: &[Node]) -> Vec<Node> {
    let mut out = Vec::with_capacity(child.len());
    for mut node in child {
        match node {
            Node::Parent => {
                out.extend(parent_body.iter().cloned());
                continue;
            }
            Node::Block { ref name, ref mut body } => {
                if let Some(inner_parent) = find_block(parent_body, name) {
                    *body = substitute_parent(std::mem::take(body), inner_parent);
                }
            }
            _ => {
                for children in node.children_mut() {
                    *children = substitute_parent(std::mem::take(children), parent_body);
                }
            }
        }
        out.push(node);
    }
    out
}

#[cfg(test)]
#[path = "compiler_tests.rs"]
mod compiler_tests;
