//! Compiled program representation.
//!
//! The parser produces a tree of [`Node`]s. The compiler resolves `extends` and
//! `include` directives and validates filter chains, leaving a [`Program`] that
//! only contains renderable nodes. A program serializes to JSON, which is the
//! "generated code" persisted in the compile cache.

use serde::{Deserialize, Serialize};

use crate::constants::PROGRAM_FORMAT_VERSION;

/// One conditional branch: a verbatim condition expression and its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: String,
    pub body: Vec<Node>,
}

/// Which loop directive produced a [`Node::Loop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    ForEach,
    For,
}

impl LoopKind {
    /// Closing directive keyword.
    pub fn end_keyword(self) -> &'static str {
        match self {
            LoopKind::ForEach => "endforeach",
            LoopKind::For => "endfor",
        }
    }
}

/// A template AST node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Node {
    /// Literal output.
    Text { text: String },
    /// `{{ expr|filter|... }}`
    Echo {
        expr: String,
        filters: Vec<String>,
        escape: bool,
    },
    /// `if` / `elseif` chain with optional `else`.
    If {
        branches: Vec<Branch>,
        otherwise: Option<Vec<Node>>,
    },
    /// `foreach` / `for` loop; the header is evaluated at render time.
    Loop {
        kind: LoopKind,
        header: String,
        body: Vec<Node>,
    },
    /// Named, overridable region.
    Block { name: String, body: Vec<Node> },
    /// `{% parent %}` placeholder inside a child block.
    Parent,
    /// `{% extends 'name' %}`; removed by the compiler.
    Extends { name: String, line: usize },
    /// `{% include 'name' %}`; replaced by the compiler.
    Include { name: String, line: usize },
}

impl Node {
    /// Mutable access to every child node list, in source order.
    pub(crate) fn children_mut(&mut self) -> Vec<&mut Vec<Node>> {
        match self {
            Node::If { branches, otherwise } => {
                let mut lists: Vec<&mut Vec<Node>> =
                    branches.iter_mut().map(|b| &mut b.body).collect();
                if let Some(body) = otherwise {
                    lists.push(body);
                }
                lists
            }
            Node::Loop { body, .. } | Node::Block { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub version: u32,
    pub nodes: Vec<Node>,
}

impl Program {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            version: PROGRAM_FORMAT_VERSION,
            nodes,
        }
    }

    /// Serialize to the code string stored in the cache.
    pub fn to_code(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a code string produced by [`Program::to_code`].
    pub fn from_code(code: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(code)
    }

    /// Body of the first block named `name`, searching nested nodes.
    pub fn block(&self, name: &str) -> Option<&[Node]> {
        find_block(&self.nodes, name)
    }
}

/// Depth-first search for a block by name.
pub(crate) fn find_block<'a>(nodes: &'a [Node], name: &str) -> Option<&'a [Node]> {
    for node in nodes {
        match node {
            Node::Block { name: n, body } if n == name => return Some(body),
            Node::Block { body, .. } | Node::Loop { body, .. } => {
                if let Some(found) = find_block(body, name) {
                    return Some(found);
                }
            }
            Node::If { branches, otherwise } => {
                for branch in branches {
                    if let Some(found) = find_block(&branch.body, name) {
                        return Some(found);
                    }
                }
                if let Some(found) = otherwise.as_deref().and_then(|b| find_block(b, name)) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Node {
        Node::Text {
            text: s.to_string(),
        }
    }

    #[test]
    fn test_code_is_deterministic() -> anyhow::Result<()> {
        let program = Program::new(vec![
            text("a"),
            Node::Echo {
                expr: "x".into(),
                filters: vec!["upper".into()],
                escape: true,
            },
        ]);
        assert_eq!(program.to_code()?, program.clone().to_code()?);
        assert_eq!(Program::from_code(&program.to_code()?)?, program);
        Ok(())
    }

    #[test]
    fn test_find_nested_block() {
        let program = Program::new(vec![Node::If {
            branches: vec![Branch {
                condition: "a".into(),
                body: vec![Node::Block {
                    name: "outer".into(),
                    body: vec![Node::Block {
                        name: "inner".into(),
                        body: vec![text("hi")],
                    }],
                }],
            }],
            otherwise: None,
        }]);

        assert_eq!(program.block("inner"), Some(&[text("hi")][..]));
        assert!(program.block("outer").is_some());
        assert!(program.block("missing").is_none());
    }
}
