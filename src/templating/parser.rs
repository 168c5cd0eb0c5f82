//! Template lexer and parser.
//!
//! The lexer splits source text into literal text, `{{ … }}` echo spans and
//! `{% … %}` directive tags (comments `{# … #}` are dropped). Closing delimiters
//! inside quoted strings are ignored, so `{{ '}}' }}` is a single echo.
//! Everything between `{% literal %}` and `{% endliteral %}` is kept as text.
//!
//! The parser is a small recursive descent over those tokens that builds the
//! nested [`Node`] tree and reports unbalanced directives with a line number.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

use super::program::{Branch, LoopKind, Node};

/// A syntax error with the 1-based line it was detected on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Text(&'a str),
    Echo { body: &'a str, line: usize },
    Tag { body: &'a str, line: usize },
}

/// Removes embedded server-side script spans (`<? … ?>` and `<% … %>`).
///
/// An unterminated span is removed to the end of the input. Returns the input
/// unchanged (borrowed) when nothing was stripped.
pub fn strip_script_blocks(source: &str) -> Cow<'_, str> {
    const SPANS: [(&str, &str); 2] = [("<?", "?>"), ("<%", "%>")];

    if !SPANS.iter().any(|(open, _)| source.contains(open)) {
        return Cow::Borrowed(source);
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let next = SPANS
            .iter()
            .filter_map(|(open, close)| rest.find(open).map(|pos| (pos, *open, *close)))
            .min_by_key(|(pos, _, _)| *pos);

        let Some((pos, open, close)) = next else {
            out.push_str(rest);
            break;
        };

        out.push_str(&rest[..pos]);
        let after_open = &rest[pos + open.len()..];
        match after_open.find(close) {
            Some(end) => rest = &after_open[end + close.len()..],
            None => break,
        }
    }

    Cow::Owned(out)
}

fn find_opener(s: &str) -> Option<(usize, &'static str, &'static str)> {
    let bytes = s.as_bytes();
    let mut from = 0;
    while let Some(offset) = s[from..].find('{') {
        let i = from + offset;
        match bytes.get(i + 1) {
            Some(b'{') => return Some((i, "{{", "}}")),
            Some(b'%') => return Some((i, "{%", "%}")),
            Some(b'#') => return Some((i, "{#", "#}")),
            _ => from = i + 1,
        }
    }
    None
}

/// Position of `closer` in `s`, skipping quoted strings when `quote_aware`.
fn find_closer(s: &str, closer: &str, quote_aware: bool) -> Option<usize> {
    if !quote_aware {
        return s.find(closer);
    }

    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if bytes[i..].starts_with(closer.as_bytes()) {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

static END_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{%\s*endliteral\s*%\}").expect("static regex is valid"));

fn tokenize(source: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut line = 1;

    while !rest.is_empty() {
        let Some((start, opener, closer)) = find_opener(rest) else {
            tokens.push(Token::Text(rest));
            break;
        };

        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
            line += rest[..start].matches('\n').count();
        }

        let inner_start = start + opener.len();
        let Some(len) = find_closer(&rest[inner_start..], closer, opener != "{#") else {
            return Err(ParseError::new(line, format!("unclosed '{opener}' delimiter")));
        };
        let body = &rest[inner_start..inner_start + len];

        match opener {
            "{{" => tokens.push(Token::Echo { body, line }),
            "{%" if body.trim() == "literal" => {}
            "{%" => tokens.push(Token::Tag { body, line }),
            _ => {}
        }

        line += body.matches('\n').count();
        rest = &rest[inner_start + len + closer.len()..];

        if opener == "{%" && body.trim() == "literal" {
            let Some(end) = END_LITERAL.find(rest) else {
                return Err(ParseError::new(line, "unclosed 'literal': missing '{% endliteral %}'"));
            };
            let verbatim = &rest[..end.start()];
            if !verbatim.is_empty() {
                tokens.push(Token::Text(verbatim));
            }
            line += rest[..end.end()].matches('\n').count();
            rest = &rest[end.end()..];
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Directive {
    If(String),
    ElseIf(String),
    Else,
    EndIf,
    Loop(LoopKind, String),
    EndLoop(LoopKind),
    Block(String),
    EndBlock,
    Parent,
    Extends(String),
    Include(String),
}

impl Directive {
    fn keyword(&self) -> &'static str {
        match self {
            Directive::If(_) => "if",
            Directive::ElseIf(_) => "elseif",
            Directive::Else => "else",
            Directive::EndIf => "endif",
            Directive::Loop(LoopKind::ForEach, _) => "foreach",
            Directive::Loop(LoopKind::For, _) => "for",
            Directive::EndLoop(kind) => kind.end_keyword(),
            Directive::Block(_) => "block",
            Directive::EndBlock => "endblock",
            Directive::Parent => "parent",
            Directive::Extends(_) => "extends",
            Directive::Include(_) => "include",
        }
    }

    fn is_terminator(&self) -> bool {
        matches!(
            self,
            Directive::ElseIf(_)
                | Directive::Else
                | Directive::EndIf
                | Directive::EndLoop(_)
                | Directive::EndBlock
        )
    }
}

fn require_arg(keyword: &str, args: &str, line: usize) -> Result<String, ParseError> {
    if args.is_empty() {
        Err(ParseError::new(line, format!("'{keyword}' requires an expression")))
    } else {
        Ok(args.to_string())
    }
}

fn parse_quoted_name(keyword: &str, args: &str, line: usize) -> Result<String, ParseError> {
    let args = args.trim();
    let unquoted = args
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| args.strip_prefix('"').and_then(|s| s.strip_suffix('"')));

    match unquoted {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(ParseError::new(
            line,
            format!("'{keyword}' expects a quoted template name, found '{args}'"),
        )),
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

fn parse_directive(body: &str, line: usize) -> Result<Directive, ParseError> {
    let body = body.trim();
    let (keyword, args) = match body.split_once(char::is_whitespace) {
        Some((k, a)) => (k, a.trim()),
        None => (body, ""),
    };

    let no_args = |d: Directive| {
        if args.is_empty() {
            Ok(d)
        } else {
            Err(ParseError::new(line, format!("'{keyword}' takes no arguments")))
        }
    };

    match keyword {
        "if" => Ok(Directive::If(require_arg(keyword, args, line)?)),
        "elseif" | "elif" => Ok(Directive::ElseIf(require_arg(keyword, args, line)?)),
        "else" => match args.strip_prefix("if ") {
            Some(cond) => Ok(Directive::ElseIf(require_arg("else if", cond.trim(), line)?)),
            None => no_args(Directive::Else),
        },
        "endif" => no_args(Directive::EndIf),
        "foreach" => Ok(Directive::Loop(LoopKind::ForEach, require_arg(keyword, args, line)?)),
        "endforeach" => no_args(Directive::EndLoop(LoopKind::ForEach)),
        "for" => Ok(Directive::Loop(LoopKind::For, require_arg(keyword, args, line)?)),
        "endfor" => no_args(Directive::EndLoop(LoopKind::For)),
        "block" => {
            if is_identifier(args) {
                Ok(Directive::Block(args.to_string()))
            } else {
                Err(ParseError::new(line, format!("invalid block name '{args}'")))
            }
        }
        // `{% endblock name %}` is accepted; the name is informational
        "endblock" => Ok(Directive::EndBlock),
        "parent" => no_args(Directive::Parent),
        "extends" => Ok(Directive::Extends(parse_quoted_name(keyword, args, line)?)),
        "include" => Ok(Directive::Include(parse_quoted_name(keyword, args, line)?)),
        "" => Err(ParseError::new(line, "empty directive")),
        other => Err(ParseError::new(line, format!("unknown directive '{other}'"))),
    }
}

/// Splits an echo body on `|` into the base expression and filter names.
///
/// `||` and pipes inside quoted strings are not separators.
pub(crate) fn split_filters(body: &str) -> (String, Vec<String>) {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    i += 1;
                } else {
                    parts.push(body[start..i].trim().to_string());
                    start = i + 1;
                }
            }
            None => {}
        }
        i += 1;
    }
    parts.push(body[start..].trim().to_string());

    let base = parts.remove(0);
    (base, parts)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Parses nodes until a terminator directive or end of input.
    ///
    /// Terminators not listed in `ends` are errors; the matched terminator is
    /// returned with its line so the caller can decide how to continue.
    fn parse_until(
        &mut self,
        ends: &[&str],
    ) -> Result<(Vec<Node>, Option<(Directive, usize)>), ParseError> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.get(self.pos).copied() {
            self.pos += 1;
            match token {
                Token::Text(text) => nodes.push(Node::Text {
                    text: text.to_string(),
                }),
                Token::Echo { body, line } => {
                    let (expr, filters) = split_filters(body);
                    if expr.is_empty() {
                        return Err(ParseError::new(line, "empty expression in '{{ }}'"));
                    }
                    if filters.iter().any(String::is_empty) {
                        return Err(ParseError::new(line, "empty filter name in filter chain"));
                    }
                    nodes.push(Node::Echo {
                        expr,
                        filters,
                        escape: true,
                    });
                }
                Token::Tag { body, line } => {
                    let directive = parse_directive(body, line)?;
                    if directive.is_terminator() {
                        if ends.contains(&directive.keyword()) {
                            return Ok((nodes, Some((directive, line))));
                        }
                        return Err(ParseError::new(
                            line,
                            format!("unexpected '{}'", directive.keyword()),
                        ));
                    }
                    nodes.push(self.parse_directive_node(directive, line)?);
                }
            }
        }

        Ok((nodes, None))
    }

    fn parse_directive_node(&mut self, directive: Directive, line: usize) -> Result<Node, ParseError> {
        match directive {
            Directive::If(condition) => self.parse_if(condition, line),
            Directive::Loop(kind, header) => {
                let end = kind.end_keyword();
                let (body, closing) = self.parse_until(&[end])?;
                if closing.is_none() {
                    return Err(ParseError::new(
                        line,
                        format!("unclosed loop: missing '{{% {end} %}}'"),
                    ));
                }
                Ok(Node::Loop { kind, header, body })
            }
            Directive::Block(name) => {
                let (body, closing) = self.parse_until(&["endblock"])?;
                if closing.is_none() {
                    return Err(ParseError::new(
                        line,
                        format!("unclosed block '{name}': missing '{{% endblock %}}'"),
                    ));
                }
                Ok(Node::Block { name, body })
            }
            Directive::Parent => Ok(Node::Parent),
            Directive::Extends(name) => Ok(Node::Extends { name, line }),
            Directive::Include(name) => Ok(Node::Include { name, line }),
            other => Err(ParseError::new(line, format!("unexpected '{}'", other.keyword()))),
        }
    }

    fn parse_if(&mut self, first: String, line: usize) -> Result<Node, ParseError> {
        let mut branches = Vec::new();
        let mut condition = first;

        loop {
            let (body, closing) = self.parse_until(&["elseif", "else", "endif"])?;
            branches.push(Branch { condition, body });

            match closing {
                Some((Directive::ElseIf(next), _)) => condition = next,
                Some((Directive::Else, else_line)) => {
                    let (body, closing) = self.parse_until(&["endif"])?;
                    if closing.is_none() {
                        return Err(ParseError::new(
                            else_line,
                            "unclosed 'else': missing '{% endif %}'",
                        ));
                    }
                    return Ok(Node::If {
                        branches,
                        otherwise: Some(body),
                    });
                }
                Some(_) => {
                    return Ok(Node::If {
                        branches,
                        otherwise: None,
                    });
                }
                None => {
                    return Err(ParseError::new(line, "unclosed 'if': missing '{% endif %}'"));
                }
            }
        }
    }
}

/// Parses template source into a node tree.
///
/// # Errors
///
/// Returns a [`ParseError`] for unclosed delimiters, unknown directives and
/// unbalanced control structures.
pub fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        pos: 0,
    };
    let (nodes, _) = parser.parse_until(&[])?;
    Ok(nodes)
}
