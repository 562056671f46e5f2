use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use thiserror::Error;

use crate::codec::AttrCodec;
use crate::core::{Attrs, Document, Node};
use crate::ops::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeGroup {
    Block,
    Inline,
}

impl NodeGroup {
    fn name(self) -> &'static str {
        match self {
            NodeGroup::Block => "block",
            NodeGroup::Inline => "inline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    One,
    Optional,
    ZeroOrMore,
    OneOrMore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTerm {
    /// A node name or a group name.
    pub name: String,
    pub quantifier: Quantifier,
}

/// Which child sequences a node accepts, written as whitespace separated
/// terms like `"inline*"`, `"block+"` or `"heading paragraph*"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentExpr {
    terms: Vec<ContentTerm>,
}

impl ContentExpr {
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut terms = Vec::new();
        for raw in source.split_whitespace() {
            let (name, quantifier) = match raw.chars().last() {
                Some('*') => (&raw[..raw.len() - 1], Quantifier::ZeroOrMore),
                Some('+') => (&raw[..raw.len() - 1], Quantifier::OneOrMore),
                Some('?') => (&raw[..raw.len() - 1], Quantifier::Optional),
                _ => (raw, Quantifier::One),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("Invalid content term `{raw}` in `{source}`"));
            }
            terms.push(ContentTerm {
                name: name.to_string(),
                quantifier,
            });
        }
        Ok(Self { terms })
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[ContentTerm] {
        &self.terms
    }

    /// Whether the expression mentions inline content at all.
    pub fn accepts_group(&self, group: NodeGroup) -> bool {
        self.terms.iter().any(|t| t.name == group.name())
    }

    /// `children` are `(node name, group)` pairs.
    pub fn matches(&self, children: &[(&str, NodeGroup)]) -> bool {
        fn term_accepts(term: &ContentTerm, child: &(&str, NodeGroup)) -> bool {
            term.name == child.0 || term.name == child.1.name()
        }

        fn go(terms: &[ContentTerm], children: &[(&str, NodeGroup)]) -> bool {
            let Some((term, rest)) = terms.split_first() else {
                return children.is_empty();
            };
            let (min, max) = match term.quantifier {
                Quantifier::One => (1, 1),
                Quantifier::Optional => (0, 1),
                Quantifier::ZeroOrMore => (0, usize::MAX),
                Quantifier::OneOrMore => (1, usize::MAX),
            };
            let run = children
                .iter()
                .take_while(|c| term_accepts(term, c))
                .count()
                .min(max);
            if run < min {
                return false;
            }
            (min..=run).rev().any(|n| go(rest, &children[n..]))
        }

        go(&self.terms, children)
    }
}

/// One declared attribute of a node or mark type.
#[derive(Debug, Clone)]
pub struct AttrSpec {
    pub name: String,
    pub default: Value,
    pub codec: AttrCodec,
    /// Markup attribute the value is written to; `None` keeps it out of the
    /// markup (it is implied by the tag or not persisted at all).
    pub dom: Option<String>,
    /// Extra markup attribute names accepted when reading.
    pub aliases: Vec<String>,
}

impl AttrSpec {
    pub fn new(name: impl Into<String>, default: Value, codec: AttrCodec) -> Self {
        Self {
            name: name.into(),
            default,
            codec,
            dom: None,
            aliases: Vec::new(),
        }
    }

    pub fn dom(mut self, dom: impl Into<String>) -> Self {
        self.dom = Some(dom.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Recognizes a markup element as a node or mark.
#[derive(Debug, Clone)]
pub struct ParseRule {
    pub tag: String,
    /// Markup attribute that must be present, optionally with an exact value.
    pub require_attr: Option<(String, Option<String>)>,
    /// Attribute values implied by the tag itself (`h2` gives `level: 2`).
    pub fixed_attrs: Attrs,
    /// When set, editable content is read from the first child element
    /// carrying this class instead of from the element itself.
    pub content_class: Option<String>,
}

impl ParseRule {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            require_attr: None,
            fixed_attrs: Attrs::new(),
            content_class: None,
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.require_attr = Some((name.into(), value.map(str::to_string)));
        self
    }

    pub fn fixed(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fixed_attrs.insert(name.into(), value);
        self
    }

    pub fn content_class(mut self, class: impl Into<String>) -> Self {
        self.content_class = Some(class.into());
        self
    }
}

/// Shape of a rendered element. `Hole` marks where the node's content goes.
#[derive(Debug, Clone, PartialEq)]
pub struct DomSpec {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<DomChild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DomChild {
    Hole,
    Element(DomSpec),
}

impl DomSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn hole(mut self) -> Self {
        self.children.push(DomChild::Hole);
        self
    }

    pub fn child(mut self, child: DomSpec) -> Self {
        self.children.push(DomChild::Element(child));
        self
    }
}

/// Custom renderer. Receives the node's attributes and the markup attributes
/// already encoded from its `AttrSpec`s.
pub type RenderFn = fn(&Attrs, BTreeMap<String, String>) -> DomSpec;

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub group: NodeGroup,
    pub content: String,
    pub draggable: bool,
    pub isolating: bool,
    pub defining: bool,
    /// Rendered by an embedded widget rather than as plain markup.
    pub external_view: bool,
    pub attrs: Vec<AttrSpec>,
    pub parse_rules: Vec<ParseRule>,
    pub render: Option<RenderFn>,
}

impl NodeSpec {
    pub fn block(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: NodeGroup::Block,
            content: content.into(),
            draggable: false,
            isolating: false,
            defining: false,
            external_view: false,
            attrs: Vec::new(),
            parse_rules: Vec::new(),
            render: None,
        }
    }

    pub fn attr(mut self, attr: AttrSpec) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn parse(mut self, rule: ParseRule) -> Self {
        self.parse_rules.push(rule);
        self
    }

    pub fn render(mut self, render: RenderFn) -> Self {
        self.render = Some(render);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MarkSpec {
    pub name: String,
    pub attrs: Vec<AttrSpec>,
    pub parse_rules: Vec<ParseRule>,
    pub render: Option<RenderFn>,
}

impl MarkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            parse_rules: Vec::new(),
            render: None,
        }
    }

    pub fn attr(mut self, attr: AttrSpec) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn parse(mut self, rule: ParseRule) -> Self {
        self.parse_rules.push(rule);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("unknown node type `{kind}` at {path:?}")]
    UnknownNode { kind: String, path: Path },
    #[error("unknown mark `{mark}` at {path:?}")]
    UnknownMark { mark: String, path: Path },
    #[error("content of `{kind}` at {path:?} does not match `{expr}`")]
    InvalidContent {
        kind: String,
        path: Path,
        expr: String,
    },
}

/// The node and mark types known to an editor. Declaration order is parse
/// priority and, for marks, nesting order when rendering.
#[derive(Debug, Clone)]
pub struct Schema {
    top: ContentExpr,
    nodes: Vec<NodeSpec>,
    content: HashMap<String, ContentExpr>,
    marks: Vec<MarkSpec>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            top: ContentExpr {
                terms: vec![ContentTerm {
                    name: "block".to_string(),
                    quantifier: Quantifier::OneOrMore,
                }],
            },
            nodes: Vec::new(),
            content: HashMap::new(),
            marks: Vec::new(),
        }
    }
}

impl Schema {
    pub fn register_node(&mut self, spec: NodeSpec) -> Result<(), String> {
        if self.node(&spec.name).is_some() || spec.name == "text" {
            return Err(format!("Duplicate node spec kind: {}", spec.name));
        }
        let content = ContentExpr::parse(&spec.content)?;
        self.content.insert(spec.name.clone(), content);
        self.nodes.push(spec);
        Ok(())
    }

    pub fn register_mark(&mut self, spec: MarkSpec) -> Result<(), String> {
        if self.mark(&spec.name).is_some() {
            return Err(format!("Duplicate mark spec: {}", spec.name));
        }
        self.marks.push(spec);
        Ok(())
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn marks(&self) -> &[MarkSpec] {
        &self.marks
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn mark(&self, name: &str) -> Option<&MarkSpec> {
        self.marks.iter().find(|m| m.name == name)
    }

    pub fn content_expr(&self, name: &str) -> Option<&ContentExpr> {
        self.content.get(name)
    }

    pub fn is_external_view(&self, kind: &str) -> bool {
        self.node(kind).is_some_and(|n| n.external_view)
    }

    pub fn is_isolating(&self, kind: &str) -> bool {
        self.node(kind).is_some_and(|n| n.isolating)
    }

    pub fn is_defining(&self, kind: &str) -> bool {
        self.node(kind).is_some_and(|n| n.defining)
    }

    pub fn accepts_inline(&self, kind: &str) -> bool {
        self.content_expr(kind)
            .is_some_and(|c| c.accepts_group(NodeGroup::Inline))
    }

    pub fn group_of(&self, node: &Node) -> Option<NodeGroup> {
        match node {
            Node::Text(_) => Some(NodeGroup::Inline),
            other => self.node(other.kind()).map(|n| n.group),
        }
    }

    /// Every declared attribute with its default, overlaid with `attrs`.
    pub fn node_attrs(&self, kind: &str, attrs: Attrs) -> Attrs {
        let Some(spec) = self.node(kind) else {
            return attrs;
        };
        fill_defaults(&spec.attrs, attrs)
    }

    pub fn mark_attrs(&self, mark: &str, attrs: Attrs) -> Attrs {
        let Some(spec) = self.mark(mark) else {
            return attrs;
        };
        fill_defaults(&spec.attrs, attrs)
    }

    /// Builds an element of a declared type with default attributes filled in.
    pub fn create_node(&self, kind: &str, attrs: Attrs, children: Vec<Node>) -> Node {
        Node::element(kind, self.node_attrs(kind, attrs), children)
    }

    /// Attributes brought to the form a parse would produce, with absent
    /// values replaced by declared defaults.
    pub fn canonical_attrs(&self, specs: &[AttrSpec], attrs: &Attrs) -> Attrs {
        specs
            .iter()
            .map(|spec| {
                let value = attrs
                    .get(&spec.name)
                    .and_then(|v| spec.codec.canonicalize(v))
                    .filter(|v| !v.is_null())
                    .unwrap_or_else(|| spec.default.clone());
                (spec.name.clone(), value)
            })
            .collect()
    }

    pub fn check_document(&self, doc: &Document) -> Result<(), SchemaViolation> {
        let mut path = Vec::new();
        self.check_children("doc", &self.top, &doc.children, &mut path)
    }

    fn check_children(
        &self,
        kind: &str,
        expr: &ContentExpr,
        children: &[Node],
        path: &mut Path,
    ) -> Result<(), SchemaViolation> {
        let mut shape: Vec<(&str, NodeGroup)> = Vec::with_capacity(children.len());
        for (ix, child) in children.iter().enumerate() {
            path.push(ix);
            match child {
                Node::Text(t) => {
                    if let Some(mark) = t.marks.names().find(|m| self.mark(m).is_none()) {
                        return Err(SchemaViolation::UnknownMark {
                            mark: mark.to_string(),
                            path: path.clone(),
                        });
                    }
                    shape.push(("text", NodeGroup::Inline));
                }
                Node::Element(el) => {
                    let (spec, content) = self.lookup(&el.kind, path)?;
                    self.check_children(&el.kind, content, &el.children, path)?;
                    shape.push((spec.name.as_str(), spec.group));
                }
            }
            path.pop();
        }
        if !expr.matches(&shape) {
            let expr_text = expr
                .terms
                .iter()
                .map(|t| {
                    let q = match t.quantifier {
                        Quantifier::One => "",
                        Quantifier::Optional => "?",
                        Quantifier::ZeroOrMore => "*",
                        Quantifier::OneOrMore => "+",
                    };
                    format!("{}{q}", t.name)
                })
                .collect::<Vec<_>>()
                .join(" ");
            return Err(SchemaViolation::InvalidContent {
                kind: kind.to_string(),
                path: path.clone(),
                expr: expr_text,
            });
        }
        Ok(())
    }

    fn lookup(&self, kind: &str, path: &Path) -> Result<(&NodeSpec, &ContentExpr), SchemaViolation> {
        let unknown = || SchemaViolation::UnknownNode {
            kind: kind.to_string(),
            path: path.clone(),
        };
        let spec = self.node(kind).ok_or_else(unknown)?;
        let content = self.content.get(kind).ok_or_else(unknown)?;
        Ok((spec, content))
    }
}

fn fill_defaults(specs: &[AttrSpec], mut attrs: Attrs) -> Attrs {
    for spec in specs {
        attrs
            .entry(spec.name.clone())
            .or_insert_with(|| spec.default.clone());
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape<'a>(items: &[(&'a str, NodeGroup)]) -> Vec<(&'a str, NodeGroup)> {
        items.to_vec()
    }

    #[test]
    fn content_expressions_backtrack() {
        let expr = ContentExpr::parse("heading? block+").unwrap();
        assert!(expr.matches(&shape(&[("heading", NodeGroup::Block)])));
        assert!(expr.matches(&shape(&[
            ("heading", NodeGroup::Block),
            ("paragraph", NodeGroup::Block)
        ])));
        assert!(!expr.matches(&[]));
        assert!(!expr.matches(&shape(&[("text", NodeGroup::Inline)])));
    }

    #[test]
    fn inline_star_accepts_empty_content() {
        let expr = ContentExpr::parse("inline*").unwrap();
        assert!(expr.matches(&[]));
        assert!(!expr.matches(&shape(&[("paragraph", NodeGroup::Block)])));
    }

    #[test]
    fn rejects_garbage_terms() {
        assert!(ContentExpr::parse("inline**").is_err());
        assert!(ContentExpr::parse("").unwrap().is_empty());
    }
}
