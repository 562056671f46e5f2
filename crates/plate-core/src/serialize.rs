use std::collections::BTreeMap;

use crate::core::{Attrs, Document, Marks, Node, TextNode};
use crate::markup::{MarkupElement, MarkupNode, parse_markup, write_markup};
use crate::schema::{AttrSpec, DomChild, DomSpec, NodeSpec, ParseRule, Schema};

impl Schema {
    /// Builds a document from markup. Reading never fails: unknown elements
    /// degrade to paragraphs of their text and undecodable attributes fall
    /// back to their defaults.
    pub fn parse_markup(&self, source: &str) -> Document {
        let nodes = parse_markup(source);
        let mut children = Vec::new();
        self.parse_blocks(&nodes, &mut children);
        Document { children }
    }

    pub fn render_markup(&self, doc: &Document) -> String {
        write_markup(&self.render_nodes(&doc.children))
    }

    pub fn render_nodes(&self, nodes: &[Node]) -> Vec<MarkupNode> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                Node::Text(t) => out.push(self.render_text(t)),
                Node::Element(el) => {
                    let content = self.render_nodes(&el.children);
                    out.push(self.render_element(&el.kind, &el.attrs, content));
                }
            }
        }
        out
    }

    fn render_element(&self, kind: &str, attrs: &Attrs, content: Vec<MarkupNode>) -> MarkupNode {
        let Some(spec) = self.node(kind) else {
            log::warn!("rendering unknown node type `{kind}` as div");
            let mut el = MarkupElement::new("div");
            el.children = content;
            return MarkupNode::Element(el);
        };
        let encoded = encode_attrs(&spec.attrs, attrs);
        let dom = match spec.render {
            Some(render) => render(attrs, encoded),
            None => default_dom(&spec.parse_rules, encoded, &spec.name),
        };
        fill_dom(dom, &mut Some(content))
    }

    fn render_text(&self, text: &TextNode) -> MarkupNode {
        let mut node = MarkupNode::Text(text.text.clone());
        // Innermost first, so the first declared mark ends up outermost.
        for spec in self.marks().iter().rev() {
            let Some(attrs) = text.marks.get(&spec.name) else {
                continue;
            };
            let encoded = encode_attrs(&spec.attrs, attrs);
            let dom = match spec.render {
                Some(render) => render(attrs, encoded),
                None => default_dom(&spec.parse_rules, encoded, &spec.name),
            };
            node = fill_dom(dom, &mut Some(vec![node]));
        }
        node
    }

    fn parse_blocks(&self, nodes: &[MarkupNode], out: &mut Vec<Node>) {
        let mut run: Vec<Node> = Vec::new();
        for node in nodes {
            match node {
                MarkupNode::Text(text) => {
                    if !text.trim_ascii().is_empty() {
                        run.push(Node::Text(TextNode {
                            text: text.clone(),
                            marks: Marks::default(),
                        }));
                    }
                }
                MarkupNode::Element(el) => {
                    if let Some((spec, rule)) = self.match_node(el) {
                        self.flush_run(&mut run, out);
                        out.push(self.build_node(spec, rule, el));
                    } else if self.match_mark(el).is_some() {
                        self.parse_inline(std::slice::from_ref(node), &Marks::default(), &mut run);
                    } else {
                        self.flush_run(&mut run, out);
                        log::warn!("unknown element <{}> degraded to a paragraph", el.tag);
                        let text = collapse_whitespace(&el.text_content());
                        if !text.is_empty() {
                            out.push(Node::paragraph(text));
                        }
                    }
                }
            }
        }
        self.flush_run(&mut run, out);
    }

    fn flush_run(&self, run: &mut Vec<Node>, out: &mut Vec<Node>) {
        if run.is_empty() {
            return;
        }
        let children = tidy_inline(std::mem::take(run));
        if !children.is_empty() {
            out.push(Node::element("paragraph", Attrs::new(), children));
        }
    }

    fn parse_inline(&self, nodes: &[MarkupNode], marks: &Marks, out: &mut Vec<Node>) {
        for node in nodes {
            match node {
                MarkupNode::Text(text) => out.push(Node::Text(TextNode {
                    text: text.clone(),
                    marks: marks.clone(),
                })),
                MarkupNode::Element(el) => {
                    if let Some((spec, attrs)) = self.match_mark(el) {
                        let inner = marks.clone().with(spec.name.clone(), attrs);
                        self.parse_inline(&el.children, &inner, out);
                    } else {
                        if self.match_node(el).is_some() {
                            log::debug!("flattening block <{}> inside inline content", el.tag);
                        } else if el.tag == "br" {
                            out.push(Node::Text(TextNode {
                                text: " ".to_string(),
                                marks: marks.clone(),
                            }));
                        }
                        self.parse_inline(&el.children, marks, out);
                    }
                }
            }
        }
    }

    fn build_node(&self, spec: &NodeSpec, rule: &ParseRule, el: &MarkupElement) -> Node {
        let mut attrs = decode_attrs(&spec.attrs, el);
        for (name, value) in &rule.fixed_attrs {
            attrs.insert(name.clone(), value.clone());
        }
        let content: &[MarkupNode] = rule
            .content_class
            .as_deref()
            .and_then(|class| {
                el.children.iter().find_map(|c| match c {
                    MarkupNode::Element(inner) if inner.has_class(class) => {
                        Some(inner.children.as_slice())
                    }
                    _ => None,
                })
            })
            .unwrap_or(&el.children);

        let mut children = Vec::new();
        if self.accepts_inline(&spec.name) {
            self.parse_inline(content, &Marks::default(), &mut children);
            children = tidy_inline(children);
        } else {
            self.parse_blocks(content, &mut children);
        }
        Node::element(spec.name.clone(), attrs, children)
    }

    fn match_node(&self, el: &MarkupElement) -> Option<(&NodeSpec, &ParseRule)> {
        self.nodes().iter().find_map(|spec| {
            spec.parse_rules
                .iter()
                .find(|rule| rule_matches(rule, el))
                .map(|rule| (spec, rule))
        })
    }

    fn match_mark(&self, el: &MarkupElement) -> Option<(&crate::schema::MarkSpec, Attrs)> {
        self.marks().iter().find_map(|spec| {
            let rule = spec.parse_rules.iter().find(|rule| rule_matches(rule, el))?;
            let mut attrs = decode_attrs(&spec.attrs, el);
            for (name, value) in &rule.fixed_attrs {
                attrs.insert(name.clone(), value.clone());
            }
            Some((spec, attrs))
        })
    }
}

fn rule_matches(rule: &ParseRule, el: &MarkupElement) -> bool {
    if rule.tag != el.tag {
        return false;
    }
    match &rule.require_attr {
        None => true,
        Some((name, None)) => el.attr(name).is_some(),
        Some((name, Some(value))) => el.attr(name) == Some(value.as_str()),
    }
}

fn decode_attrs(specs: &[AttrSpec], el: &MarkupElement) -> Attrs {
    let mut attrs = Attrs::new();
    for spec in specs {
        let raw = spec
            .dom
            .iter()
            .chain(spec.aliases.iter())
            .find_map(|name| el.attr(name));
        let value = match raw {
            Some(raw) => spec.codec.decode(raw).unwrap_or_else(|| {
                log::debug!(
                    "attribute `{}` on <{}> did not decode, using default",
                    spec.name,
                    el.tag
                );
                spec.default.clone()
            }),
            None => spec.default.clone(),
        };
        attrs.insert(spec.name.clone(), value);
    }
    attrs
}

fn encode_attrs(specs: &[AttrSpec], attrs: &Attrs) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for spec in specs {
        let Some(dom) = &spec.dom else {
            continue;
        };
        let value = attrs.get(&spec.name).unwrap_or(&spec.default);
        if let Some(encoded) = spec.codec.encode(value) {
            out.insert(dom.clone(), encoded);
        }
    }
    out
}

fn default_dom(rules: &[ParseRule], encoded: BTreeMap<String, String>, name: &str) -> DomSpec {
    let Some(rule) = rules.first() else {
        return DomSpec::new(name).hole();
    };
    let mut dom = DomSpec::new(rule.tag.clone()).hole();
    if let Some((attr, Some(value))) = &rule.require_attr {
        dom.attrs.insert(attr.clone(), value.clone());
    }
    dom.attrs.extend(encoded);
    dom
}

/// Turns a render spec into markup, moving `content` into the first hole.
fn fill_dom(dom: DomSpec, content: &mut Option<Vec<MarkupNode>>) -> MarkupNode {
    let mut el = MarkupElement::new(dom.tag);
    el.attrs = dom.attrs;
    for child in dom.children {
        match child {
            DomChild::Hole => el.children.extend(content.take().unwrap_or_default()),
            DomChild::Element(inner) => el.children.push(fill_dom(inner, content)),
        }
    }
    MarkupNode::Element(el)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapses markup whitespace runs across leaves, trims the ends of the
/// block and merges neighbouring leaves with equal marks. Non-breaking spaces
/// are content and survive.
fn tidy_inline(children: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    let mut prev_space = true;
    for child in children {
        let Node::Text(t) = child else {
            prev_space = false;
            out.push(child);
            continue;
        };
        let mut text = String::with_capacity(t.text.len());
        for ch in t.text.chars() {
            if ch.is_ascii_whitespace() {
                if !prev_space {
                    text.push(' ');
                    prev_space = true;
                }
            } else {
                text.push(ch);
                prev_space = false;
            }
        }
        if text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(Node::Text(prev)) if prev.marks == t.marks => prev.text.push_str(&text),
            _ => out.push(Node::Text(TextNode {
                text,
                marks: t.marks,
            })),
        }
    }
    if let Some(Node::Text(last)) = out.last_mut() {
        if last.text.ends_with(' ') {
            last.text.pop();
        }
        if last.text.is_empty() {
            out.pop();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;

    #[test]
    fn whitespace_collapses_across_leaves() {
        let mut bold = Marks::new();
        bold.insert("bold", Attrs::new());
        let out = tidy_inline(vec![
            Node::text("\n  Select  this "),
            Node::marked_text(" text", bold.clone()),
            Node::text(" now \n"),
        ]);
        assert_eq!(
            out,
            vec![
                Node::text("Select this "),
                Node::marked_text("text", bold),
                Node::text(" now"),
            ]
        );
    }
}
