use std::collections::BTreeMap;

use html5ever::tendril::TendrilSink;
use html5ever::{ParseOpts, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

/// A tree of tagged elements with string attributes: the serialized form of a
/// document.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkupNode {
    Element(MarkupElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkupElement {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<MarkupNode>,
}

impl MarkupElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Concatenated text of every descendant, in document order.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[MarkupNode], out: &mut String) {
    for node in nodes {
        match node {
            MarkupNode::Text(text) => out.push_str(text),
            MarkupNode::Element(el) => collect_text(&el.children, out),
        }
    }
}

/// Reads a markup fragment (any number of top-level elements and text runs)
/// with a browser-grade HTML parser.
///
/// Reading never fails: void tags, entities and unclosed elements are
/// handled the way a browser handles them. Tag and attribute names come back
/// lower-cased.
pub fn parse_markup(source: &str) -> Vec<MarkupNode> {
    let dom = parse_document(RcDom::default(), ParseOpts::default()).one(source);
    match find_element(&dom.document, "body") {
        Some(body) => convert_children(&body),
        None => Vec::new(),
    }
}

fn find_element(handle: &Handle, tag: &str) -> Option<Handle> {
    for child in handle.children.borrow().iter() {
        if let NodeData::Element { name, .. } = &child.data {
            if &*name.local == tag {
                return Some(child.clone());
            }
        }
        if let Some(found) = find_element(child, tag) {
            return Some(found);
        }
    }
    None
}

fn convert_children(handle: &Handle) -> Vec<MarkupNode> {
    let mut out = Vec::new();
    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Element { name, attrs, .. } => {
                let mut el = MarkupElement::new(name.local.to_ascii_lowercase().to_string());
                for attr in attrs.borrow().iter() {
                    el.attrs
                        .insert(attr.name.local.to_ascii_lowercase().to_string(), attr.value.to_string());
                }
                el.children = convert_children(child);
                out.push(MarkupNode::Element(el));
            }
            NodeData::Text { contents } => {
                let text = contents.borrow();
                if let Some(MarkupNode::Text(prev)) = out.last_mut() {
                    prev.push_str(&text);
                } else {
                    out.push(MarkupNode::Text(text.to_string()));
                }
            }
            _ => {}
        }
    }
    out
}

pub fn write_markup(nodes: &[MarkupNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(node, &mut out);
    }
    out
}

fn write_node(node: &MarkupNode, out: &mut String) {
    match node {
        MarkupNode::Text(text) => out.push_str(&html_escape::encode_text(text)),
        MarkupNode::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (name, value) in &el.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&html_escape::encode_double_quoted_attribute(value));
                out.push('"');
            }
            out.push('>');
            for child in &el.children {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}
