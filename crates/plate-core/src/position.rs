use serde_json::Value;

use crate::core::{Document, ElementNode, Marks, Node, TextNode};
use crate::ops::Path;

/// A flat position resolved against the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPos {
    pub pos: usize,
    /// Path of the innermost element whose content holds `pos`; empty for
    /// the top level of the document.
    pub parent_path: Path,
    /// `pos` relative to the start of the parent's content.
    pub parent_offset: usize,
    /// Index of the child that starts at (or contains) `pos`.
    pub index: usize,
    /// Characters into that child when `pos` falls strictly inside a text
    /// leaf, otherwise zero.
    pub text_offset: usize,
}

impl ResolvedPos {
    pub fn depth(&self) -> usize {
        self.parent_path.len()
    }
}

/// The content range of a node whose children are all inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Textblock {
    pub path: Path,
    pub start: usize,
    pub end: usize,
}

/// A text leaf addressed for a step: its path and a UTF-8 byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextPoint {
    pub path: Path,
    pub offset: usize,
}

pub(crate) fn is_textblock(el: &ElementNode) -> bool {
    el.children.iter().all(|c| !matches!(c, Node::Element(_)))
}

pub(crate) fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(ix, _)| ix)
        .unwrap_or(text.len())
}

impl Document {
    pub fn content_size(&self) -> usize {
        self.children.iter().map(Node::size).sum()
    }

    pub fn node_at_path(&self, path: &[usize]) -> Option<&Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.children.get(*first)?;
        for &ix in rest {
            node = match node {
                Node::Element(el) => el.children.get(ix)?,
                _ => return None,
            };
        }
        Some(node)
    }

    pub fn element_at_path(&self, path: &[usize]) -> Option<&ElementNode> {
        self.node_at_path(path)?.as_element()
    }

    fn children_at_path(&self, path: &[usize]) -> Option<&[Node]> {
        if path.is_empty() {
            return Some(&self.children);
        }
        Some(&self.element_at_path(path)?.children)
    }

    /// Position right before the node at `path`. The last index may equal the
    /// child count, addressing the end of the parent's content.
    pub fn pos_before(&self, path: &[usize]) -> Option<usize> {
        let (last, parents) = path.split_last()?;
        let mut pos = 0;
        let mut children: &[Node] = &self.children;
        for &ix in parents {
            pos += children.get(..ix)?.iter().map(Node::size).sum::<usize>();
            match children.get(ix)? {
                Node::Element(el) => {
                    pos += 1;
                    children = &el.children;
                }
                _ => return None,
            }
        }
        pos += children.get(..*last)?.iter().map(Node::size).sum::<usize>();
        Some(pos)
    }

    pub fn resolve(&self, pos: usize) -> Option<ResolvedPos> {
        if pos > self.content_size() {
            return None;
        }
        let mut parent_path: Path = Vec::new();
        let mut children: &[Node] = &self.children;
        let mut rel = pos;

        'descend: loop {
            let mut offset = 0;
            for (ix, child) in children.iter().enumerate() {
                if rel == offset {
                    return Some(ResolvedPos {
                        pos,
                        parent_path,
                        parent_offset: rel,
                        index: ix,
                        text_offset: 0,
                    });
                }
                let end = offset + child.size();
                if rel < end {
                    match child {
                        Node::Text(_) => {
                            return Some(ResolvedPos {
                                pos,
                                parent_path,
                                parent_offset: rel,
                                index: ix,
                                text_offset: rel - offset,
                            });
                        }
                        Node::Element(el) => {
                            parent_path.push(ix);
                            children = &el.children;
                            rel -= offset + 1;
                            continue 'descend;
                        }
                    }
                }
                offset = end;
            }
            return Some(ResolvedPos {
                pos,
                parent_path,
                parent_offset: rel,
                index: children.len(),
                text_offset: 0,
            });
        }
    }

    /// The node that starts at `pos`, or the text leaf `pos` falls inside.
    pub fn node_at(&self, pos: usize) -> Option<&Node> {
        let resolved = self.resolve(pos)?;
        self.children_at_path(&resolved.parent_path)?
            .get(resolved.index)
    }

    /// The innermost element enclosing `pos`, `None` at the top level.
    pub fn parent_at(&self, pos: usize) -> Option<&ElementNode> {
        let resolved = self.resolve(pos)?;
        if resolved.parent_path.is_empty() {
            return None;
        }
        self.element_at_path(&resolved.parent_path)
    }

    /// Every element enclosing `pos`, outermost first.
    pub fn ancestors_at(&self, pos: usize) -> Vec<&ElementNode> {
        let Some(resolved) = self.resolve(pos) else {
            return Vec::new();
        };
        (1..=resolved.parent_path.len())
            .filter_map(|depth| self.element_at_path(&resolved.parent_path[..depth]))
            .collect()
    }

    pub fn ancestor_kinds_at(&self, pos: usize) -> Vec<&str> {
        self.ancestors_at(pos)
            .into_iter()
            .map(|el| el.kind.as_str())
            .collect()
    }

    fn text_around(&self, pos: usize) -> (Option<&TextNode>, Option<&TextNode>) {
        let Some(resolved) = self.resolve(pos) else {
            return (None, None);
        };
        let Some(children) = self.children_at_path(&resolved.parent_path) else {
            return (None, None);
        };
        fn as_text(n: Option<&Node>) -> Option<&TextNode> {
            match n {
                Some(Node::Text(t)) => Some(t),
                _ => None,
            }
        }
        if resolved.text_offset > 0 {
            let inside = as_text(children.get(resolved.index));
            return (inside, inside);
        }
        let before = resolved
            .index
            .checked_sub(1)
            .and_then(|ix| as_text(children.get(ix)));
        (before, as_text(children.get(resolved.index)))
    }

    /// Marks in effect at `pos`: those of the text before it, or of the text
    /// after it at the start of a block.
    pub fn marks_at(&self, pos: usize) -> Marks {
        match self.text_around(pos) {
            (Some(t), _) => t.marks.clone(),
            (None, Some(t)) => t.marks.clone(),
            (None, None) => Marks::default(),
        }
    }

    pub fn char_before(&self, pos: usize) -> Option<char> {
        let resolved = self.resolve(pos)?;
        match self.text_around(pos) {
            (Some(t), _) if resolved.text_offset > 0 => {
                t.text.chars().nth(resolved.text_offset - 1)
            }
            (Some(t), _) => t.text.chars().last(),
            _ => None,
        }
    }

    /// Calls `f` with the path and start position of every node, in document
    /// order.
    pub fn walk<'a>(&'a self, mut f: impl FnMut(&[usize], usize, &'a Node)) {
        fn go<'a>(
            children: &'a [Node],
            path: &mut Path,
            mut pos: usize,
            f: &mut impl FnMut(&[usize], usize, &'a Node),
        ) {
            for (ix, child) in children.iter().enumerate() {
                path.push(ix);
                f(path, pos, child);
                if let Node::Element(el) = child {
                    go(&el.children, path, pos + 1, f);
                }
                path.pop();
                pos += child.size();
            }
        }
        go(&self.children, &mut Vec::new(), 0, &mut f);
    }

    pub fn textblocks(&self) -> Vec<Textblock> {
        let mut out = Vec::new();
        self.walk(|path, pos, node| {
            if let Node::Element(el) = node
                && is_textblock(el)
            {
                out.push(Textblock {
                    path: path.to_vec(),
                    start: pos + 1,
                    end: pos + 1 + el.content_size(),
                });
            }
        });
        out
    }

    pub fn textblock_at(&self, pos: usize) -> Option<Textblock> {
        self.textblocks()
            .into_iter()
            .find(|tb| tb.start <= pos && pos <= tb.end)
    }

    /// Closest position that sits inside some inline-content node.
    pub fn nearest_text_pos(&self, pos: usize) -> Option<usize> {
        self.textblocks()
            .into_iter()
            .map(|tb| pos.clamp(tb.start, tb.end))
            .min_by_key(|p| p.abs_diff(pos))
    }

    /// Text leaves overlapping `[from, to)` with the overlapping char range of
    /// each, relative to the leaf.
    pub fn text_leaves_between(
        &self,
        from: usize,
        to: usize,
    ) -> Vec<(Path, std::ops::Range<usize>, &TextNode)> {
        let mut out = Vec::new();
        self.walk(|path, pos, node| {
            if let Node::Text(t) = node {
                let end = pos + t.text.chars().count();
                let start = from.max(pos);
                let stop = to.min(end);
                if start < stop {
                    out.push((path.to_vec(), start - pos..stop - pos, t));
                }
            }
        });
        out
    }

    pub fn range_has_mark(&self, from: usize, to: usize, mark: &str) -> bool {
        let leaves = self.text_leaves_between(from, to);
        !leaves.is_empty() && leaves.iter().all(|(_, _, t)| t.marks.has(mark))
    }

    /// Text in `[from, to)`, with `block_separator` between the parts that
    /// come from different blocks.
    pub fn text_between(&self, from: usize, to: usize, block_separator: &str) -> String {
        let mut out = String::new();
        let mut first = true;
        for tb in self.textblocks() {
            let start = from.max(tb.start);
            let stop = to.min(tb.end);
            if start > stop || (start == stop && from != to) {
                continue;
            }
            if !first {
                out.push_str(block_separator);
            }
            first = false;
            for (_, range, t) in self.text_leaves_between(start, stop) {
                out.extend(t.text.chars().skip(range.start).take(range.len()));
            }
        }
        out
    }

    /// The text leaf that an insertion at `pos` extends: the leaf containing
    /// `pos`, else the one ending at it, else the one starting at it.
    pub fn text_point_at(&self, pos: usize) -> Option<TextPoint> {
        let resolved = self.resolve(pos)?;
        let children = self.children_at_path(&resolved.parent_path)?;
        let leaf_path = |ix: usize| {
            let mut path = resolved.parent_path.clone();
            path.push(ix);
            path
        };
        if resolved.text_offset > 0 {
            if let Some(Node::Text(t)) = children.get(resolved.index) {
                return Some(TextPoint {
                    path: leaf_path(resolved.index),
                    offset: byte_offset(&t.text, resolved.text_offset),
                });
            }
            return None;
        }
        if let Some(ix) = resolved.index.checked_sub(1)
            && let Some(Node::Text(t)) = children.get(ix)
        {
            return Some(TextPoint {
                path: leaf_path(ix),
                offset: t.text.len(),
            });
        }
        match children.get(resolved.index) {
            Some(Node::Text(_)) => Some(TextPoint {
                path: leaf_path(resolved.index),
                offset: 0,
            }),
            _ => None,
        }
    }

    /// Finds a node by its `id` attribute.
    pub fn find_by_id(&self, id: &str) -> Option<(Path, usize, &Node)> {
        let mut found = None;
        self.walk(|path, pos, node| {
            if found.is_some() {
                return;
            }
            let matches = node
                .attrs()
                .and_then(|a| a.get("id"))
                .and_then(Value::as_str)
                .is_some_and(|v| v == id);
            if matches {
                found = Some((path.to_vec(), pos, node));
            }
        });
        found
    }
}
