use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::{
    AttrPatch, ApplyError, Attrs, Editor, EditorState, Marks, Node, Selection, TextNode,
    apply_transaction_to,
};
use crate::ops::{Op, Path, Transaction};
use crate::plugin::PluginRegistry;
use crate::position::byte_offset;
use crate::schema::{NodeGroup, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandErrorKind {
    /// Preconditions not met; nothing was changed.
    Rejected,
    /// The result would not satisfy the schema.
    Invariant,
    /// The targeted node no longer exists.
    StaleReference,
    /// No command or query with that id.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CommandError {
    kind: CommandErrorKind,
    message: String,
}

impl CommandError {
    pub fn new(kind: CommandErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Rejected, message)
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::StaleReference, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(CommandErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> CommandErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ApplyError> for CommandError {
    fn from(value: ApplyError) -> Self {
        match value {
            ApplyError::Invariant(msg) => Self::new(CommandErrorKind::Invariant, msg),
            other => Self::rejected(other.to_string()),
        }
    }
}

/// Read-only view handed to a command while it builds its transaction.
pub struct CommandContext<'a> {
    state: &'a EditorState,
    registry: &'a PluginRegistry,
}

impl<'a> CommandContext<'a> {
    pub(crate) fn new(state: &'a EditorState, registry: &'a PluginRegistry) -> Self {
        Self { state, registry }
    }

    pub fn state(&self) -> &'a EditorState {
        self.state
    }

    pub fn doc(&self) -> &'a crate::core::Document {
        &self.state.doc
    }

    pub fn selection(&self) -> Selection {
        self.state.selection
    }

    pub fn registry(&self) -> &'a PluginRegistry {
        self.registry
    }

    pub fn schema(&self) -> &'a Schema {
        self.registry.schema()
    }
}

type BuildFn = dyn Fn(&CommandContext<'_>) -> Result<Transaction, CommandError> + Send + Sync;

/// A pure function from editor state to a proposed transaction.
#[derive(Clone)]
pub struct Command {
    label: String,
    build: Arc<BuildFn>,
}

impl Command {
    pub fn new(
        label: impl Into<String>,
        build: impl Fn(&CommandContext<'_>) -> Result<Transaction, CommandError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            build: Arc::new(build),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn build(&self, ctx: &CommandContext<'_>) -> Result<Transaction, CommandError> {
        (self.build)(ctx)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("label", &self.label).finish()
    }
}

/// Commands run left to right as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    commands: Vec<Command>,
    source: Option<String>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source(&self) -> String {
        match &self.source {
            Some(source) => source.clone(),
            None => {
                let labels: Vec<&str> = self.commands.iter().map(Command::label).collect();
                format!("chain:{}", labels.join("+"))
            }
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn then(mut self, other: Chain) -> Self {
        self.commands.extend(other.commands);
        self
    }

    pub fn toggle_mark(self, mark: &str) -> Self {
        self.push(toggle_mark(mark, Attrs::new()))
    }

    pub fn toggle_mark_with(self, mark: &str, attrs: Attrs) -> Self {
        self.push(toggle_mark(mark, attrs))
    }

    pub fn set_mark(self, mark: &str, attrs: Attrs) -> Self {
        self.push(set_mark(mark, attrs))
    }

    pub fn set_mark_range(self, from: usize, to: usize, mark: &str, attrs: Attrs) -> Self {
        self.push(set_mark_range(from, to, mark, attrs))
    }

    pub fn unset_mark(self, mark: &str) -> Self {
        self.push(unset_mark(mark))
    }

    pub fn delete_range(self, from: usize, to: usize) -> Self {
        self.push(delete_range(from, to))
    }

    pub fn delete_selection(self) -> Self {
        self.push(delete_selection())
    }

    pub fn insert_content(self, nodes: Vec<Node>) -> Self {
        self.push(insert_content(None, nodes))
    }

    pub fn insert_content_at(self, pos: usize, nodes: Vec<Node>) -> Self {
        self.push(insert_content(Some(pos), nodes))
    }

    pub fn insert_text(self, text: &str) -> Self {
        self.push(insert_text(text))
    }

    pub fn replace_range(self, from: usize, to: usize, nodes: Vec<Node>) -> Self {
        self.push(replace_range(from, to, nodes))
    }

    pub fn replace_block_at(self, pos: usize, nodes: Vec<Node>) -> Self {
        self.push(replace_block_at(pos, nodes))
    }

    pub fn update_node_attrs(self, id: &str, patch: AttrPatch) -> Self {
        self.push(update_node_attrs(id, patch))
    }

    pub fn set_block_type(self, kind: &str, attrs: Attrs) -> Self {
        self.push(set_block_type(kind, attrs))
    }

    pub fn set_selection(self, selection: Selection) -> Self {
        self.push(set_selection(selection))
    }

    pub fn run(&self, editor: &mut Editor) -> Result<(), CommandError> {
        editor.run_chain(self)
    }

    pub fn can(&self, editor: &Editor) -> bool {
        editor.can_run(self)
    }
}

pub fn toggle_mark(mark: &str, attrs: Attrs) -> Command {
    let mark = mark.to_string();
    Command::new(format!("toggle_mark:{mark}"), move |ctx| {
        let sel = ctx.selection();
        if sel.is_collapsed() {
            return Err(CommandError::rejected(format!(
                "Nothing selected to toggle `{mark}` on"
            )));
        }
        known_mark(ctx, &mark)?;
        let (from, to) = (sel.from(), sel.to());
        if ctx.doc().text_leaves_between(from, to).is_empty() {
            return Err(CommandError::rejected("Selection holds no text"));
        }
        if ctx.doc().range_has_mark(from, to, &mark) {
            mark_range_tx(ctx, from, to, &|marks: &mut Marks| {
                marks.remove(&mark);
            })
        } else {
            let attrs = ctx.schema().mark_attrs(&mark, attrs.clone());
            mark_range_tx(ctx, from, to, &|marks: &mut Marks| {
                marks.insert(mark.clone(), attrs.clone());
            })
        }
    })
}

pub fn set_mark(mark: &str, attrs: Attrs) -> Command {
    let mark = mark.to_string();
    Command::new(format!("set_mark:{mark}"), move |ctx| {
        let sel = ctx.selection();
        if sel.is_collapsed() {
            return Err(CommandError::rejected(format!(
                "Nothing selected to apply `{mark}` to"
            )));
        }
        set_mark_tx(ctx, sel.from(), sel.to(), &mark, &attrs)
    })
}

pub fn set_mark_range(from: usize, to: usize, mark: &str, attrs: Attrs) -> Command {
    let mark = mark.to_string();
    Command::new(format!("set_mark_range:{mark}"), move |ctx| {
        if from >= to {
            return Err(CommandError::rejected(format!("Empty or inverted range {from}..{to}")));
        }
        set_mark_tx(ctx, from, to, &mark, &attrs)
    })
}

fn set_mark_tx(
    ctx: &CommandContext<'_>,
    from: usize,
    to: usize,
    mark: &str,
    attrs: &Attrs,
) -> Result<Transaction, CommandError> {
    known_mark(ctx, mark)?;
    let attrs = ctx.schema().mark_attrs(mark, attrs.clone());
    mark_range_tx(ctx, from, to, &|marks: &mut Marks| {
        marks.insert(mark.to_string(), attrs.clone());
    })
}

pub fn unset_mark(mark: &str) -> Command {
    let mark = mark.to_string();
    Command::new(format!("unset_mark:{mark}"), move |ctx| {
        let sel = ctx.selection();
        if sel.is_collapsed() {
            return Err(CommandError::rejected(format!(
                "Nothing selected to remove `{mark}` from"
            )));
        }
        known_mark(ctx, &mark)?;
        mark_range_tx(ctx, sel.from(), sel.to(), &|marks: &mut Marks| {
            marks.remove(&mark);
        })
    })
}

pub fn delete_range(from: usize, to: usize) -> Command {
    Command::new("delete_range", move |ctx| delete_range_tx(ctx, from, to))
}

pub fn delete_selection() -> Command {
    Command::new("delete_selection", |ctx| {
        let sel = ctx.selection();
        delete_range_tx(ctx, sel.from(), sel.to())
    })
}

/// Inserts at `pos`, or at the selection when `pos` is `None` (replacing it
/// when it is not collapsed).
pub fn insert_content(pos: Option<usize>, nodes: Vec<Node>) -> Command {
    Command::new("insert_content", move |ctx| match pos {
        Some(pos) => insert_content_tx(ctx, pos, &nodes),
        None => {
            let sel = ctx.selection();
            if sel.is_collapsed() {
                insert_content_tx(ctx, sel.head, &nodes)
            } else {
                replace_range_tx(ctx, sel.from(), sel.to(), &nodes)
            }
        }
    })
}

/// Types text at the selection, carrying the marks in effect there.
pub fn insert_text(text: &str) -> Command {
    let text = text.to_string();
    Command::new("insert_text", move |ctx| {
        let sel = ctx.selection();
        let marks = ctx.doc().marks_at(sel.from());
        let nodes = vec![Node::marked_text(text.clone(), marks)];
        if sel.is_collapsed() {
            insert_content_tx(ctx, sel.head, &nodes)
        } else {
            replace_range_tx(ctx, sel.from(), sel.to(), &nodes)
        }
    })
}

pub fn replace_range(from: usize, to: usize, nodes: Vec<Node>) -> Command {
    Command::new("replace_range", move |ctx| {
        replace_range_tx(ctx, from, to, &nodes)
    })
}

/// Swaps the text block holding `pos` for `nodes`.
pub fn replace_block_at(pos: usize, nodes: Vec<Node>) -> Command {
    Command::new("replace_block_at", move |ctx| {
        let Some(tb) = ctx.doc().textblock_at(pos) else {
            return Err(CommandError::rejected(format!("No text block at {pos}")));
        };
        let Some((ix, parent)) = tb.path.split_last() else {
            return Err(CommandError::rejected("Text block has no parent"));
        };
        insert_blocks_tx(ctx, parent, *ix, true, Vec::new(), &nodes)
    })
}

/// Patches the attributes of the node carrying `id`. The node is looked up
/// when the command runs, so edits earlier in the same turn cannot make it
/// hit the wrong node.
pub fn update_node_attrs(id: &str, patch: AttrPatch) -> Command {
    let id = id.to_string();
    Command::new(format!("update_node_attrs:{id}"), move |ctx| {
        let Some((path, _, _)) = ctx.doc().find_by_id(&id) else {
            return Err(CommandError::stale(format!("Node `{id}` no longer exists")));
        };
        if patch.is_empty() {
            return Ok(Transaction::empty());
        }
        Ok(Transaction::new(vec![Op::SetNodeAttrs {
            path,
            patch: patch.clone(),
        }])
        .selection_after(ctx.selection()))
    })
}

/// Converts the text blocks touched by the selection to `kind`. Embedded
/// widget nodes are left alone.
pub fn set_block_type(kind: &str, attrs: Attrs) -> Command {
    let kind = kind.to_string();
    Command::new(format!("set_block_type:{kind}"), move |ctx| {
        let schema = ctx.schema();
        let Some(spec) = schema.node(&kind) else {
            return Err(CommandError::unknown(format!("Unknown node type: {kind}")));
        };
        if !schema.accepts_inline(&kind) || spec.external_view {
            return Err(CommandError::rejected(format!("`{kind}` is not a text block type")));
        }
        let attrs = schema.node_attrs(&kind, attrs.clone());
        let sel = ctx.selection();
        let doc = ctx.doc();
        let mut ops = Vec::new();
        for tb in doc.textblocks() {
            if tb.end < sel.from() || tb.start > sel.to() {
                continue;
            }
            let Some(el) = doc.element_at_path(&tb.path) else {
                continue;
            };
            if schema.is_external_view(&el.kind) || (el.kind == kind && el.attrs == attrs) {
                continue;
            }
            ops.push(Op::ReplaceNode {
                path: tb.path.clone(),
                node: Node::element(kind.clone(), attrs.clone(), el.children.clone()),
            });
        }
        if ops.is_empty() {
            return Ok(Transaction::empty());
        }
        Ok(Transaction::new(ops).selection_after(sel))
    })
}

pub fn set_selection(selection: Selection) -> Command {
    Command::new("set_selection", move |ctx| {
        let size = ctx.doc().content_size();
        if selection.to() > size {
            return Err(CommandError::rejected(format!(
                "Selection {}..{} is outside the document",
                selection.from(),
                selection.to()
            )));
        }
        Ok(Transaction::empty().selection_after(selection))
    })
}

fn known_mark(ctx: &CommandContext<'_>, mark: &str) -> Result<(), CommandError> {
    if ctx.schema().mark(mark).is_none() {
        return Err(CommandError::unknown(format!("Unknown mark: {mark}")));
    }
    Ok(())
}

fn check_range(ctx: &CommandContext<'_>, from: usize, to: usize) -> Result<(), CommandError> {
    if from > to {
        return Err(CommandError::rejected(format!("Inverted range {from}..{to}")));
    }
    let size = ctx.doc().content_size();
    if to > size {
        return Err(CommandError::rejected(format!(
            "Range {from}..{to} is outside the document (size {size})"
        )));
    }
    Ok(())
}

fn mark_range_tx(
    ctx: &CommandContext<'_>,
    from: usize,
    to: usize,
    apply: &dyn Fn(&mut Marks),
) -> Result<Transaction, CommandError> {
    check_range(ctx, from, to)?;
    let doc = ctx.doc();
    let mut ops = Vec::new();
    for tb in doc.textblocks() {
        let start = from.max(tb.start);
        let stop = to.min(tb.end);
        if start >= stop {
            continue;
        }
        let Some(el) = doc.element_at_path(&tb.path) else {
            continue;
        };
        let new_children =
            apply_marks_in_block(&el.children, start - tb.start, stop - tb.start, apply);
        if new_children == el.children {
            continue;
        }
        replace_children_ops(&tb.path, el.children.len(), new_children, &mut ops);
    }
    Ok(Transaction::new(ops).selection_after(ctx.selection()))
}

fn apply_marks_in_block(
    children: &[Node],
    start: usize,
    end: usize,
    apply: &dyn Fn(&mut Marks),
) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::new();
    let mut cursor = 0usize;

    for node in children {
        let node_start = cursor;
        cursor += node.size();
        let Node::Text(t) = node else {
            out.push(node.clone());
            continue;
        };
        if end <= node_start || start >= cursor {
            out.push(node.clone());
            continue;
        }

        let len = t.text.chars().count();
        let sel_start = start.saturating_sub(node_start).min(len);
        let sel_end = (end - node_start).min(len);
        let a = byte_offset(&t.text, sel_start);
        let b = byte_offset(&t.text, sel_end);

        let mut marked = t.marks.clone();
        apply(&mut marked);
        for (text, marks) in [
            (&t.text[..a], &t.marks),
            (&t.text[a..b], &marked),
            (&t.text[b..], &t.marks),
        ] {
            if !text.is_empty() {
                out.push(Node::Text(TextNode {
                    text: text.to_string(),
                    marks: marks.clone(),
                }));
            }
        }
    }
    out
}

/// Inline children covering the char range `[start, end)` of the content.
fn slice_inline(children: &[Node], start: usize, end: usize) -> Vec<Node> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for node in children {
        let node_start = cursor;
        cursor += node.size();
        if cursor <= start || node_start >= end {
            continue;
        }
        match node {
            Node::Text(t) => {
                let a = byte_offset(&t.text, start.saturating_sub(node_start));
                let b = byte_offset(&t.text, end - node_start);
                out.push(Node::Text(TextNode {
                    text: t.text[a..b].to_string(),
                    marks: t.marks.clone(),
                }));
            }
            other => out.push(other.clone()),
        }
    }
    out
}

fn replace_children_ops(block: &[usize], old_len: usize, children: Vec<Node>, ops: &mut Vec<Op>) {
    for ix in (0..old_len).rev() {
        ops.push(Op::RemoveNode {
            path: child_path(block, ix),
        });
    }
    for (ix, node) in children.into_iter().enumerate() {
        ops.push(Op::InsertNode {
            path: child_path(block, ix),
            node,
        });
    }
}

fn child_path(parent: &[usize], ix: usize) -> Path {
    let mut path = parent.to_vec();
    path.push(ix);
    path
}

fn delete_range_tx(
    ctx: &CommandContext<'_>,
    from: usize,
    to: usize,
) -> Result<Transaction, CommandError> {
    check_range(ctx, from, to)?;
    if from == to {
        return Ok(Transaction::empty());
    }
    let doc = ctx.doc();
    let schema = ctx.schema();

    let (Some(a), Some(b)) = (doc.textblock_at(from), doc.textblock_at(to)) else {
        return delete_whole_nodes_tx(ctx, from, to);
    };

    if a.path == b.path {
        if let Some(point) = doc.text_point_at(from)
            && let Some(Node::Text(t)) = doc.node_at_path(&point.path)
            && let Some(leaf_start) = doc.pos_before(&point.path)
            && to <= leaf_start + t.text.chars().count()
        {
            return Ok(Transaction::new(vec![Op::RemoveText {
                range: point.offset..byte_offset(&t.text, to - leaf_start),
                path: point.path,
            }])
            .selection_after(Selection::collapsed(from)));
        }
        let Some(el) = doc.element_at_path(&a.path) else {
            return Err(CommandError::rejected("Text block vanished"));
        };
        let total = el.content_size();
        let mut children = slice_inline(&el.children, 0, from - a.start);
        children.extend(slice_inline(&el.children, to - a.start, total));
        let mut ops = Vec::new();
        replace_children_ops(&a.path, el.children.len(), children, &mut ops);
        return Ok(Transaction::new(ops).selection_after(Selection::collapsed(from)));
    }

    let common = a
        .path
        .iter()
        .zip(b.path.iter())
        .take_while(|(x, y)| x == y)
        .count();
    for path in [&a.path, &b.path] {
        for depth in common + 1..=path.len() {
            if let Some(el) = doc.element_at_path(&path[..depth])
                && schema.is_isolating(&el.kind)
            {
                return Err(CommandError::rejected(format!(
                    "Cannot delete across the boundary of `{}`",
                    el.kind
                )));
            }
        }
    }
    if a.path.len() != common + 1 || b.path.len() != common + 1 {
        return Err(CommandError::rejected(
            "Cannot join text blocks that sit at different depths",
        ));
    }

    let (Some(start_el), Some(end_el)) = (doc.element_at_path(&a.path), doc.element_at_path(&b.path))
    else {
        return Err(CommandError::rejected("Text block vanished"));
    };
    let start_cut = from - a.start;
    let mut children = slice_inline(&start_el.children, 0, start_cut);
    children.extend(slice_inline(
        &end_el.children,
        to - b.start,
        end_el.content_size(),
    ));
    let survivor = if start_cut == 0 && schema.is_defining(&end_el.kind) {
        end_el
    } else {
        start_el
    };
    let merged = Node::element(survivor.kind.clone(), survivor.attrs.clone(), children);

    let parent = &a.path[..common];
    let mut ops = Vec::new();
    for ix in (a.path[common] + 1..=b.path[common]).rev() {
        ops.push(Op::RemoveNode {
            path: child_path(parent, ix),
        });
    }
    ops.push(Op::ReplaceNode {
        path: a.path.clone(),
        node: merged,
    });
    Ok(Transaction::new(ops).selection_after(Selection::collapsed(from)))
}

/// Deletes whole sibling nodes when both ends sit between blocks.
fn delete_whole_nodes_tx(
    ctx: &CommandContext<'_>,
    from: usize,
    to: usize,
) -> Result<Transaction, CommandError> {
    let doc = ctx.doc();
    let (Some(a), Some(b)) = (doc.resolve(from), doc.resolve(to)) else {
        return Err(CommandError::rejected(format!("Cannot resolve {from}..{to}")));
    };
    if a.parent_path != b.parent_path || a.text_offset != 0 || b.text_offset != 0 {
        return Err(CommandError::rejected(
            "Range must either start and end inside text or cover whole nodes",
        ));
    }
    let ops = (a.index..b.index)
        .rev()
        .map(|ix| Op::RemoveNode {
            path: child_path(&a.parent_path, ix),
        })
        .collect();
    Ok(Transaction::new(ops))
}

fn replace_range_tx(
    ctx: &CommandContext<'_>,
    from: usize,
    to: usize,
    nodes: &[Node],
) -> Result<Transaction, CommandError> {
    let deletion = delete_range_tx(ctx, from, to)?;
    let mut scratch = ctx.state().clone();
    apply_transaction_to(&mut scratch, &deletion)?;
    let insertion = insert_content_tx(&CommandContext::new(&scratch, ctx.registry()), from, nodes)?;

    let mut ops = deletion.ops;
    ops.extend(insertion.ops);
    let mut tx = Transaction::new(ops);
    tx.selection_after = insertion.selection_after.or(deletion.selection_after);
    Ok(tx)
}

fn insert_content_tx(
    ctx: &CommandContext<'_>,
    pos: usize,
    nodes: &[Node],
) -> Result<Transaction, CommandError> {
    let doc = ctx.doc();
    let schema = ctx.schema();
    if pos > doc.content_size() {
        return Err(CommandError::rejected(format!(
            "Position {pos} is outside the document"
        )));
    }
    if nodes.is_empty() {
        return Ok(Transaction::empty());
    }
    for node in nodes {
        if schema.group_of(node).is_none() {
            return Err(CommandError::unknown(format!(
                "Unknown node type: {}",
                node.kind()
            )));
        }
    }

    let inline = nodes
        .iter()
        .all(|n| schema.group_of(n) == Some(NodeGroup::Inline));
    if !inline {
        return insert_block_content_tx(ctx, pos, nodes);
    }

    let Some(tb) = doc.textblock_at(pos) else {
        return Err(CommandError::rejected(format!(
            "Inline content needs a text position, got {pos}"
        )));
    };
    let inserted: usize = nodes.iter().map(Node::size).sum();
    let after = Selection::collapsed(pos + inserted);

    if let [Node::Text(t)] = nodes
        && let Some(point) = doc.text_point_at(pos)
        && let Some(Node::Text(leaf)) = doc.node_at_path(&point.path)
        && leaf.marks == t.marks
    {
        return Ok(Transaction::new(vec![Op::InsertText {
            path: point.path,
            offset: point.offset,
            text: t.text.clone(),
        }])
        .selection_after(after));
    }

    let Some(el) = doc.element_at_path(&tb.path) else {
        return Err(CommandError::rejected("Text block vanished"));
    };
    let offset = pos - tb.start;
    let mut children = slice_inline(&el.children, 0, offset);
    children.extend(nodes.iter().cloned());
    children.extend(slice_inline(&el.children, offset, el.content_size()));
    let mut ops = Vec::new();
    replace_children_ops(&tb.path, el.children.len(), children, &mut ops);
    Ok(Transaction::new(ops).selection_after(after))
}

/// Block content goes next to the text block holding `pos`: it replaces the
/// block when that is empty, lands before it at its start, after it at its
/// end, and splits it anywhere else.
fn insert_block_content_tx(
    ctx: &CommandContext<'_>,
    pos: usize,
    nodes: &[Node],
) -> Result<Transaction, CommandError> {
    let doc = ctx.doc();
    let Some(tb) = doc.textblock_at(pos) else {
        let Some(resolved) = doc.resolve(pos) else {
            return Err(CommandError::rejected(format!("Cannot resolve {pos}")));
        };
        return insert_blocks_tx(ctx, &resolved.parent_path, resolved.index, false, Vec::new(), nodes);
    };
    let Some((ix, parent)) = tb.path.split_last() else {
        return Err(CommandError::rejected("Text block has no parent"));
    };
    let Some(el) = doc.element_at_path(&tb.path) else {
        return Err(CommandError::rejected("Text block vanished"));
    };
    let size = el.content_size();

    if size == 0 {
        return insert_blocks_tx(ctx, parent, *ix, true, Vec::new(), nodes);
    }
    if pos == tb.start {
        return insert_blocks_tx(ctx, parent, *ix, false, Vec::new(), nodes);
    }
    if pos == tb.end {
        return insert_blocks_tx(ctx, parent, ix + 1, false, Vec::new(), nodes);
    }

    let offset = pos - tb.start;
    let left = Node::element(
        el.kind.clone(),
        el.attrs.clone(),
        slice_inline(&el.children, 0, offset),
    );
    let right = Node::element(
        el.kind.clone(),
        el.attrs.clone(),
        slice_inline(&el.children, offset, size),
    );
    let split = vec![Op::ReplaceNode {
        path: tb.path.clone(),
        node: left,
    }];
    let mut with_tail = nodes.to_vec();
    with_tail.push(right);
    let mut tx = insert_blocks_tx(ctx, parent, ix + 1, false, split, &with_tail)?;
    // The cursor belongs in the last inserted node, not in the split-off tail.
    let cursor = last_text_pos_in(ctx, &tx, parent, ix + nodes.len())?;
    tx.selection_after = Some(Selection::collapsed(cursor));
    Ok(tx)
}

fn insert_blocks_tx(
    ctx: &CommandContext<'_>,
    parent: &[usize],
    index: usize,
    replace_existing: bool,
    mut ops: Vec<Op>,
    nodes: &[Node],
) -> Result<Transaction, CommandError> {
    if replace_existing {
        ops.push(Op::RemoveNode {
            path: child_path(parent, index),
        });
    }
    for (k, node) in nodes.iter().enumerate() {
        ops.push(Op::InsertNode {
            path: child_path(parent, index + k),
            node: node.clone(),
        });
    }
    let tx = Transaction::new(ops);
    let cursor = last_text_pos_in(ctx, &tx, parent, index + nodes.len().saturating_sub(1))?;
    Ok(tx.selection_after(Selection::collapsed(cursor)))
}

/// End of the last text block inside the node at `parent/ix` once `tx` has
/// applied, or the nearest text position to it.
fn last_text_pos_in(
    ctx: &CommandContext<'_>,
    tx: &Transaction,
    parent: &[usize],
    ix: usize,
) -> Result<usize, CommandError> {
    let mut scratch = ctx.state().clone();
    apply_transaction_to(&mut scratch, tx)?;
    let doc = &scratch.doc;
    let path = child_path(parent, ix);
    let (Some(start), Some(node)) = (doc.pos_before(&path), doc.node_at_path(&path)) else {
        return Ok(doc.nearest_text_pos(0).unwrap_or(0));
    };
    let end = start + node.size();
    let inside = doc
        .textblocks()
        .into_iter()
        .filter(|tb| tb.start > start && tb.end < end)
        .last()
        .map(|tb| tb.end);
    Ok(inside
        .or_else(|| doc.nearest_text_pos(end))
        .unwrap_or(end))
}
