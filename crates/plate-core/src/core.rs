use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::codec::ViewState;
use crate::commands::{Chain, CommandContext, CommandError};
use crate::config::EditorConfig;
use crate::ops::{Assoc, Op, StepMap, Transaction};
use crate::plugin::{PluginRegistry, QueryError};

pub type Attrs = BTreeMap<String, Value>;
pub type ElementKind = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Element(ElementNode),
    Text(TextNode),
}

impl Node {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Node::element("paragraph", Attrs::default(), vec![Node::text(text)])
    }

    pub fn heading(level: u64, text: impl Into<String>) -> Self {
        let mut attrs = Attrs::default();
        attrs.insert("level".to_string(), Value::from(level));
        Node::element("heading", attrs, vec![Node::text(text)])
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(TextNode {
            text: text.into(),
            marks: Marks::default(),
        })
    }

    pub fn marked_text(text: impl Into<String>, marks: Marks) -> Self {
        Node::Text(TextNode {
            text: text.into(),
            marks,
        })
    }

    pub fn element(kind: impl Into<String>, attrs: Attrs, children: Vec<Node>) -> Self {
        Node::Element(ElementNode {
            kind: kind.into(),
            attrs,
            children,
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Node::Element(el) => &el.kind,
            Node::Text(_) => "text",
        }
    }

    pub fn attrs(&self) -> Option<&Attrs> {
        match self {
            Node::Element(el) => Some(&el.attrs),
            Node::Text(_) => None,
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Width of the node in flat document positions.
    pub fn size(&self) -> usize {
        match self {
            Node::Text(t) => t.text.chars().count(),
            Node::Element(el) => 2 + el.content_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementNode {
    pub kind: ElementKind,
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: Vec<Node>,
}

impl ElementNode {
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name).filter(|v| !v.is_null())
    }

    pub fn content_size(&self) -> usize {
        self.children.iter().map(Node::size).sum()
    }

    /// True when every child is a text leaf. Normalization
    /// keeps at least one text leaf in such nodes, so an empty child list only
    /// shows up mid-transaction.
    pub fn has_inline_content(&self) -> bool {
        !self.children.is_empty()
            && self
                .children
                .iter()
                .all(|n| matches!(n, Node::Text(_)))
    }

    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(&t.text),
                Node::Element(el) => out.push_str(&el.text_content()),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextNode {
    pub text: String,
    #[serde(default, skip_serializing_if = "Marks::is_empty")]
    pub marks: Marks,
}

/// The set of marks on a text run, at most one per mark type, each with its
/// own attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Marks(BTreeMap<String, Attrs>);

impl Marks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Attrs> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, attrs: Attrs) {
        self.0.insert(name.into(), attrs);
    }

    pub fn remove(&mut self, name: &str) -> Option<Attrs> {
        self.0.remove(name)
    }

    pub fn with(mut self, name: impl Into<String>, attrs: Attrs) -> Self {
        self.insert(name, attrs);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attrs)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// A range of flat positions. `anchor` stays put while `head` moves with
/// the cursor; `from()`/`to()` give the ordered bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: usize,
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn collapsed(pos: usize) -> Self {
        Self {
            anchor: pos,
            head: pos,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    pub fn from(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> usize {
        self.anchor.max(self.head)
    }

    fn map(&mut self, map: &StepMap) {
        self.anchor = map.map(self.anchor, Assoc::After);
        self.head = map.map(self.head, Assoc::After);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditorState {
    pub doc: Document,
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub inverse_ops: Vec<Op>,
    pub selection_before: Selection,
    pub selection_after: Selection,
}

#[derive(Debug, Clone)]
pub struct TransactionPreview {
    pub doc: Document,
    pub selection: Selection,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Normalization did not converge")]
    NormalizeDidNotConverge,
    #[error("Transaction would produce an invalid document: {0}")]
    Invariant(String),
}

impl From<PathError> for ApplyError {
    fn from(value: PathError) -> Self {
        ApplyError::InvalidPath(value.0)
    }
}

#[derive(Debug)]
pub struct PathError(pub String);

pub struct Editor {
    state: EditorState,
    registry: PluginRegistry,
    config: EditorConfig,
    undo_stack: Vec<UndoRecord>,
    redo_stack: Vec<UndoRecord>,
    revision: u64,
}

impl Editor {
    pub fn new(doc: Document, selection: Selection, registry: PluginRegistry) -> Self {
        Self::with_config(doc, selection, registry, EditorConfig::default())
    }

    pub fn with_config(
        doc: Document,
        selection: Selection,
        registry: PluginRegistry,
        config: EditorConfig,
    ) -> Self {
        let mut editor = Self {
            state: EditorState { doc, selection },
            registry,
            config: config.with_defaults(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            revision: 0,
        };
        editor.normalize_in_place();
        editor
    }

    pub fn with_map_plugins() -> Self {
        let doc = Document {
            children: vec![Node::paragraph("")],
        };
        Self::new(doc, Selection::collapsed(1), PluginRegistry::map_editor())
    }

    /// Loads a serialized seed. Unknown tags degrade to paragraphs and broken
    /// markup is repaired the way a browser repairs it, so this never fails.
    pub fn from_markup(markup: &str, registry: PluginRegistry, config: EditorConfig) -> Self {
        let doc = registry.schema().parse_markup(markup);
        Self::with_config(doc, Selection::collapsed(0), registry, config)
    }

    pub fn doc(&self) -> &Document {
        &self.state.doc
    }

    pub fn selection(&self) -> &Selection {
        &self.state.selection
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Bumped on every committed change to the document.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.state.selection = selection;
        self.normalize_selection_in_place();
    }

    pub fn to_markup(&self) -> String {
        self.registry.schema().render_markup(&self.state.doc)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        let Some(record) = self.undo_stack.pop() else {
            return false;
        };
        match self.replay_history(&record, record.selection_before) {
            Some(redo) => {
                self.redo_stack.push(redo);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let Some(record) = self.redo_stack.pop() else {
            return false;
        };
        match self.replay_history(&record, record.selection_after) {
            Some(undo) => {
                self.undo_stack.push(undo);
                true
            }
            None => false,
        }
    }

    fn replay_history(&mut self, record: &UndoRecord, selection: Selection) -> Option<UndoRecord> {
        let mut scratch = self.state.clone();
        let mut reverse_ops: Vec<Op> = Vec::new();
        for op in record.inverse_ops.iter().cloned() {
            match apply_op_to(&mut scratch.doc, &mut scratch.selection, op) {
                Ok(inv) => reverse_ops.push(inv),
                Err(err) => {
                    log::error!("history entry no longer applies: {err}");
                    return None;
                }
            }
        }
        reverse_ops.reverse();
        scratch.selection = selection;
        self.state = scratch;
        self.normalize_selection_in_place();
        self.revision += 1;

        Some(UndoRecord {
            inverse_ops: reverse_ops,
            selection_before: record.selection_before,
            selection_after: record.selection_after,
        })
    }

    /// Commits a transaction atomically: either every step applies, the
    /// result normalizes and satisfies the schema, or nothing changes.
    pub fn apply(&mut self, tx: Transaction) -> Result<(), ApplyError> {
        if tx.ops.is_empty() {
            if let Some(selection) = tx.selection_after {
                self.set_selection(selection);
            }
            return Ok(());
        }

        let selection_before = self.state.selection;
        let mut scratch = self.state.clone();

        let mut inverse_ops = apply_transaction_to(&mut scratch, &tx)?;
        let (_, mut inverse_normalize) = self.normalize_scratch(&mut scratch)?;
        inverse_ops.append(&mut inverse_normalize);
        inverse_ops.reverse();

        if let Err(violation) = self.registry.schema().check_document(&scratch.doc) {
            if self.config.strict_invariants {
                panic!("invariant violation in {:?}: {violation}", tx.meta.source);
            }
            log::error!("rejected transaction {:?}: {violation}", tx.meta.source);
            return Err(ApplyError::Invariant(violation.to_string()));
        }

        scratch.selection = self
            .registry
            .normalize_selection(&scratch.doc, &scratch.selection);
        let selection_after = scratch.selection;
        self.state = scratch;
        self.revision += 1;

        self.undo_stack.push(UndoRecord {
            inverse_ops,
            selection_before,
            selection_after,
        });
        self.redo_stack.clear();
        if self.undo_stack.len() > self.config.max_undo {
            self.undo_stack.remove(0);
        }

        Ok(())
    }

    pub fn preview_transaction(&self, tx: &Transaction) -> Result<TransactionPreview, ApplyError> {
        let mut scratch = self.state.clone();
        apply_transaction_to(&mut scratch, tx)?;
        self.normalize_scratch(&mut scratch)?;
        self.registry
            .schema()
            .check_document(&scratch.doc)
            .map_err(|v| ApplyError::Invariant(v.to_string()))?;
        let selection = self
            .registry
            .normalize_selection(&scratch.doc, &scratch.selection);
        Ok(TransactionPreview {
            doc: scratch.doc,
            selection,
        })
    }

    /// Runs every command of the chain against a scratch copy, each one
    /// seeing the effects of the previous ones, and folds the steps into a
    /// single transaction. The first failing command aborts the whole chain.
    pub fn build_chain(&self, chain: &Chain) -> Result<Transaction, CommandError> {
        let mut scratch = self.state.clone();
        let mut ops: Vec<Op> = Vec::new();
        let mut touched_selection = false;

        for command in chain.commands() {
            let ctx = CommandContext::new(&scratch, &self.registry);
            let tx = command.build(&ctx)?;
            apply_transaction_to(&mut scratch, &tx).map_err(|err| {
                CommandError::rejected(format!("{}: {err}", command.label()))
            })?;
            touched_selection |= tx.selection_after.is_some();
            ops.extend(tx.ops);

            let (applied, _) = self.normalize_scratch(&mut scratch)?;
            ops.extend(applied);
            scratch.selection = self
                .registry
                .normalize_selection(&scratch.doc, &scratch.selection);
        }

        let mut tx = Transaction::new(ops).source(chain.source());
        if touched_selection || !tx.ops.is_empty() {
            tx = tx.selection_after(scratch.selection);
        }
        Ok(tx)
    }

    pub fn run_chain(&mut self, chain: &Chain) -> Result<(), CommandError> {
        let tx = self.build_chain(chain)?;
        if tx.is_empty() {
            return Ok(());
        }
        self.apply(tx).map_err(CommandError::from)
    }

    /// Dry-runs a chain without committing anything.
    pub fn can_run(&self, chain: &Chain) -> bool {
        self.build_chain(chain)
            .and_then(|tx| self.preview_transaction(&tx).map_err(CommandError::from))
            .is_ok()
    }

    pub fn run_command(&mut self, id: &str, args: Option<Value>) -> Result<(), CommandError> {
        let chain = self.command_chain(id, args)?;
        self.run_chain(&chain)
    }

    pub fn can_run_command(&self, id: &str, args: Option<Value>) -> bool {
        self.command_chain(id, args)
            .map(|chain| self.can_run(&chain))
            .unwrap_or(false)
    }

    pub fn command_chain(&self, id: &str, args: Option<Value>) -> Result<Chain, CommandError> {
        let Some(command) = self.registry.command(id) else {
            return Err(CommandError::unknown(format!("Unknown command: {id}")));
        };
        (command.handler)(args.as_ref())
    }

    pub fn run_query_json(&self, id: &str, args: Option<Value>) -> Result<Value, QueryError> {
        let Some(query) = self.registry.query(id) else {
            return Err(QueryError::new(format!("Unknown query: {id}")));
        };
        (query.handler)(self, args)
    }

    pub fn run_query<T>(&self, id: &str, args: Option<Value>) -> Result<T, QueryError>
    where
        T: DeserializeOwned,
    {
        let value = self.run_query_json(id, args)?;
        serde_json::from_value(value)
            .map_err(|err| QueryError::new(format!("Failed to decode query result: {err}")))
    }

    /// Whether a mark covers the whole selection (or sits at the caret), or
    /// whether the block around the cursor has the given node type.
    pub fn is_active(&self, name: &str) -> bool {
        let doc = &self.state.doc;
        let sel = self.state.selection;
        if self.registry.schema().mark(name).is_some() {
            if sel.is_collapsed() {
                return doc.marks_at(sel.head).has(name);
            }
            return doc.range_has_mark(sel.from(), sel.to(), name);
        }
        doc.ancestor_kinds_at(sel.head).contains(&name)
    }

    /// The viewport linked to the text at `pos`, if a `view_state` mark
    /// covers it.
    pub fn view_state_at(&self, pos: usize) -> Option<ViewState> {
        let attrs = self
            .state
            .doc
            .marks_at(pos)
            .get(crate::plugin::VIEW_STATE_MARK)?
            .clone();
        ViewState::from_value(attrs.get(crate::codec::VIEW_STATE_ATTR)?)
    }

    fn normalize_in_place(&mut self) {
        let mut scratch = self.state.clone();
        match self.normalize_scratch(&mut scratch) {
            Ok(_) => self.state = scratch,
            Err(err) => log::error!("initial normalization failed: {err}"),
        }
        if let Err(violation) = self.registry.schema().check_document(&self.state.doc) {
            log::warn!("seed document does not satisfy the schema: {violation}");
        }
        self.normalize_selection_in_place();
    }

    fn normalize_selection_in_place(&mut self) {
        self.state.selection = self
            .registry
            .normalize_selection(&self.state.doc, &self.state.selection);
    }

    /// Runs normalize passes to a fixed point; returns the steps applied and
    /// their inverses.
    fn normalize_scratch(&self, scratch: &mut EditorState) -> Result<(Vec<Op>, Vec<Op>), ApplyError> {
        let mut applied: Vec<Op> = Vec::new();
        let mut inverse_ops: Vec<Op> = Vec::new();
        for _ in 0..self.config.max_normalize_iterations {
            let ops = self.registry.normalize(&scratch.doc);
            if ops.is_empty() {
                return Ok((applied, inverse_ops));
            }
            for op in ops {
                let inv = apply_op_to(&mut scratch.doc, &mut scratch.selection, op.clone())?;
                applied.push(op);
                inverse_ops.push(inv);
            }
        }
        Err(ApplyError::NormalizeDidNotConverge)
    }
}

pub(crate) fn apply_transaction_to(
    state: &mut EditorState,
    tx: &Transaction,
) -> Result<Vec<Op>, ApplyError> {
    let mut inverse_ops: Vec<Op> = Vec::new();
    for op in tx.ops.iter().cloned() {
        let inv = apply_op_to(&mut state.doc, &mut state.selection, op)?;
        inverse_ops.push(inv);
    }
    if let Some(sel) = tx.selection_after {
        state.selection = sel;
    }
    Ok(inverse_ops)
}

fn apply_op_to(doc: &mut Document, selection: &mut Selection, op: Op) -> Result<Op, ApplyError> {
    let map = step_map(doc, &op)?;
    let inverse = match op {
        Op::InsertText { path, offset, text } => {
            let text_node = node_text_mut(doc, &path)?;
            let offset = clamp_to_char_boundary(&text_node.text, offset);
            text_node.text.insert_str(offset, &text);
            Op::RemoveText {
                path,
                range: offset..offset + text.len(),
            }
        }
        Op::RemoveText { path, range } => {
            let text_node = node_text_mut(doc, &path)?;
            let start = clamp_to_char_boundary(&text_node.text, range.start);
            let end = clamp_to_char_boundary(&text_node.text, range.end);
            if start >= end {
                Op::InsertText {
                    path,
                    offset: start,
                    text: String::new(),
                }
            } else {
                let removed = text_node.text[start..end].to_string();
                text_node.text.replace_range(start..end, "");
                Op::InsertText {
                    path,
                    offset: start,
                    text: removed,
                }
            }
        }
        Op::InsertNode { path, node } => {
            insert_node(doc, &path, node)?;
            Op::RemoveNode { path }
        }
        Op::RemoveNode { path } => {
            let removed = remove_node(doc, &path)?;
            Op::InsertNode {
                path,
                node: removed,
            }
        }
        Op::ReplaceNode { path, node } => {
            let slot = node_mut(doc, &path)?;
            let old = std::mem::replace(slot, node);
            Op::ReplaceNode { path, node: old }
        }
        Op::SetNodeAttrs { path, patch } => {
            let node = node_mut(doc, &path)?;
            let old = match node {
                Node::Element(el) => patch_apply(&mut el.attrs, &patch),
                Node::Text(_) => return Err(ApplyError::InvalidPath("Text has no attrs".into())),
            };
            Op::SetNodeAttrs { path, patch: old }
        }
    };
    selection.map(&map);
    Ok(inverse)
}

fn step_map(doc: &Document, op: &Op) -> Result<StepMap, ApplyError> {
    let before = |path: &[usize]| {
        doc.pos_before(path)
            .ok_or_else(|| ApplyError::InvalidPath(format!("No position for path {path:?}")))
    };
    let text_at = |path: &[usize]| match doc.node_at_path(path) {
        Some(Node::Text(t)) => Ok(t),
        _ => Err(ApplyError::InvalidPath("Expected Text node".into())),
    };

    let map = match op {
        Op::InsertText { path, offset, text } => {
            let t = text_at(path)?;
            let offset = clamp_to_char_boundary(&t.text, *offset);
            StepMap {
                pos: before(path)? + t.text[..offset].chars().count(),
                deleted: 0,
                inserted: text.chars().count(),
            }
        }
        Op::RemoveText { path, range } => {
            let t = text_at(path)?;
            let start = clamp_to_char_boundary(&t.text, range.start);
            let end = clamp_to_char_boundary(&t.text, range.end).max(start);
            StepMap {
                pos: before(path)? + t.text[..start].chars().count(),
                deleted: t.text[start..end].chars().count(),
                inserted: 0,
            }
        }
        Op::InsertNode { path, node } => StepMap {
            pos: before(path)?,
            deleted: 0,
            inserted: node.size(),
        },
        Op::RemoveNode { path } => {
            let old = doc
                .node_at_path(path)
                .ok_or_else(|| ApplyError::InvalidPath(format!("No node at {path:?}")))?;
            StepMap {
                pos: before(path)?,
                deleted: old.size(),
                inserted: 0,
            }
        }
        Op::ReplaceNode { path, node } => {
            let old = doc
                .node_at_path(path)
                .ok_or_else(|| ApplyError::InvalidPath(format!("No node at {path:?}")))?;
            StepMap {
                pos: before(path)?,
                deleted: old.size(),
                inserted: node.size(),
            }
        }
        Op::SetNodeAttrs { .. } => StepMap::IDENTITY,
    };
    Ok(map)
}

pub(crate) fn clamp_to_char_boundary(s: &str, mut ix: usize) -> usize {
    ix = ix.min(s.len());
    while ix > 0 && !s.is_char_boundary(ix) {
        ix -= 1;
    }
    ix
}

fn node_mut<'a>(doc: &'a mut Document, path: &[usize]) -> Result<&'a mut Node, PathError> {
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| PathError("Empty path".into()))?;
    let len = doc.children.len();
    let mut node = doc
        .children
        .get_mut(*first)
        .ok_or_else(|| PathError(format!("Path out of bounds at depth 0: {first} >= {len}")))?;

    for (depth, &ix) in rest.iter().enumerate() {
        node = match node {
            Node::Element(el) => {
                let len = el.children.len();
                el.children.get_mut(ix).ok_or_else(|| {
                    PathError(format!(
                        "Path out of bounds at depth {}: {ix} >= {len}",
                        depth + 1
                    ))
                })?
            }
            Node::Text(_) => {
                return Err(PathError(format!("Non-container node at depth {depth}")));
            }
        };
    }
    Ok(node)
}

fn node_text_mut<'a>(doc: &'a mut Document, path: &[usize]) -> Result<&'a mut TextNode, PathError> {
    match node_mut(doc, path)? {
        Node::Text(t) => Ok(t),
        _ => Err(PathError("Expected Text node".into())),
    }
}

fn children_mut<'a>(
    doc: &'a mut Document,
    parent_path: &[usize],
) -> Result<&'a mut Vec<Node>, PathError> {
    if parent_path.is_empty() {
        return Ok(&mut doc.children);
    }
    match node_mut(doc, parent_path)? {
        Node::Element(el) => Ok(&mut el.children),
        Node::Text(_) => Err(PathError("Parent is not a container".into())),
    }
}

fn insert_node(doc: &mut Document, path: &[usize], node: Node) -> Result<(), PathError> {
    let (index, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty insert path".into()))?;
    let children = children_mut(doc, parent_path)?;
    if *index > children.len() {
        return Err(PathError(format!(
            "Insert index out of bounds: {index} > {}",
            children.len()
        )));
    }
    children.insert(*index, node);
    Ok(())
}

fn remove_node(doc: &mut Document, path: &[usize]) -> Result<Node, PathError> {
    let (index, parent_path) = path
        .split_last()
        .ok_or_else(|| PathError("Empty remove path".into()))?;
    let children = children_mut(doc, parent_path)?;
    if *index >= children.len() {
        return Err(PathError(format!(
            "Remove index out of bounds: {index} >= {}",
            children.len()
        )));
    }
    Ok(children.remove(*index))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttrPatch {
    #[serde(default)]
    pub set: Attrs,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl AttrPatch {
    pub fn set(name: impl Into<String>, value: Value) -> Self {
        let mut set = Attrs::new();
        set.insert(name.into(), value);
        Self {
            set,
            remove: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

fn patch_apply(attrs: &mut Attrs, patch: &AttrPatch) -> AttrPatch {
    let mut old_set: Attrs = Attrs::new();
    let mut old_remove: Vec<String> = Vec::new();

    for (k, v) in &patch.set {
        if let Some(prev) = attrs.insert(k.clone(), v.clone()) {
            old_set.insert(k.clone(), prev);
        } else {
            old_remove.push(k.clone());
        }
    }

    for key in &patch.remove {
        if let Some(prev) = attrs.remove(key) {
            old_set.insert(key.clone(), prev);
        }
    }

    AttrPatch {
        set: old_set,
        remove: old_remove,
    }
}
