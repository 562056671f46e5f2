use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::codec::{AttrCodec, VIEW_STATE_ATTR, ViewState};
use crate::commands::{Chain, Command, CommandError, insert_content};
use crate::core::{AttrPatch, Attrs, Document, Editor, Node, Selection};
use crate::ops::{Op, Path};
use crate::schema::{AttrSpec, DomSpec, MarkSpec, NodeSpec, ParseRule, Schema};

pub const PARAGRAPH: &str = "paragraph";
pub const HEADING: &str = "heading";
pub const MAP_BLOCK: &str = "map_block";
pub const MAP_CARD: &str = "map_card";
pub const BOLD_MARK: &str = "bold";
pub const ITALIC_MARK: &str = "italic";
pub const HIGHLIGHT_MARK: &str = "highlight";
pub const VIEW_STATE_MARK: &str = "view_state";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

type CommandHandler = dyn Fn(Option<&Value>) -> Result<Chain, CommandError> + Send + Sync;
type QueryHandler = dyn Fn(&Editor, Option<Value>) -> Result<Value, QueryError> + Send + Sync;

/// A named, discoverable command. The handler turns JSON args into a chain;
/// running it is left to the editor so every command can be dry-run.
#[derive(Clone)]
pub struct CommandSpec {
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub args_example: Option<Value>,
    pub handler: Arc<CommandHandler>,
}

impl CommandSpec {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        handler: impl Fn(Option<&Value>) -> Result<Chain, CommandError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
            keywords: Vec::new(),
            args_example: None,
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn args_example(mut self, args_example: Value) -> Self {
        self.args_example = Some(args_example);
        self
    }
}

#[derive(Clone)]
pub struct QuerySpec {
    pub id: String,
    pub handler: Arc<QueryHandler>,
}

impl QuerySpec {
    pub fn new(
        id: impl Into<String>,
        handler: impl Fn(&Editor, Option<Value>) -> Result<Value, QueryError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            handler: Arc::new(handler),
        }
    }
}

pub trait NormalizePass: Send + Sync {
    fn id(&self) -> &'static str;
    fn run(&self, doc: &Document, registry: &PluginRegistry) -> Vec<Op>;
}

pub trait PlatePlugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn node_specs(&self) -> Vec<NodeSpec> {
        Vec::new()
    }
    fn mark_specs(&self) -> Vec<MarkSpec> {
        Vec::new()
    }
    fn normalize_passes(&self) -> Vec<Box<dyn NormalizePass>> {
        Vec::new()
    }
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }
    fn queries(&self) -> Vec<QuerySpec> {
        Vec::new()
    }
}

#[derive(Default)]
pub struct PluginRegistry {
    schema: Schema,
    normalize_passes: Vec<Box<dyn NormalizePass>>,
    commands: HashMap<String, CommandSpec>,
    queries: HashMap<String, QuerySpec>,
}

impl PluginRegistry {
    pub fn new(plugins: impl IntoIterator<Item = Box<dyn PlatePlugin>>) -> Result<Self, String> {
        let mut registry = Self::default();
        for plugin in plugins {
            registry.register_plugin(plugin)?;
        }
        Ok(registry)
    }

    pub fn core() -> Self {
        let plugins: Vec<Box<dyn PlatePlugin>> =
            vec![Box::new(CoreParagraphPlugin), Box::new(CoreNormalizePlugin)];
        Self::new(plugins).expect("core registry must be valid")
    }

    /// Rich text with embedded maps: paragraphs, headings, the four marks,
    /// map blocks and map cards.
    pub fn map_editor() -> Self {
        let plugins: Vec<Box<dyn PlatePlugin>> = vec![
            Box::new(CoreParagraphPlugin),
            Box::new(CoreNormalizePlugin),
            Box::new(MarksPlugin),
            Box::new(HeadingPlugin),
            Box::new(ViewStatePlugin),
            Box::new(MapBlockPlugin),
            Box::new(MapCardPlugin),
        ];
        Self::new(plugins).expect("map editor registry must be valid")
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn PlatePlugin>) -> Result<(), String> {
        for spec in plugin.node_specs() {
            self.schema.register_node(spec)?;
        }
        for spec in plugin.mark_specs() {
            self.schema.register_mark(spec)?;
        }

        self.normalize_passes.extend(plugin.normalize_passes());

        for cmd in plugin.commands() {
            if self.commands.contains_key(&cmd.id) {
                return Err(format!("Duplicate command id: {}", cmd.id));
            }
            self.commands.insert(cmd.id.clone(), cmd);
        }

        for query in plugin.queries() {
            if self.queries.contains_key(&query.id) {
                return Err(format!("Duplicate query id: {}", query.id));
            }
            self.queries.insert(query.id.clone(), query);
        }

        log::debug!("registered plugin {}", plugin.id());
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn normalize_passes(&self) -> &[Box<dyn NormalizePass>] {
        &self.normalize_passes
    }

    pub fn commands(&self) -> &HashMap<String, CommandSpec> {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Option<CommandSpec> {
        self.commands.get(id).cloned()
    }

    pub fn queries(&self) -> &HashMap<String, QuerySpec> {
        &self.queries
    }

    pub fn query(&self, id: &str) -> Option<QuerySpec> {
        self.queries.get(id).cloned()
    }

    /// Fixes from the first pass that has any. Passes see the document as it
    /// is, so their steps never have to account for another pass's edits.
    pub fn normalize(&self, doc: &Document) -> Vec<Op> {
        for pass in &self.normalize_passes {
            let ops = pass.run(doc, self);
            if !ops.is_empty() {
                log::debug!("normalize pass {} produced {} step(s)", pass.id(), ops.len());
                return ops;
            }
        }
        Vec::new()
    }

    /// Moves both ends of the selection to the nearest position inside a
    /// text block.
    pub fn normalize_selection(&self, doc: &Document, selection: &Selection) -> Selection {
        let fallback = doc.nearest_text_pos(0).unwrap_or(0);
        Selection {
            anchor: doc.nearest_text_pos(selection.anchor).unwrap_or(fallback),
            head: doc.nearest_text_pos(selection.head).unwrap_or(fallback),
        }
    }
}

fn walk_elements(
    children: &[Node],
    path: &mut Path,
    f: &mut dyn FnMut(&Path, &crate::core::ElementNode),
) {
    for (ix, node) in children.iter().enumerate() {
        let Node::Element(el) = node else {
            continue;
        };
        path.push(ix);
        f(path, el);
        walk_elements(&el.children, path, f);
        path.pop();
    }
}

fn child_path(parent: &[usize], ix: usize) -> Path {
    let mut path = parent.to_vec();
    path.push(ix);
    path
}

fn attrs_of<const N: usize>(pairs: [(&str, Value); N]) -> Attrs {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

struct CoreParagraphPlugin;

impl PlatePlugin for CoreParagraphPlugin {
    fn id(&self) -> &'static str {
        "core.paragraph"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        vec![NodeSpec::block(PARAGRAPH, "inline*").parse(ParseRule::tag("p"))]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("block.set_paragraph", "Set paragraph", |_args| {
                Ok(Chain::new()
                    .set_block_type(PARAGRAPH, Attrs::new())
                    .with_source("command:block.set_paragraph"))
            })
            .description("Turn the active text block(s) into plain paragraphs.")
            .keywords(["paragraph", "text", "reset"]),
        ]
    }
}

struct CoreNormalizePlugin;

impl PlatePlugin for CoreNormalizePlugin {
    fn id(&self) -> &'static str {
        "core.normalize"
    }

    fn normalize_passes(&self) -> Vec<Box<dyn NormalizePass>> {
        vec![
            Box::new(EnsureNonEmptyDocument),
            Box::new(EnsureTextblocksHaveTextLeaf),
            Box::new(DropEmptyTextLeaves),
            Box::new(MergeAdjacentTextLeaves),
            Box::new(EnsureExternalNodeIds),
        ]
    }
}

struct EnsureNonEmptyDocument;

impl NormalizePass for EnsureNonEmptyDocument {
    fn id(&self) -> &'static str {
        "core.ensure_non_empty_document"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        if doc.children.is_empty() {
            return vec![Op::InsertNode {
                path: vec![0],
                node: Node::paragraph(""),
            }];
        }
        Vec::new()
    }
}

struct EnsureTextblocksHaveTextLeaf;

impl NormalizePass for EnsureTextblocksHaveTextLeaf {
    fn id(&self) -> &'static str {
        "core.ensure_inline_blocks_have_text_leaf"
    }

    fn run(&self, doc: &Document, registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements(&doc.children, &mut Vec::new(), &mut |path, el| {
            if registry.schema().accepts_inline(&el.kind)
                && !el.children.iter().any(|n| matches!(n, Node::Text(_)))
            {
                ops.push(Op::InsertNode {
                    path: child_path(path, 0),
                    node: Node::text(""),
                });
            }
        });
        ops
    }
}

struct DropEmptyTextLeaves;

impl NormalizePass for DropEmptyTextLeaves {
    fn id(&self) -> &'static str {
        "core.drop_empty_text_leaves"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements(&doc.children, &mut Vec::new(), &mut |path, el| {
            if el.children.len() < 2 {
                return;
            }
            let empty: Vec<usize> = el
                .children
                .iter()
                .enumerate()
                .filter(|(_, n)| matches!(n, Node::Text(t) if t.text.is_empty()))
                .map(|(ix, _)| ix)
                .collect();
            // Keep one leaf so the block never ends up with no text at all.
            let keep_one = empty.len() == el.children.len();
            for ix in empty.into_iter().skip(usize::from(keep_one)).rev() {
                ops.push(Op::RemoveNode {
                    path: child_path(path, ix),
                });
            }
        });
        ops
    }
}

struct MergeAdjacentTextLeaves;

impl NormalizePass for MergeAdjacentTextLeaves {
    fn id(&self) -> &'static str {
        "core.merge_adjacent_text_leaves"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements(&doc.children, &mut Vec::new(), &mut |path, el| {
            if el.children.len() < 2 {
                return;
            }
            let mut ix = el.children.len();
            while ix > 0 {
                ix -= 1;
                let Node::Text(right) = &el.children[ix] else {
                    continue;
                };

                let mut start = ix;
                while start > 0 {
                    let Some(Node::Text(left)) = el.children.get(start - 1) else {
                        break;
                    };
                    if left.marks != right.marks {
                        break;
                    }
                    start -= 1;
                }

                if start == ix {
                    continue;
                }

                let Some(Node::Text(first)) = el.children.get(start) else {
                    continue;
                };
                let appended: String = el.children[start + 1..=ix]
                    .iter()
                    .filter_map(|n| match n {
                        Node::Text(t) => Some(t.text.as_str()),
                        _ => None,
                    })
                    .collect();

                if !appended.is_empty() {
                    ops.push(Op::InsertText {
                        path: child_path(path, start),
                        offset: first.text.len(),
                        text: appended,
                    });
                }
                for remove_ix in (start + 1..=ix).rev() {
                    ops.push(Op::RemoveNode {
                        path: child_path(path, remove_ix),
                    });
                }
                ix = start;
            }
        });
        ops
    }
}

/// Every embedded-widget node carries a unique `id` the node-view bridge
/// keys its widgets by.
struct EnsureExternalNodeIds;

impl NormalizePass for EnsureExternalNodeIds {
    fn id(&self) -> &'static str {
        "core.ensure_external_node_ids"
    }

    fn run(&self, doc: &Document, registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        walk_elements(&doc.children, &mut Vec::new(), &mut |path, el| {
            if !registry.schema().is_external_view(&el.kind) {
                return;
            }
            let id = el.attr("id").and_then(Value::as_str).unwrap_or_default();
            if !id.is_empty() && seen.insert(id.to_string()) {
                return;
            }
            let fresh = uuid::Uuid::new_v4().to_string();
            seen.insert(fresh.clone());
            ops.push(Op::SetNodeAttrs {
                path: path.clone(),
                patch: AttrPatch::set("id", Value::String(fresh)),
            });
        });
        ops
    }
}

struct MarksPlugin;

impl PlatePlugin for MarksPlugin {
    fn id(&self) -> &'static str {
        "marks"
    }

    fn mark_specs(&self) -> Vec<MarkSpec> {
        vec![
            MarkSpec::new(BOLD_MARK)
                .parse(ParseRule::tag("strong"))
                .parse(ParseRule::tag("b")),
            MarkSpec::new(ITALIC_MARK)
                .attr(AttrSpec::new("value", Value::Null, AttrCodec::Text).dom("data-value"))
                .parse(ParseRule::tag("em"))
                .parse(ParseRule::tag("i")),
            MarkSpec::new(HIGHLIGHT_MARK)
                .attr(AttrSpec::new("color", Value::Null, AttrCodec::Text).dom("data-color"))
                .parse(ParseRule::tag("mark")),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("marks.toggle_bold", "Toggle bold", |_args| {
                Ok(Chain::new()
                    .toggle_mark(BOLD_MARK)
                    .with_source("command:marks.toggle_bold"))
            })
            .keywords(["bold", "strong"]),
            CommandSpec::new("marks.toggle_italic", "Toggle italic", |args| {
                let value = args.and_then(|v| v.get("value")).cloned();
                let attrs = match value {
                    Some(Value::Null) | None => Attrs::new(),
                    Some(Value::String(s)) => attrs_of([("value", Value::String(s))]),
                    Some(other) => attrs_of([("value", Value::String(other.to_string()))]),
                };
                Ok(Chain::new()
                    .toggle_mark_with(ITALIC_MARK, attrs)
                    .with_source("command:marks.toggle_italic"))
            })
            .description("Toggle italic, optionally remembering a value on the mark.")
            .keywords(["italic", "emphasis"])
            .args_example(serde_json::json!({ "value": "3" })),
            CommandSpec::new("marks.set_highlight", "Set highlight", |args| {
                let Some(color) = args.and_then(|v| v.get("color")).and_then(Value::as_str) else {
                    return Err(CommandError::rejected("Missing args.color"));
                };
                Ok(Chain::new()
                    .set_mark(
                        HIGHLIGHT_MARK,
                        attrs_of([("color", Value::String(color.to_string()))]),
                    )
                    .with_source("command:marks.set_highlight"))
            })
            .keywords(["highlight", "color", "marker"])
            .args_example(serde_json::json!({ "color": "#fde68a" })),
            CommandSpec::new("marks.unset_highlight", "Remove highlight", |_args| {
                Ok(Chain::new()
                    .unset_mark(HIGHLIGHT_MARK)
                    .with_source("command:marks.unset_highlight"))
            })
            .keywords(["highlight", "clear"]),
        ]
    }

    fn queries(&self) -> Vec<QuerySpec> {
        vec![
            QuerySpec::new("marks.active", |editor, _args| {
                Ok(Value::Array(
                    active_marks(editor).into_iter().map(Value::String).collect(),
                ))
            }),
            QuerySpec::new("marks.is_active", |editor, args| {
                let Some(mark) = args
                    .as_ref()
                    .and_then(|v| v.get("mark"))
                    .and_then(Value::as_str)
                else {
                    return Err(QueryError::new("Missing args.mark"));
                };
                Ok(Value::Bool(editor.is_active(mark)))
            }),
        ]
    }
}

/// Mark names in effect at the caret, or carried by every text run of the
/// selection.
fn active_marks(editor: &Editor) -> Vec<String> {
    let doc = editor.doc();
    let sel = editor.selection();
    if sel.is_collapsed() {
        return doc.marks_at(sel.head).names().map(str::to_string).collect();
    }
    let leaves = doc.text_leaves_between(sel.from(), sel.to());
    let Some((_, _, first)) = leaves.first() else {
        return Vec::new();
    };
    first
        .marks
        .names()
        .filter(|name| leaves.iter().all(|(_, _, t)| t.marks.has(name)))
        .map(str::to_string)
        .collect()
}

struct HeadingPlugin;

impl PlatePlugin for HeadingPlugin {
    fn id(&self) -> &'static str {
        "heading"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        let mut spec = NodeSpec::block(HEADING, "inline*")
            .attr(AttrSpec::new("level", Value::from(1), AttrCodec::Integer))
            .render(render_heading);
        for level in 1..=6u64 {
            spec = spec.parse(ParseRule::tag(format!("h{level}")).fixed("level", Value::from(level)));
        }
        vec![spec]
    }

    fn normalize_passes(&self) -> Vec<Box<dyn NormalizePass>> {
        vec![Box::new(NormalizeHeadingLevels)]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("block.set_heading", "Set heading", |args| {
                let level = args
                    .and_then(|v| v.get("level"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1)
                    .clamp(1, 6);
                Ok(Chain::new()
                    .set_block_type(HEADING, attrs_of([("level", Value::from(level))]))
                    .with_source("command:block.set_heading"))
            })
            .description("Convert the active text block(s) into a heading.")
            .keywords(["heading", "title", "h1", "h2", "h3", "h4", "h5", "h6"])
            .args_example(serde_json::json!({ "level": 2 })),
        ]
    }

    fn queries(&self) -> Vec<QuerySpec> {
        vec![
            QuerySpec::new("block.kind", |editor, _args| {
                Ok(editor
                    .doc()
                    .parent_at(editor.selection().head)
                    .map(|el| Value::String(el.kind.clone()))
                    .unwrap_or(Value::Null))
            }),
            QuerySpec::new("block.heading_level", |editor, _args| {
                Ok(active_heading_level(editor))
            }),
        ]
    }
}

fn render_heading(attrs: &Attrs, encoded: BTreeMap<String, String>) -> DomSpec {
    let level = attrs
        .get("level")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .clamp(1, 6);
    let mut dom = DomSpec::new(format!("h{level}")).hole();
    dom.attrs = encoded;
    dom
}

fn active_heading_level(editor: &Editor) -> Value {
    match editor.doc().parent_at(editor.selection().head) {
        Some(el) if el.kind == HEADING => el.attr("level").cloned().unwrap_or(Value::from(1)),
        _ => Value::Null,
    }
}

struct NormalizeHeadingLevels;

impl NormalizePass for NormalizeHeadingLevels {
    fn id(&self) -> &'static str {
        "heading.normalize_levels"
    }

    fn run(&self, doc: &Document, _registry: &PluginRegistry) -> Vec<Op> {
        let mut ops = Vec::new();
        walk_elements(&doc.children, &mut Vec::new(), &mut |path, el| {
            if el.kind != HEADING {
                return;
            }
            let current = el.attrs.get("level").and_then(Value::as_u64);
            let level = current.unwrap_or(1).clamp(1, 6);
            if current != Some(level) {
                ops.push(Op::SetNodeAttrs {
                    path: path.clone(),
                    patch: AttrPatch::set("level", Value::from(level)),
                });
            }
        });
        ops
    }
}

struct ViewStatePlugin;

impl PlatePlugin for ViewStatePlugin {
    fn id(&self) -> &'static str {
        "view_state"
    }

    fn mark_specs(&self) -> Vec<MarkSpec> {
        vec![
            MarkSpec::new(VIEW_STATE_MARK)
                .attr(
                    AttrSpec::new(
                        VIEW_STATE_ATTR,
                        ViewState::default().to_value(),
                        AttrCodec::ViewState,
                    )
                    .dom("data-view-state")
                    .alias("data-viewstate"),
                )
                .parse(ParseRule::tag("span").with_attr("data-view-state", None))
                .parse(ParseRule::tag("span").with_attr("data-viewstate", None)),
        ]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("marks.set_view_state", "Link selection to map view", |args| {
                let view_state = view_state_arg(args)?;
                Ok(Chain::new()
                    .set_mark(
                        VIEW_STATE_MARK,
                        attrs_of([(VIEW_STATE_ATTR, view_state.to_value())]),
                    )
                    .with_source("command:marks.set_view_state"))
            })
            .description("Attach a map viewport to the selected text.")
            .keywords(["map", "view", "link", "viewport"])
            .args_example(serde_json::json!({
                "viewState": { "longitude": -73.9857, "latitude": 40.7484, "zoom": 14 }
            })),
            CommandSpec::new("marks.unset_view_state", "Unlink map view", |_args| {
                Ok(Chain::new()
                    .unset_mark(VIEW_STATE_MARK)
                    .with_source("command:marks.unset_view_state"))
            })
            .keywords(["map", "unlink"]),
        ]
    }

    fn queries(&self) -> Vec<QuerySpec> {
        vec![QuerySpec::new("node_view.view_state", |editor, args| {
            let Some(id) = args.as_ref().and_then(|v| v.get("id")).and_then(Value::as_str) else {
                return Err(QueryError::new("Missing args.id"));
            };
            let Some((_, _, node)) = editor.doc().find_by_id(id) else {
                return Err(QueryError::new(format!("No node with id `{id}`")));
            };
            Ok(node
                .attrs()
                .and_then(|a| a.get(VIEW_STATE_ATTR))
                .cloned()
                .unwrap_or(Value::Null))
        })]
    }
}

fn view_state_arg(args: Option<&Value>) -> Result<ViewState, CommandError> {
    let raw = args
        .and_then(|v| v.get(VIEW_STATE_ATTR))
        .ok_or_else(|| CommandError::rejected("Missing args.viewState"))?;
    let parsed = match raw {
        Value::String(s) => ViewState::from_json_str(s),
        other => ViewState::from_value(other),
    };
    parsed.ok_or_else(|| CommandError::rejected("args.viewState is not a viewport"))
}

fn map_id_attr() -> AttrSpec {
    AttrSpec::new("id", Value::Null, AttrCodec::Text).dom("data-id")
}

fn map_view_state_attr() -> AttrSpec {
    AttrSpec::new(
        VIEW_STATE_ATTR,
        ViewState::default().to_value(),
        AttrCodec::ViewState,
    )
    .dom("data-view-state")
}

pub fn map_block_node(schema: &Schema, src: &str, caption: &str) -> Node {
    schema.create_node(
        MAP_BLOCK,
        attrs_of([("src", Value::String(src.to_string()))]),
        vec![Node::text(caption)],
    )
}

pub fn map_card_node(schema: &Schema, caption: &str) -> Node {
    schema.create_node(MAP_CARD, Attrs::new(), vec![Node::text(caption)])
}

/// Runs `build` with the schema in hand and inserts the node it returns.
fn insert_node_command(
    label: &str,
    pos: Option<usize>,
    build: impl Fn(&Schema) -> Node + Send + Sync + 'static,
) -> Command {
    Command::new(label, move |ctx| {
        let node = build(ctx.schema());
        insert_content(pos, vec![node]).build(ctx)
    })
}

/// Patches the nearest enclosing node of `kind` around the caret.
fn update_enclosing_command(kind: &'static str, patch: AttrPatch) -> Command {
    Command::new(format!("update_enclosing:{kind}"), move |ctx| {
        let doc = ctx.doc();
        let head = ctx.selection().head;
        let Some(resolved) = doc.resolve(head) else {
            return Err(CommandError::rejected("Selection does not resolve"));
        };
        let path = (1..=resolved.parent_path.len())
            .rev()
            .map(|depth| &resolved.parent_path[..depth])
            .find(|path| doc.element_at_path(path).is_some_and(|el| el.kind == kind));
        let Some(path) = path else {
            return Err(CommandError::rejected(format!("Cursor is not inside a {kind}")));
        };
        Ok(crate::ops::Transaction::new(vec![Op::SetNodeAttrs {
            path: path.to_vec(),
            patch: patch.clone(),
        }])
        .selection_after(ctx.selection()))
    })
}

struct MapBlockPlugin;

impl PlatePlugin for MapBlockPlugin {
    fn id(&self) -> &'static str {
        "map_block"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        let mut spec = NodeSpec::block(MAP_BLOCK, "inline*")
            .attr(map_id_attr())
            .attr(AttrSpec::new("src", Value::String(String::new()), AttrCodec::Text).dom("src"))
            .attr(
                AttrSpec::new("width", Value::String("100%".into()), AttrCodec::Text)
                    .dom("data-width"),
            )
            .attr(
                AttrSpec::new("align", Value::String("center".into()), AttrCodec::Text)
                    .dom("data-align"),
            )
            .attr(AttrSpec::new("alt", Value::Null, AttrCodec::Text).dom("alt"))
            .attr(map_view_state_attr())
            .parse(
                ParseRule::tag("div")
                    .with_attr("data-type", Some("mapBlock"))
                    .content_class("text-wrapper"),
            )
            .parse(
                ParseRule::tag("div")
                    .with_attr("data-type", Some("imageBlock"))
                    .content_class("text-wrapper"),
            )
            .render(render_map_block);
        spec.isolating = true;
        spec.defining = true;
        spec.external_view = true;
        vec![spec]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("map_block.insert", "Insert map block", |args| {
                let src = args
                    .and_then(|v| v.get("src"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let pos = args
                    .and_then(|v| v.get("pos"))
                    .and_then(Value::as_u64)
                    .map(|p| p as usize);
                Ok(Chain::new()
                    .push(insert_node_command("insert_map_block", pos, move |schema| {
                        map_block_node(schema, &src, "")
                    }))
                    .with_source("command:map_block.insert"))
            })
            .description("Insert a map block at the selection or at args.pos.")
            .keywords(["map", "image", "block"])
            .args_example(serde_json::json!({ "pos": 0 })),
            CommandSpec::new("map_block.set_align", "Align map block", |args| {
                let align = args
                    .and_then(|v| v.get("align"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !matches!(align, "left" | "center" | "right") {
                    return Err(CommandError::rejected(format!(
                        "Unsupported alignment `{align}`"
                    )));
                }
                Ok(Chain::new()
                    .push(update_enclosing_command(
                        MAP_BLOCK,
                        AttrPatch::set("align", Value::String(align.to_string())),
                    ))
                    .with_source("command:map_block.set_align"))
            })
            .keywords(["align", "left", "center", "right"])
            .args_example(serde_json::json!({ "align": "left" })),
            CommandSpec::new("map_block.set_width", "Resize map block", |args| {
                let Some(width) = args.and_then(|v| v.get("width")).and_then(Value::as_f64) else {
                    return Err(CommandError::rejected("Missing args.width"));
                };
                let width = width.clamp(0.0, 100.0).round() as u64;
                Ok(Chain::new()
                    .push(update_enclosing_command(
                        MAP_BLOCK,
                        AttrPatch::set("width", Value::String(format!("{width}%"))),
                    ))
                    .with_source("command:map_block.set_width"))
            })
            .keywords(["width", "resize"])
            .args_example(serde_json::json!({ "width": 50 })),
            CommandSpec::new("map_block.set_view_state", "Set map viewport", |args| {
                let view_state = view_state_arg(args)?;
                Ok(Chain::new()
                    .push(update_enclosing_command(
                        MAP_BLOCK,
                        AttrPatch::set(VIEW_STATE_ATTR, view_state.to_value()),
                    ))
                    .with_source("command:map_block.set_view_state"))
            })
            .keywords(["map", "viewport"]),
        ]
    }
}

fn render_map_block(_attrs: &Attrs, encoded: BTreeMap<String, String>) -> DomSpec {
    let mut dom = DomSpec::new("div")
        .attr("data-type", "mapBlock")
        .child(DomSpec::new("div").attr("class", "map-wrapper"))
        .child(DomSpec::new("div").attr("class", "text-wrapper").hole());
    dom.attrs.extend(encoded);
    dom
}

struct MapCardPlugin;

impl PlatePlugin for MapCardPlugin {
    fn id(&self) -> &'static str {
        "map_card"
    }

    fn node_specs(&self) -> Vec<NodeSpec> {
        let mut spec = NodeSpec::block(MAP_CARD, "inline*")
            .attr(map_id_attr())
            .attr(
                AttrSpec::new("toggleState", Value::String("option1".into()), AttrCodec::Text)
                    .dom("data-toggle-state"),
            )
            .attr(map_view_state_attr())
            .parse(ParseRule::tag("map-card"))
            .parse(ParseRule::tag("customnode"))
            .parse(ParseRule::tag("react-component"));
        spec.draggable = true;
        spec.external_view = true;
        vec![spec]
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("map_card.insert", "Insert map card", |args| {
                let caption = args
                    .and_then(|v| v.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("New map card")
                    .to_string();
                Ok(Chain::new()
                    .push(insert_node_command("insert_map_card", None, move |schema| {
                        map_card_node(schema, &caption)
                    }))
                    .with_source("command:map_card.insert"))
            })
            .description("Insert a draggable map card with a caption.")
            .keywords(["map", "card", "widget"])
            .args_example(serde_json::json!({ "text": "New map card" })),
        ]
    }
}
