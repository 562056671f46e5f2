use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::Chain;
use crate::config::EditorConfig;
use crate::core::{Attrs, Editor, Node};
use crate::plugin::{HEADING, PARAGRAPH, map_block_node, map_card_node};
use crate::schema::Schema;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f32,
    pub y: f32,
}

/// Where the rendering surface paints a document position.
pub trait ViewProjection {
    fn coords_at_pos(&self, pos: usize) -> Option<Coords>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerState {
    Hidden,
    Visible { anchor: usize, coords: Coords },
}

impl TriggerState {
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Visible { .. })
    }
}

/// What the slash menu can insert in place of the block it was opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTemplate {
    Text,
    Heading,
    MapBlock,
    MapCard,
}

impl BlockTemplate {
    pub const ALL: [BlockTemplate; 4] = [Self::Text, Self::Heading, Self::MapBlock, Self::MapCard];

    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Heading => "Heading",
            Self::MapBlock => "Map block",
            Self::MapCard => "Map card",
        }
    }

    pub fn nodes(self, schema: &Schema) -> Vec<Node> {
        let node = match self {
            Self::Text => schema.create_node(PARAGRAPH, Attrs::new(), vec![Node::text("")]),
            Self::Heading => {
                let mut attrs = Attrs::new();
                attrs.insert("level".to_string(), Value::from(1));
                schema.create_node(HEADING, attrs, vec![Node::text("")])
            }
            Self::MapBlock => map_block_node(schema, "", "Map caption"),
            Self::MapCard => map_card_node(schema, "New map card"),
        };
        vec![node]
    }
}

/// Decides after every change whether the slash menu shows, and where.
#[derive(Debug, Clone)]
pub struct TriggerDetector {
    state: TriggerState,
    trigger_char: char,
    menu_offset_y: f32,
    highlighted: usize,
}

impl TriggerDetector {
    pub fn new(config: &EditorConfig) -> Self {
        Self {
            state: TriggerState::Hidden,
            trigger_char: config.trigger_char,
            menu_offset_y: config.menu_offset_y,
            highlighted: 0,
        }
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn evaluate(&mut self, editor: &Editor, projection: &dyn ViewProjection) -> TriggerState {
        let next = self.detect(editor, projection);
        if next.is_visible() != self.state.is_visible() {
            log::debug!("slash menu {:?} -> {:?}", self.state, next);
        }
        if next.is_visible() && !self.state.is_visible() {
            self.highlighted = 0;
        }
        self.state = next;
        next
    }

    fn detect(&self, editor: &Editor, projection: &dyn ViewProjection) -> TriggerState {
        let sel = editor.selection();
        if !sel.is_collapsed() {
            return TriggerState::Hidden;
        }
        let doc = editor.doc();
        if doc.resolve(sel.head).is_none() {
            return TriggerState::Hidden;
        }
        if doc.char_before(sel.head) != Some(self.trigger_char) {
            return TriggerState::Hidden;
        }
        let schema = editor.registry().schema();
        let inside_widget = doc
            .ancestors_at(sel.head)
            .iter()
            .any(|el| schema.is_external_view(&el.kind));
        if inside_widget {
            return TriggerState::Hidden;
        }
        match projection.coords_at_pos(sel.head) {
            Some(Coords { x, y }) => TriggerState::Visible {
                anchor: sel.head,
                coords: Coords {
                    x,
                    y: y + self.menu_offset_y,
                },
            },
            None => TriggerState::Hidden,
        }
    }

    pub fn hide(&mut self) {
        if self.state.is_visible() {
            log::debug!("slash menu hidden");
        }
        self.state = TriggerState::Hidden;
    }

    pub fn items(&self) -> &'static [BlockTemplate] {
        &BlockTemplate::ALL
    }

    pub fn highlighted(&self) -> BlockTemplate {
        BlockTemplate::ALL[self.highlighted]
    }

    pub fn move_up(&mut self) {
        let len = BlockTemplate::ALL.len();
        self.highlighted = (self.highlighted + len - 1) % len;
    }

    pub fn move_down(&mut self) {
        self.highlighted = (self.highlighted + 1) % BlockTemplate::ALL.len();
    }

    /// Hides the menu and returns the chain that removes the trigger
    /// character and puts `template` in place of its block. `None` when the
    /// menu is not showing.
    pub fn select(&mut self, template: BlockTemplate, editor: &Editor) -> Option<Chain> {
        let TriggerState::Visible { anchor, .. } = self.state else {
            return None;
        };
        self.hide();
        let trigger_pos = anchor.checked_sub(1)?;
        let nodes = template.nodes(editor.registry().schema());
        Some(
            Chain::new()
                .delete_range(trigger_pos, anchor)
                .replace_block_at(trigger_pos, nodes)
                .with_source(format!("slash_menu:{}", template.label())),
        )
    }

    pub fn confirm(&mut self, editor: &Editor) -> Option<Chain> {
        self.select(self.highlighted(), editor)
    }
}
