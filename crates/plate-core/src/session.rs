use std::collections::VecDeque;
use std::time::Instant;

use serde_json::Value;

use crate::codec::ViewState;
use crate::commands::{Chain, Command, CommandError};
use crate::core::{Editor, Node, Selection};
use crate::node_view::{NodeViewBridge, WidgetFactory, apply_write_back};
use crate::ops::{Op, Transaction};
use crate::trigger::{BlockTemplate, TriggerDetector, TriggerState, ViewProjection};

/// Chains observers want to run. They run on the next turn, never inside
/// the notification that queued them.
#[derive(Debug, Default)]
pub struct DeferredQueue {
    chains: VecDeque<Chain>,
}

impl DeferredQueue {
    pub fn push(&mut self, chain: Chain) {
        self.chains.push_back(chain);
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

/// What an observer sees: the committed editor plus the derived state that
/// was already brought up to date for this change.
pub struct SessionView<'a> {
    pub editor: &'a Editor,
    pub trigger: TriggerState,
    pub bridge: &'a NodeViewBridge,
    pub document_changed: bool,
}

pub trait SessionObserver {
    fn on_update(&mut self, view: &SessionView<'_>, deferred: &mut DeferredQueue);
}

/// The one owned editing session: a single writer path into the document
/// and a fixed notification order after each commit (trigger detector,
/// node-view bridge, then registered observers).
pub struct EditorSession {
    editor: Editor,
    trigger: TriggerDetector,
    bridge: NodeViewBridge,
    projection: Box<dyn ViewProjection>,
    observers: Vec<Box<dyn SessionObserver>>,
    deferred: DeferredQueue,
}

impl EditorSession {
    pub fn new(
        editor: Editor,
        factory: Box<dyn WidgetFactory>,
        projection: Box<dyn ViewProjection>,
    ) -> Self {
        let trigger = TriggerDetector::new(editor.config());
        let bridge = NodeViewBridge::new(factory, editor.config().writeback_throttle());
        let mut session = Self {
            editor,
            trigger,
            bridge,
            projection,
            observers: Vec::new(),
            deferred: DeferredQueue::default(),
        };
        session.notify(true);
        session
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn trigger_state(&self) -> TriggerState {
        self.trigger.state()
    }

    pub fn trigger(&self) -> &TriggerDetector {
        &self.trigger
    }

    pub fn bridge(&self) -> &NodeViewBridge {
        &self.bridge
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    fn notify(&mut self, document_changed: bool) {
        self.trigger.evaluate(&self.editor, self.projection.as_ref());
        if document_changed {
            self.bridge.sync(&self.editor);
        }
        let view = SessionView {
            editor: &self.editor,
            trigger: self.trigger.state(),
            bridge: &self.bridge,
            document_changed,
        };
        for observer in &mut self.observers {
            observer.on_update(&view, &mut self.deferred);
        }
    }

    pub fn run(&mut self, chain: &Chain) -> Result<(), CommandError> {
        let revision = self.editor.revision();
        self.editor.run_chain(chain)?;
        self.notify(self.editor.revision() != revision);
        Ok(())
    }

    pub fn run_command(&mut self, id: &str, args: Option<Value>) -> Result<(), CommandError> {
        let chain = self.editor.command_chain(id, args)?;
        self.run(&chain)
    }

    pub fn can_run_command(&self, id: &str, args: Option<Value>) -> bool {
        self.editor.can_run_command(id, args)
    }

    pub fn type_text(&mut self, text: &str) -> Result<(), CommandError> {
        self.run(&Chain::new().insert_text(text).with_source("input:text"))
    }

    /// A bare cursor move: only the trigger detector and observers run.
    pub fn set_selection(&mut self, selection: Selection) {
        self.editor.set_selection(selection);
        self.notify(false);
    }

    pub fn undo(&mut self) -> bool {
        let undone = self.editor.undo();
        if undone {
            self.notify(true);
        }
        undone
    }

    pub fn redo(&mut self) -> bool {
        let redone = self.editor.redo();
        if redone {
            self.notify(true);
        }
        redone
    }

    pub fn move_menu_up(&mut self) {
        self.trigger.move_up();
    }

    pub fn move_menu_down(&mut self) {
        self.trigger.move_down();
    }

    /// Picks a slash-menu entry. `Ok(false)` when the menu is not showing.
    pub fn select_menu_item(&mut self, template: BlockTemplate) -> Result<bool, CommandError> {
        let Some(chain) = self.trigger.select(template, &self.editor) else {
            return Ok(false);
        };
        match self.run(&chain) {
            Ok(()) => Ok(true),
            Err(err) => {
                self.notify(false);
                Err(err)
            }
        }
    }

    pub fn confirm_menu(&mut self) -> Result<bool, CommandError> {
        self.select_menu_item(self.trigger.highlighted())
    }

    pub fn widget_changed(&mut self, node_id: &str, view_state: ViewState, now: Instant) -> bool {
        self.bridge.report_view_state(node_id, view_state, now)
    }

    /// Commits the write-backs whose throttle window closed by `now`.
    /// Returns how many changed the document. A write-back the pipeline
    /// refuses is logged and skipped; the rest still commit.
    pub fn tick(&mut self, now: Instant) -> usize {
        let mut applied = 0;
        for chain in self.bridge.take_due(now) {
            match apply_write_back(&mut self.editor, &chain) {
                Ok(true) => {
                    applied += 1;
                    self.notify(true);
                }
                Ok(false) => {}
                Err(err) => log::warn!("write-back {} rejected: {err}", chain.source()),
            }
        }
        applied
    }

    /// Runs the chains observers queued during earlier turns. Chains queued
    /// while these run wait for the following turn.
    pub fn next_turn(&mut self) -> usize {
        let queued: Vec<Chain> = std::mem::take(&mut self.deferred.chains).into();
        let mut applied = 0;
        for chain in queued {
            match self.run(&chain) {
                Ok(()) => applied += 1,
                Err(err) => log::debug!("deferred chain {} dropped: {err}", chain.source()),
            }
        }
        applied
    }
}

/// Keeps a paragraph after a trailing embedded widget so the caret can
/// always leave it.
#[derive(Debug, Default)]
pub struct TrailingParagraph;

impl SessionObserver for TrailingParagraph {
    fn on_update(&mut self, view: &SessionView<'_>, deferred: &mut DeferredQueue) {
        if view.document_changed && ends_with_widget(view.editor) {
            deferred.push(
                Chain::new()
                    .push(ensure_trailing_paragraph())
                    .with_source("observer:trailing_paragraph"),
            );
        }
    }
}

fn ends_with_widget(editor: &Editor) -> bool {
    editor
        .doc()
        .children
        .last()
        .is_some_and(|node| editor.registry().schema().is_external_view(node.kind()))
}

fn ensure_trailing_paragraph() -> Command {
    Command::new("ensure_trailing_paragraph", |ctx| {
        let doc = ctx.doc();
        let needs_paragraph = doc
            .children
            .last()
            .is_some_and(|node| ctx.schema().is_external_view(node.kind()));
        if !needs_paragraph {
            return Ok(Transaction::empty());
        }
        Ok(Transaction::new(vec![Op::InsertNode {
            path: vec![doc.children.len()],
            node: Node::paragraph(""),
        }])
        .selection_after(ctx.selection()))
    })
}
