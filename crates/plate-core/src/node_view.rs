use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::codec::{VIEW_STATE_ATTR, ViewState};
use crate::commands::{Chain, CommandError, CommandErrorKind};
use crate::core::{AttrPatch, Editor, Node};

/// A live widget rendering one externally-rendered node.
pub trait EmbeddedWidget {
    /// The node's attributes changed through the document.
    fn update(&mut self, view_state: &ViewState);
    /// Release listeners, timers and any other resources. Called exactly once.
    fn destroy(&mut self);
}

pub trait WidgetFactory {
    fn mount(&mut self, node_id: &str, kind: &str, view_state: &ViewState)
    -> Box<dyn EmbeddedWidget>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetPhase {
    Mounted,
    Unmounting,
    Unmounted,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingWriteBack {
    view_state: ViewState,
    due: Instant,
}

struct NodeView {
    kind: String,
    pos: usize,
    phase: WidgetPhase,
    last_state: ViewState,
    pending: Option<PendingWriteBack>,
    widget: Option<Box<dyn EmbeddedWidget>>,
}

/// An externally-rendered node as it sits in the committed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalNode {
    pub id: String,
    pub kind: String,
    pub pos: usize,
    pub view_state: Option<ViewState>,
}

/// Externally-rendered nodes of `editor`'s document, in document order.
/// Nodes without an `id` are skipped; normalization gives every one an id.
pub fn external_nodes(editor: &Editor) -> Vec<ExternalNode> {
    let schema = editor.registry().schema();
    let mut out = Vec::new();
    editor.doc().walk(|_, pos, node| {
        let Node::Element(el) = node else {
            return;
        };
        if !schema.is_external_view(&el.kind) {
            return;
        }
        let Some(id) = el.attr("id").and_then(Value::as_str) else {
            return;
        };
        out.push(ExternalNode {
            id: id.to_string(),
            kind: el.kind.clone(),
            pos,
            view_state: el.attr(VIEW_STATE_ATTR).and_then(ViewState::from_value),
        });
    });
    out
}

/// Owns the widget of every externally-rendered node, keyed by node id.
///
/// Widgets never touch the document. Their state comes back through
/// [`NodeViewBridge::report_view_state`], is coalesced by a trailing-edge
/// throttle, and leaves as a [`Chain`] from [`NodeViewBridge::take_due`].
pub struct NodeViewBridge {
    factory: Box<dyn WidgetFactory>,
    views: BTreeMap<String, NodeView>,
    throttle: Duration,
}

impl NodeViewBridge {
    pub fn new(factory: Box<dyn WidgetFactory>, throttle: Duration) -> Self {
        Self {
            factory,
            views: BTreeMap::new(),
            throttle,
        }
    }

    pub fn phase(&self, node_id: &str) -> Option<WidgetPhase> {
        self.views.get(node_id).map(|view| view.phase)
    }

    pub fn position(&self, node_id: &str) -> Option<usize> {
        self.views
            .get(node_id)
            .filter(|view| view.phase == WidgetPhase::Mounted)
            .map(|view| view.pos)
    }

    pub fn mounted_ids(&self) -> Vec<&str> {
        self.views
            .iter()
            .filter(|(_, view)| view.phase == WidgetPhase::Mounted)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn has_pending(&self, node_id: &str) -> bool {
        self.views
            .get(node_id)
            .is_some_and(|view| view.pending.is_some())
    }

    /// Brings the widget arena in line with the committed document: mounts
    /// new nodes, pushes changed attributes, unmounts nodes that are gone.
    pub fn sync(&mut self, editor: &Editor) {
        self.views
            .retain(|_, view| view.phase != WidgetPhase::Unmounted);

        let present = external_nodes(editor);
        for node in &present {
            match self.views.get_mut(&node.id) {
                Some(view) => {
                    view.pos = node.pos;
                    let state = node.view_state.clone().unwrap_or_default();
                    // The widget is ahead of the document until its write-back lands.
                    if view.pending.is_none() && state != view.last_state {
                        if let Some(widget) = view.widget.as_mut() {
                            widget.update(&state);
                        }
                        view.last_state = state;
                    }
                }
                None => self.mount(node),
            }
        }

        let gone: Vec<String> = self
            .views
            .keys()
            .filter(|id| !present.iter().any(|node| &node.id == *id))
            .cloned()
            .collect();
        for id in gone {
            self.unmount(&id);
        }
    }

    fn mount(&mut self, node: &ExternalNode) {
        let state = match &node.view_state {
            Some(state) => state.clone(),
            None => {
                log::debug!(
                    "node {} has no readable viewState, mounting with the default",
                    node.id
                );
                ViewState::default()
            }
        };
        let widget = self.factory.mount(&node.id, &node.kind, &state);
        log::debug!("mounted {} widget for node {}", node.kind, node.id);
        self.views.insert(
            node.id.clone(),
            NodeView {
                kind: node.kind.clone(),
                pos: node.pos,
                phase: WidgetPhase::Mounted,
                last_state: state,
                pending: None,
                widget: Some(widget),
            },
        );
    }

    fn unmount(&mut self, node_id: &str) {
        let Some(view) = self.views.get_mut(node_id) else {
            return;
        };
        view.phase = WidgetPhase::Unmounting;
        if view.pending.take().is_some() {
            log::debug!("cancelled pending write-back for node {node_id}");
        }
        if let Some(mut widget) = view.widget.take() {
            widget.destroy();
        }
        view.phase = WidgetPhase::Unmounted;
        log::debug!("unmounted {} widget for node {node_id}", view.kind);
    }

    /// Records the widget's live viewport. Bursts within the throttle window
    /// collapse into one write-back carrying the latest state.
    pub fn report_view_state(&mut self, node_id: &str, view_state: ViewState, now: Instant) -> bool {
        let Some(view) = self.views.get_mut(node_id) else {
            log::debug!("view state reported for unknown node {node_id}");
            return false;
        };
        if view.phase != WidgetPhase::Mounted {
            log::debug!("view state reported for unmounted node {node_id}");
            return false;
        }
        let due = view
            .pending
            .as_ref()
            .map_or(now + self.throttle, |pending| pending.due);
        view.pending = Some(PendingWriteBack { view_state, due });
        true
    }

    /// Write-backs whose throttle window has closed, one chain per node.
    pub fn take_due(&mut self, now: Instant) -> Vec<Chain> {
        let mut chains = Vec::new();
        for (id, view) in &mut self.views {
            let ready = view.pending.as_ref().is_some_and(|p| p.due <= now);
            if !ready {
                continue;
            }
            let Some(pending) = view.pending.take() else {
                continue;
            };
            chains.push(write_back_chain(id, &pending.view_state));
            view.last_state = pending.view_state;
        }
        chains
    }

    /// Every pending write-back regardless of its window.
    pub fn flush(&mut self) -> Vec<Chain> {
        self.take_due(Instant::now() + self.throttle)
    }
}

impl Drop for NodeViewBridge {
    fn drop(&mut self) {
        let ids: Vec<String> = self.views.keys().cloned().collect();
        for id in ids {
            self.unmount(&id);
        }
    }
}

/// Updates only `viewState` on the node with `node_id`, resolved by identity
/// when the chain runs.
pub fn write_back_chain(node_id: &str, view_state: &ViewState) -> Chain {
    Chain::new()
        .update_node_attrs(node_id, AttrPatch::set(VIEW_STATE_ATTR, view_state.to_value()))
        .with_source(format!("node_view:{node_id}"))
}

/// Runs a write-back. A node deleted in the meantime drops the update and
/// reports `Ok(false)`.
pub fn apply_write_back(editor: &mut Editor, chain: &Chain) -> Result<bool, CommandError> {
    match editor.run_chain(chain) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == CommandErrorKind::StaleReference => {
            log::debug!("dropped stale write-back: {}", err.message());
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Clone, Default)]
    struct Log(Rc<RefCell<Vec<String>>>);

    struct Widget {
        id: String,
        log: Log,
    }

    impl EmbeddedWidget for Widget {
        fn update(&mut self, view_state: &ViewState) {
            self.log
                .0
                .borrow_mut()
                .push(format!("update {} {}", self.id, view_state.zoom));
        }

        fn destroy(&mut self) {
            self.log.0.borrow_mut().push(format!("destroy {}", self.id));
        }
    }

    struct Factory(Log);

    impl WidgetFactory for Factory {
        fn mount(&mut self, node_id: &str, _kind: &str, view_state: &ViewState) -> Box<dyn EmbeddedWidget> {
            self.0
                .0
                .borrow_mut()
                .push(format!("mount {node_id} {}", view_state.zoom));
            Box::new(Widget {
                id: node_id.to_string(),
                log: self.0.clone(),
            })
        }
    }

    #[test]
    fn bursts_collapse_into_the_latest_state() {
        let log = Log::default();
        let mut bridge = NodeViewBridge::new(Box::new(Factory(log)), Duration::from_millis(100));
        let editor = Editor::from_markup(
            r#"<map-card data-id="a">x</map-card>"#,
            crate::plugin::PluginRegistry::map_editor(),
            Default::default(),
        );
        bridge.sync(&editor);

        let t0 = Instant::now();
        assert!(bridge.report_view_state("a", ViewState::new(1.0, 1.0, 3.0), t0));
        assert!(bridge.report_view_state(
            "a",
            ViewState::new(2.0, 2.0, 4.0),
            t0 + Duration::from_millis(60)
        ));
        assert!(bridge.take_due(t0 + Duration::from_millis(99)).is_empty());
        let chains = bridge.take_due(t0 + Duration::from_millis(100));
        assert_eq!(chains.len(), 1);
        assert!(!bridge.has_pending("a"));
    }
}
