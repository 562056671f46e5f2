use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use geo_plate_core::{
    Chain, Document, EmbeddedWidget, Editor, EditorConfig, Node, NodeViewBridge, PluginRegistry,
    Selection, VIEW_STATE_ATTR, ViewState, WidgetFactory, WidgetPhase, apply_write_back,
    write_back_chain,
};
use pretty_assertions::assert_eq;
use serde_json::json;

type Events = Rc<RefCell<Vec<String>>>;

struct RecordingWidget {
    id: String,
    events: Events,
}

impl EmbeddedWidget for RecordingWidget {
    fn update(&mut self, view_state: &ViewState) {
        self.events
            .borrow_mut()
            .push(format!("update {} {}", self.id, view_state.zoom));
    }

    fn destroy(&mut self) {
        self.events.borrow_mut().push(format!("destroy {}", self.id));
    }
}

struct RecordingFactory(Events);

impl WidgetFactory for RecordingFactory {
    fn mount(&mut self, node_id: &str, kind: &str, view_state: &ViewState) -> Box<dyn EmbeddedWidget> {
        self.0
            .borrow_mut()
            .push(format!("mount {kind} {node_id} {}", view_state.zoom));
        Box::new(RecordingWidget {
            id: node_id.to_string(),
            events: self.0.clone(),
        })
    }
}

const THROTTLE: Duration = Duration::from_millis(100);

fn setup(markup: &str) -> (Editor, NodeViewBridge, Events) {
    let editor = Editor::from_markup(markup, PluginRegistry::map_editor(), EditorConfig::default());
    let events = Events::default();
    let mut bridge = NodeViewBridge::new(Box::new(RecordingFactory(events.clone())), THROTTLE);
    bridge.sync(&editor);
    (editor, bridge, events)
}

const CARD_THEN_TEXT: &str =
    r#"<map-card data-id="card" data-toggle-state="option2">LA</map-card><p>after</p>"#;

#[test]
fn write_back_updates_only_the_view_state() {
    let (mut editor, mut bridge, events) = setup(CARD_THEN_TEXT);
    assert_eq!(events.borrow().as_slice(), ["mount map_card card 2"]);
    assert_eq!(bridge.phase("card"), Some(WidgetPhase::Mounted));
    assert_eq!(bridge.position("card"), Some(0));

    let before = editor.doc().clone();
    let la = ViewState::new(-118.2437, 34.0522, 12.0);
    let t0 = Instant::now();
    assert!(bridge.report_view_state("card", la.clone(), t0));

    let chains = bridge.take_due(t0 + THROTTLE);
    assert_eq!(chains.len(), 1);
    assert!(apply_write_back(&mut editor, &chains[0]).unwrap());

    let mut expected = before.clone();
    let Node::Element(card) = &mut expected.children[0] else {
        panic!("expected the card element");
    };
    card.attrs.insert(VIEW_STATE_ATTR.to_string(), la.to_value());
    assert_eq!(editor.doc(), &expected);

    // The widget already shows this state; syncing must not echo it back.
    bridge.sync(&editor);
    assert_eq!(events.borrow().len(), 1);

    assert!(editor.undo());
    assert_eq!(editor.doc(), &before);
}

#[test]
fn stale_write_back_after_delete_is_dropped() {
    let (mut editor, mut bridge, _events) = setup(CARD_THEN_TEXT);
    let t0 = Instant::now();
    bridge.report_view_state("card", ViewState::new(-118.2437, 34.0522, 12.0), t0);
    let queued = bridge.take_due(t0 + THROTTLE);

    editor.run_chain(&Chain::new().delete_range(0, 4)).unwrap();
    let after_delete = editor.doc().clone();

    assert!(!apply_write_back(&mut editor, &queued[0]).unwrap());
    assert_eq!(editor.doc(), &after_delete);
    assert_eq!(editor.to_markup(), "<p>after</p>");
}

#[test]
fn unmount_cancels_pending_write_back_and_releases_the_widget() {
    let (mut editor, mut bridge, events) = setup(CARD_THEN_TEXT);
    let t0 = Instant::now();
    bridge.report_view_state("card", ViewState::new(1.0, 2.0, 3.0), t0);
    assert!(bridge.has_pending("card"));

    editor.run_chain(&Chain::new().delete_range(0, 4)).unwrap();
    bridge.sync(&editor);

    assert_eq!(bridge.phase("card"), Some(WidgetPhase::Unmounted));
    assert!(!bridge.has_pending("card"));
    assert_eq!(events.borrow().last().map(String::as_str), Some("destroy card"));
    assert!(bridge.take_due(t0 + THROTTLE * 10).is_empty());
    assert!(!bridge.report_view_state("card", ViewState::default(), t0));

    // Undo brings the node back under the same id and it mounts afresh.
    assert!(editor.undo());
    bridge.sync(&editor);
    assert_eq!(bridge.phase("card"), Some(WidgetPhase::Mounted));
    assert_eq!(events.borrow().last().map(String::as_str), Some("mount map_card card 2"));
}

#[test]
fn document_edits_reach_the_widget() {
    let (mut editor, mut bridge, events) = setup(CARD_THEN_TEXT);
    editor
        .run_chain(&write_back_chain("card", &ViewState::new(5.0, 6.0, 7.0)))
        .unwrap();
    bridge.sync(&editor);
    assert_eq!(events.borrow().last().map(String::as_str), Some("update card 7"));
}

#[test]
fn widget_state_wins_while_a_write_back_is_pending() {
    let (mut editor, mut bridge, events) = setup(CARD_THEN_TEXT);
    let t0 = Instant::now();
    bridge.report_view_state("card", ViewState::new(1.0, 1.0, 9.0), t0);

    editor.set_selection(Selection::collapsed(6));
    editor
        .run_chain(&Chain::new().insert_text("!"))
        .unwrap();
    editor
        .run_chain(&write_back_chain("card", &ViewState::new(5.0, 6.0, 7.0)))
        .unwrap();
    bridge.sync(&editor);
    assert_eq!(events.borrow().len(), 1);
    assert!(bridge.has_pending("card"));
}

#[test]
fn positions_follow_structural_edits() {
    let (mut editor, mut bridge, _events) = setup(CARD_THEN_TEXT);
    editor.set_selection(Selection::collapsed(1));
    editor
        .run_chain(&Chain::new().insert_content_at(0, vec![Node::paragraph("intro")]))
        .unwrap();
    bridge.sync(&editor);
    assert_eq!(bridge.position("card"), Some(7));
    assert_eq!(bridge.mounted_ids(), vec!["card"]);
}

#[test]
fn undecodable_view_state_mounts_with_the_default() {
    let mut attrs = geo_plate_core::Attrs::new();
    attrs.insert("id".into(), json!("c"));
    attrs.insert(VIEW_STATE_ATTR.into(), json!("garbage"));
    let doc = Document {
        children: vec![Node::element("map_card", attrs, vec![Node::text("x")])],
    };
    let editor = Editor::new(doc, Selection::collapsed(1), PluginRegistry::map_editor());

    let events = Events::default();
    let mut bridge = NodeViewBridge::new(Box::new(RecordingFactory(events.clone())), THROTTLE);
    bridge.sync(&editor);
    assert_eq!(events.borrow().as_slice(), ["mount map_card c 2"]);
}
