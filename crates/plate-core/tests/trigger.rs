use geo_plate_core::{
    BlockTemplate, Chain, Coords, Editor, EditorConfig, PluginRegistry, Selection, TriggerDetector,
    TriggerState, VIEW_STATE_ATTR, ViewProjection, ViewState,
};
use pretty_assertions::assert_eq;
use serde_json::Value;

/// Every position sits on one line, 8px per unit.
struct Grid;

impl ViewProjection for Grid {
    fn coords_at_pos(&self, pos: usize) -> Option<Coords> {
        Some(Coords {
            x: pos as f32 * 8.0,
            y: 100.0,
        })
    }
}

struct Offscreen;

impl ViewProjection for Offscreen {
    fn coords_at_pos(&self, _pos: usize) -> Option<Coords> {
        None
    }
}

fn editor(markup: &str) -> Editor {
    Editor::from_markup(markup, PluginRegistry::map_editor(), EditorConfig::default())
}

fn type_at(editor: &mut Editor, pos: usize, text: &str) {
    editor.set_selection(Selection::collapsed(pos));
    editor.run_chain(&Chain::new().insert_text(text)).unwrap();
}

#[test]
fn slash_at_top_level_opens_the_menu_and_heading_replaces_the_block() {
    let mut editor = editor("<p>Hello</p>");
    let mut detector = TriggerDetector::new(editor.config());

    type_at(&mut editor, 6, "/");
    assert_eq!(
        detector.evaluate(&editor, &Grid),
        TriggerState::Visible {
            anchor: 7,
            coords: Coords { x: 56.0, y: 124.0 },
        }
    );

    let chain = detector.select(BlockTemplate::Heading, &editor).unwrap();
    assert_eq!(detector.state(), TriggerState::Hidden);
    editor.run_chain(&chain).unwrap();
    assert_eq!(editor.to_markup(), "<h1></h1>");
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);

    assert!(editor.undo());
    assert_eq!(editor.to_markup(), "<p>Hello/</p>");
}

#[test]
fn slash_inside_a_map_card_keeps_the_menu_hidden() {
    let mut editor = editor(r#"<map-card data-id="c">Cap</map-card>"#);
    let mut detector = TriggerDetector::new(editor.config());

    type_at(&mut editor, 4, "/");
    assert_eq!(editor.doc().text_between(0, editor.doc().content_size(), ""), "Cap/");
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);
}

#[test]
fn moving_the_cursor_hides_and_shows_the_menu() {
    let mut editor = editor("<p>a/b</p>");
    let mut detector = TriggerDetector::new(editor.config());

    editor.set_selection(Selection::collapsed(3));
    assert!(detector.evaluate(&editor, &Grid).is_visible());

    editor.set_selection(Selection::collapsed(4));
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);

    editor.set_selection(Selection::new(2, 3));
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);

    editor.set_selection(Selection::collapsed(3));
    assert!(detector.evaluate(&editor, &Grid).is_visible());
}

#[test]
fn typing_past_the_trigger_hides_the_menu() {
    let mut editor = editor("<p>x</p>");
    let mut detector = TriggerDetector::new(editor.config());
    type_at(&mut editor, 2, "/");
    assert!(detector.evaluate(&editor, &Grid).is_visible());
    editor.run_chain(&Chain::new().insert_text("h")).unwrap();
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);
}

#[test]
fn empty_documents_and_missing_projection_stay_hidden() {
    let editor = editor("");
    let mut detector = TriggerDetector::new(editor.config());
    assert_eq!(detector.evaluate(&editor, &Grid), TriggerState::Hidden);

    let mut editor = editor_with_slash();
    assert_eq!(detector.evaluate(&editor, &Offscreen), TriggerState::Hidden);
    editor.set_selection(Selection::collapsed(2));
    assert!(detector.evaluate(&editor, &Grid).is_visible());
}

fn editor_with_slash() -> Editor {
    let mut editor = editor("<p>/</p>");
    editor.set_selection(Selection::collapsed(2));
    editor
}

#[test]
fn selecting_while_hidden_does_nothing() {
    let editor = editor("<p>Hello</p>");
    let mut detector = TriggerDetector::new(editor.config());
    assert!(detector.select(BlockTemplate::Text, &editor).is_none());
}

#[test]
fn menu_confirm_inserts_the_highlighted_template() {
    let mut editor = editor("<p>Notes</p>");
    let mut detector = TriggerDetector::new(editor.config());
    type_at(&mut editor, 6, "/");
    detector.evaluate(&editor, &Grid);

    detector.move_down();
    detector.move_down();
    assert_eq!(detector.highlighted(), BlockTemplate::MapBlock);
    let chain = detector.confirm(&editor).unwrap();
    editor.run_chain(&chain).unwrap();

    let block = editor.doc().children[0].as_element().unwrap();
    assert_eq!(block.kind, "map_block");
    assert_eq!(block.text_content(), "Map caption");
    assert_eq!(
        block.attr(VIEW_STATE_ATTR).and_then(ViewState::from_value),
        Some(ViewState::default())
    );
    assert!(block.attr("id").and_then(Value::as_str).is_some());
}

#[test]
fn reopening_resets_the_highlight() {
    let mut editor = editor("<p>/</p>");
    let mut detector = TriggerDetector::new(editor.config());
    editor.set_selection(Selection::collapsed(2));
    detector.evaluate(&editor, &Grid);
    detector.move_down();
    assert_eq!(detector.highlighted(), BlockTemplate::Heading);

    editor.set_selection(Selection::collapsed(1));
    detector.evaluate(&editor, &Grid);
    editor.set_selection(Selection::collapsed(2));
    detector.evaluate(&editor, &Grid);
    assert_eq!(detector.highlighted(), BlockTemplate::Text);
}

#[test]
fn trigger_character_comes_from_config() {
    let config = EditorConfig {
        trigger_char: '#',
        menu_offset_y: 10.0,
        ..EditorConfig::default()
    };
    let mut editor = Editor::from_markup("<p>#</p>", PluginRegistry::map_editor(), config);
    editor.set_selection(Selection::collapsed(2));
    let mut detector = TriggerDetector::new(editor.config());
    assert_eq!(
        detector.evaluate(&editor, &Grid),
        TriggerState::Visible {
            anchor: 2,
            coords: Coords { x: 16.0, y: 110.0 },
        }
    );
}
