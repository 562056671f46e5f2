use geo_plate_core::{Editor, EditorConfig, PluginRegistry, Selection, ViewState};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn editor(markup: &str) -> Editor {
    Editor::from_markup(markup, PluginRegistry::map_editor(), EditorConfig::default())
}

#[test]
fn marks_queries_follow_the_selection() {
    let mut editor = editor("<p><strong>Bold</strong> plain</p>");

    editor.set_selection(Selection::collapsed(3));
    assert_eq!(
        editor.run_query::<Vec<String>>("marks.active", None).unwrap(),
        vec!["bold".to_string()]
    );
    assert!(
        editor
            .run_query::<bool>("marks.is_active", Some(json!({ "mark": "bold" })))
            .unwrap()
    );

    editor.set_selection(Selection::collapsed(8));
    assert!(
        editor
            .run_query::<Vec<String>>("marks.active", None)
            .unwrap()
            .is_empty()
    );

    editor.set_selection(Selection::new(1, 5));
    assert_eq!(
        editor.run_query::<Vec<String>>("marks.active", None).unwrap(),
        vec!["bold".to_string()]
    );

    editor.set_selection(Selection::new(1, 8));
    assert!(
        !editor
            .run_query::<bool>("marks.is_active", Some(json!({ "mark": "bold" })))
            .unwrap()
    );
}

#[test]
fn marks_is_active_requires_a_mark_name() {
    let editor = editor("<p>x</p>");
    let err = editor.run_query_json("marks.is_active", None).unwrap_err();
    assert_eq!(err.message(), "Missing args.mark");
}

#[test]
fn block_queries_report_the_enclosing_block() {
    let mut editor = editor("<p>one</p><h2>two</h2>");

    editor.set_selection(Selection::collapsed(2));
    assert_eq!(
        editor.run_query_json("block.kind", None).unwrap(),
        json!("paragraph")
    );
    assert_eq!(
        editor.run_query_json("block.heading_level", None).unwrap(),
        Value::Null
    );

    editor.set_selection(Selection::collapsed(7));
    assert_eq!(
        editor.run_query_json("block.kind", None).unwrap(),
        json!("heading")
    );
    assert_eq!(editor.run_query::<u64>("block.heading_level", None).unwrap(), 2);
}

#[test]
fn node_view_query_reads_the_viewport_by_id() {
    let editor = editor(
        r#"<map-card data-id="card-1" data-view-state='{"longitude":-118.2437,"latitude":34.0522,"zoom":12}'>LA</map-card>"#,
    );
    let value = editor
        .run_query_json("node_view.view_state", Some(json!({ "id": "card-1" })))
        .unwrap();
    assert_eq!(
        ViewState::from_value(&value),
        Some(ViewState::new(-118.2437, 34.0522, 12.0))
    );

    assert!(
        editor
            .run_query_json("node_view.view_state", Some(json!({ "id": "missing" })))
            .is_err()
    );
}

#[test]
fn unknown_queries_are_errors() {
    let editor = editor("<p>x</p>");
    let err = editor.run_query_json("no.such_query", None).unwrap_err();
    assert_eq!(err.message(), "Unknown query: no.such_query");
}

#[test]
fn registered_commands_are_discoverable() {
    let registry = PluginRegistry::map_editor();
    let mut ids: Vec<&str> = registry.commands().keys().map(String::as_str).collect();
    ids.sort_unstable();
    assert_eq!(
        ids,
        vec![
            "block.set_heading",
            "block.set_paragraph",
            "map_block.insert",
            "map_block.set_align",
            "map_block.set_view_state",
            "map_block.set_width",
            "map_card.insert",
            "marks.set_highlight",
            "marks.set_view_state",
            "marks.toggle_bold",
            "marks.toggle_italic",
            "marks.unset_highlight",
            "marks.unset_view_state",
        ]
    );
    let link = registry.command("marks.set_view_state").unwrap();
    assert!(link.keywords.iter().any(|k| k == "map"));
    assert!(link.args_example.is_some());
}
