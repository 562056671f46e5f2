use geo_plate_core::{
    ApplyError, Attrs, Chain, Command, CommandErrorKind, Editor, EditorConfig, Node, Op,
    PluginRegistry, Selection, Transaction,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn editor(markup: &str) -> Editor {
    Editor::from_markup(markup, PluginRegistry::map_editor(), EditorConfig::default())
}

fn lenient(markup: &str) -> Editor {
    let config = EditorConfig {
        strict_invariants: false,
        ..EditorConfig::default()
    };
    Editor::from_markup(markup, PluginRegistry::map_editor(), config)
}

#[test]
fn inverted_delete_range_is_rejected_and_changes_nothing() {
    let mut editor = editor("<p>Hello world</p>");
    let before = editor.doc().clone();
    let revision = editor.revision();

    let err = editor
        .run_chain(&Chain::new().delete_range(5, 2))
        .unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::Rejected);
    assert_eq!(editor.doc(), &before);
    assert_eq!(editor.revision(), revision);
    assert!(!editor.can_undo());
}

#[test]
fn delete_range_inside_one_block() {
    let mut editor = editor("<p>Hello world</p>");
    editor.run_chain(&Chain::new().delete_range(1, 6)).unwrap();
    assert_eq!(editor.to_markup(), "<p> world</p>");
    assert_eq!(editor.selection(), &Selection::collapsed(1));
}

#[test]
fn delete_range_joins_sibling_blocks() {
    let mut editor = editor("<p>Hello</p><p>world</p>");
    editor.run_chain(&Chain::new().delete_range(4, 10)).unwrap();
    assert_eq!(editor.to_markup(), "<p>Helrld</p>");
}

#[test]
fn delete_range_cannot_cut_into_a_map_block() {
    let mut editor = editor(
        r#"<p>Hello</p><div data-type="mapBlock" data-id="m"><div class="text-wrapper">Cap</div></div>"#,
    );
    let before = editor.to_markup();
    let err = editor
        .run_chain(&Chain::new().delete_range(3, 9))
        .unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::Rejected);
    assert_eq!(editor.to_markup(), before);
}

#[test]
fn delete_range_removes_whole_widget_nodes() {
    let mut editor = editor(r#"<p>a</p><map-card data-id="c">x</map-card><p>b</p>"#);
    editor.run_chain(&Chain::new().delete_range(3, 6)).unwrap();
    assert_eq!(editor.to_markup(), "<p>a</p><p>b</p>");
}

#[test]
fn toggling_bold_twice_restores_the_document() {
    let mut editor = editor("<p>Hello world</p>");
    let original = editor.doc().clone();
    editor.set_selection(Selection::new(1, 6));

    assert!(!editor.is_active("bold"));
    editor.run_command("marks.toggle_bold", None).unwrap();
    assert!(editor.is_active("bold"));
    assert_eq!(editor.to_markup(), "<p><strong>Hello</strong> world</p>");

    editor.run_command("marks.toggle_bold", None).unwrap();
    assert!(!editor.is_active("bold"));
    assert_eq!(editor.doc(), &original);
}

#[test]
fn toggle_needs_a_selection() {
    let mut editor = editor("<p>Hello</p>");
    editor.set_selection(Selection::collapsed(3));
    assert!(!editor.can_run_command("marks.toggle_bold", None));
    let err = editor.run_command("marks.toggle_bold", None).unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::Rejected);
}

#[test]
fn failing_chain_leaves_no_partial_edit() {
    let mut editor = editor("<p>Hello</p>");
    editor.set_selection(Selection::collapsed(6));
    let before = editor.doc().clone();

    let chain = Chain::new().insert_text("!").delete_range(50, 60);
    assert!(!editor.can_run(&chain));
    assert!(editor.run_chain(&chain).is_err());
    assert_eq!(editor.doc(), &before);
    assert!(!editor.can_undo());
}

#[test]
fn chain_commits_as_one_undo_entry() {
    let mut editor = editor("<p>Hello world</p>");
    editor.set_selection(Selection::collapsed(6));

    let mut highlight = Attrs::new();
    highlight.insert("color".into(), json!("#ff0"));
    editor
        .run_chain(
            &Chain::new()
                .insert_text("!")
                .set_mark_range(1, 7, "highlight", highlight),
        )
        .unwrap();
    assert_eq!(
        editor.to_markup(),
        r##"<p><mark data-color="#ff0">Hello!</mark> world</p>"##
    );

    assert!(editor.undo());
    assert_eq!(editor.to_markup(), "<p>Hello world</p>");
    assert!(!editor.can_undo());
    assert!(editor.redo());
    assert!(editor.to_markup().contains("Hello!"));
}

#[test]
fn probing_does_not_commit() {
    let editor = editor("<p>Hello</p>");
    let revision = editor.revision();
    assert!(editor.can_run_command("block.set_heading", Some(json!({ "level": 2 }))));
    assert_eq!(editor.revision(), revision);
    assert_eq!(editor.to_markup(), "<p>Hello</p>");
    assert!(!editor.can_run_command("no.such_command", None));
}

#[test]
fn malformed_tree_is_rejected_when_not_strict() {
    let mut editor = lenient("<p>Hi</p>");
    let before = editor.doc().clone();

    let tx = Transaction::new(vec![Op::InsertNode {
        path: vec![0, 0],
        node: Node::paragraph("nested"),
    }]);
    assert!(matches!(editor.apply(tx), Err(ApplyError::Invariant(_))));
    assert_eq!(editor.doc(), &before);

    let nest = Command::new("nest_paragraph", |ctx| {
        Ok(Transaction::new(vec![Op::InsertNode {
            path: vec![0, 0],
            node: Node::paragraph("nested"),
        }])
        .selection_after(ctx.selection()))
    });
    let err = editor.run_chain(&Chain::new().push(nest)).unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::Invariant);
    assert_eq!(editor.doc(), &before);
}

#[test]
#[should_panic(expected = "invariant violation")]
fn malformed_tree_panics_when_strict() {
    let config = EditorConfig {
        strict_invariants: true,
        ..EditorConfig::default()
    };
    let mut editor = Editor::from_markup("<p>Hi</p>", PluginRegistry::map_editor(), config);
    let _ = editor.apply(Transaction::new(vec![Op::InsertNode {
        path: vec![0, 0],
        node: Node::paragraph("nested"),
    }]));
}

#[test]
fn insert_content_defaults_to_the_selection() {
    let mut editor = editor("<p>Hello world</p>");
    editor.set_selection(Selection::new(7, 12));
    editor
        .run_chain(&Chain::new().insert_content(vec![Node::text("maps")]))
        .unwrap();
    assert_eq!(editor.to_markup(), "<p>Hello maps</p>");
    assert_eq!(editor.selection(), &Selection::collapsed(11));
}

#[test]
fn replace_range_swaps_text() {
    let mut editor = editor("<p>Hello world</p>");
    editor
        .run_chain(&Chain::new().replace_range(1, 6, vec![Node::text("Howdy")]))
        .unwrap();
    assert_eq!(editor.to_markup(), "<p>Howdy world</p>");
}

#[test]
fn heading_commands_convert_blocks() {
    let mut editor = editor("<p>Hello</p>");
    editor.set_selection(Selection::collapsed(3));

    editor
        .run_command("block.set_heading", Some(json!({ "level": 2 })))
        .unwrap();
    assert_eq!(editor.to_markup(), "<h2>Hello</h2>");
    assert!(editor.is_active("heading"));

    editor
        .run_command("block.set_heading", Some(json!({ "level": 9 })))
        .unwrap();
    assert_eq!(editor.to_markup(), "<h6>Hello</h6>");

    editor.run_command("block.set_paragraph", None).unwrap();
    assert_eq!(editor.to_markup(), "<p>Hello</p>");
}

#[test]
fn map_block_commands_edit_the_enclosing_block() {
    let mut editor = editor("<p>Hello</p>");
    editor
        .run_command("map_block.insert", Some(json!({ "pos": 6 })))
        .unwrap();

    let kinds: Vec<&str> = editor.doc().children.iter().map(Node::kind).collect();
    assert_eq!(kinds, vec!["paragraph", "map_block"]);
    assert!(editor.is_active("map_block"));

    editor
        .run_command("map_block.set_align", Some(json!({ "align": "right" })))
        .unwrap();
    editor
        .run_command("map_block.set_width", Some(json!({ "width": 250 })))
        .unwrap();
    let block = editor.doc().children[1].as_element().unwrap();
    assert_eq!(block.attr("align"), Some(&json!("right")));
    assert_eq!(block.attr("width"), Some(&json!("100%")));

    editor
        .run_command("map_block.set_width", Some(json!({ "width": 42.4 })))
        .unwrap();
    let block = editor.doc().children[1].as_element().unwrap();
    assert_eq!(block.attr("width"), Some(&json!("42%")));

    let err = editor
        .run_command("map_block.set_align", Some(json!({ "align": "diagonal" })))
        .unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::Rejected);
}

#[test]
fn map_block_commands_need_the_cursor_inside_one() {
    let mut editor = editor("<p>Hello</p>");
    editor.set_selection(Selection::collapsed(2));
    assert!(!editor.can_run_command("map_block.set_align", Some(json!({ "align": "left" }))));
}

#[test]
fn set_block_type_leaves_widget_nodes_alone() {
    let mut editor = editor(r#"<map-card data-id="c">caption</map-card>"#);
    editor.set_selection(Selection::collapsed(3));
    editor
        .run_command("block.set_heading", Some(json!({ "level": 1 })))
        .unwrap();
    assert_eq!(editor.doc().children[0].kind(), "map_card");
}

#[test]
fn update_node_attrs_targets_by_id() {
    let mut editor = editor(r#"<map-card data-id="c">caption</map-card><p>x</p>"#);
    let patch = geo_plate_core::AttrPatch::set("toggleState", json!("option2"));
    editor
        .run_chain(&Chain::new().update_node_attrs("c", patch.clone()))
        .unwrap();
    assert_eq!(
        editor.doc().children[0].as_element().unwrap().attr("toggleState"),
        Some(&json!("option2"))
    );

    let err = editor
        .run_chain(&Chain::new().update_node_attrs("gone", patch))
        .unwrap_err();
    assert_eq!(err.kind(), CommandErrorKind::StaleReference);
}
