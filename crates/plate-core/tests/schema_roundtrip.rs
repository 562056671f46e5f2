use anyhow::Context as _;
use geo_plate_core::{
    Editor, EditorConfig, MAP_BLOCK, Node, PluginRegistry, VIEW_STATE_ATTR, ViewState,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const SEED: &str = r#"
<p>Select this <span data-view-state='{"longitude":-73.9857,"latitude":40.7484,"zoom":14}'>text</span> to link the map.</p>
<customNode><p>Drag me around</p></customNode>
<div data-type="mapBlock" data-align="left"><div class="map-wrapper"></div><div class="text-wrapper">Caption</div></div>
"#;

fn load(markup: &str) -> Editor {
    Editor::from_markup(markup, PluginRegistry::map_editor(), EditorConfig::default())
}

#[test]
fn seed_loads_paragraph_card_and_map_block() {
    let editor = load(SEED);
    let doc = editor.doc();

    let kinds: Vec<&str> = doc.children.iter().map(Node::kind).collect();
    assert_eq!(kinds, vec!["paragraph", "map_card", "map_block"]);
    assert_eq!(
        doc.text_between(0, doc.content_size(), "\n"),
        "Select this text to link the map.\nDrag me around\nCaption"
    );

    let card = doc.children[1].as_element().unwrap();
    assert_eq!(card.attr("toggleState"), Some(&json!("option1")));
    assert!(
        card.attr("id")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty())
    );

    let block = doc.children[2].as_element().unwrap();
    assert_eq!(block.attr("align"), Some(&json!("left")));
    assert_eq!(block.attr("width"), Some(&json!("100%")));
    assert_eq!(
        block.attr(VIEW_STATE_ATTR),
        Some(&ViewState::default().to_value())
    );
}

#[test]
fn view_state_mark_survives_render_and_reload() {
    let editor = load(SEED);
    // Inside "text", which starts after "Select this " at position 13.
    let linked = editor.view_state_at(14).unwrap();
    assert_eq!(linked.longitude, -73.9857);
    assert_eq!(linked.latitude, 40.7484);
    assert_eq!(linked.zoom, 14.0);
    assert_eq!(editor.view_state_at(3), None);

    let reloaded = load(&editor.to_markup());
    assert_eq!(reloaded.view_state_at(14), Some(linked));
    assert_eq!(reloaded.doc(), editor.doc());
}

#[test]
fn map_block_attributes_round_trip_canonically() -> anyhow::Result<()> {
    let registry = PluginRegistry::map_editor();
    let schema = registry.schema();
    let mut attrs = geo_plate_core::Attrs::new();
    attrs.insert("id".into(), json!("m1"));
    attrs.insert("src".into(), json!("tiles/harbor.png"));
    attrs.insert("width".into(), json!("50%"));
    attrs.insert("align".into(), json!("right"));
    attrs.insert("alt".into(), json!("Harbor"));
    attrs.insert(
        VIEW_STATE_ATTR.into(),
        json!({ "longitude": -118.2437, "latitude": 34.0522, "zoom": 12 }),
    );
    let node = schema.create_node(MAP_BLOCK, attrs.clone(), vec![Node::text("Port")]);
    let doc = geo_plate_core::Document {
        children: vec![node],
    };

    let reparsed = schema.parse_markup(&schema.render_markup(&doc));
    let spec = schema.node(MAP_BLOCK).context("map_block is registered")?;
    let el = reparsed.children[0]
        .as_element()
        .context("map block parses as an element")?;
    assert_eq!(el.kind, MAP_BLOCK);
    assert_eq!(
        schema.canonical_attrs(&spec.attrs, &el.attrs),
        schema.canonical_attrs(&spec.attrs, &attrs)
    );
    assert_eq!(el.text_content(), "Port");
    Ok(())
}

#[test]
fn unknown_elements_degrade_to_paragraphs() {
    let registry = PluginRegistry::map_editor();
    let doc = registry
        .schema()
        .parse_markup("<p>a</p><marquee>hi <b>there</b></marquee>");
    assert_eq!(doc.children, vec![Node::paragraph("a"), Node::paragraph("hi there")]);
}

#[test]
fn html_void_tags_and_entities_keep_blocks_and_payloads() {
    let editor = load(
        r#"<p>Hello<br>world</p><p><span data-view-state='{"longitude":1,"latitude":2,"zoom":3}'>LA</span></p>"#,
    );
    let doc = editor.doc();
    assert_eq!(doc.children.len(), 2);
    assert_eq!(doc.children[0], Node::paragraph("Hello world"));
    // "LA" starts at 14, after the 13-unit first paragraph and the open tag.
    assert_eq!(editor.view_state_at(15), Some(ViewState::new(1.0, 2.0, 3.0)));
    assert!(!editor.to_markup().contains("&lt;"));

    let editor = load("<p>Hello&nbsp;there</p><p><strong>bold</strong></p>");
    assert_eq!(editor.doc().children[0], Node::paragraph("Hello\u{a0}there"));
    assert_eq!(
        editor.to_markup(),
        "<p>Hello\u{a0}there</p><p><strong>bold</strong></p>"
    );
}

#[test]
fn legacy_image_block_with_an_img_child_loads_as_a_map_block() {
    let editor = load(
        r#"<div data-type="imageBlock" data-align="right"><img src="x.png"><div class="text-wrapper">cap</div></div>"#,
    );
    let block = editor.doc().children[0].as_element().unwrap();
    assert_eq!(block.kind, MAP_BLOCK);
    assert_eq!(block.attr("align"), Some(&json!("right")));
    assert_eq!(block.text_content(), "cap");
}

#[test]
fn unclosed_markup_is_repaired_not_kept_as_source() {
    let registry = PluginRegistry::map_editor();
    let doc = registry.schema().parse_markup("<p>unclosed <em>tail");
    assert_eq!(doc.children.len(), 1);
    let para = doc.children[0].as_element().unwrap();
    assert_eq!(para.kind, "paragraph");
    assert_eq!(para.text_content(), "unclosed tail");

    let editor = load("<p>unclosed");
    assert_eq!(editor.to_markup(), "<p>unclosed</p>");
}

#[test]
fn headings_and_nested_marks_render_back() {
    let editor = load(r#"<h3>Title</h3><p><strong><em data-value="3">x</em></strong> y</p>"#);
    assert_eq!(
        editor.doc().children[0].as_element().unwrap().attr("level"),
        Some(&json!(3))
    );
    assert_eq!(
        editor.to_markup(),
        r#"<h3>Title</h3><p><strong><em data-value="3">x</em></strong> y</p>"#
    );
}

#[test]
fn empty_seed_becomes_one_empty_paragraph() {
    let editor = load("");
    assert_eq!(editor.doc().children, vec![Node::paragraph("")]);
    assert_eq!(editor.to_markup(), "<p></p>");
}
