use geo_plate_core::{AttrCodec, MAP_CARD, Node, PluginRegistry, VIEW_STATE_ATTR, VIEW_STATE_MARK, ViewState};
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case("")]
#[case("{")]
#[case("not json")]
#[case("[1,2,3]")]
#[case("null")]
#[case(r#"{"latitude":1}"#)]
#[case(r#"{"longitude":"east","latitude":1}"#)]
#[case(r#"{"longitude":1,"latitude":2,"zoom":"far"}"#)]
fn malformed_view_state_decodes_to_the_default(#[case] raw: &str) {
    assert_eq!(AttrCodec::ViewState.decode(raw), None);

    let registry = PluginRegistry::map_editor();
    let markup = format!("<map-card data-id='c' data-view-state='{raw}'>x</map-card>");
    let doc = registry.schema().parse_markup(&markup);
    let card = doc.children[0].as_element().unwrap();
    assert_eq!(card.kind, MAP_CARD);
    assert_eq!(
        card.attr(VIEW_STATE_ATTR),
        Some(&ViewState::default().to_value())
    );
}

#[test]
fn malformed_mark_payload_keeps_the_mark_with_default_viewport() {
    let registry = PluginRegistry::map_editor();
    let doc = registry
        .schema()
        .parse_markup(r#"<p><span data-view-state="{oops">linked</span></p>"#);
    let Node::Text(leaf) = &doc.children[0].as_element().unwrap().children[0] else {
        panic!("expected a text leaf");
    };
    let attrs = leaf.marks.get(VIEW_STATE_MARK).unwrap();
    assert_eq!(
        attrs.get(VIEW_STATE_ATTR),
        Some(&ViewState::default().to_value())
    );
}

#[test]
fn legacy_attribute_name_is_accepted() {
    let registry = PluginRegistry::map_editor();
    let doc = registry
        .schema()
        .parse_markup(r#"<p><span data-viewstate='{"longitude":5,"latitude":6}'>old</span></p>"#);
    let Node::Text(leaf) = &doc.children[0].as_element().unwrap().children[0] else {
        panic!("expected a text leaf");
    };
    let attrs = leaf.marks.get(VIEW_STATE_MARK).unwrap();
    let state = ViewState::from_value(attrs.get(VIEW_STATE_ATTR).unwrap()).unwrap();
    assert_eq!(state, ViewState::new(5.0, 6.0, 2.0));
}

#[rstest]
#[case(serde_json::json!({ "longitude": -118.2437, "latitude": 34.0522, "zoom": 12 }))]
#[case(serde_json::json!({ "longitude": 0, "latitude": 0, "zoom": 1, "pitch": 45, "bearing": -17.5 }))]
#[case(serde_json::json!({ "longitude": 10.5, "latitude": -3.25, "zoom": 3, "padding": { "top": 4 } }))]
fn encoded_view_state_decodes_to_the_same_structure(#[case] value: serde_json::Value) {
    let decoded = AttrCodec::ViewState.canonicalize(&value).unwrap();
    let encoded = AttrCodec::ViewState.encode(&decoded).unwrap();
    assert_eq!(AttrCodec::ViewState.decode(&encoded), Some(decoded));
}
