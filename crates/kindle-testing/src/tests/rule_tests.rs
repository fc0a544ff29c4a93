use super::*;
use kindle_core::{constant, undefined, MutableCell, ProgramBuilder, RecordReference, Value};

fn greeting() -> Program {
    let mut builder = ProgramBuilder::new();
    builder
        .open_element("h1")
        .flush_element()
        .self_path(&["name"])
        .append_text()
        .close_element();
    builder.build()
}

#[test]
fn revalidate_without_content_is_a_no_op() {
    run_test_render(|rule| {
        assert!(!rule.has_content());
        assert_eq!(rule.revalidate().unwrap(), RevalidationReport::default());
        assert_eq!(rule.dump_updates(), "");
        rule.destroy().unwrap();
    });
}

#[test]
fn set_content_renders_and_tracks_updates() {
    let name = MutableCell::new(Value::from("Ada"));
    let self_ref = RecordReference::new()
        .field("name", name.reference())
        .into_ref();

    let mut rule = RenderTestRule::new();
    rule.set_content(greeting(), self_ref).unwrap();
    assert_eq!(rule.html(), "<h1>Ada</h1>");
    assert_eq!(rule.dump_updates(), "#1 UpdateText node=2\n");
    assert_eq!(rule.dump_tree(), "[0] <root>\n  [1] <h1>\n    [2] \"Ada\"\n");

    name.set(Value::from("Grace")).unwrap();
    assert_eq!(rule.revalidate().unwrap().evaluated, 1);
    assert_eq!(rule.html(), "<h1>Grace</h1>");
}

#[test]
fn replacing_content_destroys_the_previous_region() {
    let mut rule = RenderTestRule::new();
    let self_ref = RecordReference::new()
        .field("name", constant("first"))
        .into_ref();
    rule.set_content(greeting(), self_ref).unwrap();

    let mut builder = ProgramBuilder::new();
    builder.text("second");
    rule.set_content(builder.build(), undefined()).unwrap();
    assert_eq!(rule.html(), "second");
    assert_eq!(rule.host().len(), 2);

    rule.rerender().unwrap();
    assert_eq!(rule.html(), "second");

    rule.destroy().unwrap();
    assert!(rule.result().is_none());
    assert!(rule.has_content());
    assert_eq!(rule.html(), "");
}
