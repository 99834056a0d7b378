//! End-to-end template rendering tests: full pipeline from template text
//! and JSON input to rendered output.

use stencil_core::json;
use stencil_core::value::Value;
use stencil_engine::{Template, render};

fn rendered(template: &str, data: &str) -> String {
    let value = json::parse(data);
    assert!(
        !value.is_undefined() || data.trim().is_empty(),
        "bad test data: {data}"
    );
    render(template, &value)
}

#[test]
fn test_variable_substitution_escapes_html() {
    assert_eq!(
        rendered("hello {var:name}", r#"{"name": "<w>"}"#),
        "hello &lt;w&gt;"
    );
}

#[test]
fn test_raw_variable_does_not_escape() {
    assert_eq!(
        rendered("hello {raw:name}", r#"{"name": "<w>"}"#),
        "hello <w>"
    );
}

#[test]
fn test_math_precedence() {
    assert_eq!(rendered("{math: 2 + 3 * 4}", "{}"), "14");
}

#[test]
fn test_math_compound_expression() {
    assert_eq!(
        rendered("{math: (5+3*(1+2)/2^2 == 7.25) || (3==((8-2)/2))}", "{}"),
        "1"
    );
}

#[test]
fn test_if_block_with_variable_condition() {
    assert_eq!(
        rendered(r#"<if case="{var:n} > 1">many</if>"#, r#"{"n": 2}"#),
        "many"
    );
    assert_eq!(
        rendered(r#"<if case="{var:n} > 1">many</if>"#, r#"{"n": 1}"#),
        ""
    );
}

#[test]
fn test_loop_with_descending_sort() {
    assert_eq!(
        rendered(
            r#"<loop set="xs" value="x" sort="descend">{var:x},</loop>"#,
            r#"{"xs": [1, 3, 2]}"#
        ),
        "3,2,1,"
    );
}

#[test]
fn test_loop_with_ascending_sort() {
    assert_eq!(
        rendered(
            r#"<loop set="xs" value="x" sort="ascend">{var:x},</loop>"#,
            r#"{"xs": [1, 3, 2]}"#
        ),
        "1,2,3,"
    );
}

#[test]
fn test_super_variable_placeholders() {
    assert_eq!(
        rendered(
            "{svar:fmt,{var:a},{var:b}}",
            r#"{"fmt": "{0}+{1}", "a": 1, "b": 2}"#
        ),
        "1+2"
    );
}

#[test]
fn test_super_variable_repeated_and_reordered() {
    assert_eq!(
        rendered(
            "{svar:fmt,{var:a},{var:b}}",
            r#"{"fmt": "{1} then {0} then {1}", "a": "x", "b": "y"}"#
        ),
        "y then x then y"
    );
}

#[test]
fn test_super_variable_missing_format_emits_literal() {
    assert_eq!(
        rendered("{svar:fmt,{var:a}}", r#"{"a": 1}"#),
        "{svar:fmt,{var:a}}"
    );
}

#[test]
fn test_empty_template() {
    assert_eq!(rendered("", "{}"), "");
}

#[test]
fn test_literal_only_template() {
    assert_eq!(rendered("no tags at all", "{}"), "no tags at all");
}

#[test]
fn test_malformed_math_emits_literal() {
    assert_eq!(rendered("{math: 1 + }", "{}"), "{math: 1 + }");
    assert_eq!(rendered("{math:}", "{}"), "{math:}");
    assert_eq!(rendered("{math: 1e400}", "{}"), "{math: 1e400}");
}

#[test]
fn test_division_by_zero_emits_literal() {
    assert_eq!(rendered("{math: 1 / 0}", "{}"), "{math: 1 / 0}");
}

#[test]
fn test_unknown_variable_emits_literal() {
    assert_eq!(rendered("x {var:nope} y", "{}"), "x {var:nope} y");
    assert_eq!(rendered("{raw:nope}", "{}"), "{raw:nope}");
}

#[test]
fn test_loop_over_null_or_missing_set_renders_nothing() {
    assert_eq!(
        rendered(r#"<loop set="n" value="v">{var:v}</loop>"#, r#"{"n": null}"#),
        ""
    );
    assert_eq!(
        rendered(r#"<loop set="gone" value="v">{var:v}</loop>"#, "{}"),
        ""
    );
}

#[test]
fn test_loop_paths_into_items() {
    assert_eq!(
        rendered(
            r#"<loop set="items" value="item">{var:item[name]}={var:item[n]};</loop>"#,
            r#"{"items": [{"name": "a", "n": 1}, {"name": "b", "n": 2}]}"#
        ),
        "a=1;b=2;"
    );
}

#[test]
fn test_nested_loops() {
    assert_eq!(
        rendered(
            concat!(
                r#"<loop set="rows" value="row">"#,
                r#"<loop set="row" value="cell">{var:cell}.</loop>|"#,
                r#"</loop>"#
            ),
            r#"{"rows": [[1, 2], [3]]}"#
        ),
        "1.2.|3.|"
    );
}

#[test]
fn test_loop_over_object_uses_entries() {
    assert_eq!(
        rendered(
            r#"<loop set="obj" value="v">{var:v},</loop>"#,
            r#"{"obj": {"a": 1, "b": 2}}"#
        ),
        "1,2,"
    );
}

#[test]
fn test_loop_key_fallback_for_container_items() {
    // The item is an object, so the value itself cannot be textualized;
    // the loop key steps in.
    assert_eq!(
        rendered(
            r#"<loop set="obj" value="v">{var:v};</loop>"#,
            r#"{"obj": {"x": {"a": 1}, "y": {"b": 2}}}"#
        ),
        "x;y;"
    );
}

#[test]
fn test_loop_group_by() {
    assert_eq!(
        rendered(
            r#"<loop set="rows" group="year" value="y">{var:y}:<loop set="y" value="r">{var:r[name]},</loop> </loop>"#,
            r#"{"rows": [
                {"year": "2019", "name": "a"},
                {"year": "2020", "name": "b"},
                {"year": "2019", "name": "c"}
            ]}"#
        ),
        "2019:a,c, 2020:b, "
    );
}

#[test]
fn test_loop_without_set_iterates_root() {
    let value = json::parse("[10, 20]");
    assert_eq!(
        render(r#"<loop value="v">{var:v};</loop>"#, &value),
        "10;20;"
    );
}

#[test]
fn test_inline_if_branches() {
    let template = r#"{if case="{var:n} > 1" true="many" false="one"}"#;
    assert_eq!(rendered(template, r#"{"n": 5}"#), "many");
    assert_eq!(rendered(template, r#"{"n": 0}"#), "one");
}

#[test]
fn test_inline_if_single_quotes() {
    assert_eq!(
        rendered(r#"{if case='1 == 1' true='y' false='n'}"#, "{}"),
        "y"
    );
}

#[test]
fn test_inline_if_with_tags_in_branches() {
    let template = r#"{if case="{var:ok}" true="{var:a}!" false="{var:b}?"}"#;
    assert_eq!(rendered(template, r#"{"ok": 1, "a": "A", "b": "B"}"#), "A!");
    assert_eq!(rendered(template, r#"{"ok": 0, "a": "A", "b": "B"}"#), "B?");
}

#[test]
fn test_inline_if_branch_containing_brace() {
    assert_eq!(
        rendered(r#"{if case="1" true="a}b" false="c"}"#, "{}"),
        "a}b"
    );
}

#[test]
fn test_inline_if_string_condition() {
    let template = r#"{if case="{var:s}" true="set" false="empty"}"#;
    assert_eq!(rendered(template, r#"{"s": "text"}"#), "set");
    assert_eq!(rendered(template, r#"{"s": ""}"#), "empty");
}

#[test]
fn test_if_else_chain() {
    let template = concat!(
        r#"<if case="{var:n} == 1">one"#,
        r#"<else if case="{var:n} == 2">two"#,
        r#"<else>many</if>"#
    );

    assert_eq!(rendered(template, r#"{"n": 1}"#), "one");
    assert_eq!(rendered(template, r#"{"n": 2}"#), "two");
    assert_eq!(rendered(template, r#"{"n": 9}"#), "many");
}

#[test]
fn test_if_failed_condition_is_false() {
    assert_eq!(
        rendered(r#"<if case="{var:gone} > 1">body</if>"#, "{}"),
        ""
    );
}

#[test]
fn test_numbers_render_canonically() {
    assert_eq!(
        rendered(
            "{var:u} {var:i} {var:r} {var:t} {var:f} {var:z}",
            r#"{"u": 7, "i": -7, "r": 0.5, "t": true, "f": false, "z": null}"#
        ),
        "7 -7 0.5 true false null"
    );
}

#[test]
fn test_literal_text_between_tags_is_preserved() {
    assert_eq!(
        rendered(
            "a {var:x} b {math:1+1} c",
            r#"{"x": "X"}"#
        ),
        "a X b 2 c"
    );
}

#[test]
fn test_rendering_is_deterministic() {
    let template = Template::compile(
        r#"<loop set="xs" value="x">{var:x}{if case="{var:x} > 1" true="!" false="."}</loop>"#,
    );
    let value = json::parse(r#"{"xs": [1, 2, 3]}"#);

    let first = template.render(&value);
    let second = template.render(&value);
    assert_eq!(first, second);
    assert_eq!(first, "1.2!3!");
}

#[test]
fn test_compile_once_render_many() {
    let template = Template::compile("hi {var:name}");

    let alpha = json::parse(r#"{"name": "alpha"}"#);
    let beta = json::parse(r#"{"name": "beta"}"#);

    assert_eq!(template.render(&alpha), "hi alpha");
    assert_eq!(template.render(&beta), "hi beta");
    assert_eq!(template.render(&Value::Undefined), "hi {var:name}");
}

#[test]
fn test_bracket_paths() {
    assert_eq!(
        rendered(
            "{var:a[b][0]} {var:xs[1]} {var:0[k]}",
            r#"[{"k": "v"}]"#
        ),
        "{var:a[b][0]} {var:xs[1]} v"
    );

    assert_eq!(
        rendered(
            "{var:a[b][1][c]}",
            r#"{"a": {"b": [0, {"c": "deep"}]}}"#
        ),
        "deep"
    );
}

#[test]
fn test_unterminated_constructs_drop_but_later_tags_survive() {
    assert_eq!(
        rendered(r#"<if case="1">lost {var:x}"#, r#"{"x": "X"}"#),
        ""
    );

    // A malformed tag before a good one does not poison it.
    assert_eq!(rendered("{var:} {var:x}", r#"{"x": "X"}"#), "{var:} X");
}

#[test]
fn test_comment_stripped_json_feeds_templates() {
    let mut data = String::from(
        "{\n  \"name\": \"w\" // the name\n, \"n\": 2 /* count */\n}",
    );
    stencil_core::json::strip_comments(&mut data);
    let value = json::parse(&data);

    assert_eq!(render("{var:name}{math: {var:n} * 2}", &value), "w4");
}
