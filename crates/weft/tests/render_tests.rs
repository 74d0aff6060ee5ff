use std::{env, fs, path::PathBuf};

use pretty_assertions::assert_eq;
use weft::{CollectString, Dataset, Engine, ErrorKind, Value};

/// Compiles and renders `template` against a dataset built from text.
fn render_with(data_text: &str, template: &str) -> String {
    let mut data = Dataset::new();
    data.parse_text(data_text).unwrap();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, template).unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    out.into_output()
}

fn render_empty(template: &str) -> String {
    render_with("", template)
}

#[test]
fn literal_passthrough() {
    assert_eq!(render_empty("Hello, world"), "Hello, world");
}

#[test]
fn simple_substitution() {
    assert_eq!(
        render_with("name = Ada\n", "Hi <?cs var:name ?>!"),
        "Hi Ada!"
    );
}

#[test]
fn conditional() {
    let template = "<?cs if:count > 0 ?>yes<?cs else ?>no<?cs /if ?>";
    assert_eq!(render_with("count = 3\n", template), "yes");
    assert_eq!(render_with("count = 0\n", template), "no");
    assert_eq!(render_empty(template), "no");
}

#[test]
fn each_with_nested_var() {
    let data = "items {\n  0.k = a\n  1.k = b\n}\n";
    let template = "<?cs each:x = items ?>[<?cs var:x.k ?>]<?cs /each ?>";
    assert_eq!(render_with(data, template), "[a][b]");
}

#[test]
fn macro_definition_and_call() {
    let template = "<?cs def:greet(who) ?>Hi <?cs var:who ?><?cs /def ?><?cs call:greet(\"Ada\") ?>";
    assert_eq!(render_empty(template), "Hi Ada");
}

#[test]
fn loop_with_negative_step() {
    let template = "<?cs loop:i = 10, 2, -2 ?><?cs var:i ?> <?cs /loop ?>";
    assert_eq!(render_empty(template), "10 8 6 4 2 ");
}

#[test]
fn division_by_zero() {
    assert_eq!(render_empty("<?cs var: #5 / #0 ?>"), "2147483647");
    assert_eq!(render_empty("<?cs var: #5 % #0 ?>"), "0");
}

#[test]
fn identical_branches_equal_plain_expression() {
    let data = "x = payload\n";
    let branched = render_with(data, "<?cs if:x ?><?cs var:x ?><?cs else ?><?cs var:x ?><?cs /if ?>");
    let plain = render_with(data, "<?cs var:x ?>");
    assert_eq!(branched, plain);
}

#[test]
fn empty_string_concat_is_identity() {
    let data = "x = hello\n";
    assert_eq!(
        render_with(data, "<?cs var:\"\" + x ?>"),
        render_with(data, "<?cs var:x ?>")
    );
}

#[test]
fn each_matches_inline_with_renders() {
    let data = "p {\n  a.v = 1\n  b.v = 2\n  c.v = 3\n}\n";
    let each = render_with(data, "<?cs each:x = p ?><?cs var:x.v ?>;<?cs /each ?>");
    let withs = render_with(
        data,
        "<?cs with:x = p.a ?><?cs var:x.v ?>;<?cs /with ?>\
         <?cs with:x = p.b ?><?cs var:x.v ?>;<?cs /with ?>\
         <?cs with:x = p.c ?><?cs var:x.v ?>;<?cs /with ?>",
    );
    assert_eq!(each, withs);
}

#[test]
fn loop_counts_inclusive() {
    assert_eq!(
        render_empty("<?cs loop:v = 1,4,1 ?><?cs var:v ?>,<?cs /loop ?>"),
        "1,2,3,4,"
    );
    assert_eq!(render_empty("<?cs loop:v = 3 ?><?cs var:v ?>,<?cs /loop ?>"), "0,1,2,3,");
}

#[test]
fn loop_zero_step_and_wrong_direction_skip() {
    assert_eq!(render_empty("<?cs loop:v = 1,5,0 ?>x<?cs /loop ?>"), "");
    assert_eq!(render_empty("<?cs loop:v = 5,1,1 ?>x<?cs /loop ?>"), "");
    assert_eq!(render_empty("<?cs loop:v = 1,5,-1 ?>x<?cs /loop ?>"), "");
}

#[test]
fn elseif_chain() {
    let template = "<?cs if:a ?>A<?cs elif:b ?>B<?cs elseif:c ?>C<?cs else ?>D<?cs /if ?>";
    assert_eq!(render_with("a = 1\n", template), "A");
    assert_eq!(render_with("b = 1\n", template), "B");
    assert_eq!(render_with("c = 1\n", template), "C");
    assert_eq!(render_empty(template), "D");
}

#[test]
fn siblings_continue_after_closed_if() {
    let template = "<?cs if:a ?>A<?cs elif:b ?>B<?cs /if ?>!";
    assert_eq!(render_with("b = 1\n", template), "B!");
}

#[test]
fn nested_composites() {
    let data = "rows {\n  0.on = 1\n  1.on = 0\n}\n";
    let template = "<?cs each:r = rows ?><?cs if:r.on ?>+<?cs else ?>-<?cs /if ?><?cs /each ?>";
    assert_eq!(render_with(data, template), "+-");
}

#[test]
fn comments_are_discarded() {
    assert_eq!(render_empty("a<?cs # nothing to see ?>b"), "ab");
}

#[test]
fn name_directive_emits_terminal_name() {
    let data = "items {\n  first = 1\n  second = 2\n}\n";
    assert_eq!(
        render_with(data, "<?cs each:x = items ?><?cs name:x ?>,<?cs /each ?>"),
        "first,second,"
    );
    assert_eq!(render_with(data, "<?cs name:items.first ?>"), "first");
}

#[test]
fn alt_emits_value_or_alternate() {
    assert_eq!(
        render_with("word = hello\n", "<?cs alt:word ?>fallback<?cs /alt ?>"),
        "hello"
    );
    assert_eq!(render_empty("<?cs alt:word ?>fallback<?cs /alt ?>"), "fallback");
    // "0" coerces to integer zero, which is falsy
    assert_eq!(render_with("word = 0\n", "<?cs alt:word ?>fb<?cs /alt ?>"), "fb");
}

#[test]
fn set_writes_dataset() {
    assert_eq!(
        render_empty("<?cs set:x = \"v\" ?><?cs var:x ?>"),
        "v"
    );
    assert_eq!(render_empty("<?cs set:n = 3 + 4 ?><?cs var:n ?>"), "7");
    // the lvalue reduces to its terminal string even as a literal
    assert_eq!(
        render_empty("<?cs set:\"foo\" = \"bar\" ?><?cs var:foo ?>"),
        "bar"
    );
}

#[test]
fn set_through_each_binding_writes_the_subtree() {
    let data = "items {\n  0.k = a\n  1.k = b\n}\n";
    let template = "<?cs each:x = items ?><?cs set:x.k = \"z\" ?><?cs /each ?>\
                    <?cs var:items.0.k ?><?cs var:items.1.k ?>";
    assert_eq!(render_with(data, template), "zz");
}

#[test]
fn set_rewrites_later_reads() {
    let template = "<?cs var:x ?>,<?cs set:x = \"new\" ?><?cs var:x ?>";
    assert_eq!(render_with("x = old\n", template), "old,new");
}

#[test]
fn evar_expands_at_compile_time() {
    let data = "frag = (<?cs var:name ?>)\nname = Ada\n";
    assert_eq!(render_with(data, "pre <?cs evar:frag ?> post"), "pre (Ada) post");
}

#[test]
fn lvar_compiles_at_render_time() {
    let data = "frag = (<?cs var:name ?>)\nname = Ada\n";
    assert_eq!(render_with(data, "pre <?cs lvar:frag ?> post"), "pre (Ada) post");
}

#[test]
fn lvar_of_dynamic_expression() {
    let data = "a = <?cs var:b ?>\nb = deep\n";
    assert_eq!(render_with(data, "<?cs lvar:a ?>"), "deep");
}

#[test]
fn macro_sees_caller_subtree_through_var_argument() {
    let data = "items {\n  0.k = a\n}\n";
    let template =
        "<?cs def:show(it) ?><?cs var:it.k ?><?cs /def ?><?cs call:show(items.0) ?>";
    assert_eq!(render_with(data, template), "a");
}

#[test]
fn macro_frame_replaces_caller_locals() {
    let data = "items {\n  0.k = a\n  1.k = b\n}\n";
    // `x` is bound by the surrounding each, but the macro frame replaces
    // the caller's locals, so `x.k` inside the body resolves to nothing
    let template = "<?cs def:m(y) ?>[<?cs var:x.k ?>]<?cs /def ?>\
                    <?cs each:x = items ?><?cs call:m(\"q\") ?><?cs /each ?>";
    assert_eq!(render_with(data, template), "[][]");
}

#[test]
fn zero_argument_macro_keeps_caller_locals() {
    let data = "items {\n  0.k = a\n  1.k = b\n}\n";
    let template = "<?cs def:m() ?>[<?cs var:x.k ?>]<?cs /def ?>\
                    <?cs each:x = items ?><?cs call:m() ?><?cs /each ?>";
    assert_eq!(render_with(data, template), "[a][b]");
}

#[test]
fn macro_forwards_loop_counter_by_value() {
    let template = "<?cs def:cell(n) ?><<?cs var:n ?>><?cs /def ?>\
                    <?cs loop:i = 1,3 ?><?cs call:cell(i) ?><?cs /loop ?>";
    assert_eq!(render_empty(template), "<1><2><3>");
}

#[test]
fn builtin_len_and_name() {
    let data = "items {\n  0 = a\n  1 = b\n  2 = c\n}\n";
    assert_eq!(render_with(data, "<?cs var:len(items) ?>"), "3");
    assert_eq!(render_with(data, "<?cs var:len(\"four\") ?>"), "4");
    assert_eq!(render_with(data, "<?cs var:name(items.1) ?>"), "1");
}

#[test]
fn registered_strfunc() {
    let mut data = Dataset::new();
    data.set_value("name", "Ada").unwrap();
    let mut engine = Engine::new(&data);
    engine
        .register_strfunc("upper", Box::new(|s| Ok(s.to_uppercase())))
        .unwrap();
    engine
        .parse_string(&data, "<?cs var:upper(name) ?> <?cs var:upper(\"lit\") ?>")
        .unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "ADA LIT");
}

#[test]
fn registered_native_function() {
    let mut data = Dataset::new();
    let mut engine = Engine::new(&Dataset::new());
    engine
        .register_function(
            "double",
            1,
            Box::new(|resolver, value| {
                let n = match &value {
                    Value::Num(n) => *n,
                    Value::Var(name) | Value::VarNum(name) => resolver
                        .value_of(name)
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    Value::Str(s) => s.parse().unwrap_or(0),
                };
                Ok(Value::Num(n * 2))
            }),
        )
        .unwrap();
    data.set_value("n", "21").unwrap();
    engine.parse_string(&data, "<?cs var:double(n) ?>").unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "42");
}

#[test]
fn duplicate_function_registration_is_rejected() {
    let data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine.register_strfunc("f", Box::new(|s| Ok(s.to_owned()))).unwrap();
    let err = engine
        .register_strfunc("f", Box::new(|s| Ok(s.to_owned())))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    // the builtins are already taken too
    let err = engine.register_strfunc("len", Box::new(|s| Ok(s.to_owned()))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Duplicate);
}

#[test]
fn function_arity_is_restricted() {
    let data = Dataset::new();
    let mut engine = Engine::new(&data);
    let err = engine
        .register_function("two", 2, Box::new(|_, v| Ok(v)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Assert);
}

#[test]
fn configurable_tag() {
    let data_text = "Config.TagStart = tpl\nname = Ada\n";
    // the default tag is plain text under a different tag identifier
    assert_eq!(
        render_with(data_text, "<?tpl var:name ?>/<?TPL var:name ?>"),
        "Ada/Ada"
    );
}

#[test]
fn required_var_errors_on_missing() {
    let mut data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "<?cs var!gone ?>").unwrap();
    let mut out = CollectString::new();
    let err = engine.render(&mut data, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // without the flag the miss is silent
    assert_eq!(render_empty("<?cs var:gone ?>"), "");
}

#[test]
fn required_name_errors_on_missing() {
    let mut data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "<?cs name!gone ?>").unwrap();
    let mut out = CollectString::new();
    let err = engine.render(&mut data, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn render_is_idempotent_without_set() {
    let mut data = Dataset::new();
    data.parse_text("items {\n  0.k = a\n  1.k = b\n}\ncount = 2\n").unwrap();
    let mut engine = Engine::new(&data);
    engine
        .parse_string(
            &data,
            "<?cs each:x = items ?><?cs var:x.k ?><?cs /each ?>-<?cs if:count ?>y<?cs /if ?>",
        )
        .unwrap();
    let mut first = CollectString::new();
    engine.render(&mut data, &mut first).unwrap();
    let mut second = CollectString::new();
    engine.render(&mut data, &mut second).unwrap();
    assert_eq!(first.output(), second.output());
}

#[test]
fn repeated_parse_string_appends() {
    let mut data = Dataset::new();
    data.set_value("name", "Ada").unwrap();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "Hello ").unwrap();
    engine.parse_string(&data, "<?cs var:name ?>").unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "Hello Ada");
}

#[test]
fn dump_shows_tree_shape() {
    let data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine
        .parse_string(&data, "A<?cs if:x > 1 ?>B<?cs else ?>C<?cs /if ?>")
        .unwrap();
    let mut out = CollectString::new();
    engine.dump(&mut out).unwrap();
    let dump = out.into_output();
    assert!(dump.contains("literal"), "dump was: {dump}");
    assert!(dump.contains("if x > 1"), "dump was: {dump}");
    assert!(dump.contains("Case 0"), "dump was: {dump}");
    assert!(dump.contains("Case 1"), "dump was: {dump}");
}

// --- file-based directives ---------------------------------------------

struct TempDir(PathBuf);

impl TempDir {
    fn new(label: &str) -> Self {
        let dir = env::temp_dir().join(format!("weft-{label}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn write(&self, name: &str, contents: &str) -> String {
        let path = self.0.join(name);
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

#[test]
fn include_splices_file_at_compile_time() {
    let dir = TempDir::new("include");
    let path = dir.write("part.cst", "[<?cs var:name ?>]");
    let mut data = Dataset::new();
    data.set_value("name", "Ada").unwrap();
    let mut engine = Engine::new(&data);
    engine
        .parse_string(&data, &format!("pre <?cs include:\"{path}\" ?> post"))
        .unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "pre [Ada] post");
}

#[test]
fn include_via_dataset_variable_and_loadpaths() {
    let dir = TempDir::new("loadpath");
    dir.write("part.cst", "ok");
    let mut data = Dataset::new();
    data.set_value("hdf.loadpaths.0", dir.0.to_string_lossy().as_ref())
        .unwrap();
    data.set_value("part", "part.cst").unwrap();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "<?cs include:part ?>").unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "ok");
}

#[test]
fn missing_include_is_silent_unless_required() {
    let data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine
        .parse_string(&data, "a<?cs include:\"no-such-file.cst\" ?>b")
        .unwrap();
    let mut mutable = Dataset::new();
    let mut out = CollectString::new();
    engine.render(&mut mutable, &mut out).unwrap();
    assert_eq!(out.output(), "ab");

    let mut engine = Engine::new(&data);
    let err = engine
        .parse_string(&data, "<?cs include!\"no-such-file.cst\" ?>")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn linclude_compiles_at_render_time() {
    let dir = TempDir::new("linclude");
    let path = dir.write("late.cst", "(<?cs var:name ?>)");
    let mut data = Dataset::new();
    data.set_value("name", "Ada").unwrap();
    data.set_value("late", &*path).unwrap();
    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "<?cs linclude:late ?>").unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "(Ada)");
}

#[test]
fn missing_linclude_is_silent_unless_required() {
    let mut data = Dataset::new();
    data.set_value("late", "no-such-file.cst").unwrap();
    let mut engine = Engine::new(&data);
    engine
        .parse_string(&data, "a<?cs linclude:late ?>b")
        .unwrap();
    let mut out = CollectString::new();
    engine.render(&mut data, &mut out).unwrap();
    assert_eq!(out.output(), "ab");

    let mut engine = Engine::new(&data);
    engine.parse_string(&data, "<?cs linclude!late ?>").unwrap();
    let mut out = CollectString::new();
    let err = engine.render(&mut data, &mut out).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn nested_includes() {
    let dir = TempDir::new("nested");
    let inner = dir.write("inner.cst", "core");
    let outer = dir.write("outer.cst", &format!("<<?cs include:\"{inner}\" ?>>"));
    let data = Dataset::new();
    let mut engine = Engine::new(&data);
    engine.parse_file(&data, &outer).unwrap();
    let mut mutable = Dataset::new();
    let mut out = CollectString::new();
    engine.render(&mut mutable, &mut out).unwrap();
    assert_eq!(out.output(), "<core>");
}
