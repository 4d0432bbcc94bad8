use lute_parser::dump::{dump_all, dump_block};
use lute_parser::SymbolTable;

fn parse_ok(src: &str) -> SymbolTable {
    let mut st = SymbolTable::new();
    lute_parser::parse(src, "test.lute", &mut st).unwrap_or_else(|e| panic!("parse failed: {e}"));
    st
}

fn body_dump(st: &SymbolTable, fname: &str) -> String {
    let f = st
        .functions
        .iter()
        .find(|f| f.name == fname)
        .unwrap_or_else(|| panic!("no function named {fname}"));
    let body = st.subfunctions[f.overloads[0].0 as usize]
        .body
        .as_ref()
        .expect("body");
    dump_block(st, body, 4)
}

#[test]
fn dump_all_lists_signatures() {
    let st = parse_ok("fun add(x:int, y:int) -> int:\n    return x + y\nprint(1)");
    let dump = dump_all(&st, false);
    assert!(dump.contains("FUNCTION: add(x:int y:int ) -> int"), "got:\n{dump}");
    assert!(dump.contains("return (x + y)"));
    assert!(dump.contains("FUNCTION: __top_level_expression("));
}

#[test]
fn only_typechecked_filters_to_function_types() {
    let st = parse_ok("fun add(x:int, y:int) -> int:\n    return x + y\nfun ft(x:int) -> int\nprint(1)");
    let dump = dump_all(&st, true);
    assert!(dump.contains("FUNCTION: ft("));
    assert!(!dump.contains("FUNCTION: add("));
}

#[test]
fn simple_function_round_trips_through_its_dump() {
    let st1 = parse_ok("fun add(x:int, y:int) -> int:\n    return x + y\nprint(1)");
    let body1 = body_dump(&st1, "add");
    let src2 = format!("fun add(x:int, y:int) -> int:\n{body1}print(1)\n");
    let st2 = parse_ok(&src2);
    let body2 = body_dump(&st2, "add");
    assert_eq!(body1, body2);
}

#[test]
fn control_flow_round_trips_through_its_dump() {
    let src = "fun pick(a:int, b:int) -> int:\n    if a < b:\n        return a\n    else:\n        return b\nprint(1)";
    let st1 = parse_ok(src);
    let body1 = body_dump(&st1, "pick");
    let src2 = format!("fun pick(a:int, b:int) -> int:\n{body1}print(1)\n");
    let st2 = parse_ok(&src2);
    let body2 = body_dump(&st2, "pick");
    assert_eq!(body1, body2);
}

#[test]
fn dumped_expressions_are_fully_parenthesized() {
    let st = parse_ok("fun m(a:int, b:int, c:int) -> int:\n    return a + b * c\nprint(1)");
    let body = body_dump(&st, "m");
    assert_eq!(body, "    return (a + (b * c))\n");
}
