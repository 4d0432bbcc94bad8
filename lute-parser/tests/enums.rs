use lute_parser::ast::{Node, NodeKind};
use lute_parser::{ParseError, ParseOutput, SymbolTable};

fn parse_ok(src: &str) -> (ParseOutput, SymbolTable) {
    let mut st = SymbolTable::new();
    let out = lute_parser::parse(src, "test.lute", &mut st)
        .unwrap_or_else(|e| panic!("parse failed: {e}"));
    (out, st)
}

fn parse_err(src: &str) -> ParseError {
    let mut st = SymbolTable::new();
    match lute_parser::parse(src, "test.lute", &mut st) {
        Ok(_) => panic!("expected a parse error"),
        Err(e) => e,
    }
}

fn top_stmts(out: &ParseOutput, st: &SymbolTable) -> Vec<Node> {
    let NodeKind::Call { sf, .. } = &out.root.kind else {
        panic!("root is not a call of the top-level function");
    };
    st.subfunctions[sf.0 as usize]
        .body
        .as_ref()
        .expect("top-level body")
        .children
        .clone()
}

fn enum_values(st: &SymbolTable, name: &str) -> Vec<(String, i64)> {
    let e = st
        .enums
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("no enum named {name}"));
    e.vals
        .iter()
        .map(|&ev| {
            let v = &st.enumvals[ev.0 as usize];
            (v.name.clone(), v.val)
        })
        .collect()
}

#[test]
fn incremental_enum_counts_from_zero() {
    let (_, st) = parse_ok("enum E:\n    ea\n    eb\n    ec\nprint(1)");
    assert_eq!(
        enum_values(&st, "E"),
        vec![
            ("ea".to_string(), 0),
            ("eb".to_string(), 1),
            ("ec".to_string(), 2)
        ]
    );
}

#[test]
fn enum_flags_assigns_powers_of_two() {
    let (_, st) = parse_ok("enum_flags Perm:\n    r\n    w\n    x\nprint(1)");
    assert_eq!(
        enum_values(&st, "Perm"),
        vec![
            ("r".to_string(), 1),
            ("w".to_string(), 2),
            ("x".to_string(), 4)
        ]
    );
}

#[test]
fn assignment_overrides_the_running_value() {
    let (_, st) = parse_ok("enum E:\n    a\n    b = 10\n    c\nprint(1)");
    assert_eq!(
        enum_values(&st, "E"),
        vec![
            ("a".to_string(), 0),
            ("b".to_string(), 10),
            ("c".to_string(), 11)
        ]
    );
}

#[test]
fn enum_value_reference_becomes_tagged_constant() {
    let (out, st) = parse_ok("enum E:\n    ea\n    eb\nvar v = eb\nprint(v)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("expected define");
    };
    let NodeKind::IntConstant { val, from } = &child.kind else {
        panic!("expected a tagged constant, got {:?}", child.kind);
    };
    assert_eq!(*val, 1);
    assert!(from.is_some());
}

#[test]
fn coercion_applies_when_only_an_enum_has_the_name() {
    let (out, st) = parse_ok("enum E:\n    ea\nvar x = E(1)\nprint(x)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("expected define");
    };
    assert!(matches!(child.kind, NodeKind::EnumCoercion { .. }));
}

#[test]
fn same_named_function_beats_the_coercion() {
    let (out, st) = parse_ok("enum Col:\n    c1\nfun Col(x): x\nvar r = Col(5)\nprint(r)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[2].kind else {
        panic!("expected define");
    };
    let NodeKind::GenericCall { sf, .. } = &child.kind else {
        panic!("the user function wins, got {:?}", child.kind);
    };
    assert!(sf.is_some());
}

#[test]
fn enum_value_wins_over_parenless_call() {
    // `red` is both an enum value and a declared function. Followed by a
    // whitespace-separated token, the name is the enum value; a parenless
    // call would try to parse `+ 1` as its argument and fail.
    let (out, st) =
        parse_ok("enum Color:\n    red\nfun red(x): x\nvar r = red + 1\nprint(r)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[2].kind else {
        panic!("expected define, got {:?}", stmts[2].kind);
    };
    let NodeKind::Binary { lhs, .. } = &child.kind else {
        panic!("expected addition, got {:?}", child.kind);
    };
    let NodeKind::IntConstant { val, from } = &lhs.kind else {
        panic!("expected the enum constant, got {:?}", lhs.kind);
    };
    assert_eq!(*val, 0);
    assert!(from.is_some(), "constant is tagged with its enum origin");
}

#[test]
fn double_enum_declaration_is_an_error() {
    let err = parse_err("enum E:\n    a\nenum E:\n    b\nprint(1)");
    assert!(err.message.contains("double declaration of enum: E"));
}

#[test]
fn enum_type_annotation_resolves() {
    let (_, st) = parse_ok("enum E:\n    ea\nfun f(x:E): x\nprint(1)");
    let f = st
        .functions
        .iter()
        .find(|f| f.name == "f")
        .expect("f declared");
    let sf = &st.subfunctions[f.overloads[0].0 as usize];
    assert!(matches!(
        sf.giventypes[0],
        Some(lute_parser::typeref::UnresolvedType::Enum(_))
    ));
}
