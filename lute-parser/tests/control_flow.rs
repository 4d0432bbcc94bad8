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

/// Unwrap the implicit return the driver adds around a final statement.
fn unwrap_return(stmt: &Node) -> &Node {
    match &stmt.kind {
        NodeKind::Return { child, .. } => child,
        _ => stmt,
    }
}

#[test]
fn elif_chain_nests_if_else() {
    let (out, st) = parse_ok("var a = 1\nif a: 1 elif a: 2 else: 3");
    let stmts = top_stmts(&out, &st);
    let NodeKind::IfElse { else_block, .. } = &unwrap_return(&stmts[1]).kind else {
        panic!("expected if/else, got {:?}", stmts[1].kind);
    };
    assert!(matches!(
        else_block.children[0].kind,
        NodeKind::IfElse { .. }
    ));
}

#[test]
fn if_without_else_is_if_then() {
    let (out, st) = parse_ok("var a = 1\nif a:\n    print(1)\nprint(2)");
    let stmts = top_stmts(&out, &st);
    assert!(matches!(stmts[1].kind, NodeKind::IfThen { .. }));
}

#[test]
fn while_loop_parses_condition_and_body() {
    let (out, st) = parse_ok("var a = 1\nwhile a < 3:\n    a = a + 1\nprint(a)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::While { cond, body } = &stmts[1].kind else {
        panic!("expected while, got {:?}", stmts[1].kind);
    };
    assert!(matches!(cond.kind, NodeKind::Binary { .. }));
    assert_eq!(body.children.len(), 1);
}

#[test]
fn parenthesized_for_declares_element_and_counter() {
    let src = "var xs = [1, 2, 3]\nfor(xs) x, i:\n    print(x + i)";
    let (out, st) = parse_ok(src);
    let stmts = top_stmts(&out, &st);
    let NodeKind::For { body, .. } = &unwrap_return(&stmts[1]).kind else {
        panic!("expected for, got {:?}", stmts[1].kind);
    };
    assert_eq!(body.children.len(), 3);
    let NodeKind::Define { child, .. } = &body.children[0].kind else {
        panic!("element binding first");
    };
    assert!(matches!(child.kind, NodeKind::ForLoopElem));
    let NodeKind::Define { child, .. } = &body.children[1].kind else {
        panic!("counter binding second");
    };
    assert!(matches!(child.kind, NodeKind::ForLoopCounter));
}

#[test]
fn bare_for_takes_implicit_args() {
    let src = "var xs = [1, 2, 3]\nfor xs:\n    print(_ + _i)";
    let (out, st) = parse_ok(src);
    let stmts = top_stmts(&out, &st);
    let NodeKind::For { body, .. } = &unwrap_return(&stmts[1]).kind else {
        panic!("expected for, got {:?}", stmts[1].kind);
    };
    assert_eq!(body.children.len(), 3);
    let NodeKind::Define { child, .. } = &body.children[0].kind else {
        panic!("element binding injected first");
    };
    assert!(matches!(child.kind, NodeKind::ForLoopElem));
    let NodeKind::Define { child, .. } = &body.children[1].kind else {
        panic!("counter binding injected second");
    };
    assert!(matches!(child.kind, NodeKind::ForLoopCounter));
}

#[test]
fn implicit_args_cannot_mix_with_explicit_for_args() {
    let err = parse_err("var xs = [1]\nfor(xs) x:\n    print(_)");
    assert!(err
        .message
        .contains("cannot add implicit argument to for with existing arguments"));
}

#[test]
fn for_takes_at_most_two_variables() {
    let err = parse_err("var xs = [1]\nfor(xs) a, b, c:\n    print(a)");
    assert!(err
        .message
        .contains("for loop takes at most an element and index variable"));
    let err = parse_err("var xs = [1]\nfor xs:\n    print(_ + _i + _j)");
    assert!(err
        .message
        .contains("for loop takes at most an element and index variable"));
}

#[test]
fn implicit_arg_at_top_level_is_rejected() {
    let err = parse_err("print(_)");
    assert!(err
        .message
        .contains("cannot add implicit argument to top level"));
}

#[test]
fn lambda_gains_implicit_args() {
    let (out, st) = parse_ok("fun apply(f): 0\napply(): _ + 1");
    let stmts = top_stmts(&out, &st);
    let NodeKind::GenericCall { args, .. } = &unwrap_return(&stmts[1]).kind else {
        panic!("expected call");
    };
    let NodeKind::FunRef { sf } = &args[0].kind else {
        panic!("the block is the arg");
    };
    let sfd = &st.subfunctions[sf.0 as usize];
    assert_eq!(sfd.args.len(), 1, "the implicit arg was appended");
    assert!(st.ident_name(sfd.args[0].id).starts_with('_'));
    assert_eq!(sfd.generics.len(), 1, "and typed by a fresh generic");
}

#[test]
fn implicit_arg_in_named_function_is_rejected() {
    let err = parse_err("fun f():\n    print(_)\nprint(1)");
    assert!(err.message.contains("in named function"));
}

#[test]
fn switch_patterns_support_ranges() {
    let src = "var v = 1\nswitch v:\n    case 1..3, 5: print(1)\n    default: print(2)";
    let (out, st) = parse_ok(src);
    let stmts = top_stmts(&out, &st);
    let NodeKind::Switch { cases, .. } = &unwrap_return(&stmts[1]).kind else {
        panic!("expected switch, got {:?}", stmts[1].kind);
    };
    assert_eq!(cases.len(), 2);
    let NodeKind::Case { patterns, .. } = &cases[0].kind else {
        panic!("case");
    };
    assert_eq!(patterns.len(), 2);
    assert!(matches!(patterns[0].kind, NodeKind::Range { .. }));
    assert!(matches!(patterns[1].kind, NodeKind::IntConstant { val: 5, .. }));
    let NodeKind::Case { patterns, .. } = &cases[1].kind else {
        panic!("default case");
    };
    assert!(patterns.is_empty());
}

#[test]
fn two_defaults_in_a_switch_is_an_error() {
    let err = parse_err(
        "var v = 1\nswitch v:\n    default: print(1)\n    default: print(2)\nprint(3)",
    );
    assert!(err.message.contains("cannot have more than one default in a switch"));
}

#[test]
fn postfix_and_prefix_mutation_marks_the_operand() {
    let (_, st) = parse_ok("var a = 1\na++\n--a\nprint(a)");
    let id = st.lookup_any("a").expect("defined");
    assert!(!st.idents[id.0 as usize].single_assignment);
}

#[test]
fn is_type_postfix() {
    let (out, st) = parse_ok("var a = 1\nvar b = a is int\nprint(b)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("expected define");
    };
    assert!(matches!(child.kind, NodeKind::IsType { .. }));
}

#[test]
fn typeof_forms() {
    let (out, st) = parse_ok("var a = 1\nvar t = typeof a\nvar u = typeof int\nprint(1)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("define");
    };
    let NodeKind::TypeOf { child: inner } = &child.kind else {
        panic!("typeof");
    };
    assert!(matches!(inner.kind, NodeKind::IdentRef { .. }));
    let NodeKind::Define { child, .. } = &stmts[2].kind else {
        panic!("define");
    };
    let NodeKind::TypeOf { child: inner } = &child.kind else {
        panic!("typeof");
    };
    assert!(matches!(inner.kind, NodeKind::TypeAnnotation(_)));
}

#[test]
fn coroutine_call_carries_a_synthetic_closure_arg() {
    let (out, st) = parse_ok("fun co(cl): 0\nvar c = coroutine co()\nprint(c)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("define");
    };
    let NodeKind::CoRoutine { call } = &child.kind else {
        panic!("expected coroutine, got {:?}", child.kind);
    };
    let NodeKind::GenericCall { sf, args, .. } = &call.kind else {
        panic!("wrapped call");
    };
    assert!(sf.is_some());
    assert_eq!(args.len(), 1);
    assert!(matches!(args[0].kind, NodeKind::CoClosure));
}

#[test]
fn codot_reads_a_coroutine_field() {
    let (out, st) = parse_ok("fun co(cl):\n    var state = 1\n    0\nvar c = coroutine co()\nvar s = c->state\nprint(s)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[2].kind else {
        panic!("define");
    };
    assert!(matches!(child.kind, NodeKind::CoDot { .. }));
}

#[test]
fn codot_with_unknown_name_is_an_error() {
    let err = parse_err("fun co(cl): 0\nvar c = coroutine co()\nvar s = c->missing\nprint(s)");
    assert!(err.message.contains("coroutines have no variable named: missing"));
}

#[test]
fn nil_and_list_literals_carry_given_types() {
    let (out, st) = parse_ok("var n = nil::string\nvar xs = [1, 2]::int\nprint(1)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Define { child, .. } = &stmts[0].kind else {
        panic!("define");
    };
    let NodeKind::Nil { giventype } = &child.kind else {
        panic!("nil literal");
    };
    assert!(giventype.is_some());
    let NodeKind::Define { child, .. } = &stmts[1].kind else {
        panic!("define");
    };
    let NodeKind::Constructor { giventype, args } = &child.kind else {
        panic!("list literal");
    };
    assert!(giventype.is_some());
    assert_eq!(args.len(), 2);
}

#[test]
fn nilable_value_type_is_rejected() {
    let err = parse_err("fun f(x:int?): 0\nprint(1)");
    assert!(err.message.contains("value types can't be made nilable"));
}
