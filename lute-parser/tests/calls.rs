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

fn define_rhs(stmt: &Node) -> &Node {
    match &stmt.kind {
        NodeKind::Define { child, .. } => child,
        other => panic!("expected a define, got {other:?}"),
    }
}

#[test]
fn adjacent_paren_and_spaced_paren_both_call() {
    let (out, st) = parse_ok("fun f(a): a\nvar r = f(1)\nvar r2 = f (1)\nprint(r + r2)");
    let stmts = top_stmts(&out, &st);
    for stmt in &stmts[1..3] {
        let NodeKind::GenericCall { name, sf, args, .. } = &define_rhs(stmt).kind else {
            panic!("expected a call");
        };
        assert_eq!(name, "f");
        assert!(sf.is_some());
        assert_eq!(args.len(), 1);
    }
    // The spaced form's single arg is the parenthesized expression itself.
    let NodeKind::GenericCall { args, .. } = &define_rhs(&stmts[2]).kind else {
        unreachable!()
    };
    assert!(matches!(args[0].kind, NodeKind::IntConstant { val: 1, .. }));
}

#[test]
fn parenless_call_with_trailing_block() {
    let (out, st) = parse_ok("fun apply(a, b): 0\nvar x = 1\napply x: 42");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Return { child, .. } = &stmts[2].kind else {
        panic!("trailing statement becomes the return value");
    };
    let NodeKind::GenericCall { name, sf, args, .. } = &child.kind else {
        panic!("expected a call, got {:?}", child.kind);
    };
    assert_eq!(name, "apply");
    assert!(sf.is_some());
    assert_eq!(args.len(), 2);
    assert!(matches!(args[0].kind, NodeKind::IdentRef { .. }));
    let NodeKind::FunRef { sf: block_sf } = &args[1].kind else {
        panic!("second arg is the block");
    };
    let body = st.subfunctions[block_sf.0 as usize]
        .body
        .as_ref()
        .expect("block body");
    let NodeKind::Return { child, .. } = &body.children[0].kind else {
        panic!("block body ends in a return");
    };
    assert!(matches!(child.kind, NodeKind::IntConstant { val: 42, .. }));
}

#[test]
fn trailing_lambda_chain_single_line() {
    let (out, st) = parse_ok("fun twice(f, g): 0\ntwice(): 1 => : 2");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Return { child, .. } = &stmts[1].kind else {
        panic!("expected return");
    };
    let NodeKind::GenericCall { args, sf, .. } = &child.kind else {
        panic!("expected call");
    };
    assert!(sf.is_some());
    assert_eq!(args.len(), 2);
    assert!(matches!(args[0].kind, NodeKind::FunRef { .. }));
    assert!(matches!(args[1].kind, NodeKind::FunRef { .. }));
}

#[test]
fn trailing_lambda_chain_across_lines() {
    let (out, st) = parse_ok("fun twice(f, g): 0\ntwice(): 1\n=> : 2");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Return { child, .. } = &stmts[1].kind else {
        panic!("expected return");
    };
    let NodeKind::GenericCall { args, .. } = &child.kind else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 2);
}

#[test]
fn bare_linefeed_ends_lambda_chain() {
    let (out, st) = parse_ok("fun once(f): 0\nonce(): 1\nprint(2)");
    let stmts = top_stmts(&out, &st);
    assert_eq!(stmts.len(), 3);
    let NodeKind::GenericCall { args, .. } = &stmts[1].kind else {
        panic!("expected call");
    };
    assert_eq!(args.len(), 1);
}

#[test]
fn variable_holding_function_value_is_a_dyn_call() {
    let (out, st) = parse_ok("var f = => (x): x\nvar r = f(1)\nprint(r)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::DynCall { args, .. } = &define_rhs(&stmts[1]).kind else {
        panic!("expected a dynamic call, got {:?}", define_rhs(&stmts[1]).kind);
    };
    assert_eq!(args.len(), 1);
}

#[test]
fn dotted_access_is_field_without_parens_and_method_with() {
    let src = "class C:\n    x:int\n    fun get(): x\nvar c = C{1}\nvar a = c.x\nvar b = c.get()\nprint(a + b)";
    let (out, st) = parse_ok(src);
    let stmts = top_stmts(&out, &st);
    // Statement order: FunRef(get), UdtRef(C), then the three defines.
    let NodeKind::GenericCall {
        name, dotted, args, sf, ..
    } = &define_rhs(&stmts[3]).kind
    else {
        panic!("field access is a dotted call");
    };
    assert_eq!(name, "x");
    assert!(dotted);
    assert!(sf.is_none());
    assert_eq!(args.len(), 1);
    let NodeKind::GenericCall { name, sf, args, .. } = &define_rhs(&stmts[4]).kind else {
        panic!("method call");
    };
    assert_eq!(name, "get");
    assert!(sf.is_some());
    assert_eq!(args.len(), 1, "receiver is the only arg");
}

#[test]
fn generic_specialized_call_without_whitespace() {
    let (out, st) = parse_ok("fun idf(x): x\nvar r = idf<int>(5)\nprint(r)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::GenericCall {
        specializers, args, ..
    } = &define_rhs(&stmts[1]).kind
    else {
        panic!("expected call");
    };
    assert_eq!(specializers.len(), 1);
    assert_eq!(args.len(), 1);
}

#[test]
fn less_than_with_whitespace_is_a_comparison() {
    use lute_parser::ast::BinaryOp;
    let (out, st) = parse_ok("var a = 1\nvar b = 2\nvar c = a < b\nprint(c)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Binary { op, .. } = &define_rhs(&stmts[2]).kind else {
        panic!("expected comparison, got {:?}", define_rhs(&stmts[2]).kind);
    };
    assert_eq!(*op, BinaryOp::LessThan);
}

#[test]
fn native_call_fills_optional_args_with_defaults() {
    let (out, st) = parse_ok("var s = substring(\"abc\", 1)\nprint(s)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::GenericCall { sf, args, .. } = &define_rhs(&stmts[0]).kind else {
        panic!("expected native call");
    };
    assert!(sf.is_none(), "natives carry no user overload");
    assert_eq!(args.len(), 3);
    assert!(matches!(args[2].kind, NodeKind::DefaultVal));
}

#[test]
fn missing_required_native_arg_is_an_error() {
    let err = parse_err("print()");
    assert!(err.message.contains("missing arg to builtin function: print"));
}

#[test]
fn method_call_in_with_scope_injects_self() {
    let src = "class C:\n    x:int\n    fun get(): x\n    fun get2(): get()\nprint(1)";
    let (_, st) = parse_ok(src);
    let get2 = st
        .functions
        .iter()
        .find(|f| f.name == "get2")
        .expect("get2 declared");
    let body = st.subfunctions[get2.overloads[0].0 as usize]
        .body
        .as_ref()
        .expect("body");
    let NodeKind::Return { child, .. } = &body.children[0].kind else {
        panic!("body ends in return");
    };
    let NodeKind::GenericCall { name, args, sf, .. } = &child.kind else {
        panic!("expected call, got {:?}", child.kind);
    };
    assert_eq!(name, "get");
    assert!(sf.is_some());
    assert_eq!(args.len(), 1, "receiver injected from the :: context");
    assert!(matches!(args[0].kind, NodeKind::IdentRef { .. }));
}

#[test]
fn call_on_non_variable_expression_is_rejected() {
    let err = parse_err("var r = (1)(2)");
    assert!(err
        .message
        .contains("dynamic function value call must be on variable"));
}

#[test]
fn if_condition_call_keeps_block_for_the_if() {
    let (out, st) = parse_ok("fun f(a): a\nvar x = 1\nif f(x): print(1)");
    let stmts = top_stmts(&out, &st);
    let NodeKind::Return { child, .. } = &stmts[2].kind else {
        panic!("expected return");
    };
    let NodeKind::IfThen { cond, .. } = &child.kind else {
        panic!("expected if, got {:?}", child.kind);
    };
    let NodeKind::GenericCall { args, .. } = &cond.kind else {
        panic!("condition is the call");
    };
    assert_eq!(args.len(), 1, "the block belongs to the if, not the call");
}
