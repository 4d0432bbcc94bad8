use lute_parser::symbols::Udt;
use lute_parser::typeref::UnresolvedType;
use lute_parser::{ParseError, SymbolTable};

fn parse_ok(src: &str) -> SymbolTable {
    let mut st = SymbolTable::new();
    lute_parser::parse(src, "test.lute", &mut st).unwrap_or_else(|e| panic!("parse failed: {e}"));
    st
}

fn parse_err(src: &str) -> ParseError {
    let mut st = SymbolTable::new();
    match lute_parser::parse(src, "test.lute", &mut st) {
        Ok(_) => panic!("expected a parse error"),
        Err(e) => e,
    }
}

fn udt<'a>(st: &'a SymbolTable, name: &str) -> &'a Udt {
    st.udts
        .iter()
        .find(|u| u.name == name)
        .unwrap_or_else(|| panic!("no udt named {name}"))
}

const PAIR: &str = "struct Pair<A, B>:\n    a:A\n    b:B\n";

#[test]
fn generic_struct_and_specialization() {
    let st = parse_ok(&format!("{PAIR}struct IP = Pair<int, string>\nprint(1)"));
    let pair = udt(&st, "Pair");
    assert!(pair.is_generic);
    assert_eq!(pair.fields.len(), 2);
    let ip = udt(&st, "IP");
    assert!(!ip.is_generic);
    assert_eq!(ip.fields.len(), 2);
    assert_eq!(
        ip.generics[0].giventype,
        Some(UnresolvedType::Int),
        "A is bound to int"
    );
    assert_eq!(
        ip.generics[1].giventype,
        Some(UnresolvedType::Str),
        "B is bound to string"
    );
    let pair_id = st
        .udts
        .iter()
        .position(|u| u.name == "Pair")
        .expect("pair exists");
    match &ip.given_superclass {
        Some(UnresolvedType::Spec { udt, specializers }) => {
            assert_eq!(udt.0 as usize, pair_id);
            assert_eq!(
                specializers,
                &vec![UnresolvedType::Int, UnresolvedType::Str]
            );
        }
        other => panic!("expected a specialized superclass, got {other:?}"),
    }
}

#[test]
fn specializer_default_value_lands_on_matching_field() {
    let st = parse_ok("struct P<T>:\n    v:T\nstruct PD = P<int = 5>\nprint(1)");
    let pd = udt(&st, "PD");
    assert!(pd.fields[0].defaultval.is_some());
    // The unspecialized parent keeps no default.
    let p = udt(&st, "P");
    assert!(p.fields[0].defaultval.is_none());
}

#[test]
fn too_many_specializers_is_an_error() {
    let err = parse_err("struct P<T>:\n    v:T\nstruct PE = P<int, string>\nprint(1)");
    assert!(err.message.contains("too many type specializers"));
}

#[test]
fn specialization_without_types_is_an_error() {
    let err = parse_err("struct P<T>:\n    v:T\nstruct PF = P\nprint(1)");
    assert!(err.message.contains("no specialization types specified"));
}

#[test]
fn partial_specialization_is_an_error() {
    let err = parse_err(&format!("{PAIR}struct PG = Pair<int>\nprint(1)"));
    assert!(err.message.contains("missing specializers"));
}

#[test]
fn generic_type_use_requires_specializers() {
    let err = parse_err(&format!("{PAIR}fun t(x:Pair): 0\nprint(1)"));
    assert!(err.message.contains("use of type Pair requires specializers"));
}

#[test]
fn generic_params_must_be_unique() {
    let err = parse_err("struct Q<T, T>:\n    v:T\nprint(1)");
    assert!(err.message.contains("re-declaration of generic type"));
}

#[test]
fn predeclaration_completed_later_is_fine() {
    let st = parse_ok("struct Link\nfun t(x:Link?): 0\nstruct Link:\n    next:Link?\nprint(1)");
    assert!(!udt(&st, "Link").predeclaration);
}

#[test]
fn predeclaration_never_defined_is_an_error() {
    let err = parse_err("struct Never\nprint(1)");
    assert!(err.message.contains("pre-declared struct never defined: Never"));
}

#[test]
fn structs_cannot_be_empty_but_classes_can() {
    let err = parse_err("struct S:\n    fun m(): 0\nprint(1)");
    assert!(err.message.contains("structs cannot be empty"));
    parse_ok("class CE:\n    fun m(): 0\nprint(1)");
}

#[test]
fn fields_must_precede_methods() {
    let err = parse_err("class C:\n    fun m(): 0\n    x:int\nprint(1)");
    assert!(err.message.contains("fields must be declared before methods"));
}

#[test]
fn field_needs_type_or_default() {
    let err = parse_err("class C:\n    x\nprint(1)");
    assert!(err.message.contains("must specify either type or default value"));
}

#[test]
fn superclass_fields_are_copied_into_child() {
    let st = parse_ok("class Base:\n    x:int\nclass Derived: Base\n    y:int\nprint(1)");
    let derived = udt(&st, "Derived");
    assert_eq!(derived.fields.len(), 2);
    assert!(derived.resolved_superclass.is_some());
}

#[test]
fn class_struct_kind_must_match_parent() {
    let err = parse_err("class Base:\n    x:int\nstruct S = Base<int>\nprint(1)");
    assert!(err.message.contains("class/struct must match parent"));
}

#[test]
fn self_inheritance_is_rejected() {
    let err = parse_err("struct S = S<int>\nprint(1)");
    assert!(err.message.contains("can't inherit from: S"));
}

#[test]
fn generic_constructor_with_explicit_specializers() {
    use lute_parser::ast::NodeKind;
    let mut st = SymbolTable::new();
    let out = lute_parser::parse(
        &format!("{PAIR}var p = Pair<int, string>{{1, \"a\"}}\nprint(1)"),
        "test.lute",
        &mut st,
    )
    .unwrap_or_else(|e| panic!("parse failed: {e}"));
    let NodeKind::Call { sf, .. } = &out.root.kind else {
        panic!("root");
    };
    let body = st.subfunctions[sf.0 as usize].body.as_ref().expect("body");
    let NodeKind::Define { child, .. } = &body.children[1].kind else {
        panic!("expected define, got {:?}", body.children[1].kind);
    };
    let NodeKind::Constructor { giventype, args } = &child.kind else {
        panic!("expected constructor, got {:?}", child.kind);
    };
    assert_eq!(args.len(), 2);
    assert!(matches!(
        giventype,
        Some(UnresolvedType::Spec { specializers, .. }) if specializers.len() == 2
    ));
}

#[test]
fn constructor_field_rules() {
    // Keyed, repeated, unknown, and missing initializers.
    let decl = "class V:\n    x:int\n    y:int = 2\n";
    let mut st = SymbolTable::new();
    lute_parser::parse(
        &format!("{decl}var v = V{{x: 1}}\nprint(1)"),
        "test.lute",
        &mut st,
    )
    .expect("defaults fill missing fields");
    let err = parse_err(&format!("{decl}var v = V{{x: 1, x: 2}}\nprint(1)"));
    assert!(err.message.contains("field initialized twice: x"));
    let err = parse_err(&format!("{decl}var v = V{{z: 1}}\nprint(1)"));
    assert!(err.message.contains("unknown field: z"));
    let err = parse_err(&format!("{decl}var v = V{{}}\nprint(1)"));
    assert!(err.message.contains("field not initialized: x"));
}
