//! Recursive-descent parser and name binder for Lute.
//!
//! Consumes the token cursor produced by `lute-lexer`, builds the AST rooted
//! at an implicit top-level function, binds names against the symbol table,
//! and resolves forward references via a queue of unresolved call sites.
//! Typing and code generation are left to downstream phases.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use lute_lexer::{LexError, Lexer, Line, Token};

use crate::ast::{
    walk_block_mut, AssignOp, BinaryOp, Block, CallId, Node, NodeKind, UnaryOp,
};
use crate::natives::{NativeFun, NativeRegistry};
use crate::symbols::{
    BoundCtx, FieldDef, FunId, IdentId, Lifetime, SfGeneric, SfId, SpecIdentId, SymbolTable,
    UdtGeneric, UdtId, WithStackElem,
};
use crate::typeref::UnresolvedType;

// ── Diagnostics ──────────────────────────────────────────────────────

/// A fatal parse error. The parser never recovers: the first error aborts
/// parsing and the AST must be considered invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{file}:{line}: {message}")]
pub struct ParseError {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        Self {
            file: e.file,
            line: e.line,
            message: e.message,
        }
    }
}

/// A non-fatal diagnostic, surfaced alongside a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: warning: {}", self.file, self.line, self.message)
    }
}

type R<T> = Result<T, ParseError>;

/// Everything a successful parse produces besides the symbol table.
#[derive(Debug)]
pub struct ParseOutput {
    /// A `Call` of the synthetic top-level sub-function.
    pub root: Node,
    pub warnings: Vec<Warning>,
    /// Packaged data files referenced via `pakfile`.
    pub pakfiles: BTreeSet<String>,
    /// Data directories added via `include from`.
    pub data_dirs: Vec<String>,
}

// ── Parser state ─────────────────────────────────────────────────────

/// An unresolved named-call site, queued until its callee comes into scope.
struct ForwardFunctionCall {
    max_scope_level: usize,
    call_namespace: String,
    call_id: CallId,
    name: String,
    arity: usize,
    has_first_arg: bool,
    wse: WithStackElem,
    line: Line,
}

/// Deferred tree mutation for a resolved forward call; applied in one walk
/// when the top level returns, so tree ownership stays strict.
struct CallPatch {
    sf: SfId,
    self_arg: Option<SpecIdentId>,
}

/// The block currently under construction, for implicit-argument injection.
struct BlockScope {
    children: Vec<Node>,
    /// Number of loop variables of the enclosing for-block, or -1 when the
    /// block is not a for body.
    for_nargs: i32,
    /// Whether those loop variables were declared explicitly.
    explicit_args: bool,
}

const OPS: [&[Token]; 7] = [
    &[Token::Mult, Token::Div, Token::Mod],
    &[Token::Plus, Token::Minus],
    &[Token::Asl, Token::Asr],
    &[Token::BitAnd, Token::BitOr, Token::Xor],
    &[Token::Lt, Token::Gt, Token::LtEq, Token::GtEq],
    &[Token::Eq, Token::NotEq],
    &[Token::And, Token::Or],
];

fn binary_op_of(t: Token) -> BinaryOp {
    match t {
        Token::Mult => BinaryOp::Multiply,
        Token::Div => BinaryOp::Divide,
        Token::Mod => BinaryOp::Mod,
        Token::Plus => BinaryOp::Plus,
        Token::Minus => BinaryOp::Minus,
        Token::Asl => BinaryOp::ShiftLeft,
        Token::Asr => BinaryOp::ShiftRight,
        Token::BitAnd => BinaryOp::BitAnd,
        Token::BitOr => BinaryOp::BitOr,
        Token::Xor => BinaryOp::Xor,
        Token::Lt => BinaryOp::LessThan,
        Token::Gt => BinaryOp::GreaterThan,
        Token::LtEq => BinaryOp::LessThanEq,
        Token::GtEq => BinaryOp::GreaterThanEq,
        Token::Eq => BinaryOp::Equal,
        Token::NotEq => BinaryOp::NotEqual,
        Token::And => BinaryOp::And,
        Token::Or => BinaryOp::Or,
        _ => unreachable!("not a binary operator: {t}"),
    }
}

fn assign_op_of(t: Token) -> Option<AssignOp> {
    Some(match t {
        Token::PlusEq => AssignOp::Plus,
        Token::MinusEq => AssignOp::Minus,
        Token::MultEq => AssignOp::Multiply,
        Token::DivEq => AssignOp::Divide,
        Token::ModEq => AssignOp::Mod,
        Token::AndEq => AssignOp::BitAnd,
        Token::OrEq => AssignOp::BitOr,
        Token::XorEq => AssignOp::Xor,
        Token::AslEq => AssignOp::ShiftLeft,
        Token::AsrEq => AssignOp::ShiftRight,
        _ => return None,
    })
}

pub struct Parser<'a> {
    natreg: &'a NativeRegistry,
    lex: Lexer,
    st: &'a mut SymbolTable,
    functionstack: Vec<FunId>,
    forwardfunctioncalls: Vec<ForwardFunctionCall>,
    call_noparens: bool,
    pakfiles: BTreeSet<String>,
    data_dirs: Vec<String>,
    block_stack: Vec<BlockScope>,
    warnings: Vec<Warning>,
    call_patches: HashMap<CallId, CallPatch>,
    next_call_id: u32,
    last_id: String,
}

impl<'a> Parser<'a> {
    pub fn new(lex: Lexer, st: &'a mut SymbolTable, natreg: &'a NativeRegistry) -> Self {
        Self {
            natreg,
            lex,
            st,
            functionstack: Vec::new(),
            forwardfunctioncalls: Vec::new(),
            call_noparens: false,
            pakfiles: BTreeSet::new(),
            data_dirs: Vec::new(),
            block_stack: Vec::new(),
            warnings: Vec::new(),
            call_patches: HashMap::new(),
            next_call_id: 0,
            last_id: String::new(),
        }
    }

    // ── Cursor helpers ────────────────────────────────────────────────

    fn line(&self) -> Line {
        self.lex.line()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        self.error_at(self.line(), message)
    }

    fn error_at(&self, line: Line, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.lex.filename(line).to_string(),
            line: line.line,
            message: message.into(),
        }
    }

    fn warn_at(&mut self, line: Line, message: impl Into<String>) {
        self.warnings.push(Warning {
            file: self.lex.filename(line).to_string(),
            line: line.line,
            message: message.into(),
        });
    }

    fn sym<T>(&self, r: Result<T, String>) -> R<T> {
        r.map_err(|m| self.error(m))
    }

    fn def_ident(&mut self, name: &str, islocal: bool, withtype: bool) -> R<IdentId> {
        let r = self.st.lookup_def(name, islocal, withtype);
        self.sym(r)
    }

    fn add_with_struct(&mut self, t: &UnresolvedType, id: IdentId, sf: SfId) -> R<()> {
        let r = self.st.add_with_struct(t, id, sf);
        self.sym(r)
    }

    fn is_next(&mut self, t: Token) -> R<bool> {
        if self.lex.token == t {
            self.lex.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn either(&self, ts: &[Token]) -> bool {
        ts.contains(&self.lex.token)
    }

    /// The current token rendered for diagnostics.
    fn tok_str(&self) -> String {
        match self.lex.token {
            Token::Ident | Token::Int | Token::Float => self.lex.attr.clone(),
            Token::Str => format!("\"{}\"", self.lex.attr),
            t => t.to_string(),
        }
    }

    fn expect(&mut self, t: Token) -> R<()> {
        if self.is_next(t)? {
            Ok(())
        } else {
            Err(self.error(format!("{t} expected, found: {}", self.tok_str())))
        }
    }

    fn expect_id(&mut self) -> R<String> {
        self.last_id = self.lex.attr.clone();
        self.expect(Token::Ident)?;
        Ok(self.last_id.clone())
    }

    fn is_next_id(&mut self) -> R<bool> {
        if self.lex.token != Token::Ident {
            return Ok(false);
        }
        self.last_id = self.lex.attr.clone();
        self.lex.next()?;
        Ok(true)
    }

    fn new_call_id(&mut self) -> CallId {
        let id = CallId(self.next_call_id);
        self.next_call_id += 1;
        id
    }

    fn add_stmt(&mut self, n: Node) {
        self.block_stack
            .last_mut()
            .expect("statement outside any block")
            .children
            .push(n);
    }

    // ── Driver ────────────────────────────────────────────────────────

    /// Parse a whole translation unit: the implicit top-level function, all
    /// statements to end of file, and the cleanup pass.
    pub fn parse(mut self) -> R<ParseOutput> {
        let sf = self.st.function_scope_start();
        self.st.toplevel = Some(sf);
        let f = self.st.create_function("__top_level_expression");
        self.st.functions[f.0 as usize].anonymous = true;
        self.st.functions[f.0 as usize].overloads.push(sf);
        self.st.subfunctions[sf.0 as usize].parent = Some(f);
        self.st.current_fileidx = self.lex.fileidx();
        let line = self.line();
        self.block_stack.push(BlockScope {
            children: Vec::new(),
            for_nargs: -1,
            explicit_args: false,
        });
        self.parse_statements(Token::EndOfFile)?;
        let scope = self.block_stack.pop().expect("top-level scope");
        self.st.subfunctions[sf.0 as usize].body = Some(Block {
            line,
            children: scope.children,
        });
        self.implicit_return(sf);
        self.st.function_scope_cleanup();
        debug_assert!(self.forwardfunctioncalls.is_empty());
        self.apply_call_patches();
        Ok(ParseOutput {
            root: Node::new(line, NodeKind::Call { sf, args: Vec::new() }),
            warnings: self.warnings,
            pakfiles: self.pakfiles,
            data_dirs: self.data_dirs,
        })
    }

    fn parse_statements(&mut self, terminator: Token) -> R<()> {
        loop {
            self.parse_top_exp(false)?;
            if self.lex.token == Token::EndOfInclude {
                self.st.end_of_include();
                self.lex.pop_include_continue();
                self.st.current_fileidx = self.lex.fileidx();
            } else if !self.is_next(Token::Linefeed)? {
                break;
            }
            if self.either(&[Token::EndOfFile, Token::Dedent]) {
                break;
            }
        }
        self.expect(terminator)?;
        let last_is_def = {
            let scope = self.block_stack.last().expect("block scope");
            matches!(
                scope.children.last().map(|n| &n.kind),
                Some(
                    NodeKind::EnumRef { .. }
                        | NodeKind::UdtRef { .. }
                        | NodeKind::FunRef { .. }
                        | NodeKind::Define { .. }
                ) | None
            )
        };
        if last_is_def {
            if terminator == Token::EndOfFile {
                let line = self.line();
                self.add_stmt(Node::new(line, NodeKind::IntConstant { val: 0, from: None }));
            } else {
                return Err(self.error("last expression in list can't be a definition"));
            }
        }
        self.cleanup_statements()
    }

    /// The per-block cleanup pass: resolve forward calls, validate statement
    /// placement, compute constantness, and unregister scope-local
    /// declarations.
    fn cleanup_statements(&mut self) -> R<()> {
        self.resolve_forward_function_calls()?;
        enum Action {
            Enum(crate::symbols::EnumId),
            Udt(UdtId),
            Fun(SfId),
            Define(Vec<SpecIdentId>, bool, Line),
            Return,
            None,
        }
        let n = self.block_stack.last().expect("block scope").children.len();
        for i in 0..n {
            let action = {
                let child = &self.block_stack.last().expect("block scope").children[i];
                match &child.kind {
                    NodeKind::EnumRef { e } => Action::Enum(*e),
                    NodeKind::UdtRef { udt } => Action::Udt(*udt),
                    NodeKind::FunRef { sf } => Action::Fun(*sf),
                    NodeKind::Define { sids, child: rhs } => Action::Define(
                        sids.iter().map(|(sid, _)| *sid).collect(),
                        rhs.is_const_init(),
                        child.line,
                    ),
                    NodeKind::Return { .. } => Action::Return,
                    _ => Action::None,
                }
            };
            match action {
                Action::Enum(e) => self.st.unregister_enum(e),
                Action::Udt(udt) => {
                    if self.st.udts[udt.0 as usize].predeclaration {
                        let name = self.st.udts[udt.0 as usize].name.clone();
                        return Err(self.error(format!("pre-declared struct never defined: {name}")));
                    }
                    self.st.unregister_udt(udt);
                }
                Action::Fun(sf) => {
                    let f = self.st.subfunctions[sf.0 as usize]
                        .parent
                        .expect("parsed function has a parent");
                    if !self.st.functions[f.0 as usize].anonymous {
                        self.st.unregister_function(f);
                    }
                }
                Action::Define(sids, const_init, line) => {
                    for sid in sids {
                        let id = self.st.ident_of(sid);
                        let ident = &mut self.st.idents[id.0 as usize];
                        ident.static_constant = ident.single_assignment && const_init;
                        let warn = ident.single_assignment
                            && !ident.constant
                            && const_init
                            && line.fileidx == 0;
                        if warn {
                            let name = ident.name.clone();
                            self.warn_at(line, format!("use `let` to declare: {name}"));
                        }
                    }
                }
                Action::Return => {
                    if i + 1 != n {
                        return Err(self.error("return must be last in block"));
                    }
                }
                Action::None => {}
            }
        }
        Ok(())
    }

    // ── Top-level statements ──────────────────────────────────────────

    fn parse_top_exp(&mut self, isprivate: bool) -> R<()> {
        match self.lex.token {
            Token::Namespace => {
                if self.st.scopelevels.len() != 1 || isprivate {
                    return Err(self.error("namespace must be used at file scope"));
                }
                self.lex.next()?;
                self.st.current_namespace = self.lex.attr.clone();
                self.expect(Token::Ident)?;
            }
            Token::Private => {
                if self.st.scopelevels.len() != 1 || isprivate {
                    return Err(self.error("private must be used at file scope"));
                }
                self.lex.next()?;
                self.parse_top_exp(true)?;
            }
            Token::Include => {
                if isprivate {
                    return Err(self.error("include cannot be private"));
                }
                self.lex.next()?;
                if self.is_next(Token::From)? {
                    let dir = self.lex.string_val();
                    self.expect(Token::Str)?;
                    self.lex.add_search_dir(&dir);
                    self.data_dirs.push(dir);
                } else {
                    let path = if self.lex.token == Token::Str {
                        let s = self.lex.string_val();
                        self.lex.next()?;
                        s
                    } else {
                        let mut s = self.expect_id()?;
                        while self.is_next(Token::Dot)? {
                            s.push('/');
                            s.push_str(&self.expect_id()?);
                        }
                        s + ".lute"
                    };
                    self.expect(Token::Linefeed)?;
                    self.lex.include(&path)?;
                    self.st.current_fileidx = self.lex.fileidx();
                    self.parse_top_exp(false)?;
                }
            }
            Token::Struct => self.parse_type_decl(true, isprivate)?,
            Token::Class => self.parse_type_decl(false, isprivate)?,
            Token::Fun => {
                self.lex.next()?;
                let n = self.parse_named_function_definition(isprivate, None)?;
                self.add_stmt(n);
            }
            Token::Enum | Token::EnumFlags => self.parse_enum_decl(isprivate)?,
            Token::Var | Token::Const => self.parse_var_decl(isprivate)?,
            _ => {
                if isprivate {
                    return Err(self.error("private only applies to declarations"));
                }
                if self.is_next_id()? {
                    if self.lex.token == Token::Comma {
                        // Multi-target assignment list.
                        let line = self.line();
                        let first_name = self.last_id.clone();
                        let first = self.ident_use_or_with_struct(&first_name, false)?;
                        let mut children = vec![self.modify(first)];
                        while self.is_next(Token::Comma)? {
                            let name = self.expect_id()?;
                            let target = self.ident_use_or_with_struct(&name, false)?;
                            children.push(self.modify(target));
                        }
                        self.expect(Token::Assign)?;
                        let rhs = self.parse_op_exp()?;
                        children.push(self.parse_multi_ret(rhs)?);
                        self.add_stmt(Node::new(line, NodeKind::AssignList { children }));
                        return Ok(());
                    }
                    // Regular assign is handled in normal expression parsing.
                    let name = self.last_id.clone();
                    self.lex.undo(Token::Ident, &name);
                }
                let e = self.parse_exp_stat()?;
                self.add_stmt(e);
            }
        }
        Ok(())
    }

    fn parse_enum_decl(&mut self, isprivate: bool) -> R<()> {
        let incremental = self.lex.token == Token::Enum;
        self.lex.next()?;
        let line = self.line();
        let mut cur: i64 = if incremental { 0 } else { 1 };
        let name = self.expect_id()?;
        let enumname = self.st.maybe_namespace(&name, !isprivate);
        let r = self.st.enum_decl(&enumname);
        let def = self.sym(r)?;
        self.st.enums[def.0 as usize].flags = !incremental;
        self.st.enums[def.0 as usize].isprivate = isprivate;
        self.expect(Token::Colon)?;
        self.expect(Token::Indent)?;
        loop {
            let vname = self.expect_id()?;
            let evname = self.st.maybe_namespace(&vname, !isprivate);
            if self.is_next(Token::Assign)? {
                cur = self.lex.int_val()?;
                self.expect(Token::Int)?;
            }
            let r = self.st.enum_val_decl(&evname, def, cur);
            let ev = self.sym(r)?;
            self.st.enumvals[ev.0 as usize].isprivate = isprivate;
            if incremental {
                cur += 1;
            } else {
                cur *= 2;
            }
            if !self.is_next(Token::Linefeed)? || self.either(&[Token::EndOfFile, Token::Dedent]) {
                break;
            }
        }
        self.expect(Token::Dedent)?;
        self.add_stmt(Node::new(line, NodeKind::EnumRef { e: def }));
        Ok(())
    }

    fn parse_var_decl(&mut self, isprivate: bool) -> R<()> {
        let isconst = self.lex.token == Token::Const;
        self.lex.next()?;
        let line = self.line();
        let mut sids = Vec::new();
        loop {
            let idname = self.expect_id()?;
            let withtype = self.lex.token == Token::TypeIn;
            let mut typ = None;
            if self.lex.token == Token::Colon || withtype {
                self.lex.next()?;
                typ = Some(self.parse_type(withtype, None)?);
            }
            let id = self.def_ident(&idname, true, withtype)?;
            if isconst {
                self.st.idents[id.0 as usize].constant = true;
            }
            if isprivate {
                self.st.idents[id.0 as usize].isprivate = true;
            }
            if withtype {
                let t = typ.clone().expect("withtype implies a parsed type");
                let sf = *self.st.defsubfunctionstack.last().expect("sf stack");
                self.add_with_struct(&t, id, sf)?;
            }
            sids.push((self.st.idents[id.0 as usize].cursid, typ));
            if !self.is_next(Token::Comma)? {
                break;
            }
        }
        if self.is_next(Token::LogAssign)? {
            for (sid, _) in &sids {
                let id = self.st.ident_of(*sid);
                self.st.make_log_var(id);
            }
        } else {
            self.expect(Token::Assign)?;
        }
        let first = self.parse_op_exp()?;
        let child = self.parse_multi_ret(first)?;
        self.add_stmt(Node::new(
            line,
            NodeKind::Define {
                sids,
                child: Box::new(child),
            },
        ));
        Ok(())
    }

    // ── Type declarations ─────────────────────────────────────────────

    fn parse_type_decl(&mut self, is_struct: bool, isprivate: bool) -> R<()> {
        self.lex.next()?;
        let line = self.line();
        let name = self.expect_id()?;
        let sname = self.st.maybe_namespace(&name, !isprivate);
        let r = self.st.struct_decl(&sname, is_struct);
        let udt = self.sym(r)?;
        if self.is_next(Token::Assign)? {
            // A specialization of an existing struct.
            let supname = self.expect_id()?;
            let sup = self.sym(self.st.struct_use(&supname))?;
            if sup == udt {
                return Err(self.error(format!("can't inherit from: {supname}")));
            }
            if is_struct != self.st.udts[sup.0 as usize].is_struct {
                return Err(self.error("class/struct must match parent"));
            }
            if isprivate != self.st.udts[sup.0 as usize].isprivate {
                return Err(self.error("specialization must have same privacy level"));
            }
            if self.st.udts[sup.0 as usize].predeclaration {
                return Err(self.error("must specialize fully defined type"));
            }
            self.st.clone_into(udt, sup);
            if self.parse_specializers_into(udt)? == 0 {
                return Err(self.error("no specialization types specified"));
            }
            let unbound = self.st.udts[udt.0 as usize]
                .generics
                .last()
                .is_some_and(|g| g.giventype.is_none());
            if unbound {
                return Err(self.error("missing specializers"));
            }
            let specializers: Vec<UnresolvedType> = self.st.udts[udt.0 as usize]
                .generics
                .iter()
                .map(|g| {
                    g.giventype
                        .clone()
                        .unwrap_or(UnresolvedType::TypeVar(g.tv))
                })
                .collect();
            self.st.udts[udt.0 as usize].resolved_superclass = Some(sup);
            self.st.udts[udt.0 as usize].given_superclass = Some(UnresolvedType::Spec {
                udt: sup,
                specializers,
            });
        } else if self.either(&[Token::Colon, Token::Lt]) {
            // A regular struct declaration.
            self.st.udts[udt.0 as usize].isprivate = isprivate;
            if self.is_next(Token::Lt)? {
                loop {
                    let gname = self.expect_id()?;
                    let dup = self.st.udts[udt.0 as usize]
                        .generics
                        .iter()
                        .any(|g| self.st.typevars[g.tv.0 as usize].name == gname);
                    if dup {
                        return Err(self.error("re-declaration of generic type"));
                    }
                    let tv = self.st.new_generic(&gname);
                    self.st.udts[udt.0 as usize].generics.push(UdtGeneric {
                        tv,
                        giventype: None,
                        resolvedtype: None,
                    });
                    if self.is_next(Token::Gt)? {
                        break;
                    }
                    self.expect(Token::Comma)?;
                }
            }
            self.expect(Token::Colon)?;
            if self.lex.token == Token::Ident {
                // Superclass: copy its generics and fields into the child
                // before applying specializers.
                let supname = self.expect_id()?;
                let sup = self.sym(self.st.struct_use(&supname))?;
                if sup == udt {
                    return Err(self.error(format!("can't inherit from: {supname}")));
                }
                if is_struct != self.st.udts[sup.0 as usize].is_struct {
                    return Err(self.error("class/struct must match parent"));
                }
                if self.st.udts[sup.0 as usize].predeclaration {
                    // Inheriting from a pre-declared type defines it as an
                    // empty base class.
                    self.st.udts[sup.0 as usize].predeclaration = false;
                }
                if !self.st.udts[udt.0 as usize].generics.is_empty() {
                    return Err(self.error("unimplemented: cannot add generics to generic base"));
                }
                let sup_generics = self.st.udts[sup.0 as usize].generics.clone();
                let sup_fields = self.st.udts[sup.0 as usize].fields.clone();
                self.st.udts[udt.0 as usize].generics = sup_generics;
                self.st.udts[udt.0 as usize].fields.extend(sup_fields);
                self.st.udts[udt.0 as usize].resolved_superclass = Some(sup);
                self.parse_specializers_into(udt)?;
                let fully_bound = self.st.udts[udt.0 as usize]
                    .generics
                    .iter()
                    .all(|g| g.giventype.is_some());
                let specializers: Vec<UnresolvedType> = if fully_bound {
                    self.st.udts[udt.0 as usize]
                        .generics
                        .iter()
                        .map(|g| g.giventype.clone().expect("fully bound"))
                        .collect()
                } else {
                    Vec::new()
                };
                self.st.udts[udt.0 as usize].given_superclass = Some(UnresolvedType::Spec {
                    udt: sup,
                    specializers,
                });
            }
            if self.is_next(Token::Indent)? {
                let mut fieldsdone = false;
                self.st.bound_typevars_stack.push(BoundCtx::Udt(udt));
                loop {
                    if self.is_next(Token::Fun)? {
                        fieldsdone = true;
                        let n = self.parse_named_function_definition(false, Some(udt))?;
                        self.add_stmt(n);
                    } else {
                        if fieldsdone {
                            return Err(self.error("fields must be declared before methods"));
                        }
                        let fname = self.expect_id()?;
                        let sfield = self.st.field_decl(&fname);
                        let mut giventype = None;
                        if self.is_next(Token::Colon)? {
                            giventype = Some(self.parse_type(false, None)?);
                        }
                        let defaultval = if self.is_next(Token::Assign)? {
                            Some(self.parse_exp(false)?)
                        } else {
                            None
                        };
                        if giventype.is_none() && defaultval.is_none() {
                            return Err(self.error("must specify either type or default value"));
                        }
                        self.st.udts[udt.0 as usize].fields.push(FieldDef {
                            field: sfield,
                            giventype,
                            defaultval,
                        });
                    }
                    if !self.is_next(Token::Linefeed)?
                        || self.either(&[Token::EndOfFile, Token::Dedent])
                    {
                        break;
                    }
                }
                self.expect(Token::Dedent)?;
                self.st.bound_typevars_stack.pop();
            }
            if self.st.udts[udt.0 as usize].fields.is_empty() && is_struct {
                return Err(self.error("structs cannot be empty"));
            }
        } else {
            // A pre-declaration.
            self.st.udts[udt.0 as usize].predeclaration = true;
            self.st.udts[udt.0 as usize].isprivate = isprivate;
        }
        // Recompute genericness. Stays correct when a generic refers to its
        // own struct: is_generic is still false, or already true from an
        // earlier slot.
        self.st.udts[udt.0 as usize].is_generic = false;
        let ngen = self.st.udts[udt.0 as usize].generics.len();
        for i in 0..ngen {
            let t = {
                let g = &self.st.udts[udt.0 as usize].generics[i];
                g.giventype
                    .clone()
                    .unwrap_or(UnresolvedType::TypeVar(g.tv))
            };
            if t.is_generic(self.st) {
                self.st.udts[udt.0 as usize].is_generic = true;
            }
            self.st.udts[udt.0 as usize].generics[i].resolvedtype = Some(t);
        }
        self.add_stmt(Node::new(line, NodeKind::UdtRef { udt }));
        Ok(())
    }

    /// Parse `<T1, …>` into the first unbound generic slots of `udt`.
    /// A `= expr` suffix assigns a default value to the first field whose
    /// declared type is that generic.
    fn parse_specializers_into(&mut self, udt: UdtId) -> R<usize> {
        let mut count = 0;
        if self.is_next(Token::Lt)? {
            let mut j = self.st.udts[udt.0 as usize]
                .generics
                .iter()
                .position(|g| g.giventype.is_none())
                .unwrap_or(self.st.udts[udt.0 as usize].generics.len());
            loop {
                if j == self.st.udts[udt.0 as usize].generics.len() {
                    return Err(self.error("too many type specializers"));
                }
                let t = self.parse_type(false, None)?;
                self.st.udts[udt.0 as usize].generics[j].giventype = Some(t);
                if self.is_next(Token::Assign)? {
                    let def = self.parse_factor()?;
                    let tv = self.st.udts[udt.0 as usize].generics[j].tv;
                    let pos = self.st.udts[udt.0 as usize].fields.iter().position(|fld| {
                        matches!(&fld.giventype, Some(UnresolvedType::TypeVar(x)) if *x == tv)
                    });
                    if let Some(p) = pos {
                        if self.st.udts[udt.0 as usize].fields[p].defaultval.is_some() {
                            return Err(self.error("field already has a default value"));
                        }
                        self.st.udts[udt.0 as usize].fields[p].defaultval = Some(def);
                    }
                }
                count += 1;
                j += 1;
                if self.lex.token == Token::Gt {
                    // This may be the end of the line, so make sure the lexer
                    // doesn't treat the `>` as a comparison joining lines.
                    self.lex.override_cont(false);
                    self.lex.next()?;
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        Ok(count)
    }

    // ── Function definitions ──────────────────────────────────────────

    fn parse_named_function_definition(
        &mut self,
        isprivate: bool,
        self_udt: Option<UdtId>,
    ) -> R<Node> {
        let name = self.expect_id()?;
        let idname = self
            .st
            .maybe_namespace(&name, !isprivate && self_udt.is_none());
        if self.natreg.find_native(&idname).is_some() {
            return Err(self.error(format!("cannot override built-in function: {idname}")));
        }
        self.parse_function(Some(&idname), isprivate, true, true, self_udt)
    }

    /// All function bodies end in a return, simplifying code downstream.
    /// Named functions additionally return void so a value accidentally
    /// available does not become a return value.
    fn implicit_return(&mut self, sf: SfId) {
        let anonymous = {
            let f = self.st.subfunctions[sf.0 as usize]
                .parent
                .expect("parent set before body");
            self.st.functions[f.0 as usize].anonymous
        };
        let body = self.st.subfunctions[sf.0 as usize]
            .body
            .as_mut()
            .expect("body just parsed");
        if !matches!(
            body.children.last().map(|n| &n.kind),
            Some(NodeKind::Return { .. })
        ) {
            if let Some(last) = body.children.pop() {
                let line = last.line;
                body.children.push(Node::new(
                    line,
                    NodeKind::Return {
                        child: Box::new(last),
                        sf,
                        make_void: !anonymous,
                    },
                ));
            }
        }
    }

    /// Give the just-added untyped argument a fresh generic named by the
    /// next free letter.
    fn gen_implicit_generic_for_last_arg(&mut self) -> R<()> {
        let sf = *self.st.defsubfunctionstack.last().expect("sf stack");
        let mut chosen = None;
        'outer: for c in b'A'..=b'Z' {
            let n = (c as char).to_string();
            for g in &self.st.subfunctions[sf.0 as usize].generics {
                if self.st.typevars[g.tv.0 as usize].name == n {
                    continue 'outer;
                }
            }
            chosen = Some(n);
            break;
        }
        let Some(nn) = chosen else {
            return Err(self.error("too many implicit generics"));
        };
        let ng = self.st.new_generic(&nn);
        let sfd = &mut self.st.subfunctions[sf.0 as usize];
        sfd.generics.push(SfGeneric {
            tv: ng,
            giventype: None,
        });
        if let Some(arg) = sfd.args.last_mut() {
            arg.typ = Some(UnresolvedType::TypeVar(ng));
        }
        sfd.giventypes.push(Some(UnresolvedType::TypeVar(ng)));
        Ok(())
    }

    fn parse_function(
        &mut self,
        name: Option<&str>,
        isprivate: bool,
        parens: bool,
        parseargs: bool,
        self_udt: Option<UdtId>,
    ) -> R<Node> {
        let line = self.line();
        let mut self_udt = self_udt;
        let sf = self.st.function_scope_start();
        self.st.bound_typevars_stack.push(BoundCtx::Sf(sf));
        if name.is_some() && self.is_next(Token::Lt)? {
            // Generic params on named functions only.
            loop {
                let gname = self.expect_id()?;
                let dup = self.st.subfunctions[sf.0 as usize]
                    .generics
                    .iter()
                    .any(|g| self.st.typevars[g.tv.0 as usize].name == gname);
                if dup {
                    return Err(self.error(format!("re-definition of generic: {gname}")));
                }
                let ng = self.st.new_generic(&gname);
                self.st.subfunctions[sf.0 as usize].generics.push(SfGeneric {
                    tv: ng,
                    giventype: None,
                });
                if self.is_next(Token::Gt)? {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        if parens {
            self.expect(Token::LeftParen)?;
        }
        let mut nargs = 0usize;
        if let Some(u) = self_udt {
            // Methods get an implicit first arg bound to the declaring type.
            nargs += 1;
            let id = self.def_ident("this", false, true)?;
            let t = UnresolvedType::Udt(u);
            {
                let sfd = &mut self.st.subfunctions[sf.0 as usize];
                let arg = sfd.args.last_mut().expect("just defined");
                arg.typ = Some(t.clone());
                arg.withtype = true;
                sfd.giventypes.push(Some(t.clone()));
            }
            self.add_with_struct(&t, id, sf)?;
        }
        let mut non_inline_method = false;
        if self.lex.token != Token::RightParen && parseargs {
            loop {
                let argname = self.expect_id()?;
                nargs += 1;
                let withtype = self.lex.token == Token::TypeIn;
                let id = self.def_ident(&argname, false, withtype)?;
                if parens && (self.lex.token == Token::Colon || withtype) {
                    self.lex.next()?;
                    let t = self.parse_type(withtype, None)?;
                    if withtype {
                        self.add_with_struct(&t, id, sf)?;
                    }
                    if nargs == 1 {
                        if let Some(u) = t.udt_of() {
                            // First explicit arg of a user type: a non-inline
                            // method, with the type's generics in scope.
                            non_inline_method = true;
                            self_udt = Some(u);
                            self.st.bound_typevars_stack.push(BoundCtx::Udt(u));
                        }
                    }
                    let sfd = &mut self.st.subfunctions[sf.0 as usize];
                    sfd.args.last_mut().expect("just defined").typ = Some(t.clone());
                    sfd.giventypes.push(Some(t));
                } else {
                    self.gen_implicit_generic_for_last_arg()?;
                }
                if !self.is_next(Token::Comma)? {
                    break;
                }
            }
        }
        if parens {
            self.expect(Token::RightParen)?;
        }
        self.st.subfunctions[sf.0 as usize].method_of = self_udt;
        let f = match name {
            Some(n) => self.st.function_decl(n, nargs),
            None => self.st.create_function(""),
        };
        if let (Some(n), Some(u)) = (name, self_udt) {
            // Single dispatch on the receiver type: a second method of the
            // same name on the same type is rejected whatever its other
            // args, so walk the whole sibling chain.
            let mut chain = self.st.find_function(n);
            while let Some(cf) = chain {
                for isf in self.st.functions[cf.0 as usize].overloads.clone() {
                    if self.st.subfunctions[isf.0 as usize].method_of == Some(u) {
                        return Err(self.error(format!(
                            "method {n} already declared for type: {}",
                            self.st.udts[u.0 as usize].name
                        )));
                    }
                }
                chain = self.st.functions[cf.0 as usize].sibf;
            }
        }
        self.st.functions[f.0 as usize].overloads.push(sf);
        self.st.subfunctions[sf.0 as usize].parent = Some(f);
        if self.is_next(Token::CoDot)? {
            // Return type declaration.
            let rt = self.parse_types(Some(sf))?;
            self.st.subfunctions[sf.0 as usize].returngiventype = Some(rt.clone());
            self.st.subfunctions[sf.0 as usize].returntype = Some(rt);
        }
        let mut istype = false;
        if !self.is_next(Token::Colon)? {
            // No body follows: this declares the *type* of a function value.
            if self.lex.token == Token::Ident || name.is_none() {
                self.expect(Token::Colon)?;
            }
            if self.st.functions[f.0 as usize].istype
                || self.st.functions[f.0 as usize].overloads.len() > 1
            {
                return Err(self.error(format!(
                    "redefinition of function type: {}",
                    name.unwrap_or("")
                )));
            }
            self.st.functions[f.0 as usize].istype = true;
            istype = true;
            self.st.subfunctions[sf.0 as usize].typechecked = true;
            let giventypes = self.st.subfunctions[sf.0 as usize].giventypes.clone();
            for (i, gt) in giventypes.iter().enumerate() {
                if gt.as_ref().map_or(true, |t| t.is_generic(self.st)) {
                    return Err(self.error("function type arguments can't be generic"));
                }
                // No idea what the function is going to be, so default to
                // borrowing.
                let sid = self.st.subfunctions[sf.0 as usize].args[i].sid;
                self.st.specidents[sid.0 as usize].lifetime = Lifetime::Borrow;
            }
            if self.st.subfunctions[sf.0 as usize].returngiventype.is_none() {
                return Err(self.error("missing return type or : in function definition header"));
            }
            if !self.st.subfunctions[sf.0 as usize].generics.is_empty() {
                return Err(self.error("function type cannot have generics"));
            }
            self.st.subfunctions[sf.0 as usize].reqret = self.st.subfunctions[sf.0 as usize]
                .returntype
                .as_ref()
                .expect("checked above")
                .num_values();
        }
        if let Some(n) = name {
            if self.st.functions[f.0 as usize].overloads.len() > 1 {
                // Legit-overload detection is in general better left to the
                // type checker; only the structural rules live here.
                if self.st.fun_nargs(f) == 0 {
                    return Err(self.error(format!("double declaration: {n}")));
                }
                let gt0 = self.st.subfunctions[sf.0 as usize]
                    .giventypes
                    .first()
                    .cloned()
                    .flatten();
                if gt0.map_or(true, |t| t.is_generic(self.st)) {
                    return Err(self.error(format!(
                        "first argument of overloaded function must not be generic: {n}"
                    )));
                }
                if isprivate != self.st.functions[f.0 as usize].isprivate {
                    return Err(self.error(format!(
                        "inconsistent private annotation of multiple function implementations for: {n}"
                    )));
                }
            }
            self.st.functions[f.0 as usize].isprivate = isprivate;
            self.functionstack.push(f);
        } else {
            self.st.functions[f.0 as usize].anonymous = true;
        }
        if !istype {
            let body = self.parse_body(Vec::new(), -1, false)?;
            self.st.subfunctions[sf.0 as usize].body = Some(body);
            self.implicit_return(sf);
        }
        if name.is_some() {
            self.functionstack.pop();
        }
        if non_inline_method {
            self.st.bound_typevars_stack.pop();
        }
        self.st.bound_typevars_stack.pop();
        self.st.function_scope_cleanup();
        Ok(Node::new(line, NodeKind::FunRef { sf }))
    }

    // ── Types ─────────────────────────────────────────────────────────

    /// A single return type or a tuple of them.
    fn parse_types(&mut self, sfreturntype: Option<SfId>) -> R<UnresolvedType> {
        let dest = self.parse_type(false, sfreturntype)?;
        if !self.is_next(Token::Comma)? {
            return Ok(dest);
        }
        let mut types = vec![dest];
        loop {
            types.push(self.parse_type(false, sfreturntype)?);
            if !self.is_next(Token::Comma)? {
                break;
            }
        }
        Ok(UnresolvedType::Tuple(types))
    }

    fn parse_type(&mut self, withtype: bool, sfreturntype: Option<SfId>) -> R<UnresolvedType> {
        let mut dest = match self.lex.token {
            Token::IntType => {
                self.lex.next()?;
                UnresolvedType::Int
            }
            Token::FloatType => {
                self.lex.next()?;
                UnresolvedType::Float
            }
            Token::StrType => {
                self.lex.next()?;
                UnresolvedType::Str
            }
            Token::Coroutine => {
                self.lex.next()?;
                UnresolvedType::Coroutine
            }
            Token::ResourceType => {
                self.lex.next()?;
                UnresolvedType::Resource
            }
            Token::AnyType => {
                self.lex.next()?;
                UnresolvedType::Any
            }
            Token::Ident => {
                let idname = self.lex.attr.clone();
                let ftype = self
                    .st
                    .find_function(&idname)
                    .filter(|f| self.st.functions[f.0 as usize].istype)
                    .map(|f| self.st.functions[f.0 as usize].overloads[0]);
                if let Some(sf0) = ftype {
                    self.lex.next()?;
                    UnresolvedType::FunType(sf0)
                } else if let Some(e) = self.st.enum_lookup(&idname) {
                    self.lex.next()?;
                    UnresolvedType::Enum(e)
                } else if let Some(tv) = self.st.lookup_bound_typevar(&idname) {
                    self.lex.next()?;
                    UnresolvedType::TypeVar(tv)
                } else {
                    let udt = self.sym(self.st.struct_use(&idname))?;
                    self.lex.next()?;
                    if self.is_next(Token::Lt)? {
                        let mut specializers = Vec::new();
                        loop {
                            specializers.push(self.parse_type(false, None)?);
                            if self.lex.token == Token::Gt {
                                // May be the end of the line; don't let the
                                // lexer treat it as a comparison.
                                self.lex.override_cont(false);
                                self.lex.next()?;
                                break;
                            }
                            self.expect(Token::Comma)?;
                        }
                        UnresolvedType::Spec { udt, specializers }
                    } else {
                        if self.st.udts[udt.0 as usize].is_generic {
                            return Err(self.error(format!(
                                "use of type {} requires specializers",
                                self.st.udts[udt.0 as usize].name
                            )));
                        }
                        UnresolvedType::Udt(udt)
                    }
                }
            }
            Token::LeftBracket => {
                self.lex.next()?;
                let elem = self.parse_type(false, None)?;
                self.expect(Token::RightBracket)?;
                UnresolvedType::Vector(Box::new(elem))
            }
            Token::VoidType if sfreturntype.is_some() => {
                self.lex.next()?;
                let sf = sfreturntype.expect("guarded");
                self.st.subfunctions[sf.0 as usize].reqret = 0;
                UnresolvedType::Void
            }
            _ => return Err(self.error(format!("illegal type syntax: {}", self.tok_str()))),
        };
        if self.is_next(Token::Question)? {
            if !dest.is_nillable() {
                return Err(self.error("value types can't be made nilable"));
            }
            dest = UnresolvedType::Nilable(Box::new(dest));
        }
        if withtype && dest.udt_of().is_none() {
            return Err(self.error(":: must be used with a class type"));
        }
        Ok(dest)
    }

    // ── Call argument parsing ─────────────────────────────────────────

    fn parse_fun_args(
        &mut self,
        args: &mut Vec<Node>,
        derefarg: Option<Node>,
        noparens: bool,
    ) -> R<()> {
        if let Some(d) = derefarg {
            args.push(d);
            if !self.is_next(Token::LeftParen)? {
                return Ok(());
            }
        } else if !noparens {
            self.expect(Token::LeftParen)?;
        }
        // Regular arguments.
        let mut needscomma = false;
        loop {
            if !noparens && self.is_next(Token::RightParen)? {
                if self.call_noparens {
                    // This call is an arg to a call that has no parens;
                    // don't consume trailing function values, so that
                    // `if f(x):` parses as expected.
                    return Ok(());
                }
                break;
            }
            if needscomma {
                self.expect(Token::Comma)?;
            }
            let e = self.parse_exp(noparens)?;
            args.push(e);
            if noparens {
                if self.lex.token == Token::Colon {
                    break;
                }
                return Ok(());
            }
            needscomma = true;
        }
        // Trailing function values, chained with `=>`.
        loop {
            let e = match self.lex.token {
                Token::Colon => self.parse_function(None, false, false, false, None)?,
                Token::Ident => self.parse_function(None, false, false, true, None)?,
                Token::LeftParen => self.parse_function(None, false, true, true, None)?,
                _ => return Ok(()),
            };
            args.push(e);
            let islf = self.is_next(Token::Linefeed)?;
            if !islf && self.lex.token != Token::Lambda {
                return Ok(());
            }
            if !self.is_next(Token::Lambda)? {
                // A bare linefeed ends the chain; push everything back.
                self.lex.push_cur();
                if islf {
                    self.lex.push(Token::Linefeed);
                }
                self.lex.next()?;
                return Ok(());
            }
        }
    }

    // ── Statements and expressions ────────────────────────────────────

    fn parse_multi_ret(&mut self, first: Node) -> R<Node> {
        if self.lex.token != Token::Comma {
            return Ok(first);
        }
        let line = first.line;
        let mut exprs = vec![first];
        while self.is_next(Token::Comma)? {
            exprs.push(self.parse_op_exp()?);
        }
        Ok(Node::new(line, NodeKind::MultipleReturn { exprs }))
    }

    fn parse_exp_stat(&mut self) -> R<Node> {
        if self.is_next(Token::Return)? {
            let line = self.line();
            let rv = if !self.either(&[Token::Linefeed, Token::Dedent, Token::From]) {
                let e = self.parse_op_exp()?;
                self.parse_multi_ret(e)?
            } else {
                Node::new(line, NodeKind::DefaultVal)
            };
            let mut sf = self.st.toplevel.expect("toplevel sub-function");
            if self.is_next(Token::From)? {
                // `return x from f` / `return x from program`.
                if !self.is_next(Token::Program)? {
                    if !self.is_next_id()? {
                        return Err(self.error(
                            "return from: must be followed by function identifier or \"program\"",
                        ));
                    }
                    let found = self.st.find_function(&self.last_id);
                    let Some(f) = found else {
                        return Err(self.error("return from: not a known function"));
                    };
                    if self.st.functions[f.0 as usize].sibf.is_some()
                        || self.st.functions[f.0 as usize].overloads.len() > 1
                    {
                        return Err(self.error("return from: function must have single implementation"));
                    }
                    sf = self.st.functions[f.0 as usize].overloads[0];
                }
            } else if let Some(&f) = self.functionstack.last() {
                sf = *self.st.functions[f.0 as usize]
                    .overloads
                    .last()
                    .expect("overload pushed before body");
            }
            return Ok(Node::new(
                line,
                NodeKind::Return {
                    child: Box::new(rv),
                    sf,
                    make_void: false,
                },
            ));
        }
        let mut e = self.parse_exp(false)?;
        while self.is_next(Token::Semicolon)? {
            if self.is_next(Token::Linefeed)? {
                // Specialized error for all the C-style language users.
                return Err(self.error("';' is not a statement terminator"));
            }
            let line = e.line;
            let tail = self.parse_exp(false)?;
            e = Node::new(
                line,
                NodeKind::Seq {
                    head: Box::new(e),
                    tail: Box::new(tail),
                },
            );
        }
        Ok(e)
    }

    /// Record an assignment through an identifier reference.
    fn modify(&mut self, e: Node) -> Node {
        if let NodeKind::IdentRef { sid } = &e.kind {
            self.st.assign_ident(*sid);
        }
        e
    }

    fn check_op_eq(&mut self, e: Node) -> R<Node> {
        if !matches!(
            &e.kind,
            NodeKind::IdentRef { .. }
                | NodeKind::CoDot { .. }
                | NodeKind::Indexing { .. }
                | NodeKind::GenericCall { .. }
        ) {
            return Err(self.error("illegal left hand side of assignment"));
        }
        let e = self.modify(e);
        self.lex.next()?;
        Ok(e)
    }

    fn parse_exp(&mut self, parent_noparens: bool) -> R<Node> {
        let saved = std::mem::replace(&mut self.call_noparens, parent_noparens);
        let result = self.parse_exp_inner();
        self.call_noparens = saved;
        result
    }

    fn parse_exp_inner(&mut self) -> R<Node> {
        let e = self.parse_op_exp()?;
        let line = self.line();
        if self.lex.token == Token::Assign {
            let lhs = self.check_op_eq(e)?;
            let rhs = self.parse_exp(false)?;
            return Ok(Node::new(
                line,
                NodeKind::Assign {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            ));
        }
        if let Some(op) = assign_op_of(self.lex.token) {
            let lhs = self.check_op_eq(e)?;
            let rhs = self.parse_exp(false)?;
            return Ok(Node::new(
                line,
                NodeKind::CompoundAssign {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            ));
        }
        Ok(e)
    }

    fn parse_op_exp(&mut self) -> R<Node> {
        self.parse_op_exp_level(OPS.len() - 1)
    }

    fn parse_op_exp_level(&mut self, level: usize) -> R<Node> {
        let mut exp = if level > 0 {
            self.parse_op_exp_level(level - 1)?
        } else {
            self.parse_unary()?
        };
        while OPS[level].contains(&self.lex.token) {
            let op = binary_op_of(self.lex.token);
            let line = self.line();
            self.lex.next()?;
            let rhs = if level > 0 {
                self.parse_op_exp_level(level - 1)?
            } else {
                self.parse_unary()?
            };
            exp = Node::new(
                line,
                NodeKind::Binary {
                    op,
                    lhs: Box::new(exp),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(exp)
    }

    fn parse_unary(&mut self) -> R<Node> {
        let op = match self.lex.token {
            Token::Minus => UnaryOp::UnaryMinus,
            Token::Not => UnaryOp::Not,
            Token::Neg => UnaryOp::Negate,
            Token::Incr => UnaryOp::PreIncr,
            Token::Decr => UnaryOp::PreDecr,
            _ => return self.parse_deref(),
        };
        let line = self.line();
        self.lex.next()?;
        let e = self.parse_unary()?;
        // Pre-increment and -decrement mutate their operand.
        let e = if matches!(op, UnaryOp::PreIncr | UnaryOp::PreDecr) {
            self.modify(e)
        } else {
            e
        };
        Ok(Node::new(
            line,
            NodeKind::Unary {
                op,
                child: Box::new(e),
            },
        ))
    }

    // ── Call resolution ───────────────────────────────────────────────

    fn parse_function_call(
        &mut self,
        f: Option<FunId>,
        nf: Option<&NativeFun>,
        idname: &str,
        firstarg: Option<Node>,
        noparens: bool,
        extra_args: usize,
        specializers: Vec<UnresolvedType>,
    ) -> R<Node> {
        let line = self.line();
        let wse = self.st.with_stack_back();
        // Builtins take precedence, unless we're calling a known function in
        // a `::` context.
        if let Some(nf) = nf {
            if f.is_none() || wse.id.is_none() {
                let mut args = Vec::new();
                self.parse_fun_args(&mut args, firstarg, noparens)?;
                'fill: for (i, arg) in nf.args().iter().enumerate() {
                    if i >= args.len() {
                        if arg.nilable {
                            args.push(Node::new(line, NodeKind::DefaultVal));
                        } else {
                            let nargs = args.len();
                            for ol in &nf.overloads {
                                if ol.len() == nargs {
                                    // The typechecker will deal with it.
                                    break 'fill;
                                }
                            }
                            return Err(
                                self.error(format!("missing arg to builtin function: {idname}"))
                            );
                        }
                    }
                }
                let call_id = self.new_call_id();
                return Ok(Node::new(
                    line,
                    NodeKind::GenericCall {
                        name: idname.to_string(),
                        sf: None,
                        dotted: false,
                        specializers,
                        args,
                        call_id,
                    },
                ));
            }
        }
        let id = self.st.lookup(idname);
        // If both a var and a function are in scope, the deepest scope wins.
        // Strictly less than: functions sit inside their own scope.
        let prefer_f = match (f, id) {
            (Some(f), Some(id)) => {
                self.st.idents[id.0 as usize].scopelevel
                    < self.st.functions[f.0 as usize].scopelevel
            }
            (Some(_), None) => true,
            _ => false,
        };
        if let Some(f) = f.filter(|_| prefer_f) {
            if self.st.functions[f.0 as usize].istype {
                return Err(self.error(format!(
                    "can't call function type: {}",
                    self.st.functions[f.0 as usize].name
                )));
            }
            let firstarg = match firstarg {
                Some(fa) => Some(fa),
                None => self.self_arg(f, &wse),
            };
            let mut args = Vec::new();
            self.parse_fun_args(&mut args, firstarg, noparens)?;
            let nargs = args.len() + extra_args;
            let f2 = self.find_function_with_nargs(f, nargs, idname, line)?;
            let sf = *self.st.functions[f2.0 as usize]
                .overloads
                .last()
                .expect("declared function has overloads");
            let call_id = self.new_call_id();
            return Ok(Node::new(
                line,
                NodeKind::GenericCall {
                    name: idname.to_string(),
                    sf: Some(sf),
                    dotted: false,
                    specializers,
                    args,
                    call_id,
                },
            ));
        }
        if let Some(id) = id {
            // The callee is a variable holding a function value.
            let sid = self.st.idents[id.0 as usize].cursid;
            let mut args = Vec::new();
            self.parse_fun_args(&mut args, firstarg, false)?;
            return Ok(Node::new(line, NodeKind::DynCall { sid, args }));
        }
        // Unknown name: parse the args anyway and queue a forward call.
        let has_first_arg = firstarg.is_some();
        let mut args = Vec::new();
        self.parse_fun_args(&mut args, firstarg, false)?;
        let call_id = self.new_call_id();
        self.forwardfunctioncalls.push(ForwardFunctionCall {
            max_scope_level: self.st.scopelevels.len(),
            call_namespace: self.st.current_namespace.clone(),
            call_id,
            name: idname.to_string(),
            arity: args.len(),
            has_first_arg,
            wse,
            line,
        });
        Ok(Node::new(
            line,
            NodeKind::GenericCall {
                name: idname.to_string(),
                sf: None,
                dotted: false,
                specializers,
                args,
                call_id,
            },
        ))
    }

    /// If we're in the context of a withtype, calling a function whose first
    /// arg is of the same type passes it in automatically.
    fn self_arg(&self, f: FunId, wse: &WithStackElem) -> Option<Node> {
        self.self_arg_sid(f, wse).map(|sid| {
            Node::new(self.line(), NodeKind::IdentRef { sid })
        })
    }

    fn self_arg_sid(&self, f: FunId, wse: &WithStackElem) -> Option<SpecIdentId> {
        if self.st.functions[f.0 as usize].overloads.is_empty() || self.st.fun_nargs(f) == 0 {
            return None;
        }
        for &sf in &self.st.functions[f.0 as usize].overloads {
            let arg0 = self.st.subfunctions[sf.0 as usize].args.first()?;
            let Some(u) = arg0.typ.as_ref().and_then(UnresolvedType::udt_of) else {
                continue;
            };
            if wse.udt == Some(u) && arg0.withtype {
                if let (Some(wid), Some(wsf)) = (wse.id, wse.sf) {
                    // Not in recursive calls.
                    if self.st.subfunctions[wsf.0 as usize].parent != Some(f) {
                        return Some(self.st.idents[wid.0 as usize].cursid);
                    }
                }
                return None;
            }
        }
        None
    }

    /// Dispatch to the sibling chain by arity.
    fn find_function_with_nargs(
        &self,
        f: FunId,
        nargs: usize,
        idname: &str,
        line: Line,
    ) -> R<FunId> {
        let mut cur = Some(f);
        while let Some(c) = cur {
            if self.st.fun_nargs(c) == nargs {
                return Ok(c);
            }
            cur = self.st.functions[c.0 as usize].sibf;
        }
        Err(self.error_at(
            line,
            format!("no version of function {idname} takes {nargs} arguments"),
        ))
    }

    // ── Forward-reference resolution ──────────────────────────────────

    fn resolve_forward_function_calls(&mut self) -> R<()> {
        let mut i = 0;
        while i < self.forwardfunctioncalls.len() {
            if self.forwardfunctioncalls[i].max_scope_level >= self.st.scopelevels.len() {
                // Look up under the namespace captured at the call site.
                let ns = self.forwardfunctioncalls[i].call_namespace.clone();
                let saved = std::mem::replace(&mut self.st.current_namespace, ns);
                let f = self.st.find_function(&self.forwardfunctioncalls[i].name);
                self.st.current_namespace = saved;
                if let Some(f) = f {
                    let ffc = self.forwardfunctioncalls.remove(i);
                    let self_sid = if ffc.has_first_arg {
                        None
                    } else {
                        self.self_arg_sid(f, &ffc.wse)
                    };
                    let nargs = ffc.arity + usize::from(self_sid.is_some());
                    let f2 = self.find_function_with_nargs(f, nargs, &ffc.name, ffc.line)?;
                    let sf = *self.st.functions[f2.0 as usize]
                        .overloads
                        .last()
                        .expect("declared function has overloads");
                    self.call_patches.insert(
                        ffc.call_id,
                        CallPatch {
                            sf,
                            self_arg: self_sid,
                        },
                    );
                    continue;
                }
                if self.st.scopelevels.len() == 1 {
                    let ffc = &self.forwardfunctioncalls[i];
                    return Err(self.error_at(
                        ffc.line,
                        format!("call to unknown function: {}", ffc.name),
                    ));
                }
                // Prevent it being found in sibling scopes.
                self.forwardfunctioncalls[i].max_scope_level = self.st.scopelevels.len() - 1;
            }
            i += 1;
        }
        Ok(())
    }

    /// Apply the deferred tree mutations recorded by forward-call
    /// resolution: set the overload and prepend the injected self argument.
    fn apply_call_patches(&mut self) {
        let patches = std::mem::take(&mut self.call_patches);
        if patches.is_empty() {
            return;
        }
        fn patch_node(n: &mut Node, patches: &HashMap<CallId, CallPatch>) {
            let line = n.line;
            if let NodeKind::GenericCall {
                sf, args, call_id, ..
            } = &mut n.kind
            {
                if let Some(p) = patches.get(call_id) {
                    *sf = Some(p.sf);
                    if let Some(sid) = p.self_arg {
                        args.insert(0, Node::new(line, NodeKind::IdentRef { sid }));
                    }
                }
            }
        }
        for sfi in 0..self.st.subfunctions.len() {
            if let Some(mut body) = self.st.subfunctions[sfi].body.take() {
                walk_block_mut(&mut body, &mut |n| patch_node(n, &patches));
                self.st.subfunctions[sfi].body = Some(body);
            }
        }
        for ui in 0..self.st.udts.len() {
            for fi in 0..self.st.udts[ui].fields.len() {
                if let Some(mut dv) = self.st.udts[ui].fields[fi].defaultval.take() {
                    crate::ast::walk_mut(&mut dv, &mut |n| patch_node(n, &patches));
                    self.st.udts[ui].fields[fi].defaultval = Some(dv);
                }
            }
        }
    }

    // ── Postfix and factors ───────────────────────────────────────────

    fn parse_deref(&mut self) -> R<Node> {
        let mut n = self.parse_factor()?;
        loop {
            match self.lex.token {
                Token::Dot | Token::CoDot => {
                    let op = self.lex.token;
                    let line = self.line();
                    self.lex.next()?;
                    let idname = self.expect_id()?;
                    if op == Token::CoDot {
                        // Any var with this name; whether it exists inside
                        // the coroutine is only known to the typechecker.
                        let found = self.st.lookup_any(&idname);
                        let Some(id) = found else {
                            return Err(self.error(format!(
                                "coroutines have no variable named: {idname}"
                            )));
                        };
                        let sid = self.st.idents[id.0 as usize].cursid;
                        n = Node::new(
                            line,
                            NodeKind::CoDot {
                                coroutine: Box::new(n),
                                ident: Box::new(Node::new(line, NodeKind::IdentRef { sid })),
                            },
                        );
                    } else {
                        let fld = self.st.field_use(&idname);
                        let f = self.st.find_function(&idname);
                        let natreg = self.natreg;
                        let nf = natreg.find_native(&idname);
                        if fld.is_none() && f.is_none() && nf.is_none() {
                            return Err(self.error(format!("unknown field/function: {idname}")));
                        }
                        if fld.is_some() && self.lex.token != Token::LeftParen {
                            // Field wins when both exist but no `(` follows.
                            let sf = f.map(|f| {
                                *self.st.functions[f.0 as usize]
                                    .overloads
                                    .last()
                                    .expect("declared function has overloads")
                            });
                            let call_id = self.new_call_id();
                            n = Node::new(
                                line,
                                NodeKind::GenericCall {
                                    name: idname,
                                    sf,
                                    dotted: true,
                                    specializers: Vec::new(),
                                    args: vec![n],
                                    call_id,
                                },
                            );
                        } else {
                            let specializers =
                                self.parse_specializers(f.is_some() && nf.is_none())?;
                            n = self.parse_function_call(
                                f,
                                nf,
                                &idname,
                                Some(n),
                                false,
                                0,
                                specializers,
                            )?;
                        }
                    }
                }
                Token::LeftParen => {
                    // A `DynCall` only works on a variable.
                    return Err(self.error("dynamic function value call must be on variable"));
                }
                Token::LeftBracket => {
                    let line = self.line();
                    self.lex.next()?;
                    let index = self.parse_exp(false)?;
                    self.expect(Token::RightBracket)?;
                    n = Node::new(
                        line,
                        NodeKind::Indexing {
                            object: Box::new(n),
                            index: Box::new(index),
                        },
                    );
                }
                Token::Incr => {
                    let line = self.line();
                    let m = self.modify(n);
                    self.lex.next()?;
                    return Ok(Node::new(
                        line,
                        NodeKind::Unary {
                            op: UnaryOp::PostIncr,
                            child: Box::new(m),
                        },
                    ));
                }
                Token::Decr => {
                    let line = self.line();
                    let m = self.modify(n);
                    self.lex.next()?;
                    return Ok(Node::new(
                        line,
                        NodeKind::Unary {
                            op: UnaryOp::PostDecr,
                            child: Box::new(m),
                        },
                    ));
                }
                Token::Is => {
                    let line = self.line();
                    self.lex.next()?;
                    let giventype = self.parse_type(false, None)?;
                    return Ok(Node::new(
                        line,
                        NodeKind::IsType {
                            child: Box::new(n),
                            giventype,
                        },
                    ));
                }
                _ => return Ok(n),
            }
        }
    }

    fn parse_factor(&mut self) -> R<Node> {
        let line = self.line();
        match self.lex.token {
            Token::Int => {
                let val = self.lex.int_val()?;
                self.lex.next()?;
                Ok(Node::new(line, NodeKind::IntConstant { val, from: None }))
            }
            Token::Float => {
                let val = self.lex.float_val()?;
                self.lex.next()?;
                Ok(Node::new(line, NodeKind::FloatConstant(val)))
            }
            Token::Str => {
                let s = self.lex.string_val();
                self.lex.next()?;
                Ok(Node::new(line, NodeKind::StringConstant(s)))
            }
            Token::Nil => {
                self.lex.next()?;
                let mut giventype = None;
                if self.is_next(Token::TypeIn)? {
                    let t = self.parse_type(false, None)?;
                    giventype = Some(UnresolvedType::Nilable(Box::new(t)));
                }
                Ok(Node::new(line, NodeKind::Nil { giventype }))
            }
            Token::LeftParen => {
                self.lex.next()?;
                let n = self.parse_exp(false)?;
                self.expect(Token::RightParen)?;
                Ok(n)
            }
            Token::LeftBracket => {
                // List literal, with optional `::T` element type.
                self.lex.next()?;
                let mut args = Vec::new();
                self.parse_vector(&mut args, Token::RightBracket)?;
                let mut giventype = None;
                if self.is_next(Token::TypeIn)? {
                    let t = self.parse_type(false, None)?;
                    giventype = Some(UnresolvedType::Vector(Box::new(t)));
                }
                Ok(Node::new(line, NodeKind::Constructor { giventype, args }))
            }
            Token::Lambda => {
                self.lex.next()?;
                let parens = self.lex.token == Token::LeftParen;
                let parseargs = self.lex.token != Token::Colon;
                self.parse_function(None, false, parens, parseargs, None)
            }
            Token::Coroutine => {
                self.lex.next()?;
                let idname = self.expect_id()?;
                let f = self.st.find_function(&idname);
                let specializers = self.parse_specializers(true)?;
                let mut call =
                    self.parse_function_call(f, None, &idname, None, false, 1, specializers)?;
                if let NodeKind::GenericCall { args, .. } | NodeKind::DynCall { args, .. } =
                    &mut call.kind
                {
                    args.push(Node::new(line, NodeKind::CoClosure));
                }
                Ok(Node::new(
                    line,
                    NodeKind::CoRoutine {
                        call: Box::new(call),
                    },
                ))
            }
            Token::IntType | Token::FloatType | Token::StrType | Token::AnyType => {
                // Also built-in conversion functions; allow them as call
                // identifiers.
                let idname = self.lex.attr.clone();
                self.lex.next()?;
                if self.lex.token != Token::LeftParen {
                    return Err(self.error("type used as expression"));
                }
                self.ident_factor(&idname)
            }
            Token::TypeOf => {
                // `typeof return`, `typeof ident`, or `typeof type`.
                self.lex.next()?;
                if self.lex.token == Token::Return {
                    self.lex.next()?;
                    return Ok(Node::new(
                        line,
                        NodeKind::TypeOf {
                            child: Box::new(Node::new(line, NodeKind::DefaultVal)),
                        },
                    ));
                }
                if self.lex.token == Token::Ident {
                    if let Some(id) = self.st.lookup(&self.lex.attr) {
                        let sid = self.st.idents[id.0 as usize].cursid;
                        self.lex.next()?;
                        return Ok(Node::new(
                            line,
                            NodeKind::TypeOf {
                                child: Box::new(Node::new(line, NodeKind::IdentRef { sid })),
                            },
                        ));
                    }
                }
                let t = self.parse_type(false, None)?;
                Ok(Node::new(
                    line,
                    NodeKind::TypeOf {
                        child: Box::new(Node::new(line, NodeKind::TypeAnnotation(t))),
                    },
                ))
            }
            Token::Ident => {
                let idname = self.lex.attr.clone();
                self.lex.next()?;
                self.ident_factor(&idname)
            }
            Token::Pakfile => {
                self.lex.next()?;
                let s = self.lex.string_val();
                self.expect(Token::Str)?;
                self.pakfiles.insert(s.clone());
                Ok(Node::new(line, NodeKind::StringConstant(s)))
            }
            Token::If => {
                self.lex.next()?;
                self.parse_if()
            }
            Token::While => {
                self.lex.next()?;
                let cond = self.parse_exp(true)?;
                let body = self.parse_block(-1, false)?;
                Ok(Node::new(
                    line,
                    NodeKind::While {
                        cond: Box::new(cond),
                        body,
                    },
                ))
            }
            Token::For => {
                self.lex.next()?;
                if self.is_next(Token::LeftParen)? {
                    let iter = self.parse_exp(false)?;
                    self.expect(Token::RightParen)?;
                    let body = self.parse_block(0, true)?;
                    Ok(Node::new(
                        line,
                        NodeKind::For {
                            iter: Box::new(iter),
                            body,
                        },
                    ))
                } else {
                    let iter = self.parse_exp(true)?;
                    let body = self.parse_block(0, false)?;
                    Ok(Node::new(
                        line,
                        NodeKind::For {
                            iter: Box::new(iter),
                            body,
                        },
                    ))
                }
            }
            Token::Switch => {
                self.lex.next()?;
                let value = self.parse_exp(true)?;
                self.expect(Token::Colon)?;
                self.expect(Token::Indent)?;
                let mut have_default = false;
                let mut cases = Vec::new();
                loop {
                    let cline = self.line();
                    let mut patterns = Vec::new();
                    if self.lex.token == Token::Default {
                        if have_default {
                            return Err(
                                self.error("cannot have more than one default in a switch")
                            );
                        }
                        self.lex.next()?;
                        have_default = true;
                    } else {
                        self.expect(Token::Case)?;
                        loop {
                            let first = self.parse_deref()?;
                            let pat = if self.lex.token == Token::DotDot {
                                let rline = self.line();
                                self.lex.next()?;
                                let end = self.parse_deref()?;
                                Node::new(
                                    rline,
                                    NodeKind::Range {
                                        start: Box::new(first),
                                        end: Box::new(end),
                                    },
                                )
                            } else {
                                first
                            };
                            patterns.push(pat);
                            if self.lex.token == Token::Colon {
                                break;
                            }
                            self.expect(Token::Comma)?;
                        }
                    }
                    let body = self.parse_block(-1, false)?;
                    cases.push(Node::new(cline, NodeKind::Case { patterns, body }));
                    if !self.is_next(Token::Linefeed)? {
                        break;
                    }
                    if self.lex.token == Token::Dedent {
                        break;
                    }
                }
                self.expect(Token::Dedent)?;
                Ok(Node::new(
                    line,
                    NodeKind::Switch {
                        value: Box::new(value),
                        cases,
                    },
                ))
            }
            _ => Err(self.error(format!("illegal start of expression: {}", self.tok_str()))),
        }
    }

    fn parse_if(&mut self) -> R<Node> {
        let line = self.line();
        let cond = self.parse_exp(true)?;
        let then_block = self.parse_block(-1, false)?;
        let islf = self.is_next(Token::Linefeed)?;
        if self.is_next(Token::Elif)? {
            let eline = self.line();
            let elsep = self.parse_if()?;
            Ok(Node::new(
                line,
                NodeKind::IfElse {
                    cond: Box::new(cond),
                    then_block,
                    else_block: Block {
                        line: eline,
                        children: vec![elsep],
                    },
                },
            ))
        } else if self.is_next(Token::Else)? {
            let else_block = self.parse_block(-1, false)?;
            Ok(Node::new(
                line,
                NodeKind::IfElse {
                    cond: Box::new(cond),
                    then_block,
                    else_block,
                },
            ))
        } else {
            self.lex.push_cur();
            if islf {
                self.lex.push(Token::Linefeed);
            }
            self.lex.next()?;
            Ok(Node::new(
                line,
                NodeKind::IfThen {
                    cond: Box::new(cond),
                    then_block,
                },
            ))
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────

    /// A `:`-headed block, optionally preceded by loop-variable
    /// declarations when `parse_args` (the parenthesized `for` form).
    fn parse_block(&mut self, for_args: i32, parse_args: bool) -> R<Block> {
        self.st.block_scope_start();
        let result = self.parse_block_inner(for_args, parse_args);
        self.st.block_scope_cleanup();
        result
    }

    fn parse_block_inner(&mut self, mut for_args: i32, parse_args: bool) -> R<Block> {
        let mut pre = Vec::new();
        let mut explicit = false;
        if parse_args && self.lex.token != Token::Colon {
            let parens = self.is_next(Token::LeftParen)?;
            loop {
                let idname = self.expect_id()?;
                for_args += 1;
                explicit = true;
                let withtype = self.lex.token == Token::TypeIn;
                let id = self.def_ident(&idname, true, withtype)?;
                // Mostly to stop the warning that it is constant.
                self.st.idents[id.0 as usize].single_assignment = false;
                let mut typ = None;
                if parens && (self.lex.token == Token::Colon || withtype) {
                    self.lex.next()?;
                    let t = self.parse_type(withtype, None)?;
                    if withtype {
                        let sf = *self.st.defsubfunctionstack.last().expect("sf stack");
                        self.add_with_struct(&t, id, sf)?;
                    }
                    typ = Some(t);
                }
                let init = match for_args {
                    1 => NodeKind::ForLoopElem,
                    2 => NodeKind::ForLoopCounter,
                    _ => {
                        return Err(
                            self.error("for loop takes at most an element and index variable")
                        )
                    }
                };
                let dline = self.line();
                let sid = self.st.idents[id.0 as usize].cursid;
                pre.push(Node::new(
                    dline,
                    NodeKind::Define {
                        sids: vec![(sid, typ)],
                        child: Box::new(Node::new(dline, init)),
                    },
                ));
                if !self.is_next(Token::Comma)? {
                    break;
                }
            }
            if parens {
                self.expect(Token::RightParen)?;
            }
        }
        self.expect(Token::Colon)?;
        self.parse_body(pre, for_args, explicit)
    }

    /// An indented statement list or a one-line body.
    fn parse_body(&mut self, pre: Vec<Node>, for_nargs: i32, explicit_args: bool) -> R<Block> {
        let line = self.line();
        self.block_stack.push(BlockScope {
            children: pre,
            for_nargs,
            explicit_args,
        });
        let result = if self.lex.token == Token::Indent {
            self.lex.next().map_err(ParseError::from).and_then(|()| {
                self.parse_statements(Token::Dedent)
            })
        } else {
            self.parse_exp_stat()
                .map(|e| self.add_stmt(e))
                .and_then(|()| self.cleanup_statements())
        };
        let scope = self.block_stack.pop().expect("just pushed");
        result?;
        Ok(Block {
            line,
            children: scope.children,
        })
    }

    fn parse_vector(&mut self, out: &mut Vec<Node>, closing: Token) -> R<()> {
        if self.is_next(closing)? {
            return Ok(());
        }
        loop {
            out.push(self.parse_exp(false)?);
            if !self.is_next(Token::Comma)? || self.lex.token == closing {
                break;
            }
        }
        self.expect(closing)
    }

    /// Generic specializers before `(`: only when the identifier is clearly
    /// a function-call candidate and `<` follows with no whitespace. This is
    /// not a great way to distinguish from `<` comparisons, but the best we
    /// can do.
    fn parse_specializers(&mut self, likely_named_function: bool) -> R<Vec<UnresolvedType>> {
        let mut specializers = Vec::new();
        if likely_named_function && self.lex.whitespace_before == 0 && self.lex.token == Token::Lt
        {
            self.lex.next()?;
            loop {
                specializers.push(self.parse_type(false, None)?);
                if self.is_next(Token::Gt)? {
                    break;
                }
                self.expect(Token::Comma)?;
            }
        }
        Ok(specializers)
    }

    // ── Identifier factor disambiguation ──────────────────────────────

    fn ident_factor(&mut self, idname: &str) -> R<Node> {
        let line = self.line();
        // First see if this is a type constructor.
        let mut ctype: Option<UnresolvedType> = None;
        if self.st.lookup_struct(idname).is_some() && self.lex.token == Token::Lt {
            self.lex.undo(Token::Ident, idname);
            ctype = Some(self.parse_type(false, None)?);
        } else if self.lex.token == Token::LeftCurly {
            let udt = self.sym(self.st.struct_use(idname))?;
            ctype = Some(UnresolvedType::Spec {
                udt,
                specializers: Vec::new(),
            });
        }
        if let Some(typ) = ctype {
            return self.parse_constructor(typ, line);
        }
        // If we see `f(` the `(` starts an argument list, but for `f (` it
        // is part of an expression forming a single argument. This avoids
        // `f (1 + 2) * 3` ("* 3" part of the single arg) being read as
        // `f(1 + 2) * 3`.
        let natreg = self.natreg;
        let nf = natreg.find_native(idname);
        let f = self.st.find_function(idname);
        let e = self.st.enum_lookup(idname);
        if self.lex.token == Token::LeftParen && self.lex.whitespace_before == 0 {
            if let (Some(e), None, None) = (e, f, nf) {
                self.lex.next()?;
                let child = self.parse_exp(false)?;
                self.expect(Token::RightParen)?;
                return Ok(Node::new(
                    line,
                    NodeKind::EnumCoercion {
                        child: Box::new(child),
                        e,
                    },
                ));
            }
            return self.parse_function_call(f, nf, idname, None, false, 0, Vec::new());
        }
        let specializers =
            self.parse_specializers(f.is_some() && nf.is_none() && e.is_none())?;
        if !specializers.is_empty() {
            return self.parse_function_call(f, nf, idname, None, false, 0, specializers);
        }
        // Implicit anonymous argument.
        if idname.starts_with('_') {
            return self.implicit_arg_factor(idname, line);
        }
        // Enum value: takes priority over a parenless call of the same name.
        if let Some(ev) = self.st.enum_val_lookup(idname) {
            let val = self.st.enumvals[ev.0 as usize].val;
            return Ok(Node::new(
                line,
                NodeKind::IntConstant {
                    val,
                    from: Some(ev),
                },
            ));
        }
        let id = self.st.lookup(idname);
        // Function call without parentheses.
        if id.is_none()
            && (nf.is_some() || f.is_some())
            && self.lex.whitespace_before > 0
            && self.lex.token != Token::Linefeed
        {
            return self.parse_function_call(f, nf, idname, None, true, 0, Vec::new());
        }
        self.ident_use_or_with_struct(idname, f.is_some() || nf.is_some())
    }

    /// `Name{…}` / `Name<T,…>{…}`: field initializers, positional or keyed.
    fn parse_constructor(&mut self, typ: UnresolvedType, line: Line) -> R<Node> {
        let udt = typ.udt_of().expect("constructor type is a udt");
        self.expect(Token::LeftCurly)?;
        self.st.udts[udt.0 as usize].constructed = true;
        let nfields = self.st.udts[udt.0 as usize].fields.len();
        let mut exps: Vec<Option<Node>> = vec![None; nfields];
        let mut extras: Vec<Node> = Vec::new();
        if !self.is_next(Token::RightCurly)? {
            loop {
                let mut keyed = false;
                if self.lex.token == Token::Ident {
                    let tag = self.lex.attr.clone();
                    self.lex.next()?;
                    if self.is_next(Token::Colon)? {
                        let fidx = self
                            .st
                            .field_use(&tag)
                            .and_then(|fl| self.st.udts[udt.0 as usize].has(fl));
                        let Some(fi) = fidx else {
                            return Err(self.error(format!("unknown field: {tag}")));
                        };
                        if exps[fi].is_some() {
                            return Err(self.error(format!("field initialized twice: {tag}")));
                        }
                        exps[fi] = Some(self.parse_exp(false)?);
                        keyed = true;
                    } else {
                        self.lex.undo(Token::Ident, &tag);
                    }
                }
                if !keyed {
                    // An initializer without a tag fills the next required
                    // field that isn't set yet.
                    let e = self.parse_exp(false)?;
                    let slot = (0..nfields).find(|&fi| {
                        exps[fi].is_none()
                            && self.st.udts[udt.0 as usize].fields[fi].defaultval.is_none()
                    });
                    match slot {
                        Some(fi) => exps[fi] = Some(e),
                        // The struct may be a pre-declaration, so extra
                        // initializers are left for the typechecker.
                        None => extras.push(e),
                    }
                }
                if !self.is_next(Token::Comma)? || self.lex.token == Token::RightCurly {
                    break;
                }
            }
            self.expect(Token::RightCurly)?;
        }
        // Fill in defaults and check for missing fields.
        let mut args = Vec::new();
        for (fi, e) in exps.into_iter().enumerate() {
            if let Some(e) = e {
                args.push(e);
                continue;
            }
            let dv = self.st.udts[udt.0 as usize].fields[fi].defaultval.clone();
            match dv {
                Some(d) => args.push(d),
                None => {
                    let fld = self.st.udts[udt.0 as usize].fields[fi].field;
                    let fname = self.st.fields[fld.0 as usize].name.clone();
                    return Err(self.error(format!("field not initialized: {fname}")));
                }
            }
        }
        args.extend(extras);
        Ok(Node::new(
            line,
            NodeKind::Constructor {
                giventype: Some(typ),
                args,
            },
        ))
    }

    /// `_*` identifiers declare anonymous positional arguments of the
    /// nearest enclosing for-block or lambda.
    fn implicit_arg_factor(&mut self, idname: &str, line: Line) -> R<Node> {
        let sf = *self.st.defsubfunctionstack.last().expect("sf stack");
        let existing = self.st.lookup(idname);
        let needs_def = match existing {
            None => true,
            Some(id) => {
                let sid = self.st.idents[id.0 as usize].cursid;
                self.st.specidents[sid.0 as usize].sf_def != Some(sf)
            }
        };
        if !needs_def {
            let id = existing.expect("checked above");
            let sid = self.st.idents[id.0 as usize].cursid;
            return Ok(Node::new(line, NodeKind::IdentRef { sid }));
        }
        let for_nargs = self.block_stack.last().map_or(-1, |b| b.for_nargs);
        let explicit = self.block_stack.last().is_some_and(|b| b.explicit_args);
        if for_nargs >= 0 {
            if explicit {
                return Err(self.error(format!(
                    "cannot add implicit argument to for with existing arguments: {idname}"
                )));
            }
            if for_nargs >= 2 {
                return Err(self.error("for loop takes at most an element and index variable"));
            }
            let id = self.def_ident(idname, true, false)?;
            self.st.idents[id.0 as usize].constant = true;
            let init = if for_nargs == 0 {
                NodeKind::ForLoopElem
            } else {
                NodeKind::ForLoopCounter
            };
            let sid = self.st.idents[id.0 as usize].cursid;
            let def = Node::new(
                line,
                NodeKind::Define {
                    sids: vec![(sid, None)],
                    child: Box::new(Node::new(line, init)),
                },
            );
            let bs = self.block_stack.last_mut().expect("for body block");
            bs.children.insert(for_nargs as usize, def);
            bs.for_nargs += 1;
            return Ok(Node::new(line, NodeKind::IdentRef { sid }));
        }
        let id = self.def_ident(idname, false, false)?;
        if self.st.defsubfunctionstack.len() <= 1 {
            return Err(self.error(format!("cannot add implicit argument to top level: {idname}")));
        }
        let f = self.st.subfunctions[sf.0 as usize]
            .parent
            .expect("parent set before body");
        if !self.st.functions[f.0 as usize].anonymous {
            return Err(self.error(format!(
                "cannot use implicit argument: {idname} in named function: {}",
                self.st.functions[f.0 as usize].name
            )));
        }
        let first_is_implicit = self.st.subfunctions[sf.0 as usize]
            .args
            .first()
            .map_or(true, |a| self.st.idents[a.id.0 as usize].name.starts_with('_'));
        if !first_is_implicit {
            return Err(self.error(format!(
                "cannot mix implicit argument: {idname} with declared arguments in function"
            )));
        }
        let untyped = self.st.subfunctions[sf.0 as usize]
            .args
            .last()
            .is_some_and(|a| a.typ.is_none());
        if untyped {
            self.gen_implicit_generic_for_last_arg()?;
        }
        let sid = self.st.idents[id.0 as usize].cursid;
        Ok(Node::new(line, NodeKind::IdentRef { sid }))
    }

    fn ident_use_or_with_struct(&mut self, idname: &str, could_be_function: bool) -> R<Node> {
        let line = self.line();
        // A field of an in-scope `::` argument?
        if let Some((_, wid)) = self.sym(self.st.lookup_with_struct(idname))? {
            let sid = self.st.idents[wid.0 as usize].cursid;
            let call_id = self.new_call_id();
            let receiver = Node::new(line, NodeKind::IdentRef { sid });
            return Ok(Node::new(
                line,
                NodeKind::GenericCall {
                    name: idname.to_string(),
                    sf: None,
                    dotted: true,
                    specializers: Vec::new(),
                    args: vec![receiver],
                    call_id,
                },
            ));
        }
        // It's likely a regular variable.
        let Some(id) = self.st.lookup(idname) else {
            return Err(self.error(if could_be_function {
                format!("can't use named function as value: {idname}")
            } else {
                format!("unknown identifier: {idname}")
            }));
        };
        let sid = self.st.idents[id.0 as usize].cursid;
        Ok(Node::new(line, NodeKind::IdentRef { sid }))
    }
}

#[cfg(test)]
mod tests {
    use crate::{parse_with_natives, NativeRegistry, SymbolTable};

    use super::*;

    fn parse_ok(src: &str) -> (ParseOutput, SymbolTable) {
        let mut st = SymbolTable::new();
        let natreg = NativeRegistry::core();
        let out = parse_with_natives(src, "test.lute", &mut st, &natreg)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        (out, st)
    }

    fn parse_err(src: &str) -> ParseError {
        let mut st = SymbolTable::new();
        let natreg = NativeRegistry::core();
        match parse_with_natives(src, "test.lute", &mut st, &natreg) {
            Ok(_) => panic!("expected a parse error"),
            Err(e) => e,
        }
    }

    fn top_children(out: &ParseOutput, st: &SymbolTable) -> Vec<NodeKind> {
        let NodeKind::Call { sf, .. } = &out.root.kind else {
            panic!("root is not a call");
        };
        st.subfunctions[sf.0 as usize]
            .body
            .as_ref()
            .expect("body")
            .children
            .iter()
            .map(|n| n.kind.clone())
            .collect()
    }

    #[test]
    fn root_body_ends_in_return() {
        let (out, st) = parse_ok("1 + 2");
        let children = top_children(&out, &st);
        assert!(matches!(children.last(), Some(NodeKind::Return { .. })));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let (out, st) = parse_ok("1 + 2 * 3");
        let children = top_children(&out, &st);
        let NodeKind::Return { child, .. } = &children[0] else {
            panic!("expected return, got {:?}", children[0]);
        };
        let NodeKind::Binary { op, rhs, .. } = &child.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Plus);
        assert!(matches!(
            rhs.kind,
            NodeKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn seq_statement_with_semicolon() {
        let (out, st) = parse_ok("print(1); print(2)");
        let children = top_children(&out, &st);
        let NodeKind::Return { child, .. } = &children[0] else {
            panic!("expected return");
        };
        assert!(matches!(child.kind, NodeKind::Seq { .. }));
    }

    #[test]
    fn semicolon_before_linefeed_is_an_error() {
        let err = parse_err("print(1);\nprint(2)");
        assert!(err.message.contains("not a statement terminator"));
    }

    #[test]
    fn return_must_be_last() {
        let err = parse_err("fun f() -> int:\n    return 1\n    2\nf()");
        assert!(err.message.contains("return must be last in block"));
    }

    #[test]
    fn bare_definition_cannot_end_inner_block() {
        let err = parse_err("fun f():\n    var x = 1\nf()");
        assert!(err.message.contains("can't be a definition"));
    }

    #[test]
    fn trailing_definition_at_eof_gets_a_value() {
        let (out, st) = parse_ok("var x = 1");
        let children = top_children(&out, &st);
        assert!(matches!(
            children.last(),
            Some(NodeKind::Return { .. })
        ));
        let NodeKind::Return { child, .. } = children.last().unwrap() else {
            unreachable!()
        };
        assert!(matches!(
            child.kind,
            NodeKind::IntConstant { val: 0, .. }
        ));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let err = parse_err("nope");
        assert!(err.message.contains("unknown identifier: nope"));
    }

    #[test]
    fn named_function_as_value_has_distinct_error() {
        let err = parse_err("fun f(): 0\nvar x = f");
        assert!(err.message.contains("can't use named function as value"));
    }

    #[test]
    fn namespace_must_be_at_file_scope() {
        let err = parse_err("fun f():\n    namespace g\nf()");
        assert!(err.message.contains("namespace must be used at file scope"));
    }

    #[test]
    fn pakfiles_are_collected() {
        let (out, _) = parse_ok("var p = pakfile \"data.bin\"\nprint(p)");
        assert!(out.pakfiles.contains("data.bin"));
    }

    #[test]
    fn builtin_override_is_rejected() {
        let err = parse_err("fun print(x): 0");
        assert!(err.message.contains("cannot override built-in function"));
    }

    #[test]
    fn log_assign_marks_log_vars() {
        let (_, st) = parse_ok("var x ?= 1\nprint(x)");
        let id = st.lookup_any("x").expect("x defined");
        assert!(st.idents[id.0 as usize].logvar);
    }
}
