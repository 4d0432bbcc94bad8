//! Symbol table: scopes, identifiers, functions, user-defined types, shared
//! fields, enums, and generic type variables.
//!
//! Entities live in flat tables indexed by typed ids; lookup maps track what
//! is currently visible. Declarations parsed out of scope-local blocks are
//! unregistered from the maps when the block ends, but their entities (and
//! the AST referencing them) stay alive for downstream phases.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ast::Block;
use crate::typeref::UnresolvedType;

pub type SymResult<T> = Result<T, String>;

// ── Typed ids ────────────────────────────────────────────────────────

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);
    };
}

define_id!(IdentId);
define_id!(
    /// One binding of an identifier within its defining sub-function.
    SpecIdentId
);
define_id!(FunId);
define_id!(
    /// One overload of a function.
    SfId
);
define_id!(UdtId);
define_id!(FieldId);
define_id!(EnumId);
define_id!(EnumValId);
define_id!(TypeVarId);

// ── Entities ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifetime {
    Undef,
    Borrow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub scopelevel: usize,
    pub constant: bool,
    pub isprivate: bool,
    pub single_assignment: bool,
    pub static_constant: bool,
    pub logvar: bool,
    pub fileidx: u32,
    pub cursid: SpecIdentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecIdent {
    pub id: IdentId,
    pub sf_def: Option<SfId>,
    pub lifetime: Lifetime,
}

/// An argument as registered into its sub-function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arg {
    pub id: IdentId,
    pub sid: SpecIdentId,
    pub typ: Option<UnresolvedType>,
    pub withtype: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SfGeneric {
    pub tv: TypeVarId,
    pub giventype: Option<UnresolvedType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubFunction {
    pub parent: Option<FunId>,
    pub args: Vec<Arg>,
    pub locals: Vec<Arg>,
    pub generics: Vec<SfGeneric>,
    /// Parallel to `args`: the type syntax as written (or generated).
    pub giventypes: Vec<Option<UnresolvedType>>,
    pub returngiventype: Option<UnresolvedType>,
    pub returntype: Option<UnresolvedType>,
    /// Number of return values the body is required to produce.
    pub reqret: usize,
    pub method_of: Option<UdtId>,
    pub typechecked: bool,
    pub body: Option<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub overloads: Vec<SfId>,
    /// Sibling with the same name but different arity.
    pub sibf: Option<FunId>,
    pub anonymous: bool,
    /// True for function-type declarations (no body).
    pub istype: bool,
    pub isprivate: bool,
    pub scopelevel: usize,
    pub fileidx: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdtGeneric {
    pub tv: TypeVarId,
    pub giventype: Option<UnresolvedType>,
    pub resolvedtype: Option<UnresolvedType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub field: FieldId,
    pub giventype: Option<UnresolvedType>,
    pub defaultval: Option<crate::ast::Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Udt {
    pub name: String,
    pub is_struct: bool,
    pub fields: Vec<FieldDef>,
    pub generics: Vec<UdtGeneric>,
    pub resolved_superclass: Option<UdtId>,
    pub given_superclass: Option<UnresolvedType>,
    pub is_generic: bool,
    pub predeclaration: bool,
    pub isprivate: bool,
    pub constructed: bool,
    pub fileidx: u32,
}

impl Udt {
    /// Index of a shared field within this UDT, if present.
    #[must_use]
    pub fn has(&self, field: FieldId) -> Option<usize> {
        self.fields.iter().position(|f| f.field == field)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedField {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enum {
    pub name: String,
    pub vals: Vec<EnumValId>,
    pub flags: bool,
    pub isprivate: bool,
    pub fileidx: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumVal {
    pub name: String,
    pub val: i64,
    pub e: EnumId,
    pub isprivate: bool,
    pub fileidx: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeVar {
    pub name: String,
}

/// One entry of the with-struct stack: a `::` argument whose fields are in
/// scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WithStackElem {
    pub udt: Option<UdtId>,
    pub id: Option<IdentId>,
    pub sf: Option<SfId>,
}

/// What a frame of the bound-typevars stack refers to. Stored by id rather
/// than by reference because the generics vectors grow while bound.
#[derive(Debug, Clone, Copy)]
pub enum BoundCtx {
    Sf(SfId),
    Udt(UdtId),
}

// ── The table ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub idents: Vec<Ident>,
    pub specidents: Vec<SpecIdent>,
    pub functions: Vec<Function>,
    pub subfunctions: Vec<SubFunction>,
    pub udts: Vec<Udt>,
    pub fields: Vec<SharedField>,
    pub enums: Vec<Enum>,
    pub enumvals: Vec<EnumVal>,
    pub typevars: Vec<TypeVar>,

    ident_map: HashMap<String, Vec<IdentId>>,
    function_map: HashMap<String, FunId>,
    udt_map: HashMap<String, UdtId>,
    field_map: HashMap<String, FieldId>,
    enum_map: HashMap<String, EnumId>,
    enumval_map: HashMap<String, EnumValId>,

    /// One mark per open scope: the ident-stack size at scope entry.
    pub scopelevels: Vec<usize>,
    identstack: Vec<IdentId>,
    pub defsubfunctionstack: Vec<SfId>,
    pub bound_typevars_stack: Vec<BoundCtx>,
    withstack: Vec<WithStackElem>,
    withstacklevels: Vec<usize>,

    pub current_namespace: String,
    pub current_fileidx: u32,
    pub toplevel: Option<SfId>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[must_use]
    pub fn ident_of(&self, sid: SpecIdentId) -> IdentId {
        self.specidents[sid.0 as usize].id
    }

    #[must_use]
    pub fn ident_name(&self, id: IdentId) -> &str {
        &self.idents[id.0 as usize].name
    }

    #[must_use]
    pub fn sid_name(&self, sid: SpecIdentId) -> &str {
        self.ident_name(self.ident_of(sid))
    }

    /// Arity of a function (its first overload's argument count).
    #[must_use]
    pub fn fun_nargs(&self, f: FunId) -> usize {
        self.functions[f.0 as usize]
            .overloads
            .first()
            .map_or(usize::MAX, |sf| self.subfunctions[sf.0 as usize].args.len())
    }

    // ── Scopes ────────────────────────────────────────────────────────

    /// Open a function scope and create its sub-function.
    pub fn function_scope_start(&mut self) -> SfId {
        let sf = SfId(self.subfunctions.len() as u32);
        self.subfunctions.push(SubFunction {
            parent: None,
            args: Vec::new(),
            locals: Vec::new(),
            generics: Vec::new(),
            giventypes: Vec::new(),
            returngiventype: None,
            returntype: None,
            reqret: 1,
            method_of: None,
            typechecked: false,
            body: None,
        });
        self.defsubfunctionstack.push(sf);
        self.scope_start();
        sf
    }

    pub fn function_scope_cleanup(&mut self) {
        self.defsubfunctionstack.pop();
        self.scope_cleanup();
    }

    pub fn block_scope_start(&mut self) {
        self.scope_start();
    }

    pub fn block_scope_cleanup(&mut self) {
        self.scope_cleanup();
    }

    fn scope_start(&mut self) {
        self.scopelevels.push(self.identstack.len());
        self.withstacklevels.push(self.withstack.len());
    }

    fn scope_cleanup(&mut self) {
        let mark = self.scopelevels.pop().expect("scope underflow");
        while self.identstack.len() > mark {
            let id = self.identstack.pop().expect("just checked");
            let name = self.idents[id.0 as usize].name.clone();
            if let Some(stack) = self.ident_map.get_mut(&name) {
                stack.pop();
                if stack.is_empty() {
                    self.ident_map.remove(&name);
                }
            }
        }
        let wmark = self.withstacklevels.pop().expect("with-stack underflow");
        self.withstack.truncate(wmark);
    }

    // ── Identifiers ───────────────────────────────────────────────────

    /// Innermost visible binding of `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<IdentId> {
        self.ident_map.get(name).and_then(|s| s.last().copied())
    }

    /// Any binding of `name`, in scope or not. Used for coroutine field
    /// reads, which can only be checked once the coroutine is typechecked.
    #[must_use]
    pub fn lookup_any(&self, name: &str) -> Option<IdentId> {
        self.lookup(name).or_else(|| {
            self.idents
                .iter()
                .rposition(|i| i.name == name)
                .map(|i| IdentId(i as u32))
        })
    }

    /// Define `name` in the current scope. `islocal` distinguishes block
    /// locals from function arguments; arguments are registered into the
    /// current sub-function's argument list.
    pub fn lookup_def(&mut self, name: &str, islocal: bool, withtype: bool) -> SymResult<IdentId> {
        let mark = self.scopelevels.last().copied().unwrap_or(0);
        for &prev in &self.identstack[mark..] {
            if self.idents[prev.0 as usize].name == name {
                return Err(format!("identifier redefinition or shadowing: {name}"));
            }
        }
        let id = IdentId(self.idents.len() as u32);
        let sid = SpecIdentId(self.specidents.len() as u32);
        self.specidents.push(SpecIdent {
            id,
            sf_def: self.defsubfunctionstack.last().copied(),
            lifetime: Lifetime::Undef,
        });
        self.idents.push(Ident {
            name: name.to_string(),
            scopelevel: self.scopelevels.len(),
            constant: false,
            isprivate: false,
            single_assignment: true,
            static_constant: false,
            logvar: false,
            fileidx: self.current_fileidx,
            cursid: sid,
        });
        self.identstack.push(id);
        self.ident_map.entry(name.to_string()).or_default().push(id);
        if let Some(&sf) = self.defsubfunctionstack.last() {
            let arg = Arg {
                id,
                sid,
                typ: None,
                withtype,
            };
            if islocal {
                self.subfunctions[sf.0 as usize].locals.push(arg);
            } else {
                self.subfunctions[sf.0 as usize].args.push(arg);
            }
        }
        Ok(id)
    }

    /// Record an assignment to an identifier.
    pub fn assign_ident(&mut self, sid: SpecIdentId) {
        let id = self.ident_of(sid);
        self.idents[id.0 as usize].single_assignment = false;
    }

    pub fn make_log_var(&mut self, id: IdentId) {
        self.idents[id.0 as usize].logvar = true;
    }

    // ── Namespacing ───────────────────────────────────────────────────

    /// Qualify a top-level declaration name with the current namespace.
    #[must_use]
    pub fn maybe_namespace(&self, name: &str, qualify: bool) -> String {
        if qualify && !self.current_namespace.is_empty() && self.scopelevels.len() == 1 {
            format!("{}_{}", self.current_namespace, name)
        } else {
            name.to_string()
        }
    }

    fn ns_get<'m, T: Copy>(&self, map: &'m HashMap<String, T>, name: &str) -> Option<T> {
        if !self.current_namespace.is_empty() {
            let qualified = format!("{}_{}", self.current_namespace, name);
            if let Some(v) = map.get(&qualified) {
                return Some(*v);
            }
        }
        map.get(name).copied()
    }

    // ── Functions ─────────────────────────────────────────────────────

    /// Create a function entity without registering a name binding.
    /// Anonymous functions get a generated name.
    pub fn create_function(&mut self, name: &str) -> FunId {
        let fname = if name.is_empty() {
            format!("function{}", self.functions.len())
        } else {
            name.to_string()
        };
        let f = FunId(self.functions.len() as u32);
        self.functions.push(Function {
            name: fname,
            overloads: Vec::new(),
            sibf: None,
            anonymous: false,
            istype: false,
            isprivate: false,
            scopelevel: self.scopelevels.len(),
            fileidx: self.current_fileidx,
        });
        f
    }

    /// Find-or-create the function `name` takes for an overload of `nargs`
    /// arguments. Same name, different arity lands on a sibling function.
    pub fn function_decl(&mut self, name: &str, nargs: usize) -> FunId {
        if let Some(&head) = self.function_map.get(name) {
            let mut f = head;
            loop {
                if self.fun_nargs(f) == nargs {
                    return f;
                }
                match self.functions[f.0 as usize].sibf {
                    Some(next) => f = next,
                    None => break,
                }
            }
            let newf = self.create_function(name);
            self.functions[f.0 as usize].sibf = Some(newf);
            newf
        } else {
            let f = self.create_function(name);
            self.function_map.insert(name.to_string(), f);
            f
        }
    }

    /// Look up a function by (possibly namespaced) name. Returns the head of
    /// its sibling chain.
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<FunId> {
        self.ns_get(&self.function_map, name)
    }

    // ── User-defined types ────────────────────────────────────────────

    /// Declare (or complete a pre-declaration of) a struct or class.
    pub fn struct_decl(&mut self, name: &str, is_struct: bool) -> SymResult<UdtId> {
        if let Some(udt) = self.udt_map.get(name).copied() {
            let u = &mut self.udts[udt.0 as usize];
            if !u.predeclaration {
                return Err(format!("type previously declared: {name}"));
            }
            if u.is_struct != is_struct {
                return Err(format!("pre-declaration of {name} is of different kind"));
            }
            u.predeclaration = false;
            return Ok(udt);
        }
        let udt = UdtId(self.udts.len() as u32);
        self.udts.push(Udt {
            name: name.to_string(),
            is_struct,
            fields: Vec::new(),
            generics: Vec::new(),
            resolved_superclass: None,
            given_superclass: None,
            is_generic: false,
            predeclaration: false,
            isprivate: false,
            constructed: false,
            fileidx: self.current_fileidx,
        });
        self.udt_map.insert(name.to_string(), udt);
        Ok(udt)
    }

    #[must_use]
    pub fn lookup_struct(&self, name: &str) -> Option<UdtId> {
        self.ns_get(&self.udt_map, name)
    }

    pub fn struct_use(&self, name: &str) -> SymResult<UdtId> {
        self.lookup_struct(name)
            .ok_or_else(|| format!("unknown type: {name}"))
    }

    /// Copy a fully parsed UDT's shape into `dst` (a specialization shell).
    pub fn clone_into(&mut self, dst: UdtId, src: UdtId) {
        let (name, fileidx, isprivate) = {
            let d = &self.udts[dst.0 as usize];
            (d.name.clone(), d.fileidx, d.isprivate)
        };
        let mut copy = self.udts[src.0 as usize].clone();
        copy.name = name;
        copy.fileidx = fileidx;
        copy.isprivate = isprivate;
        self.udts[dst.0 as usize] = copy;
    }

    // ── Shared fields ─────────────────────────────────────────────────

    pub fn field_decl(&mut self, name: &str) -> FieldId {
        if let Some(&f) = self.field_map.get(name) {
            return f;
        }
        let f = FieldId(self.fields.len() as u32);
        self.fields.push(SharedField {
            name: name.to_string(),
        });
        self.field_map.insert(name.to_string(), f);
        f
    }

    #[must_use]
    pub fn field_use(&self, name: &str) -> Option<FieldId> {
        self.field_map.get(name).copied()
    }

    // ── Enums ─────────────────────────────────────────────────────────

    pub fn enum_decl(&mut self, name: &str) -> SymResult<EnumId> {
        if self.enum_map.contains_key(name) {
            return Err(format!("double declaration of enum: {name}"));
        }
        let e = EnumId(self.enums.len() as u32);
        self.enums.push(Enum {
            name: name.to_string(),
            vals: Vec::new(),
            flags: false,
            isprivate: false,
            fileidx: self.current_fileidx,
        });
        self.enum_map.insert(name.to_string(), e);
        Ok(e)
    }

    #[must_use]
    pub fn enum_lookup(&self, name: &str) -> Option<EnumId> {
        self.ns_get(&self.enum_map, name)
    }

    pub fn enum_val_decl(&mut self, name: &str, e: EnumId, val: i64) -> SymResult<EnumValId> {
        if self.enumval_map.contains_key(name) {
            return Err(format!("double declaration of enum value: {name}"));
        }
        let ev = EnumValId(self.enumvals.len() as u32);
        self.enumvals.push(EnumVal {
            name: name.to_string(),
            val,
            e,
            isprivate: false,
            fileidx: self.current_fileidx,
        });
        self.enumval_map.insert(name.to_string(), ev);
        self.enums[e.0 as usize].vals.push(ev);
        Ok(ev)
    }

    #[must_use]
    pub fn enum_val_lookup(&self, name: &str) -> Option<EnumValId> {
        self.ns_get(&self.enumval_map, name)
    }

    // ── Generic type variables ────────────────────────────────────────

    pub fn new_generic(&mut self, name: &str) -> TypeVarId {
        let tv = TypeVarId(self.typevars.len() as u32);
        self.typevars.push(TypeVar {
            name: name.to_string(),
        });
        tv
    }

    /// Resolve a name against the stack of in-scope generic parameters,
    /// innermost first.
    #[must_use]
    pub fn lookup_bound_typevar(&self, name: &str) -> Option<TypeVarId> {
        for ctx in self.bound_typevars_stack.iter().rev() {
            let found = match ctx {
                BoundCtx::Sf(sf) => self.subfunctions[sf.0 as usize]
                    .generics
                    .iter()
                    .map(|g| g.tv)
                    .find(|tv| self.typevars[tv.0 as usize].name == name),
                BoundCtx::Udt(udt) => self.udts[udt.0 as usize]
                    .generics
                    .iter()
                    .map(|g| g.tv)
                    .find(|tv| self.typevars[tv.0 as usize].name == name),
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }

    // ── With-struct stack ─────────────────────────────────────────────

    pub fn add_with_struct(
        &mut self,
        typ: &UnresolvedType,
        id: IdentId,
        sf: SfId,
    ) -> SymResult<()> {
        let udt = typ
            .udt_of()
            .ok_or_else(|| ":: must be used with a class type".to_string())?;
        let wmark = self.withstacklevels.last().copied().unwrap_or(0);
        if self.withstack[wmark..].iter().any(|w| w.udt == Some(udt)) {
            return Err(format!(
                "type used twice in the same scope with ::: {}",
                self.udts[udt.0 as usize].name
            ));
        }
        self.withstack.push(WithStackElem {
            udt: Some(udt),
            id: Some(id),
            sf: Some(sf),
        });
        Ok(())
    }

    /// The innermost with-struct context, or an empty element.
    #[must_use]
    pub fn with_stack_back(&self) -> WithStackElem {
        self.withstack.last().cloned().unwrap_or_default()
    }

    /// Find a field of some in-scope `::` argument's type.
    pub fn lookup_with_struct(&self, name: &str) -> SymResult<Option<(FieldId, IdentId)>> {
        let Some(fld) = self.field_use(name) else {
            return Ok(None);
        };
        let mut found = None;
        for w in self.withstack.iter().rev() {
            let (Some(udt), Some(id)) = (w.udt, w.id) else {
                continue;
            };
            if self.udts[udt.0 as usize].has(fld).is_some() {
                if found.is_some() {
                    return Err(format!("access to ambiguous field: {name}"));
                }
                found = Some((fld, id));
            }
        }
        Ok(found)
    }

    // ── Scope-exit unregistration ─────────────────────────────────────

    pub fn unregister_enum(&mut self, e: EnumId) {
        let name = self.enums[e.0 as usize].name.clone();
        if self.enum_map.get(&name) == Some(&e) {
            self.enum_map.remove(&name);
        }
        for &ev in &self.enums[e.0 as usize].vals {
            let evname = self.enumvals[ev.0 as usize].name.clone();
            if self.enumval_map.get(&evname) == Some(&ev) {
                self.enumval_map.remove(&evname);
            }
        }
    }

    pub fn unregister_udt(&mut self, udt: UdtId) {
        let name = self.udts[udt.0 as usize].name.clone();
        if self.udt_map.get(&name) == Some(&udt) {
            self.udt_map.remove(&name);
        }
    }

    pub fn unregister_function(&mut self, f: FunId) {
        let name = self.functions[f.0 as usize].name.clone();
        if self.function_map.get(&name) == Some(&f) {
            self.function_map.remove(&name);
        }
    }

    /// Drop the ended include file's private symbols from the lookup maps.
    /// Their declarations stay live in the AST. The namespace is per-file
    /// and does not leak into the including file.
    pub fn end_of_include(&mut self) {
        self.current_namespace.clear();
        let fileidx = self.current_fileidx;
        let enums = &self.enums;
        self.enum_map
            .retain(|_, e| !(enums[e.0 as usize].isprivate && enums[e.0 as usize].fileidx == fileidx));
        let enumvals = &self.enumvals;
        self.enumval_map.retain(|_, ev| {
            !(enumvals[ev.0 as usize].isprivate && enumvals[ev.0 as usize].fileidx == fileidx)
        });
        let udts = &self.udts;
        self.udt_map
            .retain(|_, u| !(udts[u.0 as usize].isprivate && udts[u.0 as usize].fileidx == fileidx));
        let functions = &self.functions;
        self.function_map.retain(|_, f| {
            !(functions[f.0 as usize].isprivate && functions[f.0 as usize].fileidx == fileidx)
        });
        let idents = &self.idents;
        let identstack = &mut self.identstack;
        self.ident_map.retain(|_, stack| {
            stack.retain(|id| {
                let i = &idents[id.0 as usize];
                let drop = i.isprivate && i.fileidx == fileidx;
                if drop {
                    identstack.retain(|s| s != id);
                }
                !drop
            });
            !stack.is_empty()
        });
        for mark in &mut self.scopelevels {
            *mark = (*mark).min(identstack.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_across_scopes_restores_outer_binding() {
        let mut st = SymbolTable::new();
        st.function_scope_start();
        let outer = st.lookup_def("x", true, false).unwrap();
        st.block_scope_start();
        let inner = st.lookup_def("x", true, false).unwrap();
        assert_ne!(outer, inner);
        assert_eq!(st.lookup("x"), Some(inner));
        st.block_scope_cleanup();
        assert_eq!(st.lookup("x"), Some(outer));
    }

    #[test]
    fn redefinition_in_same_scope_is_rejected() {
        let mut st = SymbolTable::new();
        st.function_scope_start();
        st.lookup_def("x", true, false).unwrap();
        let err = st.lookup_def("x", true, false).unwrap_err();
        assert!(err.contains("redefinition"));
    }

    #[test]
    fn sibling_functions_by_arity() {
        let mut st = SymbolTable::new();
        st.function_scope_start();
        let f1 = st.function_decl("f", 1);
        let sf1 = st.function_scope_start();
        st.subfunctions[sf1.0 as usize].args.push(Arg {
            id: IdentId(0),
            sid: SpecIdentId(0),
            typ: None,
            withtype: false,
        });
        st.functions[f1.0 as usize].overloads.push(sf1);
        st.function_scope_cleanup();
        // Same name, same arity: the same function. Different arity: sibling.
        assert_eq!(st.function_decl("f", 1), f1);
        let f2 = st.function_decl("f", 2);
        assert_ne!(f1, f2);
        assert_eq!(st.functions[f1.0 as usize].sibf, Some(f2));
        assert_eq!(st.find_function("f"), Some(f1));
    }

    #[test]
    fn namespaced_lookup_prefers_qualified_name() {
        let mut st = SymbolTable::new();
        st.function_scope_start();
        st.current_namespace = "gfx".to_string();
        let name = st.maybe_namespace("draw", true);
        assert_eq!(name, "gfx_draw");
        let f = st.function_decl(&name, 0);
        assert_eq!(st.find_function("draw"), Some(f));
        assert_eq!(st.find_function("gfx_draw"), Some(f));
    }
}
