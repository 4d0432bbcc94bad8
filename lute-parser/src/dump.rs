//! Textual dump of parsed programs.
//!
//! `dump_node` renders a node back to canonical surface syntax (binary
//! operators fully parenthesized, so dumping a re-parsed dump is stable);
//! `dump_all` lists every function overload with its signature and body.

use crate::ast::{Block, Node, NodeKind, UnaryOp};
use crate::symbols::{SfId, SymbolTable};
use crate::typeref::UnresolvedType;

/// Render a type reference the way it is written in source.
#[must_use]
pub fn type_name(st: &SymbolTable, t: &UnresolvedType) -> String {
    match t {
        UnresolvedType::Int => "int".to_string(),
        UnresolvedType::Float => "float".to_string(),
        UnresolvedType::Str => "string".to_string(),
        UnresolvedType::Any => "any".to_string(),
        UnresolvedType::Void => "void".to_string(),
        UnresolvedType::Resource => "resource".to_string(),
        UnresolvedType::Coroutine => "coroutine".to_string(),
        UnresolvedType::Vector(e) => format!("[{}]", type_name(st, e)),
        UnresolvedType::Nilable(e) => format!("{}?", type_name(st, e)),
        UnresolvedType::TypeVar(tv) => st.typevars[tv.0 as usize].name.clone(),
        UnresolvedType::Udt(u) => st.udts[u.0 as usize].name.clone(),
        UnresolvedType::Spec { udt, specializers } => {
            let inner: Vec<String> = specializers.iter().map(|s| type_name(st, s)).collect();
            if inner.is_empty() {
                st.udts[udt.0 as usize].name.clone()
            } else {
                format!("{}<{}>", st.udts[udt.0 as usize].name, inner.join(", "))
            }
        }
        UnresolvedType::FunType(sf) => {
            let f = st.subfunctions[sf.0 as usize].parent.expect("parented");
            st.functions[f.0 as usize].name.clone()
        }
        UnresolvedType::Enum(e) => st.enums[e.0 as usize].name.clone(),
        UnresolvedType::Tuple(ts) => {
            let inner: Vec<String> = ts.iter().map(|t| type_name(st, t)).collect();
            format!("({})", inner.join(", "))
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

struct Dumper<'a> {
    st: &'a SymbolTable,
    out: String,
}

impl<'a> Dumper<'a> {
    fn write_indent(&mut self, indent: usize) {
        for _ in 0..indent {
            self.out.push(' ');
        }
    }

    /// One statement (plus trailing newline) at the given indent.
    fn stmt(&mut self, n: &Node, indent: usize) {
        match &n.kind {
            NodeKind::IfThen { cond, then_block } => {
                self.write_indent(indent);
                self.out.push_str("if ");
                self.out.push_str(&self.expr(cond));
                self.out.push_str(":\n");
                self.block(then_block, indent + 4);
            }
            NodeKind::IfElse {
                cond,
                then_block,
                else_block,
            } => {
                self.write_indent(indent);
                self.out.push_str("if ");
                self.out.push_str(&self.expr(cond));
                self.out.push_str(":\n");
                self.block(then_block, indent + 4);
                self.write_indent(indent);
                self.out.push_str("else:\n");
                self.block(else_block, indent + 4);
            }
            NodeKind::While { cond, body } => {
                self.write_indent(indent);
                self.out.push_str("while ");
                self.out.push_str(&self.expr(cond));
                self.out.push_str(":\n");
                self.block(body, indent + 4);
            }
            NodeKind::For { iter, body } => {
                self.write_indent(indent);
                self.out.push_str("for(");
                self.out.push_str(&self.expr(iter));
                self.out.push_str("):\n");
                self.block(body, indent + 4);
            }
            NodeKind::Switch { value, cases } => {
                self.write_indent(indent);
                self.out.push_str("switch ");
                self.out.push_str(&self.expr(value));
                self.out.push_str(":\n");
                for c in cases {
                    if let NodeKind::Case { patterns, body } = &c.kind {
                        self.write_indent(indent + 4);
                        if patterns.is_empty() {
                            self.out.push_str("default:\n");
                        } else {
                            let pats: Vec<String> =
                                patterns.iter().map(|p| self.expr(p)).collect();
                            self.out.push_str("case ");
                            self.out.push_str(&pats.join(", "));
                            self.out.push_str(":\n");
                        }
                        self.block(body, indent + 8);
                    }
                }
            }
            NodeKind::Return { child, .. } => {
                // An implicit return wrapping a statement form dumps as the
                // statement; re-parsing wraps it back identically.
                if matches!(
                    child.kind,
                    NodeKind::IfThen { .. }
                        | NodeKind::IfElse { .. }
                        | NodeKind::While { .. }
                        | NodeKind::For { .. }
                        | NodeKind::Switch { .. }
                ) {
                    self.stmt(child, indent);
                    return;
                }
                self.write_indent(indent);
                if matches!(child.kind, NodeKind::DefaultVal) {
                    self.out.push_str("return\n");
                } else {
                    self.out.push_str("return ");
                    self.out.push_str(&self.expr(child));
                    self.out.push('\n');
                }
            }
            NodeKind::Define { sids, child } => {
                self.write_indent(indent);
                let names: Vec<&str> = sids.iter().map(|(sid, _)| self.st.sid_name(*sid)).collect();
                let constant = sids.first().is_some_and(|(sid, _)| {
                    self.st.idents[self.st.ident_of(*sid).0 as usize].constant
                });
                self.out
                    .push_str(if constant { "const " } else { "var " });
                self.out.push_str(&names.join(", "));
                self.out.push_str(" = ");
                self.out.push_str(&self.expr(child));
                self.out.push('\n');
            }
            _ => {
                self.write_indent(indent);
                let e = self.expr(n);
                self.out.push_str(&e);
                self.out.push('\n');
            }
        }
    }

    fn block(&mut self, b: &Block, indent: usize) {
        for child in &b.children {
            self.stmt(child, indent);
        }
    }

    /// One expression, inline.
    fn expr(&self, n: &Node) -> String {
        match &n.kind {
            NodeKind::IntConstant { val, .. } => val.to_string(),
            NodeKind::FloatConstant(v) => format!("{v:?}"),
            NodeKind::StringConstant(s) => escape_string(s),
            NodeKind::Nil { giventype } => match giventype {
                Some(UnresolvedType::Nilable(inner)) => {
                    format!("nil::{}", type_name(self.st, inner))
                }
                _ => "nil".to_string(),
            },
            NodeKind::DefaultVal | NodeKind::CoClosure => String::new(),
            NodeKind::ForLoopElem => "<for-elem>".to_string(),
            NodeKind::ForLoopCounter => "<for-counter>".to_string(),
            NodeKind::IdentRef { sid } => self.st.sid_name(*sid).to_string(),
            NodeKind::TypeAnnotation(t) => type_name(self.st, t),
            NodeKind::EnumRef { e } => self.st.enums[e.0 as usize].name.clone(),
            NodeKind::UdtRef { udt } => self.st.udts[udt.0 as usize].name.clone(),
            NodeKind::FunRef { sf } => self.funval(*sf),
            NodeKind::Constructor { giventype, args } => {
                let inner: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                match giventype {
                    Some(t @ (UnresolvedType::Udt(_) | UnresolvedType::Spec { .. })) => {
                        format!("{}{{{}}}", type_name(self.st, t), inner.join(", "))
                    }
                    Some(UnresolvedType::Vector(elem)) => {
                        format!("[{}]::{}", inner.join(", "), type_name(self.st, elem))
                    }
                    _ => format!("[{}]", inner.join(", ")),
                }
            }
            NodeKind::Binary { op, lhs, rhs } => {
                format!("({} {} {})", self.expr(lhs), op.as_str(), self.expr(rhs))
            }
            NodeKind::Unary { op, child } => {
                let c = self.expr(child);
                match op {
                    UnaryOp::UnaryMinus => format!("-{c}"),
                    UnaryOp::Not => format!("not {c}"),
                    UnaryOp::Negate => format!("~{c}"),
                    UnaryOp::PreIncr => format!("++{c}"),
                    UnaryOp::PreDecr => format!("--{c}"),
                    UnaryOp::PostIncr => format!("{c}++"),
                    UnaryOp::PostDecr => format!("{c}--"),
                }
            }
            NodeKind::Assign { lhs, rhs } => {
                format!("{} = {}", self.expr(lhs), self.expr(rhs))
            }
            NodeKind::CompoundAssign { op, lhs, rhs } => {
                format!("{} {} {}", self.expr(lhs), op.as_str(), self.expr(rhs))
            }
            NodeKind::Indexing { object, index } => {
                format!("{}[{}]", self.expr(object), self.expr(index))
            }
            NodeKind::CoDot { coroutine, ident } => {
                format!("{}->{}", self.expr(coroutine), self.expr(ident))
            }
            NodeKind::GenericCall {
                name,
                dotted,
                specializers,
                args,
                ..
            } => {
                let spec = if specializers.is_empty() {
                    String::new()
                } else {
                    let inner: Vec<String> =
                        specializers.iter().map(|s| type_name(self.st, s)).collect();
                    format!("<{}>", inner.join(", "))
                };
                let rendered: Vec<String> = args
                    .iter()
                    .map(|a| self.expr(a))
                    .filter(|s| !s.is_empty())
                    .collect();
                if *dotted {
                    let recv = rendered.first().cloned().unwrap_or_default();
                    if rendered.len() == 1 {
                        format!("{recv}.{name}")
                    } else {
                        format!("{recv}.{name}{spec}({})", rendered[1..].join(", "))
                    }
                } else {
                    format!("{name}{spec}({})", rendered.join(", "))
                }
            }
            NodeKind::DynCall { sid, args } => {
                let rendered: Vec<String> = args.iter().map(|a| self.expr(a)).collect();
                format!("{}({})", self.st.sid_name(*sid), rendered.join(", "))
            }
            NodeKind::EnumCoercion { child, e } => {
                format!("{}({})", self.st.enums[e.0 as usize].name, self.expr(child))
            }
            NodeKind::Range { start, end } => {
                format!("{}..{}", self.expr(start), self.expr(end))
            }
            NodeKind::Seq { head, tail } => {
                format!("{}; {}", self.expr(head), self.expr(tail))
            }
            NodeKind::MultipleReturn { exprs } => {
                let rendered: Vec<String> = exprs.iter().map(|e| self.expr(e)).collect();
                rendered.join(", ")
            }
            NodeKind::AssignList { children } => {
                let rendered: Vec<String> = children.iter().map(|c| self.expr(c)).collect();
                let (rhs, targets) = rendered.split_last().expect("assign list has a rhs");
                format!("{} = {}", targets.join(", "), rhs)
            }
            NodeKind::IsType { child, giventype } => {
                format!("{} is {}", self.expr(child), type_name(self.st, giventype))
            }
            NodeKind::TypeOf { child } => match &child.kind {
                NodeKind::DefaultVal => "typeof return".to_string(),
                _ => format!("typeof {}", self.expr(child)),
            },
            NodeKind::CoRoutine { call } => format!("coroutine {}", self.expr(call)),
            NodeKind::Case { .. } => String::new(),
            NodeKind::Call { sf, .. } => self.funval(*sf),
            // Statement forms in expression position render inline,
            // best-effort.
            NodeKind::IfThen { cond, then_block } => {
                format!("if {}: {}", self.expr(cond), self.inline_block(then_block))
            }
            NodeKind::IfElse {
                cond,
                then_block,
                else_block,
            } => format!(
                "if {}: {} else: {}",
                self.expr(cond),
                self.inline_block(then_block),
                self.inline_block(else_block)
            ),
            NodeKind::While { cond, body } => {
                format!("while {}: {}", self.expr(cond), self.inline_block(body))
            }
            NodeKind::For { iter, body } => {
                format!("for({}): {}", self.expr(iter), self.inline_block(body))
            }
            NodeKind::Switch { value, .. } => format!("switch {}: ...", self.expr(value)),
            NodeKind::Return { child, .. } => format!("return {}", self.expr(child)),
            NodeKind::Define { sids, child } => {
                let names: Vec<&str> =
                    sids.iter().map(|(sid, _)| self.st.sid_name(*sid)).collect();
                format!("var {} = {}", names.join(", "), self.expr(child))
            }
        }
    }

    fn inline_block(&self, b: &Block) -> String {
        if b.children.len() == 1 {
            match &b.children[0].kind {
                NodeKind::Return { child, .. } if !matches!(child.kind, NodeKind::DefaultVal) => {
                    format!("return {}", self.expr(child))
                }
                _ => self.expr(&b.children[0]),
            }
        } else {
            "...".to_string()
        }
    }

    /// A function value: inline when its body is a single statement.
    fn funval(&self, sf: SfId) -> String {
        let sfd = &self.st.subfunctions[sf.0 as usize];
        let args: Vec<String> = sfd
            .args
            .iter()
            .map(|a| self.st.ident_name(a.id).to_string())
            .collect();
        let body = match &sfd.body {
            Some(b) if b.children.len() == 1 => match &b.children[0].kind {
                NodeKind::Return { child, .. } if !matches!(child.kind, NodeKind::DefaultVal) => {
                    self.expr(child)
                }
                _ => self.expr(&b.children[0]),
            },
            _ => "...".to_string(),
        };
        if args.is_empty() {
            format!("=>: {body}")
        } else {
            format!("=> ({}): {body}", args.join(", "))
        }
    }
}

/// Render one node as canonical statement text (no trailing newline for a
/// plain expression).
#[must_use]
pub fn dump_node(st: &SymbolTable, n: &Node) -> String {
    let mut d = Dumper { st, out: String::new() };
    d.stmt(n, 0);
    d.out
}

/// Render a whole block at the given indent.
#[must_use]
pub fn dump_block(st: &SymbolTable, b: &Block, indent: usize) -> String {
    let mut d = Dumper { st, out: String::new() };
    d.block(b, indent);
    d.out
}

/// A textual listing of every function overload with its typed signature and
/// body, in the order the functions were declared.
#[must_use]
pub fn dump_all(st: &SymbolTable, only_typechecked: bool) -> String {
    let mut d = Dumper { st, out: String::new() };
    for f in &st.functions {
        for &sf in &f.overloads {
            let sfd = &st.subfunctions[sf.0 as usize];
            if only_typechecked && !sfd.typechecked {
                continue;
            }
            d.out.push_str("FUNCTION: ");
            d.out.push_str(&f.name);
            d.out.push('(');
            for arg in &sfd.args {
                d.out.push_str(st.ident_name(arg.id));
                d.out.push(':');
                let t = arg
                    .typ
                    .as_ref()
                    .map_or_else(|| "any".to_string(), |t| type_name(st, t));
                d.out.push_str(&t);
                d.out.push(' ');
            }
            d.out.push_str(") -> ");
            let rt = sfd
                .returntype
                .as_ref()
                .map_or_else(|| "any".to_string(), |t| type_name(st, t));
            d.out.push_str(&rt);
            d.out.push('\n');
            if let Some(body) = &sfd.body {
                let rendered = dump_block(st, body, 4);
                d.out.push_str(&rendered);
            }
            d.out.push('\n');
        }
    }
    d.out
}
