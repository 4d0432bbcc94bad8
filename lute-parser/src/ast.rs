//! Abstract syntax tree for the Lute language.
//!
//! The tree is strictly owned: every node owns its children, and references
//! into the symbol table (identifiers, functions, user-defined types, enums)
//! are plain ids — non-owning back-pointers. The symbol table outlives every
//! AST built against it.

use serde::{Deserialize, Serialize};

pub use lute_lexer::Line;

use crate::symbols::{EnumId, EnumValId, SfId, SpecIdentId};
use crate::typeref::UnresolvedType;

// ── Operators ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Mod,
    Plus,
    Minus,
    ShiftLeft,
    ShiftRight,
    BitAnd,
    BitOr,
    Xor,
    LessThan,
    GreaterThan,
    LessThanEq,
    GreaterThanEq,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::Xor => "^",
            BinaryOp::LessThan => "<",
            BinaryOp::GreaterThan => ">",
            BinaryOp::LessThanEq => "<=",
            BinaryOp::GreaterThanEq => ">=",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Arithmetic negation `-`.
    UnaryMinus,
    /// Logical `not`.
    Not,
    /// Bitwise complement `~`.
    Negate,
    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Mod,
    BitAnd,
    BitOr,
    Xor,
    ShiftLeft,
    ShiftRight,
}

impl AssignOp {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AssignOp::Plus => "+=",
            AssignOp::Minus => "-=",
            AssignOp::Multiply => "*=",
            AssignOp::Divide => "/=",
            AssignOp::Mod => "%=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::Xor => "^=",
            AssignOp::ShiftLeft => "<<=",
            AssignOp::ShiftRight => ">>=",
        }
    }
}

// ── Call ids ─────────────────────────────────────────────────────────

/// Unique id given to every `GenericCall` so unresolved (forward) calls can
/// be patched after the fact without holding references into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub u32);

// ── Blocks ───────────────────────────────────────────────────────────

/// A statement list — a function body, a control-flow arm, a case body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub line: Line,
    pub children: Vec<Node>,
}

// ── Nodes ────────────────────────────────────────────────────────────

/// One AST node: its source position plus the syntactic form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub line: Line,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    // Literals.
    IntConstant {
        val: i64,
        /// Set when the constant came from an enum value reference.
        from: Option<EnumValId>,
    },
    FloatConstant(f64),
    StringConstant(String),
    Nil {
        giventype: Option<UnresolvedType>,
    },
    /// Placeholder for an argument the call site did not supply.
    DefaultVal,

    // References.
    IdentRef {
        sid: SpecIdentId,
    },
    TypeAnnotation(UnresolvedType),
    EnumRef {
        e: EnumId,
    },
    UdtRef {
        udt: crate::symbols::UdtId,
    },
    FunRef {
        sf: SfId,
    },

    // Composite values.
    Constructor {
        giventype: Option<UnresolvedType>,
        args: Vec<Node>,
    },

    // Operators.
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        child: Box<Node>,
    },
    Assign {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    CompoundAssign {
        op: AssignOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },

    // Access.
    Indexing {
        object: Box<Node>,
        index: Box<Node>,
    },
    /// Field read out of a coroutine's suspended frame (`co->field`).
    CoDot {
        coroutine: Box<Node>,
        ident: Box<Node>,
    },

    // Calls.
    GenericCall {
        name: String,
        /// Resolved overload; `None` for natives and not-yet-resolved calls.
        sf: Option<SfId>,
        dotted: bool,
        specializers: Vec<UnresolvedType>,
        args: Vec<Node>,
        call_id: CallId,
    },
    DynCall {
        sid: SpecIdentId,
        args: Vec<Node>,
    },
    EnumCoercion {
        child: Box<Node>,
        e: EnumId,
    },

    // Control flow.
    IfThen {
        cond: Box<Node>,
        then_block: Block,
    },
    IfElse {
        cond: Box<Node>,
        then_block: Block,
        else_block: Block,
    },
    While {
        cond: Box<Node>,
        body: Block,
    },
    For {
        iter: Box<Node>,
        body: Block,
    },
    ForLoopElem,
    ForLoopCounter,
    Switch {
        value: Box<Node>,
        cases: Vec<Node>,
    },
    Case {
        patterns: Vec<Node>,
        body: Block,
    },
    Range {
        start: Box<Node>,
        end: Box<Node>,
    },

    // Sequencing.
    Seq {
        head: Box<Node>,
        tail: Box<Node>,
    },
    MultipleReturn {
        exprs: Vec<Node>,
    },
    /// `a, b = rhs` — the first n children are l-values, the last is the rhs.
    AssignList {
        children: Vec<Node>,
    },
    Define {
        sids: Vec<(SpecIdentId, Option<UnresolvedType>)>,
        child: Box<Node>,
    },
    Return {
        child: Box<Node>,
        sf: SfId,
        make_void: bool,
    },

    // Functions and coroutines.
    CoClosure,
    CoRoutine {
        call: Box<Node>,
    },

    // Type introspection.
    IsType {
        child: Box<Node>,
        giventype: UnresolvedType,
    },
    TypeOf {
        child: Box<Node>,
    },

    /// The root of a parsed program: a call of the implicit top-level
    /// sub-function.
    Call {
        sf: SfId,
        args: Vec<Node>,
    },
}

impl Node {
    #[must_use]
    pub fn new(line: Line, kind: NodeKind) -> Self {
        Self { line, kind }
    }

    /// Whether this expression is a constant initializer — a literal, or a
    /// constructor whose arguments all are.
    #[must_use]
    pub fn is_const_init(&self) -> bool {
        match &self.kind {
            NodeKind::IntConstant { .. }
            | NodeKind::FloatConstant(_)
            | NodeKind::StringConstant(_)
            | NodeKind::Nil { .. }
            | NodeKind::DefaultVal => true,
            NodeKind::Constructor { args, .. } => args.iter().all(Node::is_const_init),
            _ => false,
        }
    }
}

// ── Mutable tree walking ─────────────────────────────────────────────

/// Visit `node` and every descendant, pre-order. Used by post-parse passes
/// that rewrite the tree in place (forward-call patching).
pub fn walk_mut(node: &mut Node, f: &mut impl FnMut(&mut Node)) {
    f(node);
    match &mut node.kind {
        NodeKind::IntConstant { .. }
        | NodeKind::FloatConstant(_)
        | NodeKind::StringConstant(_)
        | NodeKind::Nil { .. }
        | NodeKind::DefaultVal
        | NodeKind::IdentRef { .. }
        | NodeKind::TypeAnnotation(_)
        | NodeKind::EnumRef { .. }
        | NodeKind::UdtRef { .. }
        | NodeKind::FunRef { .. }
        | NodeKind::ForLoopElem
        | NodeKind::ForLoopCounter
        | NodeKind::CoClosure => {}
        NodeKind::Constructor { args, .. }
        | NodeKind::DynCall { args, .. }
        | NodeKind::GenericCall { args, .. }
        | NodeKind::Call { args, .. }
        | NodeKind::MultipleReturn { exprs: args }
        | NodeKind::AssignList { children: args } => {
            for a in args {
                walk_mut(a, f);
            }
        }
        NodeKind::Binary { lhs, rhs, .. }
        | NodeKind::Assign { lhs, rhs }
        | NodeKind::CompoundAssign { lhs, rhs, .. } => {
            walk_mut(lhs, f);
            walk_mut(rhs, f);
        }
        NodeKind::Unary { child, .. }
        | NodeKind::EnumCoercion { child, .. }
        | NodeKind::Define { child, .. }
        | NodeKind::Return { child, .. }
        | NodeKind::IsType { child, .. }
        | NodeKind::TypeOf { child }
        | NodeKind::CoRoutine { call: child } => walk_mut(child, f),
        NodeKind::Indexing { object, index } => {
            walk_mut(object, f);
            walk_mut(index, f);
        }
        NodeKind::CoDot { coroutine, ident } => {
            walk_mut(coroutine, f);
            walk_mut(ident, f);
        }
        NodeKind::IfThen { cond, then_block } => {
            walk_mut(cond, f);
            walk_block_mut(then_block, f);
        }
        NodeKind::IfElse {
            cond,
            then_block,
            else_block,
        } => {
            walk_mut(cond, f);
            walk_block_mut(then_block, f);
            walk_block_mut(else_block, f);
        }
        NodeKind::While { cond, body } => {
            walk_mut(cond, f);
            walk_block_mut(body, f);
        }
        NodeKind::For { iter, body } => {
            walk_mut(iter, f);
            walk_block_mut(body, f);
        }
        NodeKind::Switch { value, cases } => {
            walk_mut(value, f);
            for c in cases {
                walk_mut(c, f);
            }
        }
        NodeKind::Case { patterns, body } => {
            for p in patterns {
                walk_mut(p, f);
            }
            walk_block_mut(body, f);
        }
        NodeKind::Range { start, end } => {
            walk_mut(start, f);
            walk_mut(end, f);
        }
        NodeKind::Seq { head, tail } => {
            walk_mut(head, f);
            walk_mut(tail, f);
        }
    }
}

/// Visit every node of a block, pre-order.
pub fn walk_block_mut(block: &mut Block, f: &mut impl FnMut(&mut Node)) {
    for child in &mut block.children {
        walk_mut(child, f);
    }
}
