//! Core domain types for taintgraph.
//!
//! The program graph is a labeled property graph: nodes carry a stable,
//! totally ordered integer index plus typed properties; edges belong to one
//! of four relations (structural, control-flow, data-flow, call). Everything
//! downstream — cache, prefetch, traversal — keys on [`NodeId`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable, globally unique, totally ordered node index. Assigned by the
/// graph store at import time and never reused within a database.
pub type NodeId = i64;

/// File-scope identifier a node belongs to.
pub type FileId = i64;

/// Function-scope identifier a node belongs to (the declaring node's index).
pub type FuncId = i64;

// ---------------------------------------------------------------------------
// NodeKind
// ---------------------------------------------------------------------------

/// Closed set of node kinds appearing in the program graph.
///
/// Kinds the store may emit but this engine has no special handling for are
/// mapped to [`NodeKind::Other`] — an explicit fallback arm rather than a
/// runtime string lookup, so every dispatch over kinds is checked for
/// exhaustiveness at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Assign,
    AssignOp,
    AssignRef,
    Var,
    Name,
    Call,
    MethodCall,
    StaticCall,
    New,
    ArgList,
    Param,
    ParamList,
    For,
    While,
    DoWhile,
    Foreach,
    If,
    IfElem,
    Switch,
    SwitchCase,
    Return,
    Echo,
    Print,
    Exit,
    IncludeOrEval,
    BinaryOp,
    UnaryOp,
    StmtList,
    Toplevel,
    FuncDecl,
    Method,
    Closure,
    Class,
    /// Artificial entry marker inserted per function by the graph importer.
    FuncEntry,
    /// Artificial exit marker; control-flow predecessors of this node are
    /// the function's return expressions.
    FuncExit,
    File,
    /// Any kind this engine does not dispatch on.
    Other,
}

impl NodeKind {
    /// The type tag as stored in the graph database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "AST_ASSIGN",
            Self::AssignOp => "AST_ASSIGN_OP",
            Self::AssignRef => "AST_ASSIGN_REF",
            Self::Var => "AST_VAR",
            Self::Name => "AST_NAME",
            Self::Call => "AST_CALL",
            Self::MethodCall => "AST_METHOD_CALL",
            Self::StaticCall => "AST_STATIC_CALL",
            Self::New => "AST_NEW",
            Self::ArgList => "AST_ARG_LIST",
            Self::Param => "AST_PARAM",
            Self::ParamList => "AST_PARAM_LIST",
            Self::For => "AST_FOR",
            Self::While => "AST_WHILE",
            Self::DoWhile => "AST_DO_WHILE",
            Self::Foreach => "AST_FOREACH",
            Self::If => "AST_IF",
            Self::IfElem => "AST_IF_ELEM",
            Self::Switch => "AST_SWITCH",
            Self::SwitchCase => "AST_SWITCH_CASE",
            Self::Return => "AST_RETURN",
            Self::Echo => "AST_ECHO",
            Self::Print => "AST_PRINT",
            Self::Exit => "AST_EXIT",
            Self::IncludeOrEval => "AST_INCLUDE_OR_EVAL",
            Self::BinaryOp => "AST_BINARY_OP",
            Self::UnaryOp => "AST_UNARY_OP",
            Self::StmtList => "AST_STMT_LIST",
            Self::Toplevel => "AST_TOPLEVEL",
            Self::FuncDecl => "AST_FUNC_DECL",
            Self::Method => "AST_METHOD",
            Self::Closure => "AST_CLOSURE",
            Self::Class => "AST_CLASS",
            Self::FuncEntry => "CFG_FUNC_ENTRY",
            Self::FuncExit => "CFG_FUNC_EXIT",
            Self::File => "FILE",
            Self::Other => "OTHER",
        }
    }

    /// Parse a stored type tag. Unknown tags become [`NodeKind::Other`]
    /// rather than an error — the store schema may grow kinds this engine
    /// does not dispatch on.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "AST_ASSIGN" => Self::Assign,
            "AST_ASSIGN_OP" => Self::AssignOp,
            "AST_ASSIGN_REF" => Self::AssignRef,
            "AST_VAR" => Self::Var,
            "AST_NAME" => Self::Name,
            "AST_CALL" => Self::Call,
            "AST_METHOD_CALL" => Self::MethodCall,
            "AST_STATIC_CALL" => Self::StaticCall,
            "AST_NEW" => Self::New,
            "AST_ARG_LIST" => Self::ArgList,
            "AST_PARAM" => Self::Param,
            "AST_PARAM_LIST" => Self::ParamList,
            "AST_FOR" => Self::For,
            "AST_WHILE" => Self::While,
            "AST_DO_WHILE" => Self::DoWhile,
            "AST_FOREACH" => Self::Foreach,
            "AST_IF" => Self::If,
            "AST_IF_ELEM" => Self::IfElem,
            "AST_SWITCH" => Self::Switch,
            "AST_SWITCH_CASE" => Self::SwitchCase,
            "AST_RETURN" => Self::Return,
            "AST_ECHO" => Self::Echo,
            "AST_PRINT" => Self::Print,
            "AST_EXIT" => Self::Exit,
            "AST_INCLUDE_OR_EVAL" => Self::IncludeOrEval,
            "AST_BINARY_OP" => Self::BinaryOp,
            "AST_UNARY_OP" => Self::UnaryOp,
            "AST_STMT_LIST" => Self::StmtList,
            "AST_TOPLEVEL" => Self::Toplevel,
            "AST_FUNC_DECL" => Self::FuncDecl,
            "AST_METHOD" => Self::Method,
            "AST_CLOSURE" => Self::Closure,
            "AST_CLASS" => Self::Class,
            "CFG_FUNC_ENTRY" => Self::FuncEntry,
            "CFG_FUNC_EXIT" => Self::FuncExit,
            "FILE" => Self::File,
            _ => Self::Other,
        }
    }

    /// Call expressions — the kinds the interprocedural flows resolve
    /// through the call relation.
    pub fn is_call_expr(&self) -> bool {
        matches!(self, Self::Call | Self::MethodCall | Self::StaticCall)
    }

    /// Assignment statements (plain, compound, by-reference).
    pub fn is_assignment(&self) -> bool {
        matches!(self, Self::Assign | Self::AssignOp | Self::AssignRef)
    }

    /// Loop-head kinds the control-flow folding understands.
    pub fn is_loop_head(&self) -> bool {
        matches!(self, Self::For | Self::While | Self::Foreach)
    }

    /// Function/method declaration kinds.
    pub fn is_declaration(&self) -> bool {
        matches!(self, Self::FuncDecl | Self::Method | Self::Closure)
    }

    /// Statement-level kinds that participate in control flow. Used by the
    /// prefetch drop-out strategy to skip sub-expression nodes whose
    /// data-flow neighborhoods are never queried directly.
    pub fn is_statement_root(&self) -> bool {
        matches!(
            self,
            Self::Assign
                | Self::AssignOp
                | Self::AssignRef
                | Self::Call
                | Self::MethodCall
                | Self::StaticCall
                | Self::Return
                | Self::Echo
                | Self::Print
                | Self::Exit
                | Self::IncludeOrEval
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Relation / Direction
// ---------------------------------------------------------------------------

/// The four edge relations of the program graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// Structural containment, parent → child.
    Ast,
    /// Control flow, predecessor → successor. May contain cycles.
    Cfg,
    /// Data flow, definition → use, labeled with the variable name.
    Pdg,
    /// Call graph, call site → declaration.
    Cg,
}

impl Relation {
    /// All relations, in cache-mirror order.
    pub const ALL: [Relation; 4] = [Relation::Ast, Relation::Cfg, Relation::Pdg, Relation::Cg];

    /// The edge type tag as stored in the graph database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ast => "PARENT_OF",
            Self::Cfg => "FLOWS_TO",
            Self::Pdg => "REACHES",
            Self::Cg => "CALLS",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Ast => 0,
            Self::Cfg => 1,
            Self::Pdg => 2,
            Self::Cg => 3,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

// ---------------------------------------------------------------------------
// GraphNode
// ---------------------------------------------------------------------------

/// A node of the program graph.
///
/// Immutable from the traversal's perspective: the cache may replace a
/// cached copy with a freshly fetched one, but property values never change
/// within an analysis session. The transient taint annotation lives on
/// [`NodeRef`], not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable global index. See [`NodeId`].
    pub id: NodeId,
    /// Ephemeral per-session identity (the store's internal row identity).
    pub session_id: i64,
    pub kind: NodeKind,
    pub line: u32,
    pub file_id: FileId,
    pub func_id: FuncId,
    /// Position among the structural parent's children, -1 for roots.
    pub child_num: i32,
    pub name: Option<String>,
    pub flags: Option<String>,
    /// Raw source fragment, when the importer captured one.
    pub code: Option<String>,
}

// ---------------------------------------------------------------------------
// NodeRef
// ---------------------------------------------------------------------------

/// A shared node handle plus the transient annotation a data-flow query
/// attaches to it.
///
/// `taint_var` is set to the variable name on the edge that produced this
/// node; it is scoped to the query result, never written back to the node
/// or the cache's node pool.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub node: Arc<GraphNode>,
    pub taint_var: Option<String>,
}

impl NodeRef {
    pub fn new(node: Arc<GraphNode>) -> Self {
        Self { node, taint_var: None }
    }

    pub fn with_taint_var(node: Arc<GraphNode>, taint_var: Option<String>) -> Self {
        Self { node, taint_var }
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind
    }
}

impl From<Arc<GraphNode>> for NodeRef {
    fn from(node: Arc<GraphNode>) -> Self {
        Self::new(node)
    }
}

// ---------------------------------------------------------------------------
// Edge metadata
// ---------------------------------------------------------------------------

/// Metadata carried on a relation edge. Which field is populated depends on
/// the relation: control-flow edges may carry a branch label, data-flow
/// edges carry the variable name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeMeta {
    pub flow_label: Option<String>,
    pub var: Option<String>,
}

/// One fetched edge endpoint as returned by the store client: the neighbor
/// on the far side plus the edge's metadata. Lists of these are ordered
/// ascending by the neighbor's stable index.
#[derive(Debug, Clone)]
pub struct NeighborEdge {
    pub neighbor: Arc<GraphNode>,
    pub meta: EdgeMeta,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
