//! Expression-statement IR.
//!
//! A statement is an immutable tree of tagged nodes held in an arena:
//! leaves carry operand handles (scalar, vector, matrix), inner nodes are
//! unary or binary operations. Kernel templates pattern-match statements
//! against the shapes they understand and refuse anything else — there is no
//! fixed child-index walk.

use crate::types::{Layout, MatrixShape, ScalarType};

/// Index of an expression node within its statement's arena.
///
/// Ids are handed out by the owning [`StatementBuilder`] and are only
/// meaningful for the statement it produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

/// A matrix operand leaf.
#[derive(Clone, Debug)]
pub struct MatrixHandle {
    pub shape: MatrixShape,
    pub layout: Layout,
    pub scalar: ScalarType,
}

/// A vector operand leaf.
#[derive(Clone, Debug)]
pub struct VectorHandle {
    pub len: usize,
    pub scalar: ScalarType,
}

/// A host-scalar operand leaf (runtime value passed as a kernel argument).
#[derive(Clone, Debug)]
pub struct ScalarHandle {
    pub scalar: ScalarType,
}

/// Leaf operand of an expression node.
#[derive(Clone, Debug)]
pub enum Leaf {
    Scalar(ScalarHandle),
    Vector(VectorHandle),
    Matrix(MatrixHandle),
}

/// Binary operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryKind {
    Assign,
    Add,
    Mul,
    MatMatProd,
    MatVecProd,
}

/// Unary operation kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryKind {
    Trans,
}

/// A node in the expression tree.
#[derive(Clone, Debug)]
pub enum Expr {
    Leaf(Leaf),
    Unary { op: UnaryKind, operand: ExprId },
    Binary { op: BinaryKind, lhs: ExprId, rhs: ExprId },
}

/// An immutable expression statement: node arena plus a single root.
#[derive(Clone, Debug)]
pub struct Statement {
    nodes: Vec<Expr>,
    root: ExprId,
}

impl Statement {
    /// The root node id.
    pub fn root(&self) -> ExprId {
        self.root
    }

    /// The node behind `id`.
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.nodes[id.0 as usize]
    }

    /// Iterate all nodes in arena (insertion) order.
    pub fn exprs(&self) -> impl Iterator<Item = (ExprId, &Expr)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, e)| (ExprId(i as u32), e))
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the statement has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve `id` to a matrix leaf, looking through a transpose wrapper.
    ///
    /// Returns the leaf's own id, its handle, and whether it was reached
    /// through `Trans`.
    pub fn matrix_at(&self, id: ExprId) -> Option<(ExprId, &MatrixHandle, bool)> {
        match self.expr(id) {
            Expr::Leaf(Leaf::Matrix(h)) => Some((id, h, false)),
            Expr::Unary {
                op: UnaryKind::Trans,
                operand,
            } => match self.expr(*operand) {
                Expr::Leaf(Leaf::Matrix(h)) => Some((*operand, h, true)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Builds a [`Statement`] node by node.
#[derive(Debug, Default)]
pub struct StatementBuilder {
    nodes: Vec<Expr>,
}

impl StatementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expr);
        id
    }

    /// Add a matrix leaf.
    pub fn matrix(&mut self, handle: MatrixHandle) -> ExprId {
        self.push(Expr::Leaf(Leaf::Matrix(handle)))
    }

    /// Add a vector leaf.
    pub fn vector(&mut self, handle: VectorHandle) -> ExprId {
        self.push(Expr::Leaf(Leaf::Vector(handle)))
    }

    /// Add a host-scalar leaf.
    pub fn scalar(&mut self, handle: ScalarHandle) -> ExprId {
        self.push(Expr::Leaf(Leaf::Scalar(handle)))
    }

    /// Add a unary node.
    pub fn unary(&mut self, op: UnaryKind, operand: ExprId) -> ExprId {
        self.push(Expr::Unary { op, operand })
    }

    /// Add a binary node.
    pub fn binary(&mut self, op: BinaryKind, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.push(Expr::Binary { op, lhs, rhs })
    }

    /// Seal the arena with `root` as the statement root.
    pub fn finish(self, root: ExprId) -> Statement {
        Statement {
            nodes: self.nodes,
            root,
        }
    }
}
