//! Expression-statement IR and operand bindings for kernel generation.
//!
//! `tessera-core` provides the foundational types consumed by the kernel
//! templates in `tessera-codegen`: a tagged-variant expression tree
//! ([`Statement`]), operand handles carrying shape/layout/element-type
//! information, and the [`mapping::MappingTable`] that binds tree nodes to
//! kernel-side names.

pub mod mapping;
pub mod statement;
pub mod types;

pub use statement::{
    BinaryKind, Expr, ExprId, Leaf, MatrixHandle, ScalarHandle, Statement, StatementBuilder,
    UnaryKind, VectorHandle,
};
pub use types::{Layout, MatrixShape, ScalarType};

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("no operand binding for expression node {0:?}")]
    MissingBinding(ExprId),

    #[error("operand binding for node {id:?} is not a {expected}")]
    RoleMismatch { id: ExprId, expected: &'static str },
}
