//! Launch configuration: work sizes and trailing scalar arguments.
//!
//! Recomputed from actual operand shapes on every enqueue; nothing here is
//! cached. Generation never reads runtime shapes, so one generated kernel
//! serves any number of launch configurations.

/// A declared trailing scalar kernel argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScalarArgDecl {
    pub name: &'static str,
    pub cl_type: &'static str,
}

impl ScalarArgDecl {
    pub const fn uint(name: &'static str) -> Self {
        Self {
            name,
            cl_type: "unsigned int",
        }
    }
}

/// Work sizes and ordered trailing scalar argument values for one enqueue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Global work size per axis.
    pub global: [usize; 2],
    /// Local work size per axis.
    pub local: [usize; 2],
    /// Values of the declared trailing scalar arguments, in order.
    pub scalars: Vec<u32>,
}

/// Launch configuration failed for a well-formed statement.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Both of A's shape fields match a B field with distinct values, so the
    /// shape-equality heuristic cannot name the contraction dimension. An
    /// explicit dimension tag on the operand would remove the ambiguity.
    #[error(
        "contraction dimension is ambiguous: A is {a_rows}x{a_cols} and both \
         extents match B ({b_rows}x{b_cols})"
    )]
    ContractionAmbiguous {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },

    /// Neither of A's shape fields matches a B field.
    #[error(
        "cannot resolve the contraction dimension: A is {a_rows}x{a_cols}, \
         B is {b_rows}x{b_cols}, no extents match"
    )]
    ContractionUnresolved {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },

    /// The statement's product sub-expression contains no matrix operand to
    /// take the problem sizes from.
    #[error("statement has no matrix operand inside its product sub-expression")]
    NoMatrixOperand,

    /// The statement does not match the template's shape at all.
    #[error(transparent)]
    Match(#[from] crate::MatchError),
}
