//! Parameterized OpenCL kernel generation for linear-algebra statements.
//!
//! `tessera-codegen` turns an expression statement (from `tessera-core`),
//! an operand mapping, and a tuning-parameter set into OpenCL C kernel
//! source plus a per-enqueue launch configuration. Two templates are
//! provided:
//!
//! - [`gemm::MatrixProductTemplate`] — blocked/tiled
//!   `C := alpha*op(A)*op(B) + beta*C` with optional local-memory staging
//! - [`reduction::VectorReductionTemplate`] — one or more fused
//!   matrix-vector dot-product reductions sharing an iteration space
//!
//! Templates validate nothing during generation; run the parameter set
//! through [`validate`] first.

pub mod gemm;
pub mod launch;
pub mod params;
pub mod reduction;
pub mod validate;
pub mod writer;

pub use launch::{ConfigError, LaunchConfig, ScalarArgDecl};
pub use params::{DeviceProfile, GemmParams, ReductionParams};
pub use validate::{ValidationError, Violation};
pub use writer::KernelWriter;

/// Generated kernel text plus its declared trailing scalar arguments.
#[derive(Clone, Debug)]
pub struct KernelSource {
    pub name: String,
    pub text: String,
    pub scalar_args: Vec<ScalarArgDecl>,
}

/// Why a statement failed to match a template's expected shape.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum MatchError {
    #[error("matrix-product shape mismatch: {0}")]
    MatrixProduct(&'static str),

    #[error("vector-reduction shape mismatch: {0}")]
    VectorReduction(&'static str),
}

/// Generation failed for a statement/mapping pair.
#[derive(thiserror::Error, Debug)]
pub enum GenerateError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Binding(#[from] tessera_core::CoreError),
}
