//! Operand bindings: kernel-side names for statement nodes.
//!
//! The mapping table is built by the host layer that owns buffers and
//! argument slots; templates consume it read-only, except for one narrow
//! write path: the vector-reduction generator binds problem-size symbols
//! into matrix bindings and an accumulator-slot access expression into
//! reduction bindings.

use std::collections::HashMap;

use crate::statement::ExprId;
use crate::types::{Layout, ScalarType};
use crate::{CoreError, Result};

/// A matrix operand bound to a kernel argument.
#[derive(Clone, Debug)]
pub struct MatrixBinding {
    name: String,
    scalar: ScalarType,
    ld_symbol: String,
    layout: Layout,
    size_symbols: Option<(String, String)>,
}

impl MatrixBinding {
    pub fn new(
        name: impl Into<String>,
        scalar: ScalarType,
        ld_symbol: impl Into<String>,
        layout: Layout,
    ) -> Self {
        Self {
            name: name.into(),
            scalar,
            ld_symbol: ld_symbol.into(),
            layout,
            size_symbols: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }

    /// Kernel-side symbol holding the leading dimension.
    pub fn ld_symbol(&self) -> &str {
        &self.ld_symbol
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Problem-size symbols bound by a reduction template, if any.
    pub fn size_symbols(&self) -> Option<(&str, &str)> {
        self.size_symbols
            .as_ref()
            .map(|(r, c)| (r.as_str(), c.as_str()))
    }

    /// Bind the kernel's problem-size symbols to this matrix (write-back
    /// path used by the vector-reduction generator).
    pub fn bind_size_symbols(&mut self, rows: impl Into<String>, cols: impl Into<String>) {
        self.size_symbols = Some((rows.into(), cols.into()));
    }

    /// Render the element access at (`row`, `col`), honoring the layout.
    pub fn element_at(&self, row: &str, col: &str) -> String {
        match self.layout {
            Layout::RowMajor => format!("{}[{}*{} + {}]", self.name, row, self.ld_symbol, col),
            Layout::ColMajor => format!("{}[{} + {}*{}]", self.name, row, col, self.ld_symbol),
        }
    }
}

/// A vector operand bound to a kernel argument.
#[derive(Clone, Debug)]
pub struct VectorBinding {
    name: String,
    scalar: ScalarType,
}

impl VectorBinding {
    pub fn new(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }

    /// Render the element access at `idx`.
    pub fn element_at(&self, idx: &str) -> String {
        format!("{}[{}]", self.name, idx)
    }
}

/// A host scalar bound to a value kernel argument.
#[derive(Clone, Debug)]
pub struct ScalarBinding {
    name: String,
    scalar: ScalarType,
}

impl ScalarBinding {
    pub fn new(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            scalar,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }
}

/// A matrix-vector product node bound to an on-chip accumulator slot.
///
/// The access expression is filled in by the reduction generator once the
/// slot layout is known.
#[derive(Clone, Debug)]
pub struct ReductionBinding {
    scalar: ScalarType,
    access_name: Option<String>,
}

impl ReductionBinding {
    pub fn new(scalar: ScalarType) -> Self {
        Self {
            scalar,
            access_name: None,
        }
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }

    /// The bound accumulator-slot expression, if the generator has set one.
    pub fn access_name(&self) -> Option<&str> {
        self.access_name.as_deref()
    }

    /// Bind the accumulator-slot expression (write-back path).
    pub fn bind_access_name(&mut self, access: impl Into<String>) {
        self.access_name = Some(access.into());
    }
}

/// An operand binding, one of a closed set of kinds.
#[derive(Clone, Debug)]
pub enum MappedOperand {
    Matrix(MatrixBinding),
    Vector(VectorBinding),
    HostScalar(ScalarBinding),
    ReductionAccumulator(ReductionBinding),
}

impl MappedOperand {
    /// Element scalar type, uniform across kinds.
    pub fn scalar(&self) -> ScalarType {
        match self {
            MappedOperand::Matrix(m) => m.scalar(),
            MappedOperand::Vector(v) => v.scalar(),
            MappedOperand::HostScalar(s) => s.scalar(),
            MappedOperand::ReductionAccumulator(r) => r.scalar(),
        }
    }
}

/// Bindings for every operand node of one statement, keyed by node id.
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    entries: HashMap<ExprId, MappedOperand>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ExprId, operand: MappedOperand) {
        self.entries.insert(id, operand);
    }

    pub fn get(&self, id: ExprId) -> Result<&MappedOperand> {
        self.entries.get(&id).ok_or(CoreError::MissingBinding(id))
    }

    pub fn matrix(&self, id: ExprId) -> Result<&MatrixBinding> {
        match self.get(id)? {
            MappedOperand::Matrix(m) => Ok(m),
            _ => Err(CoreError::RoleMismatch {
                id,
                expected: "matrix",
            }),
        }
    }

    pub fn matrix_mut(&mut self, id: ExprId) -> Result<&mut MatrixBinding> {
        match self.entries.get_mut(&id) {
            Some(MappedOperand::Matrix(m)) => Ok(m),
            Some(_) => Err(CoreError::RoleMismatch {
                id,
                expected: "matrix",
            }),
            None => Err(CoreError::MissingBinding(id)),
        }
    }

    pub fn vector(&self, id: ExprId) -> Result<&VectorBinding> {
        match self.get(id)? {
            MappedOperand::Vector(v) => Ok(v),
            _ => Err(CoreError::RoleMismatch {
                id,
                expected: "vector",
            }),
        }
    }

    pub fn host_scalar(&self, id: ExprId) -> Result<&ScalarBinding> {
        match self.get(id)? {
            MappedOperand::HostScalar(s) => Ok(s),
            _ => Err(CoreError::RoleMismatch {
                id,
                expected: "host scalar",
            }),
        }
    }

    pub fn accumulator(&self, id: ExprId) -> Result<&ReductionBinding> {
        match self.get(id)? {
            MappedOperand::ReductionAccumulator(r) => Ok(r),
            _ => Err(CoreError::RoleMismatch {
                id,
                expected: "reduction accumulator",
            }),
        }
    }

    pub fn accumulator_mut(&mut self, id: ExprId) -> Result<&mut ReductionBinding> {
        match self.entries.get_mut(&id) {
            Some(MappedOperand::ReductionAccumulator(r)) => Ok(r),
            Some(_) => Err(CoreError::RoleMismatch {
                id,
                expected: "reduction accumulator",
            }),
            None => Err(CoreError::MissingBinding(id)),
        }
    }
}
