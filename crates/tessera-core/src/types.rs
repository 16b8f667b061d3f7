//! Core type definitions: ScalarType, Layout, MatrixShape.

use serde::{Deserialize, Serialize};

/// Element type of a kernel operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    F32,
    F64,
}

impl ScalarType {
    /// Size in bytes of a single element.
    pub fn size_bytes(self) -> usize {
        match self {
            ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    /// OpenCL C name of the scalar type.
    pub fn cl_name(self) -> &'static str {
        match self {
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
        }
    }

    /// OpenCL C name of the `width`-wide vector variant (`float4`), or the
    /// plain scalar name when `width` is 1.
    pub fn cl_vector_name(self, width: u32) -> String {
        if width <= 1 {
            self.cl_name().to_string()
        } else {
            format!("{}{}", self.cl_name(), width)
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cl_name())
    }
}

/// Storage order of a matrix operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

impl Layout {
    pub fn is_row_major(self) -> bool {
        matches!(self, Layout::RowMajor)
    }
}

/// Logical and internal (padded) extents of a matrix operand.
///
/// Launch grids are computed from the internal extents; callers pad them to
/// tile multiples upstream. The logical extents are what the generated kernel
/// receives as its problem-size arguments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixShape {
    pub rows: usize,
    pub cols: usize,
    pub internal_rows: usize,
    pub internal_cols: usize,
}

impl MatrixShape {
    /// A shape whose internal extents equal its logical extents.
    pub fn exact(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            internal_rows: rows,
            internal_cols: cols,
        }
    }

    /// A shape padded so each internal extent is the next multiple of `pad`.
    pub fn padded(rows: usize, cols: usize, pad: usize) -> Self {
        Self {
            rows,
            cols,
            internal_rows: rows.div_ceil(pad) * pad,
            internal_cols: cols.div_ceil(pad) * pad,
        }
    }
}
