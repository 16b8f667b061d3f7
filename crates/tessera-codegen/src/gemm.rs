//! Blocked matrix-product kernel template.
//!
//! Emits `C := alpha*op(A)*op(B) + beta*C` with three blocking levels: a
//! work-group tile (mL x nL x kL), a per-thread micro-tile (mS x nS
//! accumulated through a kS-step inner loop), and optional cooperative
//! staging of the A and/or B panels in local memory. Transpose flags decide,
//! per operand, which axis strides by the leading dimension; the same choice
//! drives both the pointer-advance and the register-fetch paths.

use tracing::debug;

use tessera_core::mapping::MappingTable;
use tessera_core::{BinaryKind, Expr, ExprId, Leaf, Statement};

use crate::launch::{ConfigError, LaunchConfig, ScalarArgDecl};
use crate::params::GemmParams;
use crate::writer::KernelWriter;
use crate::{GenerateError, KernelSource, MatchError};

/// Operand roles of a matched matrix-product statement.
#[derive(Clone, Copy, Debug)]
pub struct GemmRoles {
    pub c: ExprId,
    pub alpha: ExprId,
    pub a: ExprId,
    pub a_trans: bool,
    pub b: ExprId,
    pub b_trans: bool,
    pub beta: ExprId,
}

/// Match `C := alpha*(op(A)*op(B)) + beta*C` against `st`.
///
/// Expected shape: root `Assign(C, Add(Mul(prod, alpha), Mul(C, beta)))`
/// where `prod` is a matrix-matrix product and each product operand is a
/// matrix leaf, optionally wrapped in a transpose.
pub fn match_statement(st: &Statement) -> Result<GemmRoles, MatchError> {
    let err = MatchError::MatrixProduct;

    let Expr::Binary {
        op: BinaryKind::Assign,
        lhs: c,
        rhs: add,
    } = *st.expr(st.root())
    else {
        return Err(err("root is not an assignment"));
    };
    if !matches!(st.expr(c), Expr::Leaf(Leaf::Matrix(_))) {
        return Err(err("assignment target is not a matrix"));
    }

    let Expr::Binary {
        op: BinaryKind::Add,
        lhs: scaled_prod,
        rhs: scaled_c,
    } = *st.expr(add)
    else {
        return Err(err("assigned expression is not a sum"));
    };

    let Expr::Binary {
        op: BinaryKind::Mul,
        lhs: prod,
        rhs: alpha,
    } = *st.expr(scaled_prod)
    else {
        return Err(err("left summand is not a scaled product"));
    };
    if !matches!(st.expr(alpha), Expr::Leaf(Leaf::Scalar(_))) {
        return Err(err("alpha is not a host scalar"));
    }

    let Expr::Binary {
        op: BinaryKind::MatMatProd,
        lhs: a_expr,
        rhs: b_expr,
    } = *st.expr(prod)
    else {
        return Err(err("scaled operand is not a matrix-matrix product"));
    };
    let Some((a, _, a_trans)) = st.matrix_at(a_expr) else {
        return Err(err("product left operand is not a matrix"));
    };
    let Some((b, _, b_trans)) = st.matrix_at(b_expr) else {
        return Err(err("product right operand is not a matrix"));
    };

    let Expr::Binary {
        op: BinaryKind::Mul,
        lhs: _,
        rhs: beta,
    } = *st.expr(scaled_c)
    else {
        return Err(err("right summand is not a scaled output"));
    };
    if !matches!(st.expr(beta), Expr::Leaf(Leaf::Scalar(_))) {
        return Err(err("beta is not a host scalar"));
    }

    Ok(GemmRoles {
        c,
        alpha,
        a,
        a_trans,
        b,
        b_trans,
        beta,
    })
}

/// The blocked matrix-product template for one parameter set.
pub struct MatrixProductTemplate<'a> {
    params: &'a GemmParams,
    kernel_name: String,
}

impl<'a> MatrixProductTemplate<'a> {
    /// Trailing scalar arguments declared by every matrix-product kernel.
    pub const SCALAR_ARGS: [ScalarArgDecl; 3] = [
        ScalarArgDecl::uint("M"),
        ScalarArgDecl::uint("N"),
        ScalarArgDecl::uint("K"),
    ];

    pub fn new(params: &'a GemmParams, kernel_name: impl Into<String>) -> Self {
        Self {
            params,
            kernel_name: kernel_name.into(),
        }
    }

    /// Generate the full kernel source for a matched statement.
    ///
    /// The parameter set must already have passed
    /// [`crate::validate::validate_gemm`] for the statement's transpose
    /// flags; generation assumes legality.
    pub fn generate(
        &self,
        st: &Statement,
        mapping: &MappingTable,
    ) -> Result<KernelSource, GenerateError> {
        let roles = match_statement(st)?;
        let p = self.params;
        let simd = p.simd_width;
        let (m_l, n_l) = (p.m_l(), p.n_l());

        let c = mapping.matrix(roles.c)?;
        let alpha = mapping.host_scalar(roles.alpha)?;
        let a = mapping.matrix(roles.a)?;
        let b = mapping.matrix(roles.b)?;
        let beta = mapping.host_scalar(roles.beta)?;

        debug!(
            kernel = %self.kernel_name,
            simd,
            m_l,
            n_l,
            k_l = p.k_l,
            use_a_local = p.use_a_local,
            use_b_local = p.use_b_local,
            "generating matrix-product kernel"
        );

        let (a_name, a_ld) = (a.name(), a.ld_symbol());
        let (b_name, b_ld) = (b.name(), b.ld_symbol());

        let c_ty = c.scalar().cl_name();
        // Staged operands are consumed element-wise from local memory; direct
        // loads pull whole vectors from global memory.
        let a_reg_ty = if p.use_a_local {
            a.scalar().cl_name().to_string()
        } else {
            a.scalar().cl_vector_name(simd)
        };
        let b_reg_ty = if p.use_b_local {
            b.scalar().cl_name().to_string()
        } else {
            b.scalar().cl_vector_name(simd)
        };

        let mut w = KernelWriter::new();
        w.open(format!(
            "__kernel void {}({})",
            self.kernel_name,
            self.header_args(c, alpha, a, b, beta)
        ));

        // Addressing is in vector units from here on.
        if simd > 1 {
            w.line(format!("{a_ld} /= {simd};"));
            w.line(format!("{b_ld} /= {simd};"));
        }

        w.line(format!(
            "{c_ty} rC[{}][{}] = {{({c_ty})0}};",
            p.m_s, p.n_s
        ));
        w.line(format!(
            "{a_reg_ty} rA[{}][{}];",
            p.k_s,
            if p.use_a_local { p.m_s } else { p.m_s / simd }
        ));
        w.line(format!(
            "{b_reg_ty} rB[{}][{}];",
            p.k_s,
            if p.use_b_local { p.n_s } else { p.n_s / simd }
        ));
        w.blank();
        if p.use_a_local {
            w.line(format!(
                "__local {} lA[{}];",
                a.scalar().cl_name(),
                p.k_l * (m_l + 1)
            ));
        }
        if p.use_b_local {
            w.line(format!(
                "__local {} lB[{}];",
                b.scalar().cl_name(),
                p.k_l * (n_l + 1)
            ));
        }
        w.blank();
        w.line("uint gidx = get_group_id(0);");
        w.line("uint gidy = get_group_id(1);");
        w.line("uint idx = get_local_id(0);");
        w.line("uint idy = get_local_id(1);");
        if p.use_a_local || p.use_b_local {
            w.blank();
            w.line(format!("uint idt = {}*idy + idx;", p.local_size_0));
            w.line(format!("uint idxT = idt % {};", p.local_fetch_0));
            w.line(format!("uint idyT = idt / {};", p.local_fetch_0));
        }
        w.blank();

        // Advance base pointers to the work-group tile origin. Staged
        // operands are addressed by the fetch-thread coordinates, direct
        // loads by the compute-thread coordinates.
        match (p.use_a_local, roles.a_trans) {
            (true, false) => w.line(format!(
                "{a_name} += gidx*{} + idxT + idyT*{a_ld};",
                m_l / simd
            )),
            (true, true) => w.line(format!(
                "{a_name} += gidx*{}*{a_ld} + idxT + idyT*{a_ld};",
                m_l / simd
            )),
            (false, false) => w.line(format!("{a_name} += gidx*{} + idx;", m_l / simd)),
            (false, true) => w.line(format!("{a_name} += (gidx*{} + idx)*{a_ld};", m_l / simd)),
        }
        // B is contiguous along the iteration space when transposed.
        match (p.use_b_local, roles.b_trans) {
            (true, true) => w.line(format!(
                "{b_name} += gidy*{} + idxT + idyT*{b_ld};",
                n_l / simd
            )),
            (true, false) => w.line(format!(
                "{b_name} += gidy*{}*{b_ld} + idxT + idyT*{b_ld};",
                n_l / simd
            )),
            (false, true) => w.line(format!("{b_name} += gidy*{} + idy;", n_l / simd)),
            (false, false) => w.line(format!("{b_name} += (gidy*{} + idy)*{b_ld};", n_l / simd)),
        }
        w.blank();

        w.open(format!(
            "for (unsigned int block_k = 0; block_k < K; block_k += {})",
            p.k_l
        ));

        if p.use_a_local {
            if roles.a_trans {
                w.line(format!(
                    "__local {}* plA = lA + idxT*{} + idyT;",
                    a.scalar().cl_name(),
                    m_l + 1
                ));
            } else {
                w.line(format!(
                    "__local {}* plA = lA + idyT*{} + {simd}*idxT;",
                    a.scalar().cl_name(),
                    m_l + 1
                ));
            }
        }
        if p.use_b_local {
            if roles.b_trans {
                w.line(format!(
                    "__local {}* plB = lB + idyT*{} + {simd}*idxT;",
                    b.scalar().cl_name(),
                    n_l + 1
                ));
            } else {
                w.line(format!(
                    "__local {}* plB = lB + idxT*{} + idyT;",
                    b.scalar().cl_name(),
                    n_l + 1
                ));
            }
        }
        if p.use_a_local || p.use_b_local {
            w.line("barrier(CLK_LOCAL_MEM_FENCE);");
        }

        // Cooperative strided fetch of the staged panels.
        if p.use_a_local {
            let bound_1 = if roles.a_trans { m_l } else { p.k_l };
            let bound_0 = if roles.a_trans { p.k_l } else { m_l };
            self.emit_panel_fetch(
                &mut w, "plA", a_name, a_ld, bound_0, bound_1, m_l, !roles.a_trans,
            );
        }
        if p.use_b_local {
            let bound_1 = if roles.b_trans { p.k_l } else { n_l };
            let bound_0 = if roles.b_trans { n_l } else { p.k_l };
            self.emit_panel_fetch(
                &mut w, "plB", b_name, b_ld, bound_0, bound_1, n_l, roles.b_trans,
            );
        }
        if p.use_a_local || p.use_b_local {
            w.line("barrier(CLK_LOCAL_MEM_FENCE);");
        }

        w.line(format!("uint offA = {simd}*idx;"));
        w.line(format!("uint offB = {simd}*idy;"));

        w.open(format!(
            "for (unsigned int k = 0; k < {}; k += {})",
            p.k_l, p.k_s
        ));

        // Per-thread register slices of the A panel.
        for kk in 0..p.k_s {
            for mm in 0..p.m_s / simd {
                if p.use_a_local {
                    for ss in 0..simd {
                        w.line(format!(
                            "rA[{kk}][{}] = lA[offA + {}];",
                            mm * simd + ss,
                            mm * p.local_size_0 * simd + ss + kk * (m_l + 1)
                        ));
                    }
                } else if roles.a_trans {
                    w.line(format!(
                        "rA[{kk}][{mm}] = {a_name}[{kk} + {}*{a_ld}];",
                        mm * p.local_size_0
                    ));
                } else {
                    w.line(format!(
                        "rA[{kk}][{mm}] = {a_name}[{} + {kk}*{a_ld}];",
                        mm * p.local_size_0
                    ));
                }
            }
        }
        // Per-thread register slices of the B panel.
        for kk in 0..p.k_s {
            for nn in 0..p.n_s / simd {
                if p.use_b_local {
                    for ss in 0..simd {
                        w.line(format!(
                            "rB[{kk}][{}] = lB[offB + {}];",
                            nn * simd + ss,
                            nn * p.local_size_1 * simd + ss + kk * (n_l + 1)
                        ));
                    }
                } else if roles.b_trans {
                    w.line(format!(
                        "rB[{kk}][{nn}] = {b_name}[{} + {kk}*{b_ld}];",
                        nn * p.local_size_1
                    ));
                } else {
                    w.line(format!(
                        "rB[{kk}][{nn}] = {b_name}[{kk} + {}*{b_ld}];",
                        nn * p.local_size_1
                    ));
                }
            }
        }

        // Advance to the next kS slice.
        if p.use_a_local {
            w.line(format!("offA += {};", p.k_s * (m_l + 1)));
        } else if roles.a_trans {
            w.line(format!("{a_name} += {};", p.k_s));
        } else {
            w.line(format!("{a_name} += {}*{a_ld};", p.k_s));
        }
        if p.use_b_local {
            w.line(format!("offB += {};", p.k_s * (n_l + 1)));
        } else if roles.b_trans {
            w.line(format!("{b_name} += {}*{b_ld};", p.k_s));
        } else {
            w.line(format!("{b_name} += {};", p.k_s));
        }

        // Micro-kernel: rC[m][n] = fma(rA[k][m], rB[k][n], rC[m][n]).
        for kk in 0..p.k_s {
            for nn in 0..p.n_s {
                for mm in 0..p.m_s {
                    let lhs = if p.use_a_local || simd == 1 {
                        format!("rA[{kk}][{mm}]")
                    } else {
                        format!("rA[{kk}][{}].s{:x}", mm / simd, mm % simd)
                    };
                    let rhs = if p.use_b_local || simd == 1 {
                        format!("rB[{kk}][{nn}]")
                    } else {
                        format!("rB[{kk}][{}].s{:x}", nn / simd, nn % simd)
                    };
                    w.line(format!("rC[{mm}][{nn}] = fma({lhs}, {rhs}, rC[{mm}][{nn}]);"));
                }
            }
        }

        w.close();

        // Staged pointers only advance per kL panel.
        if p.use_a_local {
            if roles.a_trans {
                w.line(format!("{a_name} += {};", p.k_l));
            } else {
                w.line(format!("{a_name} += {}*{a_ld};", p.k_l));
            }
        }
        if p.use_b_local {
            if roles.b_trans {
                w.line(format!("{b_name} += {}*{b_ld};", p.k_l));
            } else {
                w.line(format!("{b_name} += {};", p.k_l));
            }
        }

        w.close();

        self.emit_write_back(&mut w, c, alpha.name(), beta.name());

        w.close();

        Ok(KernelSource {
            name: self.kernel_name.clone(),
            text: w.finish(),
            scalar_args: Self::SCALAR_ARGS.to_vec(),
        })
    }

    /// Compute work sizes and trailing scalar values for one enqueue.
    ///
    /// Global sizes come from the output's internal (padded) extents divided
    /// by the per-thread micro-tile; the contraction extent is resolved by
    /// comparing A's extents against B's.
    pub fn configure(&self, st: &Statement) -> Result<LaunchConfig, ConfigError> {
        let roles = match_statement(st)?;
        let p = self.params;

        let (_, c_handle, _) = st.matrix_at(roles.c).ok_or(ConfigError::NoMatrixOperand)?;
        let (_, a_handle, _) = st.matrix_at(roles.a).ok_or(ConfigError::NoMatrixOperand)?;
        let (_, b_handle, _) = st.matrix_at(roles.b).ok_or(ConfigError::NoMatrixOperand)?;

        let shape = c_handle.shape;
        let global = [
            shape.internal_rows / p.m_s as usize,
            shape.internal_cols / p.n_s as usize,
        ];
        let local = [p.local_size_0 as usize, p.local_size_1 as usize];

        let (a_rows, a_cols) = (a_handle.shape.rows, a_handle.shape.cols);
        let (b_rows, b_cols) = (b_handle.shape.rows, b_handle.shape.cols);
        let rows_match = a_rows == b_rows || a_rows == b_cols;
        let cols_match = a_cols == b_rows || a_cols == b_cols;
        let k = match (rows_match, cols_match) {
            (true, true) if a_rows != a_cols => {
                return Err(ConfigError::ContractionAmbiguous {
                    a_rows,
                    a_cols,
                    b_rows,
                    b_cols,
                });
            }
            (true, _) => a_rows,
            (false, true) => a_cols,
            (false, false) => {
                return Err(ConfigError::ContractionUnresolved {
                    a_rows,
                    a_cols,
                    b_rows,
                    b_cols,
                });
            }
        };

        debug!(
            kernel = %self.kernel_name,
            m = shape.rows,
            n = shape.cols,
            k,
            ?global,
            "configured matrix-product launch"
        );

        Ok(LaunchConfig {
            global,
            local,
            scalars: vec![shape.rows as u32, shape.cols as u32, k as u32],
        })
    }

    fn header_args(
        &self,
        c: &tessera_core::mapping::MatrixBinding,
        alpha: &tessera_core::mapping::ScalarBinding,
        a: &tessera_core::mapping::MatrixBinding,
        b: &tessera_core::mapping::MatrixBinding,
        beta: &tessera_core::mapping::ScalarBinding,
    ) -> String {
        let simd = self.params.simd_width;
        // A and B are addressed in vector units whenever vectorizing, staged
        // or not; C is written element-wise.
        [
            format!("__global {}* {}", c.scalar().cl_name(), c.name()),
            format!("unsigned int {}", c.ld_symbol()),
            format!("{} {}", alpha.scalar().cl_name(), alpha.name()),
            format!("__global {}* {}", a.scalar().cl_vector_name(simd), a.name()),
            format!("unsigned int {}", a.ld_symbol()),
            format!("__global {}* {}", b.scalar().cl_vector_name(simd), b.name()),
            format!("unsigned int {}", b.ld_symbol()),
            format!("{} {}", beta.scalar().cl_name(), beta.name()),
            "unsigned int M".to_string(),
            "unsigned int N".to_string(),
            "unsigned int K".to_string(),
        ]
        .join(", ")
    }

    /// Emit the cooperative fetch of one kL x tile panel into local memory.
    ///
    /// `contiguous` says whether the tile axis is contiguous in memory
    /// (A untransposed / B transposed); it flips the padded-row offset
    /// arithmetic.
    #[allow(clippy::too_many_arguments)]
    fn emit_panel_fetch(
        &self,
        w: &mut KernelWriter,
        pl_name: &str,
        src_name: &str,
        src_ld: &str,
        bound_0: u32,
        bound_1: u32,
        tile: u32,
        contiguous: bool,
    ) {
        let p = self.params;
        let simd = p.simd_width;
        let mut k = 0;
        while k < bound_1 {
            let mut m = 0;
            while m < bound_0 {
                let offset = if contiguous {
                    k * (tile + 1) + m
                } else {
                    m * (tile + 1) + k
                };
                if simd == 1 {
                    w.line(format!(
                        "{pl_name}[{offset}] = {src_name}[{} + {k}*{src_ld}];",
                        m / simd
                    ));
                } else {
                    w.line(format!(
                        "vstore{simd}({src_name}[{} + {k}*{src_ld}], 0, {pl_name} + {offset});",
                        m / simd
                    ));
                }
                m += p.local_fetch_0 * simd;
            }
            k += p.local_fetch_1;
        }
    }

    /// Emit the alpha/beta write-back of the micro-tile. Row-major and
    /// column-major outputs use mirrored address arithmetic, swapping the
    /// roles of the m and n axes.
    fn emit_write_back(
        &self,
        w: &mut KernelWriter,
        c: &tessera_core::mapping::MatrixBinding,
        alpha: &str,
        beta: &str,
    ) {
        let (c_name, c_ld) = (c.name(), c.ld_symbol());
        let p = self.params;
        let simd = p.simd_width;
        let (m_l, n_l) = (p.m_l(), p.n_l());

        if c.layout().is_row_major() {
            w.line(format!("{c_name} += gidx*{m_l}*{c_ld};"));
            w.line(format!("{c_name} += idx*{simd}*{c_ld};"));
            w.line(format!("{c_name} += gidy*{n_l};"));
            w.line(format!("{c_name} += idy*{simd};"));
            for nn in 0..p.n_s {
                for mm in 0..p.m_s {
                    let j = (mm / simd) * (p.local_size_0 * simd) + mm % simd;
                    w.line(format!(
                        "{c_name}[{j}*{c_ld}] = rC[{mm}][{nn}]*{alpha} + {c_name}[{j}*{c_ld}]*{beta};"
                    ));
                }
                if (nn + 1) % simd > 0 {
                    w.line(format!("{c_name} += 1;"));
                } else {
                    w.line(format!(
                        "{c_name} += {};",
                        p.local_size_1 * simd - (simd - 1)
                    ));
                }
            }
        } else {
            w.line(format!("{c_name} += gidx*{m_l};"));
            w.line(format!("{c_name} += idx*{simd};"));
            w.line(format!("{c_name} += gidy*{n_l}*{c_ld};"));
            w.line(format!("{c_name} += idy*{simd}*{c_ld};"));
            for mm in 0..p.m_s {
                for nn in 0..p.n_s {
                    let j = (nn / simd) * (p.local_size_1 * simd) + nn % simd;
                    w.line(format!(
                        "{c_name}[{j}*{c_ld}] = rC[{mm}][{nn}]*{alpha} + {c_name}[{j}*{c_ld}]*{beta};"
                    ));
                }
                if (mm + 1) % simd > 0 {
                    w.line(format!("{c_name} += 1;"));
                } else {
                    w.line(format!(
                        "{c_name} += {};",
                        p.local_size_0 * simd - (simd - 1)
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{
        BinaryKind, Layout, MatrixHandle, MatrixShape, ScalarHandle, ScalarType, StatementBuilder,
        UnaryKind, VectorHandle,
    };

    fn mat(rows: usize, cols: usize) -> MatrixHandle {
        MatrixHandle {
            shape: MatrixShape::exact(rows, cols),
            layout: Layout::ColMajor,
            scalar: ScalarType::F32,
        }
    }

    fn gemm_statement(a_trans: bool, b_trans: bool) -> Statement {
        let mut bld = StatementBuilder::new();
        let c = bld.matrix(mat(64, 64));
        let alpha = bld.scalar(ScalarHandle {
            scalar: ScalarType::F32,
        });
        let beta = bld.scalar(ScalarHandle {
            scalar: ScalarType::F32,
        });
        let a = bld.matrix(mat(64, 32));
        let b = bld.matrix(mat(32, 64));
        let a_expr = if a_trans {
            bld.unary(UnaryKind::Trans, a)
        } else {
            a
        };
        let b_expr = if b_trans {
            bld.unary(UnaryKind::Trans, b)
        } else {
            b
        };
        let prod = bld.binary(BinaryKind::MatMatProd, a_expr, b_expr);
        let scaled_prod = bld.binary(BinaryKind::Mul, prod, alpha);
        let scaled_c = bld.binary(BinaryKind::Mul, c, beta);
        let add = bld.binary(BinaryKind::Add, scaled_prod, scaled_c);
        let root = bld.binary(BinaryKind::Assign, c, add);
        bld.finish(root)
    }

    #[test]
    fn test_match_discovers_transposes() {
        let st = gemm_statement(true, false);
        let roles = match_statement(&st).unwrap();
        assert!(roles.a_trans);
        assert!(!roles.b_trans);
    }

    #[test]
    fn test_match_rejects_foreign_shape() {
        let mut bld = StatementBuilder::new();
        let a = bld.matrix(mat(4, 4));
        let x = bld.vector(VectorHandle {
            len: 4,
            scalar: ScalarType::F32,
        });
        let prod = bld.binary(BinaryKind::MatVecProd, a, x);
        let st = bld.finish(prod);
        assert!(matches!(
            match_statement(&st),
            Err(MatchError::MatrixProduct(_))
        ));
    }

    #[test]
    fn test_match_requires_scalar_scale_factors() {
        let mut bld = StatementBuilder::new();
        let c = bld.matrix(mat(4, 4));
        let a = bld.matrix(mat(4, 4));
        let b = bld.matrix(mat(4, 4));
        let beta = bld.scalar(ScalarHandle {
            scalar: ScalarType::F32,
        });
        let prod = bld.binary(BinaryKind::MatMatProd, a, b);
        // alpha slot holds a matrix instead of a host scalar
        let scaled_prod = bld.binary(BinaryKind::Mul, prod, c);
        let scaled_c = bld.binary(BinaryKind::Mul, c, beta);
        let add = bld.binary(BinaryKind::Add, scaled_prod, scaled_c);
        let root = bld.binary(BinaryKind::Assign, c, add);
        let st = bld.finish(root);
        assert!(match_statement(&st).is_err());
    }
}
