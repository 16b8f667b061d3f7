//! Fused matrix-vector reduction kernel template.
//!
//! Emits a kernel performing one or more dot-product-shaped reductions that
//! share a row/column iteration space: each row of a 2-D work-group
//! grid-strides over the rows, the cooperating lanes accumulate partial sums
//! over the columns, and a local binary-tree reduction folds the partials.
//! Multiple reductions in one statement share the loops and barriers.

use smallvec::SmallVec;
use tracing::debug;

use tessera_core::mapping::MappingTable;
use tessera_core::{BinaryKind, Expr, ExprId, Leaf, Statement, UnaryKind};

use crate::launch::{ConfigError, LaunchConfig, ScalarArgDecl};
use crate::params::ReductionParams;
use crate::writer::KernelWriter;
use crate::{GenerateError, KernelSource, MatchError};

/// One matrix-vector product participating in a fused reduction kernel.
#[derive(Clone, Copy, Debug)]
pub struct ReductionExpr {
    /// The product node itself (bound to an accumulator slot).
    pub node: ExprId,
    /// The matrix leaf, resolved through a transpose wrapper.
    pub matrix: ExprId,
    /// Whether the left operand is logically transposed.
    pub matrix_trans: bool,
    /// The vector leaf.
    pub vector: ExprId,
}

/// Collect every matrix-vector product sub-expression of `st`, in arena
/// order, with its own transpose flag.
pub fn collect_reductions(st: &Statement) -> Result<SmallVec<[ReductionExpr; 2]>, MatchError> {
    let mut out = SmallVec::new();
    for (id, expr) in st.exprs() {
        let Expr::Binary {
            op: BinaryKind::MatVecProd,
            lhs,
            rhs,
        } = *expr
        else {
            continue;
        };
        let Some((matrix, _, matrix_trans)) = st.matrix_at(lhs) else {
            return Err(MatchError::VectorReduction(
                "product left operand is not a matrix",
            ));
        };
        if !matches!(st.expr(rhs), Expr::Leaf(Leaf::Vector(_))) {
            return Err(MatchError::VectorReduction(
                "product right operand is not a vector",
            ));
        }
        out.push(ReductionExpr {
            node: id,
            matrix,
            matrix_trans,
            vector: rhs,
        });
    }
    if out.is_empty() {
        return Err(MatchError::VectorReduction(
            "statement contains no matrix-vector product",
        ));
    }
    Ok(out)
}

/// The fused vector-reduction template for one parameter set.
pub struct VectorReductionTemplate<'a> {
    params: &'a ReductionParams,
    kernel_name: String,
}

impl<'a> VectorReductionTemplate<'a> {
    /// Trailing scalar arguments declared by every vector-reduction kernel.
    pub const SCALAR_ARGS: [ScalarArgDecl; 2] =
        [ScalarArgDecl::uint("M"), ScalarArgDecl::uint("N")];

    pub fn new(params: &'a ReductionParams, kernel_name: impl Into<String>) -> Self {
        Self {
            params,
            kernel_name: kernel_name.into(),
        }
    }

    /// Generate the fused reduction kernel for a statement.
    ///
    /// Takes the mapping mutably for the one write-back path: participating
    /// matrices get the kernel's problem-size symbols bound, and each
    /// product node gets its accumulator-slot access expression bound before
    /// the trailing elementwise terms are rendered.
    pub fn generate(
        &self,
        st: &Statement,
        mapping: &mut MappingTable,
    ) -> Result<KernelSource, GenerateError> {
        let exprs = collect_reductions(st)?;
        let p = self.params;
        let row_slots = p.k + 1;

        for e in exprs.iter() {
            mapping.matrix_mut(e.matrix)?.bind_size_symbols("M", "N");
        }

        debug!(
            kernel = %self.kernel_name,
            exprs = exprs.len(),
            m = p.m,
            k = p.k,
            "generating vector-reduction kernel"
        );

        let mut w = KernelWriter::new();
        w.open(format!(
            "__kernel void {}({})",
            self.kernel_name,
            self.header_args(st, mapping)?
        ));

        for (i, e) in exprs.iter().enumerate() {
            let scalar = mapping.accumulator(e.node)?.scalar();
            w.line(format!(
                "__local {} buf{i}[{}];",
                scalar.cl_name(),
                p.m * row_slots
            ));
        }
        w.line("unsigned int lid0 = get_local_id(0);");
        w.line("unsigned int lid1 = get_local_id(1);");

        // The shared iteration space is named by the first expression; a
        // transposed front swaps which problem size the rows run over.
        let (size_1, size_2) = if exprs[0].matrix_trans {
            ("N", "M")
        } else {
            ("M", "N")
        };

        w.open(format!(
            "for (unsigned int r = get_global_id(0); r < {size_1}; r += get_global_size(0))"
        ));
        for (i, e) in exprs.iter().enumerate() {
            let scalar = mapping.accumulator(e.node)?.scalar();
            w.line(format!("{} sum{i} = 0;", scalar.cl_name()));
        }
        w.open(format!(
            "for (unsigned int c = get_local_id(1); c < {size_2}; c += get_local_size(1))"
        ));
        // Each expression honors its own transpose flag when indexing.
        for (i, e) in exprs.iter().enumerate() {
            let matrix = mapping.matrix(e.matrix)?;
            let vector = mapping.vector(e.vector)?;
            let element = if e.matrix_trans {
                matrix.element_at("c", "r")
            } else {
                matrix.element_at("r", "c")
            };
            w.line(format!("sum{i} += {element}*{};", vector.element_at("c")));
        }
        w.close();

        for i in 0..exprs.len() {
            w.line(format!("buf{i}[lid0*{row_slots} + lid1] = sum{i};"));
        }

        // Binary-tree reduction across the cooperating lanes.
        let mut stride = p.k / 2;
        while stride > 1 {
            w.line("barrier(CLK_LOCAL_MEM_FENCE);");
            w.open(format!("if (lid1 < {stride})"));
            for i in 0..exprs.len() {
                w.line(format!(
                    "buf{i}[lid0*{row_slots} + lid1] += buf{i}[lid0*{row_slots} + lid1 + {stride}];"
                ));
            }
            w.close();
            stride /= 2;
        }

        w.line("barrier(CLK_LOCAL_MEM_FENCE);");
        w.open("if (lid1 == 0)");
        for (i, e) in exprs.iter().enumerate() {
            w.line(format!(
                "buf{i}[lid0*{row_slots}] += buf{i}[lid0*{row_slots} + 1];"
            ));
            mapping
                .accumulator_mut(e.node)?
                .bind_access_name(format!("buf{i}[lid0*{row_slots}]"));
        }
        let tail = render_elementwise(st, st.root(), mapping)?;
        w.line(format!("{tail};"));
        w.close();

        w.close();
        w.close();

        Ok(KernelSource {
            name: self.kernel_name.clone(),
            text: w.finish(),
            scalar_args: Self::SCALAR_ARGS.to_vec(),
        })
    }

    /// Compute work sizes and trailing scalar values for one enqueue.
    ///
    /// The row/column counts are taken from the first matrix operand found
    /// inside the (possibly nested) product sub-expression.
    pub fn configure(&self, st: &Statement) -> Result<LaunchConfig, ConfigError> {
        let exprs = collect_reductions(st)?;
        let p = self.params;

        let front = &exprs[0];
        let (_, handle, _) = st
            .matrix_at(front.matrix)
            .ok_or(ConfigError::NoMatrixOperand)?;

        let local = [p.m as usize, p.k as usize];
        let global = [(p.m * p.num_groups) as usize, p.k as usize];

        debug!(
            kernel = %self.kernel_name,
            rows = handle.shape.rows,
            cols = handle.shape.cols,
            ?global,
            "configured vector-reduction launch"
        );

        Ok(LaunchConfig {
            global,
            local,
            scalars: vec![handle.shape.rows as u32, handle.shape.cols as u32],
        })
    }

    /// Kernel arguments: every leaf operand in arena order, then the
    /// problem-size scalars.
    fn header_args(&self, st: &Statement, mapping: &MappingTable) -> Result<String, GenerateError> {
        let mut args = Vec::new();
        for (id, expr) in st.exprs() {
            let Expr::Leaf(leaf) = expr else { continue };
            match leaf {
                Leaf::Matrix(_) => {
                    let m = mapping.matrix(id)?;
                    args.push(format!("__global {}* {}", m.scalar().cl_name(), m.name()));
                    args.push(format!("unsigned int {}", m.ld_symbol()));
                }
                Leaf::Vector(_) => {
                    let v = mapping.vector(id)?;
                    args.push(format!("__global {}* {}", v.scalar().cl_name(), v.name()));
                }
                Leaf::Scalar(_) => {
                    let s = mapping.host_scalar(id)?;
                    args.push(format!("{} {}", s.scalar().cl_name(), s.name()));
                }
            }
        }
        args.push("unsigned int M".to_string());
        args.push("unsigned int N".to_string());
        Ok(args.join(", "))
    }
}

/// Render the statement's remaining elementwise expression at row `r`, with
/// finished reductions replaced by their bound accumulator slots.
fn render_elementwise(
    st: &Statement,
    id: ExprId,
    mapping: &MappingTable,
) -> Result<String, GenerateError> {
    match st.expr(id) {
        Expr::Leaf(Leaf::Vector(_)) => Ok(mapping.vector(id)?.element_at("r")),
        Expr::Leaf(Leaf::Scalar(_)) => Ok(mapping.host_scalar(id)?.name().to_string()),
        Expr::Leaf(Leaf::Matrix(_)) => Err(GenerateError::Match(MatchError::VectorReduction(
            "matrix operand outside a product has no elementwise rendering",
        ))),
        Expr::Unary {
            op: UnaryKind::Trans,
            ..
        } => Err(GenerateError::Match(MatchError::VectorReduction(
            "transpose outside a product has no elementwise rendering",
        ))),
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryKind::MatVecProd => {
                let binding = mapping.accumulator(id)?;
                // generate() binds every collected product before rendering.
                binding.access_name().map(str::to_string).ok_or_else(|| {
                    GenerateError::Match(MatchError::VectorReduction(
                        "matrix-vector product has no bound accumulator slot",
                    ))
                })
            }
            BinaryKind::Assign => Ok(format!(
                "{} = {}",
                render_elementwise(st, *lhs, mapping)?,
                render_elementwise(st, *rhs, mapping)?
            )),
            BinaryKind::Add => Ok(format!(
                "{} + {}",
                render_elementwise(st, *lhs, mapping)?,
                render_elementwise(st, *rhs, mapping)?
            )),
            BinaryKind::Mul => Ok(format!(
                "{}*{}",
                render_elementwise(st, *lhs, mapping)?,
                render_elementwise(st, *rhs, mapping)?
            )),
            BinaryKind::MatMatProd => Err(GenerateError::Match(MatchError::VectorReduction(
                "matrix-matrix product inside a reduction statement",
            ))),
        },
    }
}
