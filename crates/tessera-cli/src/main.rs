use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tessera_codegen::gemm::MatrixProductTemplate;
use tessera_codegen::reduction::VectorReductionTemplate;
use tessera_codegen::{DeviceProfile, GemmParams, ReductionParams, validate};
use tessera_core::mapping::{
    MappedOperand, MappingTable, MatrixBinding, ReductionBinding, ScalarBinding, VectorBinding,
};
use tessera_core::{
    BinaryKind, Layout, MatrixHandle, MatrixShape, ScalarHandle, ScalarType, Statement,
    StatementBuilder, UnaryKind, VectorHandle,
};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "tessera kernel-generation CLI")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Render a blocked matrix-product kernel for a sample statement.
    Gemm {
        /// JSON file holding a GemmParams value (defaults otherwise).
        #[arg(long)]
        params: Option<PathBuf>,
        /// Treat A as transposed.
        #[arg(long)]
        a_trans: bool,
        /// Treat B as transposed.
        #[arg(long)]
        b_trans: bool,
        /// Emit a row-major output (column-major otherwise).
        #[arg(long)]
        row_major: bool,
        /// Problem sizes for the launch configuration.
        #[arg(long, default_value_t = 256)]
        m: usize,
        #[arg(long, default_value_t = 256)]
        n: usize,
        #[arg(long, default_value_t = 256)]
        k: usize,
        /// Also print the launch configuration for the given sizes.
        #[arg(long)]
        launch: bool,
    },
    /// Render a fused vector-reduction kernel for a sample statement.
    Reduction {
        /// JSON file holding a ReductionParams value (defaults otherwise).
        #[arg(long)]
        params: Option<PathBuf>,
        /// Treat the matrix operand as transposed.
        #[arg(long)]
        trans: bool,
        /// Number of fused reductions sharing the iteration space.
        #[arg(long, default_value_t = 1)]
        fused: usize,
        #[arg(long, default_value_t = 1024)]
        rows: usize,
        #[arg(long, default_value_t = 512)]
        cols: usize,
        /// Also print the launch configuration for the given sizes.
        #[arg(long)]
        launch: bool,
    },
    /// Validate a matrix-product parameter set and report every violation.
    Validate {
        /// JSON file holding a GemmParams value (defaults otherwise).
        #[arg(long)]
        params: Option<PathBuf>,
        #[arg(long)]
        a_trans: bool,
        #[arg(long)]
        b_trans: bool,
        /// Device memory alignment in elements.
        #[arg(long, default_value_t = 128)]
        alignment: u32,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Gemm {
            params,
            a_trans,
            b_trans,
            row_major,
            m,
            n,
            k,
            launch,
        } => gemm(params, a_trans, b_trans, row_major, m, n, k, launch),
        Cmd::Reduction {
            params,
            trans,
            fused,
            rows,
            cols,
            launch,
        } => reduction(params, trans, fused, rows, cols, launch),
        Cmd::Validate {
            params,
            a_trans,
            b_trans,
            alignment,
        } => validate_cmd(params, a_trans, b_trans, alignment),
    }
}

fn load_json<T: serde::de::DeserializeOwned + Default>(path: Option<PathBuf>) -> T {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(&p)
                .unwrap_or_else(|e| panic!("cannot read {}: {e}", p.display()));
            serde_json::from_str(&text)
                .unwrap_or_else(|e| panic!("cannot parse {}: {e}", p.display()))
        }
        None => T::default(),
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm(
    params: Option<PathBuf>,
    a_trans: bool,
    b_trans: bool,
    row_major: bool,
    m: usize,
    n: usize,
    k: usize,
    launch: bool,
) {
    let p: GemmParams = load_json(params);
    let profile = DeviceProfile::default();
    if let Err(e) = validate::validate_gemm(&p, a_trans, b_trans, &profile) {
        for v in &e.violations {
            eprintln!("violation: {v}");
        }
        std::process::exit(1);
    }

    let pad = profile.memory_alignment as usize;
    let layout = if row_major {
        Layout::RowMajor
    } else {
        Layout::ColMajor
    };
    let (st, mapping) = sample_gemm_statement(a_trans, b_trans, layout, m, n, k, pad);

    let template = MatrixProductTemplate::new(&p, "prod");
    let source = template.generate(&st, &mapping).expect("generation failed");
    print!("{}", source.text);

    if launch {
        let config = template.configure(&st).expect("launch configuration failed");
        eprintln!(
            "launch: global = {:?}, local = {:?}, scalars = {:?}",
            config.global, config.local, config.scalars
        );
    }
}

fn reduction(
    params: Option<PathBuf>,
    trans: bool,
    fused: usize,
    rows: usize,
    cols: usize,
    launch: bool,
) {
    let p: ReductionParams = load_json(params);
    if let Err(e) = validate::validate_reduction(&p) {
        for v in &e.violations {
            eprintln!("violation: {v}");
        }
        std::process::exit(1);
    }

    let (st, mut mapping) = sample_reduction_statement(trans, fused.max(1), rows, cols);

    let template = VectorReductionTemplate::new(&p, "reduce");
    let source = template
        .generate(&st, &mut mapping)
        .expect("generation failed");
    print!("{}", source.text);

    if launch {
        let config = template.configure(&st).expect("launch configuration failed");
        eprintln!(
            "launch: global = {:?}, local = {:?}, scalars = {:?}",
            config.global, config.local, config.scalars
        );
    }
}

fn validate_cmd(params: Option<PathBuf>, a_trans: bool, b_trans: bool, alignment: u32) {
    let p: GemmParams = load_json(params);
    let profile = DeviceProfile {
        memory_alignment: alignment,
    };
    match validate::validate_gemm(&p, a_trans, b_trans, &profile) {
        Ok(()) => println!("parameter set is legal"),
        Err(e) => {
            for v in &e.violations {
                println!("violation: {v}");
            }
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn sample_gemm_statement(
    a_trans: bool,
    b_trans: bool,
    layout: Layout,
    m: usize,
    n: usize,
    k: usize,
    pad: usize,
) -> (Statement, MappingTable) {
    let scalar = ScalarType::F32;
    let (a_rows, a_cols) = if a_trans { (k, m) } else { (m, k) };
    let (b_rows, b_cols) = if b_trans { (n, k) } else { (k, n) };

    let mut bld = StatementBuilder::new();
    let c = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(m, n, pad),
        layout,
        scalar,
    });
    let alpha = bld.scalar(ScalarHandle { scalar });
    let beta = bld.scalar(ScalarHandle { scalar });
    let a = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(a_rows, a_cols, pad),
        layout,
        scalar,
    });
    let b = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(b_rows, b_cols, pad),
        layout,
        scalar,
    });
    let a_expr = if a_trans { bld.unary(UnaryKind::Trans, a) } else { a };
    let b_expr = if b_trans { bld.unary(UnaryKind::Trans, b) } else { b };
    let prod = bld.binary(BinaryKind::MatMatProd, a_expr, b_expr);
    let scaled_prod = bld.binary(BinaryKind::Mul, prod, alpha);
    let scaled_c = bld.binary(BinaryKind::Mul, c, beta);
    let add = bld.binary(BinaryKind::Add, scaled_prod, scaled_c);
    let root = bld.binary(BinaryKind::Assign, c, add);
    let st = bld.finish(root);

    let mut mapping = MappingTable::new();
    mapping.insert(
        c,
        MappedOperand::Matrix(MatrixBinding::new("C", scalar, "C_ld", layout)),
    );
    mapping.insert(
        alpha,
        MappedOperand::HostScalar(ScalarBinding::new("alpha", scalar)),
    );
    mapping.insert(
        beta,
        MappedOperand::HostScalar(ScalarBinding::new("beta", scalar)),
    );
    mapping.insert(
        a,
        MappedOperand::Matrix(MatrixBinding::new("A", scalar, "A_ld", layout)),
    );
    mapping.insert(
        b,
        MappedOperand::Matrix(MatrixBinding::new("B", scalar, "B_ld", layout)),
    );
    (st, mapping)
}

fn sample_reduction_statement(
    trans: bool,
    fused: usize,
    rows: usize,
    cols: usize,
) -> (Statement, MappingTable) {
    let scalar = ScalarType::F32;
    let out_len = if trans { cols } else { rows };

    let mut bld = StatementBuilder::new();
    let mut mapping = MappingTable::new();

    let y = bld.vector(VectorHandle {
        len: out_len,
        scalar,
    });
    mapping.insert(
        y,
        MappedOperand::Vector(VectorBinding::new("y", scalar)),
    );

    let mut sum = None;
    for i in 0..fused {
        let mat = bld.matrix(MatrixHandle {
            shape: MatrixShape::exact(rows, cols),
            layout: Layout::RowMajor,
            scalar,
        });
        let x = bld.vector(VectorHandle {
            len: if trans { rows } else { cols },
            scalar,
        });
        mapping.insert(
            mat,
            MappedOperand::Matrix(MatrixBinding::new(
                format!("A{i}"),
                scalar,
                format!("A{i}_ld"),
                Layout::RowMajor,
            )),
        );
        mapping.insert(
            x,
            MappedOperand::Vector(VectorBinding::new(format!("x{i}"), scalar)),
        );
        let lhs = if trans { bld.unary(UnaryKind::Trans, mat) } else { mat };
        let prod = bld.binary(BinaryKind::MatVecProd, lhs, x);
        mapping.insert(
            prod,
            MappedOperand::ReductionAccumulator(ReductionBinding::new(scalar)),
        );
        sum = Some(match sum {
            None => prod,
            Some(acc) => bld.binary(BinaryKind::Add, acc, prod),
        });
    }

    let root = bld.binary(BinaryKind::Assign, y, sum.expect("fused >= 1"));
    let st = bld.finish(root);
    (st, mapping)
}
