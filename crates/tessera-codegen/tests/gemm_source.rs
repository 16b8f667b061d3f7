//! Line-level tests of the generated matrix-product kernel source.
//!
//! Kernels are never executed here — execution belongs to the device
//! runtime. These tests pin the structural facts the template guarantees:
//! declarations, staging buffers and barrier pairing, addressing by
//! transpose/layout, micro-kernel size, and determinism across runtime
//! shapes.

use tessera_codegen::gemm::{MatrixProductTemplate, match_statement};
use tessera_codegen::validate::validate_gemm;
use tessera_codegen::{DeviceProfile, GemmParams};
use tessera_core::mapping::{MappedOperand, MappingTable, MatrixBinding, ScalarBinding};
use tessera_core::{
    BinaryKind, Layout, MatrixHandle, MatrixShape, ScalarHandle, ScalarType, Statement,
    StatementBuilder, UnaryKind,
};

fn gemm_statement(
    a_trans: bool,
    b_trans: bool,
    layout: Layout,
    m: usize,
    n: usize,
    k: usize,
) -> (Statement, MappingTable) {
    let scalar = ScalarType::F32;
    let (a_rows, a_cols) = if a_trans { (k, m) } else { (m, k) };
    let (b_rows, b_cols) = if b_trans { (n, k) } else { (k, n) };

    let mut bld = StatementBuilder::new();
    let c = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(m, n, 128),
        layout,
        scalar,
    });
    let alpha = bld.scalar(ScalarHandle { scalar });
    let beta = bld.scalar(ScalarHandle { scalar });
    let a = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(a_rows, a_cols, 128),
        layout,
        scalar,
    });
    let b = bld.matrix(MatrixHandle {
        shape: MatrixShape::padded(b_rows, b_cols, 128),
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

fn base_params() -> GemmParams {
    GemmParams {
        simd_width: 1,
        local_size_0: 16,
        local_size_1: 16,
        k_l: 32,
        m_s: 2,
        k_s: 2,
        n_s: 2,
        use_a_local: false,
        use_b_local: false,
        local_fetch_0: 8,
        local_fetch_1: 32,
    }
}

fn staged_params() -> GemmParams {
    GemmParams {
        simd_width: 1,
        local_size_0: 8,
        local_size_1: 8,
        k_l: 32,
        m_s: 4,
        k_s: 4,
        n_s: 4,
        use_a_local: true,
        use_b_local: true,
        local_fetch_0: 8,
        local_fetch_1: 8,
    }
}

fn count_occurrences(text: &str, needle: &str) -> usize {
    text.matches(needle).count()
}

#[test]
fn declares_register_state_and_header() {
    let p = base_params();
    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    assert!(src.text.starts_with("__kernel void prod("));
    assert!(src.text.contains("unsigned int M, unsigned int N, unsigned int K)"));
    assert!(src.text.contains("float rC[2][2] = {(float)0};"));
    assert!(src.text.contains("float rA[2][2];"));
    assert!(src.text.contains("float rB[2][2];"));
    assert_eq!(
        src.scalar_args
            .iter()
            .map(|s| s.name)
            .collect::<Vec<_>>(),
        vec!["M", "N", "K"]
    );
}

#[test]
fn micro_kernel_emits_one_fma_per_element() {
    let p = staged_params();
    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    // kS * mS * nS fused multiply-adds per inner step
    assert_eq!(count_occurrences(&src.text, "= fma("), (4 * 4 * 4) as usize);
}

#[test]
fn unstaged_kernel_has_no_local_memory() {
    let p = base_params();
    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    assert!(!src.text.contains("__local"));
    assert!(!src.text.contains("barrier"));
}

#[test]
fn staged_kernel_pads_panels_and_pairs_barriers() {
    let p = staged_params();
    assert!(validate_gemm(&p, false, false, &DeviceProfile::default()).is_ok());

    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    // kL*(tile+1) elements: 32 * 33 = 1056 for both panels (mL = nL = 32)
    assert!(src.text.contains("__local float lA[1056];"));
    assert!(src.text.contains("__local float lB[1056];"));
    // one barrier before and one after the cooperative fetch
    assert_eq!(count_occurrences(&src.text, "barrier(CLK_LOCAL_MEM_FENCE);"), 2);
    // flattened fetch-thread index decomposed over the fetch grid
    assert!(src.text.contains("uint idt = 8*idy + idx;"));
    assert!(src.text.contains("uint idxT = idt % 8;"));
    assert!(src.text.contains("uint idyT = idt / 8;"));
    // staged register offsets advance by kS*(tile+1)
    assert!(src.text.contains("offA += 132;"));
    assert!(src.text.contains("offB += 132;"));
}

#[test]
fn vectorized_kernel_divides_ld_and_uses_vector_types() {
    let p = GemmParams {
        simd_width: 4,
        local_size_0: 8,
        local_size_1: 8,
        m_s: 4,
        n_s: 4,
        k_s: 2,
        k_l: 32,
        use_a_local: false,
        use_b_local: false,
        local_fetch_0: 8,
        local_fetch_1: 8,
    };
    // width > 1 is only legal for A untransposed, B transposed
    assert!(validate_gemm(&p, false, true, &DeviceProfile::default()).is_ok());

    let (st, mapping) = gemm_statement(false, true, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    assert!(src.text.contains("__global float4* A"));
    assert!(src.text.contains("__global float4* B"));
    assert!(src.text.contains("A_ld /= 4;"));
    assert!(src.text.contains("B_ld /= 4;"));
    assert!(src.text.contains("float4 rA[2][1];"));
    assert!(src.text.contains("float4 rB[2][1];"));
    // direct vector loads address components in the micro-kernel
    assert!(src.text.contains("rA[0][0].s0"));
    assert!(src.text.contains("rA[0][0].s3"));
    // the output is written element-wise
    assert!(src.text.contains("__global float* C"));
}

#[test]
fn staged_vectorized_fetch_uses_vstore() {
    let p = GemmParams {
        simd_width: 4,
        local_size_0: 8,
        local_size_1: 8,
        m_s: 4,
        n_s: 4,
        k_s: 2,
        k_l: 32,
        use_a_local: true,
        use_b_local: false,
        local_fetch_0: 8,
        local_fetch_1: 8,
    };
    assert!(validate_gemm(&p, false, true, &DeviceProfile::default()).is_ok());

    let (st, mapping) = gemm_statement(false, true, Layout::ColMajor, 256, 256, 256);
    let src = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();

    assert!(src.text.contains("vstore4("));
    // the staged panel is consumed element-wise from local memory
    assert!(src.text.contains("float rA[2][4];"));
}

#[test]
fn transpose_flips_pointer_advance() {
    let p = base_params();

    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let plain = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();
    assert!(plain.text.contains("A += gidx*32 + idx;"));
    assert!(plain.text.contains("B += (gidy*32 + idy)*B_ld;"));
    // untransposed A steps by the leading dimension along K
    assert!(plain.text.contains("A += 2*A_ld;"));
    assert!(plain.text.contains("B += 2;"));

    let (st, mapping) = gemm_statement(true, true, Layout::ColMajor, 256, 256, 256);
    let flipped = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();
    assert!(flipped.text.contains("A += (gidx*32 + idx)*A_ld;"));
    assert!(flipped.text.contains("B += gidy*32 + idy;"));
    assert!(flipped.text.contains("A += 2;"));
    assert!(flipped.text.contains("B += 2*B_ld;"));
}

#[test]
fn write_back_mirrors_output_layout() {
    let p = base_params();

    let (st, mapping) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let col = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();
    assert!(col.text.contains("C += gidx*32;"));
    assert!(col.text.contains("C += gidy*32*C_ld;"));

    let (st, mapping) = gemm_statement(false, false, Layout::RowMajor, 256, 256, 256);
    let row = MatrixProductTemplate::new(&p, "prod")
        .generate(&st, &mapping)
        .unwrap();
    assert!(row.text.contains("C += gidx*32*C_ld;"));
    assert!(row.text.contains("C += gidy*32;"));

    // both write the same number of output elements
    let stores = "*alpha + ";
    assert_eq!(
        count_occurrences(&col.text, stores),
        count_occurrences(&row.text, stores)
    );
    assert_eq!(count_occurrences(&col.text, stores), (2 * 2) as usize);
}

#[test]
fn source_is_identical_across_runtime_shapes() {
    let p = staged_params();
    let template = MatrixProductTemplate::new(&p, "prod");

    let (st_a, map_a) = gemm_statement(false, false, Layout::ColMajor, 256, 256, 256);
    let (st_b, map_b) = gemm_statement(false, false, Layout::ColMajor, 17, 33, 64);

    let src_a = template.generate(&st_a, &map_a).unwrap();
    let src_b = template.generate(&st_b, &map_b).unwrap();
    assert_eq!(src_a.text, src_b.text);
}

#[test]
fn match_reports_roles_for_all_transpose_combinations() {
    for (a_t, b_t) in [(false, false), (false, true), (true, false), (true, true)] {
        let (st, _) = gemm_statement(a_t, b_t, Layout::ColMajor, 64, 64, 64);
        let roles = match_statement(&st).unwrap();
        assert_eq!(roles.a_trans, a_t);
        assert_eq!(roles.b_trans, b_t);
    }
}
