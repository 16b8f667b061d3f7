//! Legality checks for tuning-parameter sets.
//!
//! A parameter set must pass validation before it reaches a generator; the
//! generators themselves assume legality. Violations are reported as
//! structured values — all of them, never silently corrected — so a
//! parameter sweep can log exactly which constraint killed a candidate.

use crate::params::{DeviceProfile, GemmParams, ReductionParams};

/// Which operand of the product a staging violation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    A,
    B,
}

/// Tile axis named by a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileAxis {
    ML,
    KL,
    NL,
}

/// Micro-tile axis named by a violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MicroAxis {
    MS,
    KS,
    NS,
}

/// A single violated legality constraint.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    #[error("simd width must be at least 1")]
    ZeroSimdWidth,

    #[error("tile extent {axis:?} = {value} does not divide the device alignment {alignment}")]
    TileAlignment {
        axis: TileAxis,
        value: u32,
        alignment: u32,
    },

    #[error("micro-tile extent {axis:?} = {value} is not a multiple of the simd width {width}")]
    MicroTileWidth {
        axis: MicroAxis,
        value: u32,
        width: u32,
    },

    #[error("micro-tile extent {axis:?} = {micro} exceeds its work-group tile extent {tile}")]
    MicroTileExceedsTile {
        axis: MicroAxis,
        micro: u32,
        tile: u32,
    },

    #[error(
        "simd width {width} > 1 requires untransposed A and transposed B \
         (got A transposed: {a_trans}, B transposed: {b_trans})"
    )]
    VectorizedLayout {
        width: u32,
        a_trans: bool,
        b_trans: bool,
    },

    #[error(
        "staged operand {operand:?}: tile bound {bound} along the fetch row axis \
         is not divisible by local_fetch_1 = {fetch}"
    )]
    FetchRows {
        operand: Operand,
        bound: u32,
        fetch: u32,
    },

    #[error(
        "staged operand {operand:?}: tile bound {bound} is not divisible by \
         local_fetch_0 * simd_width = {stride}"
    )]
    FetchCols {
        operand: Operand,
        bound: u32,
        stride: u32,
    },

    #[error(
        "fetch grid {fetch_0}x{fetch_1} does not cover the work-group \
         {local_0}x{local_1} exactly"
    )]
    FetchGridCoverage {
        fetch_0: u32,
        fetch_1: u32,
        local_0: u32,
        local_1: u32,
    },

    #[error("reduction lane count k = {k} must be a power of two >= 2")]
    ReductionLanes { k: u32 },
}

/// Every constraint violated by a parameter set.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("parameter set violates {} constraint(s)", .violations.len())]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

/// Validate a matrix-product parameter set against the transpose flags of
/// its two operands.
///
/// All checks are independent; every violated constraint is reported.
pub fn validate_gemm(
    p: &GemmParams,
    a_trans: bool,
    b_trans: bool,
    profile: &DeviceProfile,
) -> Result<(), ValidationError> {
    if p.simd_width == 0 {
        // Every later divisibility check is meaningless without a width.
        return Err(ValidationError {
            violations: vec![Violation::ZeroSimdWidth],
        });
    }

    let mut violations = Vec::new();
    let alignment = profile.memory_alignment;
    let (m_l, n_l, k_l) = (p.m_l(), p.n_l(), p.k_l);

    for (axis, value) in [
        (TileAxis::ML, m_l),
        (TileAxis::KL, k_l),
        (TileAxis::NL, n_l),
    ] {
        if value == 0 || alignment % value != 0 {
            violations.push(Violation::TileAlignment {
                axis,
                value,
                alignment,
            });
        }
    }

    for (axis, value) in [(MicroAxis::MS, p.m_s), (MicroAxis::NS, p.n_s)] {
        if value % p.simd_width != 0 {
            violations.push(Violation::MicroTileWidth {
                axis,
                value,
                width: p.simd_width,
            });
        }
    }

    for (axis, micro, tile) in [
        (MicroAxis::MS, p.m_s, m_l),
        (MicroAxis::NS, p.n_s, n_l),
        (MicroAxis::KS, p.k_s, k_l),
    ] {
        if micro > tile {
            violations.push(Violation::MicroTileExceedsTile { axis, micro, tile });
        }
    }

    // Contiguous vector loads on both sides exist only for A untransposed
    // and B transposed.
    if p.simd_width > 1 && !(!a_trans && b_trans) {
        violations.push(Violation::VectorizedLayout {
            width: p.simd_width,
            a_trans,
            b_trans,
        });
    }

    if p.use_a_local {
        let bound_1 = if a_trans { m_l } else { k_l };
        let bound_0 = if a_trans { k_l } else { m_l };
        check_fetch(p, Operand::A, bound_0, bound_1, &mut violations);
    }
    if p.use_b_local {
        let bound_1 = if b_trans { k_l } else { n_l };
        let bound_0 = if b_trans { n_l } else { k_l };
        check_fetch(p, Operand::B, bound_0, bound_1, &mut violations);
    }

    if (p.use_a_local || p.use_b_local)
        && p.local_fetch_0 * p.local_fetch_1 != p.local_size_0 * p.local_size_1
    {
        violations.push(Violation::FetchGridCoverage {
            fetch_0: p.local_fetch_0,
            fetch_1: p.local_fetch_1,
            local_0: p.local_size_0,
            local_1: p.local_size_1,
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

fn check_fetch(
    p: &GemmParams,
    operand: Operand,
    bound_0: u32,
    bound_1: u32,
    violations: &mut Vec<Violation>,
) {
    if p.local_fetch_1 > 0 && bound_1 % p.local_fetch_1 != 0 {
        violations.push(Violation::FetchRows {
            operand,
            bound: bound_1,
            fetch: p.local_fetch_1,
        });
    }
    let stride = p.local_fetch_0 * p.simd_width;
    if p.local_fetch_0 > 0 && bound_0 % stride != 0 {
        violations.push(Violation::FetchCols {
            operand,
            bound: bound_0,
            stride,
        });
    }
}

/// Validate a vector-reduction parameter set.
///
/// The halving binary-tree reduction assumes the lane count is a power of
/// two with at least one halving step.
pub fn validate_reduction(p: &ReductionParams) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    if p.k < 2 || !p.k.is_power_of_two() {
        violations.push(Violation::ReductionLanes { k: p.k });
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aligned_params() -> GemmParams {
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

    #[test]
    fn test_accepts_default_profile() {
        assert!(validate_gemm(&aligned_params(), false, false, &DeviceProfile::default()).is_ok());
    }

    #[test]
    fn test_rejects_unaligned_tile() {
        let p = GemmParams {
            m_s: 3, // mL = 48, 128 % 48 != 0
            ..aligned_params()
        };
        let err = validate_gemm(&p, false, false, &DeviceProfile::default()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::TileAlignment {
                axis: TileAxis::ML,
                ..
            }
        )));
    }

    #[test]
    fn test_alignment_comes_from_profile() {
        let p = GemmParams {
            m_s: 3, // mL = 48
            ..aligned_params()
        };
        // A device with 96-element alignment accepts what 128 rejects:
        // mL = 48, nL = kL = 32 all divide 96.
        let profile = DeviceProfile {
            memory_alignment: 96,
        };
        assert!(validate_gemm(&p, false, false, &profile).is_ok());
    }

    #[test]
    fn test_rejects_micro_tile_not_multiple_of_width() {
        let p = GemmParams {
            simd_width: 4,
            m_s: 2,
            n_s: 4,
            local_size_0: 16,
            local_size_1: 8,
            ..aligned_params()
        };
        // A untransposed, B transposed keeps the layout rule satisfied;
        // mS = 2 is not a multiple of 4.
        let err = validate_gemm(&p, false, true, &DeviceProfile::default()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::MicroTileWidth {
                axis: MicroAxis::MS,
                ..
            }
        )));
    }

    #[test]
    fn test_rejects_k_s_exceeding_k_l() {
        let p = GemmParams {
            k_s: 64,
            k_l: 32,
            ..aligned_params()
        };
        let err = validate_gemm(&p, false, false, &DeviceProfile::default()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::MicroTileExceedsTile {
                axis: MicroAxis::KS,
                ..
            }
        )));
    }

    #[test]
    fn test_vectorized_layout_rule() {
        let p = GemmParams {
            simd_width: 4,
            m_s: 4,
            n_s: 4,
            local_size_0: 8,
            local_size_1: 8,
            ..aligned_params()
        };
        // Only (A untransposed, B transposed) is legal with width > 1.
        assert!(validate_gemm(&p, false, true, &DeviceProfile::default()).is_ok());
        for (a_t, b_t) in [(false, false), (true, false), (true, true)] {
            let err = validate_gemm(&p, a_t, b_t, &DeviceProfile::default()).unwrap_err();
            assert!(
                err.violations
                    .iter()
                    .any(|v| matches!(v, Violation::VectorizedLayout { .. })),
                "expected layout violation for ({a_t}, {b_t})"
            );
        }
    }

    #[test]
    fn test_staged_fetch_grid_must_cover_group() {
        let p = GemmParams {
            use_a_local: true,
            local_fetch_0: 8,
            local_fetch_1: 8, // 64 threads vs 256 in the group
            ..aligned_params()
        };
        let err = validate_gemm(&p, false, false, &DeviceProfile::default()).unwrap_err();
        assert!(
            err.violations
                .iter()
                .any(|v| matches!(v, Violation::FetchGridCoverage { .. }))
        );
    }

    #[test]
    fn test_staged_fetch_divisibility_depends_on_transpose() {
        // A untransposed: bound_1 = kL = 32, bound_0 = mL = 32.
        // local_fetch_1 = 3 does not divide 32.
        let p = GemmParams {
            use_a_local: true,
            local_fetch_0: 8,
            local_fetch_1: 3,
            ..aligned_params()
        };
        let err = validate_gemm(&p, false, false, &DeviceProfile::default()).unwrap_err();
        assert!(err.violations.iter().any(|v| matches!(
            v,
            Violation::FetchRows {
                operand: Operand::A,
                bound: 32,
                fetch: 3
            }
        )));
    }

    #[test]
    fn test_zero_simd_width_short_circuits() {
        let p = GemmParams {
            simd_width: 0,
            ..aligned_params()
        };
        let err = validate_gemm(&p, false, false, &DeviceProfile::default()).unwrap_err();
        assert_eq!(err.violations, vec![Violation::ZeroSimdWidth]);
    }

    #[test]
    fn test_reduction_lane_count() {
        assert!(validate_reduction(&ReductionParams::default()).is_ok());
        for k in [0, 1, 3, 12] {
            let p = ReductionParams {
                k,
                ..ReductionParams::default()
            };
            let err = validate_reduction(&p).unwrap_err();
            assert_eq!(err.violations, vec![Violation::ReductionLanes { k }]);
        }
    }
}
