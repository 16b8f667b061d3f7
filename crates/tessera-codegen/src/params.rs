//! Tuning-parameter sets for the kernel templates.
//!
//! A parameter set is an immutable value object shared by reference between
//! validation, generation, and launch configuration for one kernel variant.
//! Nothing here searches or tunes — parameter selection is the caller's
//! problem; this module only carries and derives values.

use serde::{Deserialize, Serialize};

use tessera_core::ScalarType;

/// Device-specific generation constraints.
///
/// `memory_alignment` (in elements) is the constant every work-group tile
/// extent must divide; it feeds the tile legality checks rather than being
/// baked into them, so device-specific alignment rules can vary without
/// recompilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub memory_alignment: u32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            memory_alignment: 128,
        }
    }
}

/// Tuning parameters for the blocked matrix-product template.
///
/// The work-group tile extents are derived, never stored:
/// `mL = mS * local_size_0` and `nL = nS * local_size_1` hold by
/// construction through [`GemmParams::m_l`] and [`GemmParams::n_l`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmParams {
    /// Elements packed into one vector load/store (1 disables vectorization).
    pub simd_width: u32,
    /// Work-group extent along the M axis (threads).
    pub local_size_0: u32,
    /// Work-group extent along the N axis (threads).
    pub local_size_1: u32,
    /// Work-group tile depth along the contraction axis.
    pub k_l: u32,
    /// Per-thread micro-tile rows.
    pub m_s: u32,
    /// Inner-loop step along the contraction axis.
    pub k_s: u32,
    /// Per-thread micro-tile columns.
    pub n_s: u32,
    /// Stage the A panel in local memory.
    pub use_a_local: bool,
    /// Stage the B panel in local memory.
    pub use_b_local: bool,
    /// Cooperative fetch grid, first dimension.
    pub local_fetch_0: u32,
    /// Cooperative fetch grid, second dimension.
    pub local_fetch_1: u32,
}

impl GemmParams {
    /// Work-group tile extent along M: `mS * local_size_0`.
    pub fn m_l(&self) -> u32 {
        self.m_s * self.local_size_0
    }

    /// Work-group tile extent along N: `nS * local_size_1`.
    pub fn n_l(&self) -> u32 {
        self.n_s * self.local_size_1
    }

    /// Elements of `__local` memory the generated kernel declares.
    ///
    /// Each staged panel carries one padding element per row to break
    /// stride-aligned bank conflicts.
    pub fn local_mem_elements(&self) -> u32 {
        let mut n = 0;
        if self.use_a_local {
            n += self.k_l * (self.m_l() + 1);
        }
        if self.use_b_local {
            n += self.k_l * (self.n_l() + 1);
        }
        n
    }
}

impl Default for GemmParams {
    fn default() -> Self {
        Self {
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
}

/// Tuning parameters for the fused vector-reduction template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionParams {
    /// Elements packed into one vector load (1 disables vectorization).
    pub simd_width: u32,
    /// Rows handled per work-group (first local dimension).
    pub m: u32,
    /// Cooperating lanes per row (second local dimension).
    pub k: u32,
    /// Number of work-groups along the row axis.
    pub num_groups: u32,
}

impl ReductionParams {
    /// Bytes of `__local` memory the generated kernel declares for
    /// `num_exprs` fused reductions (one padding slot per row each).
    pub fn local_mem_bytes(&self, scalar: ScalarType, num_exprs: usize) -> usize {
        num_exprs * self.m as usize * (self.k as usize + 1) * scalar.size_bytes()
    }
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            simd_width: 1,
            m: 1,
            k: 256,
            num_groups: 32,
        }
    }
}

impl std::fmt::Display for ReductionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vector reduction: {{vector_type, m, k, num_groups}} = {{{}, {}, {}, {}}}",
            self.simd_width, self.m, self.k, self.num_groups
        )
    }
}
