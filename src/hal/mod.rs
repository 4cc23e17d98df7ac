//! Hardware abstraction for the dispatch encoder.
//!
//! ## Key Components
//! 1. **Capability Table**: [`HardwareInfo`] describes one device (tiles, subslices, SLM limits,
//!    stepping, heapless and implicit scaling modes). It is read-only for the encoder.
//! 2. **Hardware Profile**: [`HardwareProfile`] captures every generation-specific encoding the
//!    encoder needs. A profile is selected once per device through [`profile_for`].
//! 3. **Commands**: [`cmds`] and [`walker`] define the bit-exact command layouts.

use std::fmt::Debug;

use derive_more::Display;
use dyn_clone::DynClone;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use walker::{ComputeWalker, ComputeWalkerHeapless, WalkerCommand, WalkerFields};
pub use xe3p::Xe3p;
pub use xe_hp::XeHp;
pub use xe_hpc::XeHpc;

pub mod cmds;
pub mod walker;
pub mod xe3p;
pub mod xe_hp;
pub mod xe_hpc;

/// Hardware revision ids.
pub mod stepping {
    pub const A0: u32 = 0;
    pub const A1: u32 = 1;
    pub const B0: u32 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Family {
    #[display("Xe-HP")]
    XeHp,
    #[display("Xe-HPC")]
    XeHpc,
    #[display("Xe3P")]
    Xe3p,
}

/// Read-only capability table of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HardwareInfo {
    pub family: Family,
    pub stepping: u32,
    /// Number of execution tiles exposed to implicit scaling.
    pub tile_count: u32,
    /// Subslices per tile.
    pub subslice_count: u32,
    /// Hardware threads per subslice.
    pub threads_per_subslice: u32,
    /// Largest SLM allocation a single work group may request.
    pub max_slm_size: u32,
    /// SLM capacity of one subslice.
    pub slm_size_per_subslice: u32,
    /// General register file width in bytes.
    pub grf_size: u32,
    pub heapless: bool,
    pub implicit_scaling: bool,
    pub static_partitioning: bool,
    pub integrated: bool,
}

impl HardwareInfo {
    pub const fn xe_hp() -> Self {
        Self {
            family: Family::XeHp,
            stepping: stepping::A1,
            tile_count: 1,
            subslice_count: 32,
            threads_per_subslice: 112,
            max_slm_size: 64 << 10,
            slm_size_per_subslice: 128 << 10,
            grf_size: 32,
            heapless: false,
            implicit_scaling: false,
            static_partitioning: false,
            integrated: false,
        }
    }

    pub const fn xe_hpc() -> Self {
        Self {
            family: Family::XeHpc,
            stepping: stepping::B0,
            tile_count: 2,
            subslice_count: 64,
            threads_per_subslice: 64,
            max_slm_size: 128 << 10,
            slm_size_per_subslice: 128 << 10,
            grf_size: 64,
            heapless: false,
            implicit_scaling: true,
            static_partitioning: true,
            integrated: false,
        }
    }

    pub const fn xe3p() -> Self {
        Self {
            family: Family::Xe3p,
            stepping: stepping::A0,
            tile_count: 1,
            subslice_count: 32,
            threads_per_subslice: 128,
            max_slm_size: 128 << 10,
            slm_size_per_subslice: 384 << 10,
            grf_size: 64,
            heapless: true,
            implicit_scaling: false,
            static_partitioning: false,
            integrated: false,
        }
    }

    /// Checks if dispatches may be split across tiles.
    #[inline]
    pub const fn multi_tile(&self) -> bool {
        self.implicit_scaling && self.tile_count > 1
    }
}

/// Order in which the walker hands thread groups to subslices.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DispatchWalkOrder {
    #[default]
    Linear,
    YOrder,
    Morton,
}

/// What a memory object is used for, to pick its cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum CacheUsage {
    Stateless,
    StatelessUncached,
    PostSync,
    BindingTablePool,
}

/// Sizes and alignments of the resource blocks of one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths {
    pub binding_table_alignment: usize,
    pub binding_table_entry_size: usize,
    pub surface_state_size: usize,
    pub sampler_state_size: usize,
    pub sampler_state_alignment: usize,
    pub border_color_size: usize,
    pub indirect_data_alignment: usize,
    /// Distance between the post-sync slots of consecutive partitions.
    pub post_sync_stride: u64,
}

impl Default for FieldWidths {
    fn default() -> Self {
        Self {
            binding_table_alignment: 64,
            binding_table_entry_size: 4,
            surface_state_size: 64,
            sampler_state_size: 16,
            sampler_state_alignment: 32,
            border_color_size: 64,
            indirect_data_alignment: 64,
            post_sync_stride: 16,
        }
    }
}

/// One entry of the preferred SLM allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferredSlm {
    pub bytes: u32,
    pub encoded: u32,
}

/// When the post-sync write needs a system memory fence on top of host visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FencePolicy {
    Never,
    Always,
    /// Required on discrete parts only.
    DiscreteOnly,
    /// Required from the given stepping on.
    #[display("FromStepping({_0})")]
    FromStepping(u32),
}

impl FencePolicy {
    pub fn required(self, hw: &HardwareInfo) -> bool {
        match self {
            FencePolicy::Never => false,
            FencePolicy::Always => true,
            FencePolicy::DiscreteOnly => !hw.integrated,
            FencePolicy::FromStepping(stepping) => hw.stepping >= stepping,
        }
    }
}

/// Generation-specific encodings consumed by the dispatch encoder.
pub trait HardwareProfile: DynClone + Debug + Send + Sync {
    fn family(&self) -> Family;

    fn field_widths(&self) -> FieldWidths {
        FieldWidths::default()
    }

    /// Encodes a dispatch walk order, or `None` if the walker has no such field.
    fn encode_walk_order(&self, order: DispatchWalkOrder) -> Option<u32>;

    /// Encodes the number of thread groups dispatched to a subslice at once.
    fn encode_batch_size(&self, groups: u32) -> u32;

    /// Largest batch [`HardwareProfile::encode_batch_size`] can represent.
    fn max_batch_size(&self) -> u32;

    /// Encodes the kernel SIMD width into the walker's SIMD size field.
    fn encode_simd(&self, simd: u32) -> u32 {
        match simd {
            1 | 32 => 2,
            16 => 1,
            _ => 0,
        }
    }

    /// Ascending table of preferred SLM allocation sizes.
    fn preferred_slm_sizes(&self) -> &'static [PreferredSlm];

    fn fence_policy(&self) -> FencePolicy;

    fn mocs(&self, usage: CacheUsage) -> u32;

    /// Some steppings need state base address programmed twice.
    fn requires_double_state_base_address(&self, _hw: &HardwareInfo) -> bool {
        false
    }

    /// Value of the L3 control register for the given SLM mode, on generations that partition
    /// L3 between SLM and cache through a register.
    fn l3_config(&self, _slm_enabled: bool) -> Option<u32> {
        None
    }

    fn supports_dispatch_all(&self) -> bool {
        false
    }

    /// Whether the walker should prefetch binding table entries and samplers.
    fn binding_table_prefetch(&self) -> bool {
        false
    }
}

dyn_clone::clone_trait_object!(HardwareProfile);

/// Selects the profile of a generation.
pub fn profile_for(family: Family) -> Box<dyn HardwareProfile> {
    match family {
        Family::XeHp => Box::new(XeHp),
        Family::XeHpc => Box::new(XeHpc),
        Family::Xe3p => Box::new(Xe3p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_policy() {
        let mut hw = HardwareInfo::xe_hpc();
        hw.stepping = stepping::A0;
        assert!(!FencePolicy::FromStepping(stepping::B0).required(&hw));
        hw.stepping = stepping::B0;
        assert!(FencePolicy::FromStepping(stepping::B0).required(&hw));

        let mut hw = HardwareInfo::xe3p();
        assert!(FencePolicy::DiscreteOnly.required(&hw));
        hw.integrated = true;
        assert!(!FencePolicy::DiscreteOnly.required(&hw));
        assert!(!FencePolicy::Never.required(&hw));
        assert!(FencePolicy::Always.required(&hw));
    }

    #[test]
    fn test_profile_selection() {
        for hw in [
            HardwareInfo::xe_hp(),
            HardwareInfo::xe_hpc(),
            HardwareInfo::xe3p(),
        ] {
            let profile = profile_for(hw.family);
            assert_eq!(profile.family(), hw.family);

            let cloned = dyn_clone::clone_box(&*profile);
            assert_eq!(cloned.family(), hw.family);

            let sizes = profile.preferred_slm_sizes();
            assert_eq!(sizes[0].bytes, 0);
            assert!(sizes.windows(2).all(|w| w[0].bytes < w[1].bytes));
            assert!(sizes.windows(2).all(|w| w[0].encoded < w[1].encoded));
        }
    }

    #[test]
    fn test_multi_tile() {
        assert!(HardwareInfo::xe_hpc().multi_tile());
        assert!(!HardwareInfo::xe_hp().multi_tile());
        let hw = HardwareInfo {
            implicit_scaling: false,
            ..HardwareInfo::xe_hpc()
        };
        assert!(!hw.multi_tile());
    }
}
