//! Shared local memory sizing.

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::hal::{HardwareInfo, PreferredSlm};

/// How to trade SLM against cache when picking the preferred SLM allocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SlmPolicy {
    /// Enough SLM for as many groups as fit on a subslice.
    #[default]
    None,
    /// As much SLM as the subslice offers.
    FavorLargeAllocation,
    /// Only what one group needs, leaving the rest to cache.
    FavorLargeWorkingSet,
}

/// Clamps a requested SLM size to what a work group may allocate.
pub fn clamp_slm_size(bytes: u32, hw: &HardwareInfo) -> u32 {
    if bytes > hw.max_slm_size {
        log::warn!(
            "requested SLM size {bytes} exceeds the {} maximum of {}; clamping",
            hw.family,
            hw.max_slm_size
        );
    }
    bytes.min(hw.max_slm_size)
}

/// Encodes the walker's SLM size field: 0 for none, 1 up to 1 KB, then one step per power of two.
pub fn encode_slm_size(bytes: u32) -> u32 {
    match bytes {
        0 => 0,
        _ => {
            let kilobytes = bytes.div_ceil(1024);
            kilobytes.next_power_of_two().trailing_zeros() + 1
        }
    }
}

/// Value of the walker's SLM size field.
///
/// An override is taken as already encoded, and clamped to the largest encoding the device
/// accepts.
pub fn slm_size_field(slm_size: u32, override_size: Option<u32>, hw: &HardwareInfo) -> u32 {
    let max = encode_slm_size(hw.max_slm_size);
    match override_size {
        Some(encoded) if encoded > max => {
            log::warn!(
                "SLM size override {encoded} exceeds the {} maximum encoding of {max}; clamping",
                hw.family
            );
            max
        }
        Some(encoded) => encoded,
        None => encode_slm_size(slm_size),
    }
}

/// Picks the encoded preferred SLM allocation for a dispatch.
///
/// The result is monotone non-decreasing in `slm_total` for a fixed policy and group shape.
pub fn preferred_slm_size(
    slm_total: u32,
    policy: SlmPolicy,
    threads_per_group: u32,
    hw: &HardwareInfo,
    sizes: &[PreferredSlm],
) -> u32 {
    let Some(first) = sizes.first() else {
        return 0;
    };
    if slm_total == 0 {
        return first.encoded;
    }

    let needed = match policy {
        SlmPolicy::FavorLargeAllocation => hw.slm_size_per_subslice,
        SlmPolicy::FavorLargeWorkingSet => slm_total,
        SlmPolicy::None => {
            let groups_per_subslice = (hw.threads_per_subslice / threads_per_group.max(1)).max(1);
            slm_total
                .saturating_mul(groups_per_subslice)
                .min(hw.slm_size_per_subslice)
                .max(slm_total)
        }
    };

    sizes
        .iter()
        .find(|size| size.bytes >= needed)
        .or(sizes.last())
        .map_or(0, |size| size.encoded)
}
