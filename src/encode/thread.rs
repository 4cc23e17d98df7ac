//! Translation of group geometry into the walker's thread dispatch fields.

use super::config::EncoderConfiguration;
use crate::{
    hal::{DispatchWalkOrder, HardwareInfo, HardwareProfile},
    kernel::KernelDescriptor,
    loom::num::{Vec3, max_n_bit_value, prev_power_of_two},
};

/// Work items a single group may hold.
pub const MAX_WORK_GROUP_SIZE: u32 = 1024;

/// Work items a single group may hold for hardware local id generation.
pub const MAX_HW_GENERATED_GROUP_SIZE: u64 = 1024;

/// Hardware walk orders, indexed by their encoding. Each lists axes fastest first.
pub const WALK_ORDERS: [[u8; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [2, 0, 1],
    [1, 2, 0],
    [2, 1, 0],
];

/// Thread-group dimensions of the walker; never 0 on any axis.
#[inline]
pub fn thread_group_dimensions(group_count: Vec3<u32>) -> Vec3<u32> {
    group_count.at_least_one()
}

/// Hardware threads needed for one group.
pub fn threads_per_group(group_size: u32, simd: u32) -> u32 {
    match simd {
        0 | 1 => group_size.max(1),
        _ => group_size.div_ceil(simd).max(1),
    }
}

/// Lanes enabled in the last thread of a group.
///
/// Full when the group size is a multiple of the SIMD width, otherwise exactly the remainder.
pub fn execution_mask(group_size: u32, simd: u32) -> u32 {
    let width = match simd {
        0 | 1 => 32,
        simd => simd,
    };
    let remainder = match simd {
        0 | 1 => 0,
        simd => group_size & (simd - 1),
    };
    match remainder {
        0 => max_n_bit_value(width) as u32,
        remainder => max_n_bit_value(remainder) as u32,
    }
}

/// Who produces the local ids a kernel expects in its per-thread data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalIdGeneration {
    /// The kernel reads no local ids.
    None,
    /// The encoder uploads them, laid out in the given walk order.
    Runtime { walk_order: [u8; 3] },
    /// The walker generates them in the walk order of the given encoding.
    Hardware { walk_order: u32 },
}

impl LocalIdGeneration {
    #[inline]
    pub fn is_runtime(self) -> bool {
        matches!(self, LocalIdGeneration::Runtime { .. })
    }
}

/// Checks if hardware can generate ids for `group_size` walking in `order`.
///
/// Every axis but the slowest must be a power of two.
fn hardware_walk_supported(order: [u8; 3], group_size: Vec3<u32>) -> bool {
    let sizes = group_size.to_array();
    order[..2]
        .iter()
        .all(|&axis| sizes[axis as usize].is_power_of_two())
}

fn walk_order_index(order: [u8; 3]) -> Option<u32> {
    WALK_ORDERS
        .iter()
        .position(|candidate| *candidate == order)
        .map(|index| index as u32)
}

/// Decides between hardware and runtime local id generation.
pub fn local_id_generation(
    kernel: &KernelDescriptor,
    group_size: Vec3<u32>,
    config: &EncoderConfiguration,
) -> LocalIdGeneration {
    let attributes = kernel.attributes();
    if attributes.num_local_id_channels == 0 {
        return LocalIdGeneration::None;
    }

    let required = attributes.required_walk_order;
    let runtime = LocalIdGeneration::Runtime {
        walk_order: required.unwrap_or(WALK_ORDERS[0]),
    };
    if attributes.simd_size == 1 {
        return runtime;
    }

    if let Some(force) = config.hw_local_id_generation {
        return match force {
            true => LocalIdGeneration::Hardware {
                walk_order: required.and_then(walk_order_index).unwrap_or(0),
            },
            false => runtime,
        };
    }

    if group_size.product() > MAX_HW_GENERATED_GROUP_SIZE {
        return runtime;
    }

    match required {
        Some(order) => match hardware_walk_supported(order, group_size) {
            true => walk_order_index(order)
                .map(|walk_order| LocalIdGeneration::Hardware { walk_order })
                .unwrap_or(runtime),
            false => runtime,
        },
        None => WALK_ORDERS
            .iter()
            .position(|&order| hardware_walk_supported(order, group_size))
            .map(|index| LocalIdGeneration::Hardware {
                walk_order: index as u32,
            })
            .unwrap_or(runtime),
    }
}

/// Order in which groups are handed to subslices.
pub fn dispatch_walk_order(
    kernel: &KernelDescriptor,
    config: &EncoderConfiguration,
) -> DispatchWalkOrder {
    if config.force_morton_walk_order {
        DispatchWalkOrder::Morton
    } else if kernel.attributes().flags.uses_sampling {
        DispatchWalkOrder::YOrder
    } else {
        DispatchWalkOrder::Linear
    }
}

/// Number of groups handed to a subslice at once.
///
/// Starts from the largest batch the profile supports and halves it while a tile would leave
/// subslices idle or a batch would not fit on a subslice.
pub fn thread_group_batch(
    threads_per_group: u32,
    total_groups: u64,
    partition_count: u32,
    hw: &HardwareInfo,
    profile: &dyn HardwareProfile,
    config: &EncoderConfiguration,
) -> u32 {
    let max = profile.max_batch_size();
    if let Some(forced) = config.force_thread_group_dispatch_size {
        return prev_power_of_two(forced.clamp(1, max) as u64) as u32;
    }

    let groups_per_tile = total_groups / partition_count.max(1) as u64;
    let mut batch = max;
    while batch > 1
        && (groups_per_tile / (batch as u64) < hw.subslice_count as u64
            || threads_per_group.saturating_mul(batch) > hw.threads_per_subslice)
    {
        batch /= 2;
    }
    batch
}
