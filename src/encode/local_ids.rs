//! Runtime generation of per-thread local ids.
//!
//! Each hardware thread receives one GRF-aligned block per id channel, holding one 16-bit id
//! per SIMD lane. SIMD1 threads pack all channels into a single GRF.

use crate::loom::num::{Vec3, align_up};

/// Bytes of per-thread data one hardware thread consumes.
pub fn per_thread_data_size(simd: u32, grf_size: u32, channels: u32) -> u32 {
    if channels == 0 {
        return 0;
    }
    match simd {
        0 | 1 => grf_size,
        simd => channels * align_up(simd as u64 * 2, grf_size as u64) as u32,
    }
}

/// Bytes of per-thread data a whole group consumes.
pub fn per_thread_data_total(threads: u32, simd: u32, grf_size: u32, channels: u32) -> u32 {
    threads * per_thread_data_size(simd, grf_size, channels)
}

/// Local id of the `index`-th work item of a group walked in `walk_order`.
pub fn local_id(index: u32, group_size: Vec3<u32>, walk_order: [u8; 3]) -> Vec3<u32> {
    let sizes = group_size.at_least_one().to_array();
    let [fast, mid, slow] = walk_order.map(usize::from);
    let mut id = [0u32; 3];
    id[fast] = index % sizes[fast];
    id[mid] = (index / sizes[fast]) % sizes[mid];
    id[slow] = index / (sizes[fast] * sizes[mid]);
    id.into()
}

/// Fills `buffer` with the local ids of one group.
///
/// Lanes past the last work item read zero.
///
/// # Panics
/// If `buffer` is smaller than [`per_thread_data_total`].
pub fn generate_local_ids(
    buffer: &mut [u8],
    simd: u32,
    grf_size: u32,
    channels: u32,
    group_size: Vec3<u32>,
    walk_order: [u8; 3],
) {
    let group_size = group_size.at_least_one();
    let total = group_size.product() as u32;
    let lanes = simd.max(1);
    let threads = total.div_ceil(lanes);
    let thread_size = per_thread_data_size(simd, grf_size, channels) as usize;
    assert!(
        buffer.len() >= threads as usize * thread_size,
        "local id buffer of {} bytes is too small for {threads} threads",
        buffer.len()
    );
    buffer[..threads as usize * thread_size].fill(0);

    let channel_stride = match simd {
        0 | 1 => 2,
        simd => align_up(simd as u64 * 2, grf_size as u64) as usize,
    };
    let lane_stride = match simd {
        0 | 1 => 0,
        _ => 2,
    };

    for (thread, lane) in itertools::iproduct!(0..threads, 0..lanes) {
        let index = thread * lanes + lane;
        if index >= total {
            break;
        }
        let block = &mut buffer[thread as usize * thread_size..][..thread_size];
        let id = local_id(index, group_size, walk_order).to_array();
        for (channel, &value) in id.iter().enumerate().take(channels as usize) {
            let offset = channel * channel_stride + lane as usize * lane_stride;
            block[offset..offset + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
    }
}
