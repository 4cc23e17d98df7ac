//! Pre-flight sizing of a dispatch.
//!
//! The estimate is computed from the same [`DispatchPlan`](super::dispatch::DispatchPlan) the
//! encoder emits from, so a branch added to the encoder is accounted for as soon as the plan
//! records it.

use super::{builder::CommandBuilder, dispatch::DispatchEncoder, request::DispatchRequest};
use crate::loom::heap::HeapKind;

impl DispatchEncoder {
    /// Exact number of bytes [`DispatchEncoder::encode`] appends to the stream of `builder`.
    ///
    /// The estimate is only valid until the next dispatch is encoded on `builder`, as global
    /// state programmed by that dispatch changes what the following ones emit.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(kernel = request.kernel.name())))]
    pub fn estimate(&self, builder: &CommandBuilder, request: &DispatchRequest) -> usize {
        self.plan(builder, request).size(request.kernel)
    }

    /// Bytes [`DispatchEncoder::encode`] consumes from each heap of `builder`, alignment
    /// padding included. Indexed by [`HeapKind::index`].
    pub fn estimate_heaps(&self, builder: &CommandBuilder, request: &DispatchRequest) -> [usize; 3] {
        let plan = self.plan(builder, request);
        HeapKind::ALL.map(|kind| plan.requirements.bytes_needed(builder.heap(kind)))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        encode::{
            CompletionSignal, DispatchEncoder, DispatchRequest, EncodeError,
            EncoderConfiguration, ImplicitArgValues, PartitionType, SlmPolicy,
        },
        hal::HardwareInfo,
        loom::heap::HeapKind,
        testing::{builder, random_kernel},
    };

    fn random_signal(rng: &mut fastrand::Rng) -> Option<CompletionSignal> {
        let address = rng.u64(1..1 << 40) << 4;
        let signal = match rng.u8(0..4) {
            0 => return None,
            1 => CompletionSignal::event(address),
            2 => CompletionSignal::in_order_counter(address, rng.u64(..)),
            _ => CompletionSignal::timestamp(address),
        };
        Some(
            signal
                .host_visible(rng.bool())
                .host_signal(rng.bool())
                .flush_l3(rng.bool()),
        )
    }

    fn random_config(rng: &mut fastrand::Rng) -> EncoderConfiguration {
        EncoderConfiguration {
            override_slm_size: rng.bool().then(|| rng.u32(0..40)),
            force_thread_group_dispatch_size: rng.bool().then(|| 1 << rng.u32(0..4)),
            force_compute_dispatch_all: rng.bool().then(|| rng.bool()),
            disable_walker_partitioning: rng.u8(0..4) == 0,
            force_morton_walk_order: rng.bool(),
            hw_local_id_generation: rng.bool().then(|| rng.bool()),
            walker_partition_type: rng.bool().then(|| {
                [PartitionType::X, PartitionType::Y, PartitionType::Z][rng.usize(0..3)]
            }),
            prefer_highest_dimension: rng.bool().then(|| rng.bool()),
            minimal_partition_size: [0, 1, 512][rng.usize(0..3)],
            synchronize_before_execution: rng.bool(),
            emit_self_cleanup: rng.bool(),
            use_atomics_for_self_cleanup: rng.bool(),
            cross_tile_atomic_synchronization: rng.bool(),
            semaphore_programming_required: rng.bool(),
            emit_pipe_control_stall: rng.bool(),
            disable_inline_data: rng.u8(0..4) == 0,
        }
    }

    /// Group shapes from a single item up to the largest group a dispatch may carry.
    fn random_group_size(rng: &mut fastrand::Rng) -> [u32; 3] {
        match rng.u8(0..4) {
            0 => [1024, 1, 1],
            1 => {
                let x: u32 = 1 << rng.u32(0..=10);
                let y = 1 << rng.u32(0..=(10 - x.trailing_zeros()));
                let z = rng.u32(1..=(1024 / (x * y)).min(64));
                [x, y, z]
            }
            _ => [rng.u32(0..64), rng.u32(0..4), rng.u32(0..3)],
        }
    }

    #[test]
    fn test_estimate_matches_encode() -> Result<(), EncodeError> {
        let mut rng = fastrand::Rng::with_seed(0x5eed);
        for _ in 0..200 {
            let hw = match rng.u8(0..3) {
                0 => HardwareInfo::xe_hp(),
                1 => HardwareInfo::xe_hpc(),
                _ => HardwareInfo::xe3p(),
            };
            let encoder = DispatchEncoder::new(hw, random_config(&mut rng))
                .with_work_partition_address(rng.u64(..1 << 40) << 3);
            let mut builder = builder();

            // several dispatches in a row, so the state cache is exercised too
            for _ in 0..4 {
                let kernel = random_kernel(&mut rng, !hw.heapless);
                let payload: Vec<u8> = (0..rng.usize(0..128)).map(|_| rng.u8(..)).collect();
                let mut request = DispatchRequest::new(&kernel)
                    .payload(&payload)
                    .group_count([rng.u32(0..64), rng.u32(0..8), rng.u32(0..4)])
                    .group_size(random_group_size(&mut rng))
                    .global_offset([rng.u32(..), rng.u32(..), rng.u32(..)])
                    .work_dim(rng.u32(1..4))
                    .uncached_mocs(rng.bool())
                    .global_atomics(rng.bool())
                    .internal(rng.u8(0..4) == 0)
                    .predicated(rng.bool())
                    .dynamic_slm_size(rng.u32(0..256 << 10))
                    .slm_policy(
                        [
                            SlmPolicy::None,
                            SlmPolicy::FavorLargeAllocation,
                            SlmPolicy::FavorLargeWorkingSet,
                        ][rng.usize(0..3)],
                    )
                    .implicit(ImplicitArgValues {
                        private_memory_address: rng.u64(..),
                        private_memory_size: rng.u32(..),
                        scratch_pointer_address: rng.u64(..),
                        ..Default::default()
                    });
                if rng.bool() {
                    request = request.group_start([rng.u32(0..2), 0, 0]);
                }
                if rng.u8(0..4) == 0 {
                    request = request.indirect(rng.u64(..1 << 40) << 2);
                }
                if let Some(signal) = random_signal(&mut rng) {
                    request = request.signal(signal);
                }

                let estimate = encoder.estimate(&builder, &request);
                let heaps = encoder.estimate_heaps(&builder, &request);
                let used = HeapKind::ALL.map(|kind| builder.heap(kind).used());

                let output = encoder.encode(&mut builder, &request)?;
                assert_eq!(output.bytes_written, estimate, "kernel `{}`", kernel.name());
                for kind in HeapKind::ALL {
                    assert_eq!(
                        builder.heap(kind).used() - used[kind.index()],
                        heaps[kind.index()],
                        "{kind} heap"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_estimate_tracks_state() -> Result<(), EncodeError> {
        let mut rng = fastrand::Rng::with_seed(7);
        let kernel = random_kernel(&mut rng, true);
        let encoder = DispatchEncoder::new(HardwareInfo::xe_hp(), Default::default());
        let mut builder = builder();
        let request = DispatchRequest::new(&kernel).group_count([2, 2, 1]);

        let first = encoder.estimate(&builder, &request);
        encoder.encode(&mut builder, &request)?;
        let second = encoder.estimate(&builder, &request);
        assert!(second < first);
        assert_eq!(encoder.encode(&mut builder, &request)?.bytes_written, second);
        Ok(())
    }
}
