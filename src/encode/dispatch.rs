//! The dispatch encoder.
//!
//! Encoding one dispatch runs in two passes over the same [`DispatchPlan`]:
//! 1. **Planning** decides everything that affects the bytes written to the command stream:
//!    inline data, local id generation, heap chunks, global state and partitioning. Planning
//!    reads the builder but never writes to it, so [`DispatchEncoder::estimate`] is a plan
//!    followed by [`DispatchPlan::size`].
//! 2. **Emission** places heap data, programs the walker and writes the commands the plan
//!    names, in the order the command streamer consumes them.

use super::{
    EncodeError,
    builder::CommandBuilder,
    config::EncoderConfiguration,
    heap_placement::{
        Chunk, HeapRequirements, place_binding_table, place_bindless, place_samplers,
    },
    indirect::{emit_indirect_dispatch, indirect_dispatch_size},
    local_ids::{generate_local_ids, per_thread_data_total},
    partition::{DispatchMode, PartitionRequest, plan_partitions},
    post_sync::{PostSync, PostSyncOperation},
    request::{DispatchOutput, DispatchRequest},
    slm::{clamp_slm_size, preferred_slm_size, slm_size_field},
    state::{RequiredState, StatePlan},
    thread::{
        LocalIdGeneration, MAX_WORK_GROUP_SIZE, dispatch_walk_order, execution_mask,
        local_id_generation, thread_group_batch, thread_group_dimensions, threads_per_group,
    },
};
use crate::{
    hal::{
        ComputeWalker, ComputeWalkerHeapless, HardwareInfo, HardwareProfile, WalkerCommand,
        profile_for,
    },
    kernel::{
        KernelDescriptor,
        payload::{patch_pointer, patch_u32},
    },
    loom::{
        heap::{HeapKind, Heaps},
        num::{Axis, Vec3},
        stream::StreamError,
    },
};

/// Most binding table entries the walker prefetches.
const MAX_PREFETCHED_BINDING_TABLE_ENTRIES: u32 = 31;
/// Most sampler groups of four the walker prefetches.
const MAX_PREFETCHED_SAMPLER_GROUPS: u32 = 4;

/// Encodes compute dispatches for one device.
///
/// The encoder itself holds no per-stream state; everything a stream remembers lives in its
/// [`CommandBuilder`].
#[derive(Debug, Clone)]
pub struct DispatchEncoder {
    hw: HardwareInfo,
    profile: Box<dyn HardwareProfile>,
    config: EncoderConfiguration,
    work_partition_address: Option<u64>,
}

/// Everything that decides the bytes one dispatch writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchPlan {
    pub heapless: bool,
    pub group_count: Vec3<u32>,
    pub group_size: Vec3<u32>,
    /// Work items of one group.
    pub work_items: u32,
    pub threads_per_group: u32,
    pub local_ids: LocalIdGeneration,
    pub cross_thread_size: u32,
    /// Runtime-generated local ids of a whole group.
    pub per_thread_size: u32,
    /// Cross-thread data travels inside the walker.
    pub inline: bool,
    pub slm_size: u32,
    pub requirements: HeapRequirements,
    pub required_state: RequiredState,
    pub state: StatePlan,
    pub post_sync: PostSync,
    pub indirect: Option<u64>,
    pub mode: DispatchMode,
}

impl DispatchPlan {
    /// Bytes the dispatch writes to the command stream.
    pub fn size(&self, kernel: &KernelDescriptor) -> usize {
        let walker = WalkerCommand::size_for(self.heapless);
        let dispatch = match &self.mode {
            DispatchMode::Single => walker,
            DispatchMode::Partitioned(plan) => plan.size(walker),
        };
        let indirect = match self.indirect {
            Some(_) => indirect_dispatch_size(kernel, self.group_size),
            None => 0,
        };
        self.state.size() + indirect + dispatch
    }

    #[inline]
    pub fn partition_count(&self) -> u32 {
        match &self.mode {
            DispatchMode::Single => 1,
            DispatchMode::Partitioned(plan) => plan.partition_count(),
        }
    }
}

/// Inline data capacity of the walker shape.
fn inline_capacity(heapless: bool) -> usize {
    match heapless {
        true => ComputeWalkerHeapless::INLINE_DATA_SIZE,
        false => ComputeWalker::INLINE_DATA_SIZE,
    }
}

impl DispatchEncoder {
    pub fn new(hw: HardwareInfo, config: EncoderConfiguration) -> Self {
        let profile = profile_for(hw.family);
        Self::with_profile(hw, profile, config)
    }

    pub fn with_profile(
        hw: HardwareInfo,
        profile: Box<dyn HardwareProfile>,
        config: EncoderConfiguration,
    ) -> Self {
        Self {
            hw,
            profile,
            config,
            work_partition_address: None,
        }
    }

    /// Sets the allocation each tile's partition id is loaded from under static partitioning.
    pub fn with_work_partition_address(mut self, address: u64) -> Self {
        self.work_partition_address = Some(address);
        self
    }

    #[inline]
    pub fn hw(&self) -> &HardwareInfo {
        &self.hw
    }

    #[inline]
    pub fn profile(&self) -> &dyn HardwareProfile {
        &*self.profile
    }

    #[inline]
    pub fn config(&self) -> &EncoderConfiguration {
        &self.config
    }

    #[inline]
    pub fn config_mut(&mut self) -> &mut EncoderConfiguration {
        &mut self.config
    }

    /// Decides how `request` is encoded on `builder`, without writing anything.
    ///
    /// # Panics
    /// If the kernel has a binding table on a heapless device, or carries an invalid argument.
    /// Also if a group holds more than [`MAX_WORK_GROUP_SIZE`] work items, which callers validate
    /// before launching.
    pub fn plan(&self, builder: &CommandBuilder, request: &DispatchRequest) -> DispatchPlan {
        let kernel = request.kernel;
        let attributes = kernel.attributes();
        let heapless = self.hw.heapless;
        assert!(
            !heapless || kernel.binding_table().num_entries == 0,
            "kernel `{}` has a binding table, which a heapless walker cannot address",
            kernel.name()
        );

        let group_count = request.normalized_group_count();
        let group_size = request.normalized_group_size();
        let simd = attributes.simd_size;
        let items = group_size.product();
        assert!(
            items <= MAX_WORK_GROUP_SIZE as u64,
            "kernel `{}`: group of {items} work items exceeds the maximum of {MAX_WORK_GROUP_SIZE}",
            kernel.name()
        );
        let items = items as u32;
        let threads = threads_per_group(items, simd);

        let local_ids = local_id_generation(kernel, group_size, &self.config);
        let per_thread_size = match local_ids.is_runtime() {
            true => per_thread_data_total(
                threads,
                simd,
                self.hw.grf_size,
                attributes.num_local_id_channels,
            ),
            false => 0,
        };

        let cross_thread_size = kernel.compute_cross_thread_size();
        let inline = attributes.flags.passes_inline_data
            && cross_thread_size > 0
            && cross_thread_size as usize <= inline_capacity(heapless)
            && request.indirect.is_none()
            && !self.config.disable_inline_data;
        log::trace!(
            "kernel `{}`: {cross_thread_size} bytes of cross-thread data, inline: {inline}, local ids: {local_ids:?}",
            kernel.name()
        );

        let widths = self.profile.field_widths();
        let mut requirements = HeapRequirements::for_kernel(kernel, &widths);
        let payload_size = per_thread_size as usize
            + match inline {
                true => 0,
                false => cross_thread_size as usize,
            };
        if payload_size > 0 {
            requirements.payload = Chunk::new(widths.indirect_data_alignment, payload_size);
        }

        let slm_size = clamp_slm_size(request.slm_total(), &self.hw);
        let touched = HeapKind::ALL.map(|kind| requirements.touches(kind));
        let required_state = RequiredState::new(
            builder.heaps(),
            touched,
            request.uncached_mocs,
            request.global_atomics,
            slm_size > 0,
            &self.hw,
            &*self.profile,
        );
        let state = builder
            .state()
            .plan(&required_state, &self.hw, &*self.profile);

        let post_sync = PostSync::resolve(request.signal.as_ref(), &self.hw, &*self.profile);
        let partition = PartitionRequest {
            group_start: request.group_start,
            group_count,
            requested: request.partition_type,
            uses_images: attributes.flags.uses_images,
            internal: request.internal,
            indirect: request.indirect.is_some(),
            post_sync_address: (post_sync.operation != PostSyncOperation::NoWrite)
                .then_some(post_sync.address),
        };
        let mode = plan_partitions(
            &partition,
            &self.hw,
            &*self.profile,
            &self.config,
            self.work_partition_address,
        );

        DispatchPlan {
            heapless,
            group_count,
            group_size,
            work_items: items,
            threads_per_group: threads,
            local_ids,
            cross_thread_size,
            per_thread_size,
            inline,
            slm_size,
            requirements,
            required_state,
            state,
            post_sync,
            indirect: request.indirect,
            mode,
        }
    }

    /// Encodes one dispatch into `builder`.
    ///
    /// Fails without writing anything if the stream or a heap lacks the space the dispatch
    /// needs. The global state the dispatch required is recorded in the builder.
    ///
    /// # Panics
    /// On kernel descriptor invariant violations, see [`DispatchEncoder::plan`]. With the
    /// `strict` feature, also if the bytes written disagree with the estimate.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(kernel = request.kernel.name())))]
    pub fn encode(
        &self,
        builder: &mut CommandBuilder,
        request: &DispatchRequest,
    ) -> Result<DispatchOutput, EncodeError> {
        let kernel = request.kernel;
        let plan = self.plan(builder, request);
        let estimate = plan.size(kernel);

        let available = builder.stream().available();
        if estimate > available {
            return Err(StreamError::OutOfSpace {
                requested: estimate,
                available,
            }
            .into());
        }
        plan.requirements.check(builder.heaps())?;

        let builder_id = builder.id();
        let (stream, heaps, cache) = builder.parts_mut();
        let start = stream.used();

        let mut payload = self.build_payload(request, &plan);
        let placement = self.place(heaps, kernel, &plan, &mut payload)?;

        let mut walker = WalkerCommand::new(plan.heapless);
        self.program_walker(&mut walker, request, &plan, &placement, &payload);

        if !plan.state.is_empty() {
            log::debug!("builder {builder_id}: programming global state {:?}", plan.state);
        }
        plan.state
            .emit(stream, &plan.required_state, &*self.profile)?;
        cache.commit(&plan.state, &plan.required_state);

        if let Some(counts) = plan.indirect {
            let payload_address = placement.payload_address.unwrap_or_default();
            emit_indirect_dispatch(stream, kernel, plan.group_size, counts, payload_address)?;
        }

        let sub_dispatches = match &plan.mode {
            DispatchMode::Single => vec![walker.emit(stream)?],
            DispatchMode::Partitioned(partitions) => partitions.emit(stream, &walker)?,
        };

        let bytes_written = stream.used() - start;
        #[cfg(feature = "strict")]
        assert_eq!(
            bytes_written,
            estimate,
            "kernel `{}`: wrote {bytes_written} bytes, estimated {estimate}",
            kernel.name()
        );
        #[cfg(not(feature = "strict"))]
        if bytes_written != estimate {
            log::error!(
                "kernel `{}`: wrote {bytes_written} bytes, estimated {estimate}",
                kernel.name()
            );
        }

        let first = sub_dispatches[0];
        Ok(DispatchOutput {
            walker: first,
            command: WalkerCommand::read(stream, first.offset, plan.heapless),
            partition_count: plan.partition_count(),
            sub_dispatches,
            bytes_written,
            binding_table_offset: placement.binding_table,
            payload_address: placement.payload_address,
            state_emitted: !plan.state.is_empty(),
        })
    }

    /// Cross-thread data: the caller's bytes with every mapped runtime field patched in.
    ///
    /// Unmapped fields keep whatever the caller wrote.
    fn build_payload(&self, request: &DispatchRequest, plan: &DispatchPlan) -> Vec<u8> {
        let kernel = request.kernel;
        let mut payload = vec![0u8; plan.cross_thread_size as usize];
        let len = request.payload.len().min(payload.len());
        payload[..len].copy_from_slice(&request.payload[..len]);

        let traits = kernel.dispatch_traits();
        let global_size = plan
            .group_count
            .zip(plan.group_size, |count, size| count.saturating_mul(size));
        for axis in Axis::ALL {
            let index = axis.index();
            let group_size = plan.group_size.get(axis);
            patch_u32(
                &mut payload,
                traits.global_work_offset[index],
                request.global_offset.get(axis),
            );
            patch_u32(&mut payload, traits.local_work_size[index], group_size);
            patch_u32(&mut payload, traits.local_work_size2[index], group_size);
            patch_u32(&mut payload, traits.enqueued_local_work_size[index], group_size);
            // indirect dispatch writes these from the command streamer
            if plan.indirect.is_none() {
                patch_u32(&mut payload, traits.global_work_size[index], global_size.get(axis));
                patch_u32(
                    &mut payload,
                    traits.num_work_groups[index],
                    plan.group_count.get(axis),
                );
            }
        }
        patch_u32(&mut payload, traits.work_dim, request.work_dim);

        let implicit = kernel.implicit_args();
        let values = &request.implicit;
        let pointer_size = kernel.attributes().pointer_size;
        for (offset, value) in [
            (implicit.private_memory_address, values.private_memory_address),
            (implicit.printf_surface_address, values.printf_surface_address),
            (implicit.sync_buffer_address, values.sync_buffer_address),
            (implicit.global_constants_address, values.global_constants_address),
            (implicit.global_variables_address, values.global_variables_address),
            (implicit.scratch_pointer_address, values.scratch_pointer_address),
            (implicit.implicit_args_buffer, values.implicit_args_buffer),
        ] {
            patch_pointer(&mut payload, offset, pointer_size, value);
        }
        patch_u32(
            &mut payload,
            implicit.private_memory_size,
            values.private_memory_size,
        );
        payload
    }

    /// Places the kernel's state blocks and the payload in the heaps.
    fn place(
        &self,
        heaps: &mut Heaps,
        kernel: &KernelDescriptor,
        plan: &DispatchPlan,
        payload: &mut [u8],
    ) -> Result<Placement, EncodeError> {
        let widths = self.profile.field_widths();
        let requirements = &plan.requirements;

        let surface = heaps.get_mut(HeapKind::SurfaceState);
        let binding_table = place_binding_table(surface, kernel, requirements.binding_table, &widths)?;
        place_bindless(surface, kernel, requirements.bindless, &widths, payload)?;

        let dynamic = heaps.get_mut(HeapKind::DynamicState);
        let samplers = place_samplers(dynamic, kernel, requirements.samplers, &widths)?
            .map(|offset| (offset, dynamic.gpu_base() + offset as u64));

        let chunk = requirements.payload;
        let mut placement = Placement {
            binding_table,
            samplers,
            indirect_data: None,
            payload_address: None,
        };
        if chunk.is_empty() {
            return Ok(placement);
        }

        let heap = heaps.get_mut(HeapKind::IndirectObject);
        heap.align(chunk.alignment)?;
        let gpu_base = heap.gpu_base();
        let (offset, space) = heap.get_space(chunk.size)?;
        let (cross_thread, per_thread) =
            space.split_at_mut(chunk.size - plan.per_thread_size as usize);
        if !plan.inline {
            cross_thread.copy_from_slice(payload);
            placement.payload_address = Some(gpu_base + offset as u64);
        }
        if let LocalIdGeneration::Runtime { walk_order } = plan.local_ids {
            let attributes = kernel.attributes();
            generate_local_ids(
                per_thread,
                attributes.simd_size,
                self.hw.grf_size,
                attributes.num_local_id_channels,
                plan.group_size,
                walk_order,
            );
        }
        placement.indirect_data = Some((offset, gpu_base + offset as u64));
        Ok(placement)
    }

    fn program_walker(
        &self,
        walker: &mut WalkerCommand,
        request: &DispatchRequest,
        plan: &DispatchPlan,
        placement: &Placement,
        payload: &[u8],
    ) {
        let kernel = request.kernel;
        let attributes = kernel.attributes();
        let simd = attributes.simd_size;
        let prefetch = self.profile.binding_table_prefetch();

        let fields = walker.fields_mut();
        let simd_size = self.profile.encode_simd(simd);
        fields.set_simd_size(simd_size);
        fields.set_message_simd(simd_size);
        fields.set_number_of_threads_in_group(plan.threads_per_group);
        fields.set_execution_mask(execution_mask(plan.work_items, simd));
        fields.set_local_maximum(plan.group_size);
        fields.set_thread_group_dimensions(thread_group_dimensions(plan.group_count));
        fields.set_thread_group_starting(request.group_start);
        fields.set_predicate_enable(request.predicated as u32);
        fields.set_indirect_parameter_enable(plan.indirect.is_some() as u32);

        let isa = kernel.heaps().isa_address;
        match plan.local_ids {
            LocalIdGeneration::Hardware { walk_order } => {
                let channels = attributes.num_local_id_channels.min(3);
                fields.set_generate_local_id(1);
                fields.set_emit_local_id((1 << channels) - 1);
                fields.set_walk_order(walk_order);
                fields.set_kernel_start_pointer(
                    isa + kernel.heaps().skip_per_thread_data_load as u64,
                );
            }
            _ => fields.set_kernel_start_pointer(isa),
        }

        if plan.inline {
            fields.set_emit_inline_parameter(1);
            fields.inline_data_mut()[..payload.len()].copy_from_slice(payload);
        }
        fields.set_indirect_data_length(plan.requirements.payload.size as u32);

        fields.set_shared_local_memory_size(slm_size_field(
            plan.slm_size,
            self.config.override_slm_size,
            &self.hw,
        ));
        fields.set_preferred_slm_allocation_size(preferred_slm_size(
            plan.slm_size,
            request.slm_policy,
            plan.threads_per_group,
            &self.hw,
            self.profile.preferred_slm_sizes(),
        ));
        fields.set_barrier_enable(kernel.uses_barriers() as u32);

        let batch = thread_group_batch(
            plan.threads_per_group,
            plan.group_count.product(),
            plan.partition_count(),
            &self.hw,
            &*self.profile,
            &self.config,
        );
        fields.set_thread_group_dispatch_size(self.profile.encode_batch_size(batch));
        if let Some(order) = self
            .profile
            .encode_walk_order(dispatch_walk_order(kernel, &self.config))
        {
            fields.set_dispatch_walk_order(order);
        }
        plan.post_sync.program(fields, 0);

        let samplers = kernel.sampler_table().num_samplers as u32;
        let sampler_count = match prefetch {
            true => samplers.div_ceil(4).min(MAX_PREFETCHED_SAMPLER_GROUPS),
            false => 0,
        };
        match walker {
            WalkerCommand::WithHeap(walker) => {
                let entries = match prefetch {
                    true => (kernel.binding_table().num_entries as u32)
                        .min(MAX_PREFETCHED_BINDING_TABLE_ENTRIES),
                    false => 0,
                };
                if let Some((offset, _)) = placement.indirect_data {
                    walker.set_indirect_data_start_address(offset as u32);
                }
                walker.set_binding_table_pointer(placement.binding_table);
                walker.set_binding_table_entry_count(entries);
                if let Some((offset, _)) = placement.samplers {
                    walker.set_sampler_state_pointer(offset as u32);
                }
                walker.set_sampler_count(sampler_count);
            }
            WalkerCommand::Heapless(walker) => {
                if let Some((_, address)) = placement.indirect_data {
                    walker.set_indirect_data_start_address(address);
                }
                if let Some((_, address)) = placement.samplers {
                    walker.set_sampler_state_base_address(address);
                }
                walker.set_sampler_count(sampler_count);
            }
        }
    }
}

/// Where one dispatch's heap data landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    binding_table: u32,
    /// Heap offset and GPU address of the first sampler state.
    samplers: Option<(usize, u64)>,
    /// Heap offset and GPU address of the indirect data.
    indirect_data: Option<(usize, u64)>,
    payload_address: Option<u64>,
}
