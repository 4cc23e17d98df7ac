//! Splitting one dispatch across execution tiles.
//!
//! A partitioned dispatch is laid out as a primary sequence followed by secondary sections:
//!
//! ```text
//! [ATOMIC + SEMAPHORE]          optional, all tiles meet before starting
//! [LOAD_REGISTER_MEM WPARID]    static partitioning with a work partition allocation
//! (SET_PREDICATE i, BB_START -> section i) per partition
//! SET_PREDICATE off
//! [zero final sync counter]     self cleanup
//! [PIPE_CONTROL]
//! [SEMAPHORE per partition]     on the partition's post-sync slot
//! [ATOMIC + SEMAPHORE]          all tiles meet after their partitions
//! [BB_START -> cleanup]         self cleanup
//! BB_START -> end
//! (WALKER i, BB_END) per partition
//! control block                 in tile count, tile count, final sync count
//! [cleanup section]             two barriers around zeroing the counters
//! ```
//!
//! Only the tile whose partition id matches a predicate runs the section behind it.

use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::config::EncoderConfiguration;
use crate::{
    hal::{
        HardwareInfo, HardwareProfile, WalkerCommand,
        cmds::{
            CompareOperation, MiAtomic, MiBatchBufferEnd, MiBatchBufferStart, MiLoadRegisterMem, MiSemaphoreWait,
            MiSetPredicate, MiStoreDataImm, PipeControl, registers,
        },
    },
    loom::{
        num::{Axis, Vec3, align_down, prev_power_of_two},
        stream::{Command, CommandRef, LinearStream, StreamError},
    },
};

/// Largest partition count dynamic partitioning considers.
const MAX_DYNAMIC_PARTITIONS: u32 = 16;
/// Accepted share of groups left over when splitting an axis evenly, as `1 / IMBALANCE_DIVISOR`.
const IMBALANCE_DIVISOR: u64 = 20;

/// Axis a partitioned dispatch is split along.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PartitionType {
    #[default]
    Disabled,
    X,
    Y,
    Z,
}

impl PartitionType {
    /// Walker encoding of the partition type.
    pub const fn encode(self) -> u32 {
        match self {
            PartitionType::Disabled => 0,
            PartitionType::X => 1,
            PartitionType::Y => 2,
            PartitionType::Z => 3,
        }
    }

    pub const fn axis(self) -> Option<Axis> {
        match self {
            PartitionType::Disabled => None,
            PartitionType::X => Some(Axis::X),
            PartitionType::Y => Some(Axis::Y),
            PartitionType::Z => Some(Axis::Z),
        }
    }

    fn largest(counts: Vec3<u32>) -> Self {
        let max = counts.max_element();
        if counts.x == max {
            PartitionType::X
        } else if counts.y == max {
            PartitionType::Y
        } else {
            PartitionType::Z
        }
    }
}

/// Inputs of the partition count selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionArgs {
    pub tile_count: u32,
    pub static_partitioning: bool,
    pub requested: Option<PartitionType>,
    pub uses_images: bool,
    pub prefer_highest_dimension: Option<bool>,
    /// Minimal groups per partition under dynamic partitioning; zero disables the check.
    pub minimal_partition_size: u32,
}

/// Picks the split axis and the number of partitions.
///
/// Dispatches with a non-zero group start are never split.
pub fn compute_partition_count(
    group_start: Vec3<u32>,
    group_count: Vec3<u32>,
    args: &PartitionArgs,
) -> (PartitionType, u32) {
    if group_start != Vec3::splat(0) {
        return (PartitionType::Disabled, 1);
    }

    let tiles = args.tile_count.max(1);
    let requested = args
        .requested
        .filter(|requested| *requested != PartitionType::Disabled)
        .or(args.uses_images.then_some(PartitionType::X));

    let (partition_type, groups, disable_single) = match requested.and_then(|r| r.axis().map(|a| (r, a))) {
        Some((requested, axis)) => (requested, group_count.get(axis), false),
        None => {
            let (x, y, z) = (
                group_count.x as u64,
                group_count.y as u64,
                group_count.z as u64,
            );
            let even = if z > 1 && (z - align_down(z, tiles as u64)) * IMBALANCE_DIVISOR <= z {
                Some(PartitionType::Z)
            } else if y > 1 && (y - align_down(y, tiles as u64)) * IMBALANCE_DIVISOR < y {
                Some(PartitionType::Y)
            } else if x % tiles as u64 == 0 {
                Some(PartitionType::X)
            } else {
                None
            };

            let prefer_largest = args
                .prefer_highest_dimension
                .unwrap_or(!args.static_partitioning);
            let partition_type = match (prefer_largest, even) {
                (false, Some(even)) => even,
                _ => PartitionType::largest(group_count),
            };
            (partition_type, group_count.max_element(), true)
        }
    };

    if args.static_partitioning {
        return (partition_type, tiles);
    }

    let mut count = prev_power_of_two(groups.min(MAX_DYNAMIC_PARTITIONS) as u64) as u32;
    if args.minimal_partition_size != 0 {
        let floor = tiles.max(2);
        while count > floor && groups / count < args.minimal_partition_size {
            count /= 2;
        }
    }

    match (count, disable_single) {
        (1, true) => (PartitionType::Disabled, 1),
        _ => (partition_type, count.max(1)),
    }
}

/// One tile's share of a partitioned dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubDispatch {
    pub partition_id: u32,
    pub start: Vec3<u32>,
    pub count: Vec3<u32>,
}

/// Offsets of the control block fields.
mod control {
    pub const IN_TILE_COUNT: u64 = 0;
    pub const TILE_COUNT: u64 = 4;
    pub const FINAL_SYNC_TILE_COUNT: u64 = 8;
    pub const SIZE: usize = 12;
    /// Fields zeroed by the cleanup section, starting at offset 0.
    pub const CLEANUP_FIELDS: u64 = 2;
}

/// A dispatch split across tiles, with everything its wrapping sequence needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub partition_type: PartitionType,
    pub partition_size: u32,
    pub sub_dispatches: Vec<SubDispatch>,
    pub tile_count: u32,
    pub synchronize_before_execution: bool,
    /// Allocation holding each tile's partition id, loaded under static partitioning.
    pub work_partition_address: Option<u64>,
    pub self_cleanup: bool,
    pub cleanup_with_atomics: bool,
    pub pipe_control_stall: bool,
    pub cross_tile_sync: bool,
    /// First post-sync slot waited on before the cross-tile barrier.
    pub post_sync_semaphores: Option<u64>,
    pub post_sync_stride: u64,
    pub dispatch_all_mod: Option<u32>,
}

/// Whether a dispatch runs as one walker or split across tiles.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum DispatchMode {
    #[default]
    Single,
    Partitioned(PartitionPlan),
}

/// What the partitioner needs to know about one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRequest {
    pub group_start: Vec3<u32>,
    pub group_count: Vec3<u32>,
    pub requested: Option<PartitionType>,
    pub uses_images: bool,
    pub internal: bool,
    pub indirect: bool,
    /// Post-sync destination of the dispatch, if it signals completion.
    pub post_sync_address: Option<u64>,
}

/// Decides between a single and a partitioned dispatch.
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub fn plan_partitions(
    request: &PartitionRequest,
    hw: &HardwareInfo,
    profile: &dyn HardwareProfile,
    config: &EncoderConfiguration,
    work_partition_address: Option<u64>,
) -> DispatchMode {
    if !hw.multi_tile()
        || config.disable_walker_partitioning
        || request.internal
        || request.indirect
    {
        return DispatchMode::Single;
    }

    let args = PartitionArgs {
        tile_count: hw.tile_count,
        static_partitioning: hw.static_partitioning,
        requested: request.requested.or(config.walker_partition_type),
        uses_images: request.uses_images,
        prefer_highest_dimension: config.prefer_highest_dimension,
        minimal_partition_size: config.minimal_partition_size,
    };
    let group_count = request.group_count.at_least_one();
    let (partition_type, count) = compute_partition_count(request.group_start, group_count, &args);
    let Some(axis) = partition_type.axis() else {
        return DispatchMode::Single;
    };

    let groups = group_count.get(axis);
    let count = count.min(hw.tile_count).min(groups);
    if count <= 1 {
        return DispatchMode::Single;
    }

    let partition_size = groups.div_ceil(count);
    let count = groups.div_ceil(partition_size);
    if count <= 1 {
        return DispatchMode::Single;
    }

    let sub_dispatches = (0..count)
        .map(|partition_id| {
            let first = partition_id * partition_size;
            let mut start = request.group_start;
            let mut counts = group_count;
            start.set(axis, start.get(axis) + first);
            counts.set(axis, partition_size.min(groups - first));
            SubDispatch {
                partition_id,
                start,
                count: counts,
            }
        })
        .collect();

    let dispatch_all = config
        .force_compute_dispatch_all
        .unwrap_or(false)
        && profile.supports_dispatch_all();

    log::debug!(
        "partitioning {group_count} groups into {count} partitions of {partition_size} along {axis}"
    );

    DispatchMode::Partitioned(PartitionPlan {
        partition_type,
        partition_size,
        sub_dispatches,
        tile_count: hw.tile_count,
        synchronize_before_execution: config.synchronize_before_execution,
        work_partition_address: work_partition_address.filter(|_| hw.static_partitioning),
        self_cleanup: config.emit_self_cleanup,
        cleanup_with_atomics: config.use_atomics_for_self_cleanup,
        pipe_control_stall: config.emit_pipe_control_stall,
        cross_tile_sync: config.cross_tile_atomic_synchronization,
        post_sync_semaphores: request
            .post_sync_address
            .filter(|_| config.semaphore_programming_required),
        post_sync_stride: profile.field_widths().post_sync_stride,
        dispatch_all_mod: dispatch_all.then(|| count.trailing_zeros().min(3)),
    })
}

/// Byte offsets within a partitioned sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    sections: usize,
    section_size: usize,
    control: usize,
    cleanup: Option<usize>,
    end: usize,
}

impl PartitionPlan {
    #[inline]
    pub fn partition_count(&self) -> u32 {
        self.sub_dispatches.len() as u32
    }

    /// Number of secondary batch buffer starts the sequence emits.
    #[inline]
    pub fn secondary_batch_buffer_count(&self) -> u32 {
        self.partition_count() + self.self_cleanup as u32
    }

    fn barrier_size() -> usize {
        MiAtomic::SIZE + MiSemaphoreWait::SIZE
    }

    fn zeroing_size(&self) -> usize {
        match self.cleanup_with_atomics {
            true => MiAtomic::SIZE,
            false => MiStoreDataImm::SIZE,
        }
    }

    fn prologue_size(&self) -> usize {
        let partitions = self.partition_count() as usize;
        let mut size = 0;
        if self.synchronize_before_execution {
            size += Self::barrier_size();
        }
        if self.work_partition_address.is_some() {
            size += MiLoadRegisterMem::SIZE;
        }
        size += partitions * (MiSetPredicate::SIZE + MiBatchBufferStart::SIZE);
        size += MiSetPredicate::SIZE;
        if self.self_cleanup {
            size += self.zeroing_size();
        }
        if self.pipe_control_stall {
            size += PipeControl::SIZE;
        }
        if self.post_sync_semaphores.is_some() {
            size += partitions * MiSemaphoreWait::SIZE;
        }
        if self.cross_tile_sync || self.self_cleanup {
            size += Self::barrier_size();
        }
        if self.self_cleanup {
            size += MiBatchBufferStart::SIZE;
        }
        size + MiBatchBufferStart::SIZE
    }

    fn cleanup_size(&self) -> usize {
        2 * Self::barrier_size()
            + control::CLEANUP_FIELDS as usize * self.zeroing_size()
            + MiBatchBufferEnd::SIZE
    }

    fn layout(&self, walker_size: usize) -> Layout {
        let sections = self.prologue_size();
        let section_size = walker_size + MiBatchBufferEnd::SIZE;
        let control = sections + self.partition_count() as usize * section_size;
        let after_control = control + control::SIZE;
        let (cleanup, end) = match self.self_cleanup {
            true => (Some(after_control), after_control + self.cleanup_size()),
            false => (None, after_control),
        };
        Layout {
            sections,
            section_size,
            control,
            cleanup,
            end,
        }
    }

    /// Bytes [`PartitionPlan::emit`] writes for a walker of `walker_size` bytes.
    pub fn size(&self, walker_size: usize) -> usize {
        self.layout(walker_size).end
    }

    /// The walker of one partition, derived from the fully programmed dispatch walker.
    pub fn partition_walker(&self, walker: &WalkerCommand, sub: &SubDispatch) -> WalkerCommand {
        let mut walker = *walker;
        let fields = walker.fields_mut();
        fields.set_workload_partition_enable(1);
        fields.set_partition_type(self.partition_type.encode());
        fields.set_partition_size(self.partition_size);
        fields.set_partition_id(sub.partition_id);
        fields.set_thread_group_starting(sub.start);
        fields.set_thread_group_dimensions(sub.count);
        if fields.post_sync_operation() != 0 {
            let address = fields.post_sync_destination_address();
            fields.set_post_sync_destination_address(
                address + sub.partition_id as u64 * self.post_sync_stride,
            );
        }
        if let Some(dispatch_all_mod) = self.dispatch_all_mod {
            fields.set_compute_dispatch_all(1);
            fields.set_dispatch_all_mod(dispatch_all_mod);
        }
        walker
    }

    /// Writes the partitioned sequence around `walker`, returning every partition's walker.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub fn emit(
        &self,
        stream: &mut LinearStream,
        walker: &WalkerCommand,
    ) -> Result<Vec<CommandRef>, StreamError> {
        let base = stream.current_gpu_address();
        let layout = self.layout(walker.size());
        let control = base + layout.control as u64;
        let in_tile_count = control + control::IN_TILE_COUNT;
        let tile_count = control + control::TILE_COUNT;
        let final_sync = control + control::FINAL_SYNC_TILE_COUNT;
        let tiles = self.tile_count;

        if self.synchronize_before_execution {
            emit_barrier(stream, in_tile_count, tiles)?;
        }
        if let Some(address) = self.work_partition_address {
            let mut load = MiLoadRegisterMem::init();
            load.set_mmio_remap_enable(1);
            load.set_register_offset(registers::WPARID);
            load.set_address(address);
            stream.put(&load)?;
        }

        for sub in &self.sub_dispatches {
            let mut predicate = MiSetPredicate::init();
            predicate.set_predicate_enable(MiSetPredicate::PREDICATE_ON_WPARID);
            predicate.set_compare_value(sub.partition_id);
            stream.put(&predicate)?;

            let section = layout.sections + sub.partition_id as usize * layout.section_size;
            emit_batch_buffer_start(stream, base + section as u64, true, true)?;
        }
        let mut predicate = MiSetPredicate::init();
        predicate.set_predicate_enable(MiSetPredicate::PREDICATE_DISABLE);
        stream.put(&predicate)?;

        if self.self_cleanup {
            self.emit_zeroing(stream, final_sync)?;
        }
        if self.pipe_control_stall {
            let mut stall = PipeControl::init();
            stall.set_cs_stall(1);
            stall.set_dc_flush_enable(1);
            stream.put(&stall)?;
        }
        if let Some(address) = self.post_sync_semaphores {
            for sub in &self.sub_dispatches {
                emit_semaphore(
                    stream,
                    address + sub.partition_id as u64 * self.post_sync_stride,
                    1,
                    CompareOperation::NotEqual,
                )?;
            }
        }
        if self.cross_tile_sync || self.self_cleanup {
            emit_barrier(stream, tile_count, tiles)?;
        }
        if let Some(cleanup) = layout.cleanup {
            emit_batch_buffer_start(stream, base + cleanup as u64, false, true)?;
        }
        emit_batch_buffer_start(stream, base + layout.end as u64, false, false)?;

        let mut walkers = Vec::with_capacity(self.sub_dispatches.len());
        for sub in &self.sub_dispatches {
            walkers.push(self.partition_walker(walker, sub).emit(stream)?);
            stream.put(&MiBatchBufferEnd::init())?;
        }

        let (_, block) = stream.get_space(control::SIZE)?;
        block.fill(0);

        if layout.cleanup.is_some() {
            emit_barrier(stream, final_sync, tiles)?;
            for field in 0..control::CLEANUP_FIELDS {
                self.emit_zeroing(stream, control + 4 * field)?;
            }
            emit_barrier(stream, final_sync, 2 * tiles)?;
            stream.put(&MiBatchBufferEnd::init())?;
        }
        Ok(walkers)
    }

    fn emit_zeroing(&self, stream: &mut LinearStream, address: u64) -> Result<(), StreamError> {
        match self.cleanup_with_atomics {
            true => {
                let mut atomic = MiAtomic::init();
                atomic.set_atomic_opcode(MiAtomic::OPCODE_MOVE);
                atomic.set_inline_data(1);
                atomic.set_operand1(0);
                atomic.set_address(address);
                stream.put(&atomic)?;
            }
            false => {
                let mut store = MiStoreDataImm::init();
                store.set_address(address);
                store.set_data(0);
                stream.put(&store)?;
            }
        }
        Ok(())
    }
}

fn emit_batch_buffer_start(
    stream: &mut LinearStream,
    address: u64,
    predicated: bool,
    secondary: bool,
) -> Result<(), StreamError> {
    let mut start = MiBatchBufferStart::init();
    start.set_address_space_indicator(1);
    start.set_predication_enable(predicated as u32);
    start.set_second_level_batch_buffer(secondary as u32);
    start.set_address(address);
    stream.put(&start)?;
    Ok(())
}

fn emit_semaphore(
    stream: &mut LinearStream,
    address: u64,
    data: u32,
    compare: CompareOperation,
) -> Result<(), StreamError> {
    let mut wait = MiSemaphoreWait::init();
    wait.set_wait_mode(1);
    wait.set_compare_operation(compare as u32);
    wait.set_semaphore_data(data);
    wait.set_address(address);
    stream.put(&wait)?;
    Ok(())
}

/// All tiles bump `counter` and wait until it reaches `target`.
fn emit_barrier(stream: &mut LinearStream, counter: u64, target: u32) -> Result<(), StreamError> {
    let mut atomic = MiAtomic::init();
    atomic.set_atomic_opcode(MiAtomic::OPCODE_INCREMENT);
    atomic.set_cs_stall(1);
    atomic.set_address(counter);
    stream.put(&atomic)?;
    emit_semaphore(stream, counter, target, CompareOperation::GreaterThanOrEqual)
}
