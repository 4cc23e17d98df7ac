use derive_more::Display;

use super::{partition::PartitionType, slm::SlmPolicy};
use crate::{
    hal::WalkerCommand,
    kernel::KernelDescriptor,
    loom::{num::Vec3, stream::CommandRef},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum SignalKind {
    /// A regular event, written with its signaled state.
    Event,
    /// An in-order counter, written with the given value.
    #[display("InOrderCounter({_0})")]
    InOrderCounter(u64),
    /// A timestamp packet.
    Timestamp,
}

/// Where and how a dispatch reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionSignal {
    pub kind: SignalKind,
    pub address: u64,
    /// The destination lives in host-visible system memory.
    pub host_visible: bool,
    /// The host observes the signal directly instead of through another GPU command.
    pub host_signal: bool,
    /// Flushes L3 after the write.
    pub flush_l3: bool,
}

impl CompletionSignal {
    pub fn new(kind: SignalKind, address: u64) -> Self {
        Self {
            kind,
            address,
            host_visible: false,
            host_signal: false,
            flush_l3: false,
        }
    }

    pub fn event(address: u64) -> Self {
        Self::new(SignalKind::Event, address)
    }

    pub fn in_order_counter(address: u64, value: u64) -> Self {
        Self::new(SignalKind::InOrderCounter(value), address)
    }

    pub fn timestamp(address: u64) -> Self {
        Self::new(SignalKind::Timestamp, address)
    }

    pub fn host_visible(mut self, host_visible: bool) -> Self {
        self.host_visible = host_visible;
        self
    }

    pub fn host_signal(mut self, host_signal: bool) -> Self {
        self.host_signal = host_signal;
        self
    }

    pub fn flush_l3(mut self, flush_l3: bool) -> Self {
        self.flush_l3 = flush_l3;
        self
    }
}

/// Runtime values of the implicit arguments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImplicitArgValues {
    pub private_memory_address: u64,
    pub private_memory_size: u32,
    pub printf_surface_address: u64,
    pub sync_buffer_address: u64,
    pub global_constants_address: u64,
    pub global_variables_address: u64,
    pub scratch_pointer_address: u64,
    pub implicit_args_buffer: u64,
}

/// Launch parameters of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest<'a> {
    pub kernel: &'a KernelDescriptor,
    /// Caller-filled cross-thread data carrying the explicit argument values.
    pub payload: &'a [u8],
    pub group_start: Vec3<u32>,
    pub group_count: Vec3<u32>,
    pub group_size: Vec3<u32>,
    /// Global work offset in work items.
    pub global_offset: Vec3<u32>,
    pub work_dim: u32,
    /// GPU address of three dwords holding the group counts, for indirect dispatch.
    pub indirect: Option<u64>,
    /// Axis a partitioned dispatch must be split along.
    pub partition_type: Option<PartitionType>,
    pub signal: Option<CompletionSignal>,
    pub uncached_mocs: bool,
    pub global_atomics: bool,
    /// Internal engine work, never partitioned.
    pub internal: bool,
    pub predicated: bool,
    /// SLM bytes requested at launch on top of the kernel's own.
    pub dynamic_slm_size: u32,
    pub slm_policy: SlmPolicy,
    pub implicit: ImplicitArgValues,
}

impl<'a> DispatchRequest<'a> {
    pub fn new(kernel: &'a KernelDescriptor) -> Self {
        let attributes = kernel.attributes();
        let group_size = attributes
            .required_workgroup_size
            .unwrap_or(Vec3::new(attributes.simd_size, 1, 1));
        Self {
            kernel,
            payload: &[],
            group_start: Vec3::splat(0),
            group_count: Vec3::splat(1),
            group_size,
            global_offset: Vec3::splat(0),
            work_dim: 1,
            indirect: None,
            partition_type: None,
            signal: None,
            uncached_mocs: false,
            global_atomics: false,
            internal: false,
            predicated: false,
            dynamic_slm_size: 0,
            slm_policy: SlmPolicy::default(),
            implicit: ImplicitArgValues::default(),
        }
    }

    pub fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    pub fn group_start(mut self, start: impl Into<Vec3<u32>>) -> Self {
        self.group_start = start.into();
        self
    }

    pub fn group_count(mut self, count: impl Into<Vec3<u32>>) -> Self {
        self.group_count = count.into();
        self
    }

    pub fn group_size(mut self, size: impl Into<Vec3<u32>>) -> Self {
        self.group_size = size.into();
        self
    }

    pub fn global_offset(mut self, offset: impl Into<Vec3<u32>>) -> Self {
        self.global_offset = offset.into();
        self
    }

    pub fn work_dim(mut self, work_dim: u32) -> Self {
        self.work_dim = work_dim;
        self
    }

    pub fn indirect(mut self, address: u64) -> Self {
        self.indirect = Some(address);
        self
    }

    pub fn partition_type(mut self, partition_type: PartitionType) -> Self {
        self.partition_type = Some(partition_type);
        self
    }

    pub fn signal(mut self, signal: CompletionSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn uncached_mocs(mut self, uncached_mocs: bool) -> Self {
        self.uncached_mocs = uncached_mocs;
        self
    }

    pub fn global_atomics(mut self, global_atomics: bool) -> Self {
        self.global_atomics = global_atomics;
        self
    }

    pub fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub fn predicated(mut self, predicated: bool) -> Self {
        self.predicated = predicated;
        self
    }

    pub fn dynamic_slm_size(mut self, bytes: u32) -> Self {
        self.dynamic_slm_size = bytes;
        self
    }

    pub fn slm_policy(mut self, policy: SlmPolicy) -> Self {
        self.slm_policy = policy;
        self
    }

    pub fn implicit(mut self, implicit: ImplicitArgValues) -> Self {
        self.implicit = implicit;
        self
    }

    /// Group counts with every zero axis raised to 1.
    #[inline]
    pub fn normalized_group_count(&self) -> Vec3<u32> {
        self.group_count.at_least_one()
    }

    /// Group sizes with every zero axis raised to 1.
    #[inline]
    pub fn normalized_group_size(&self) -> Vec3<u32> {
        self.group_size.at_least_one()
    }

    /// Total SLM bytes requested, before clamping.
    #[inline]
    pub fn slm_total(&self) -> u32 {
        self.kernel
            .attributes()
            .slm_inline_size
            .saturating_add(self.dynamic_slm_size)
    }
}

/// What [`DispatchEncoder::encode`](super::DispatchEncoder::encode) produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutput {
    /// The first dispatch command.
    pub walker: CommandRef,
    /// The first dispatch command as written, for later patching.
    pub command: WalkerCommand,
    /// Every dispatch command, one per partition.
    pub sub_dispatches: Vec<CommandRef>,
    pub partition_count: u32,
    pub bytes_written: usize,
    pub binding_table_offset: u32,
    /// GPU address of the cross-thread data when it lives in the indirect object heap.
    pub payload_address: Option<u64>,
    /// Whether global state was (re)programmed ahead of the dispatch.
    pub state_emitted: bool,
}
