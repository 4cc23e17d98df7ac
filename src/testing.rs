//! Fixtures shared by the unit tests.

use crate::{
    encode::{CommandBuilder, thread::WALK_ORDERS},
    kernel::{
        ArgDescriptor, ArgPointer, ArgSampler, ArgValue, ArgValueElement, BindingTable,
        DispatchTraits, ImplicitArgs, KernelAttributes, KernelDescriptor, KernelFlags,
        KernelHeaps, PayloadOffset, SamplerTable,
    },
    loom::{heap::Heaps, stream::LinearStream},
};

pub const STREAM_BASE: u64 = 0x100_0000;
pub const HEAP_BASE: u64 = 0x1000_0000;
pub const CAPACITY: usize = 1 << 20;

/// A builder with plenty of room in its stream and heaps.
pub fn builder() -> CommandBuilder {
    CommandBuilder::new(
        LinearStream::new(STREAM_BASE, CAPACITY),
        Heaps::contiguous(HEAP_BASE, CAPACITY),
    )
}

/// SIMD16 kernel reading its launch geometry from the first 40 bytes of cross-thread data.
///
/// | offset | field              |
/// |--------|--------------------|
/// | 0      | global work size   |
/// | 12     | local work size    |
/// | 24     | number of groups   |
/// | 36     | work dimension     |
pub fn kernel_with_traits() -> KernelDescriptor {
    KernelDescriptor::builder("geometry")
        .attributes(KernelAttributes {
            simd_size: 16,
            ..Default::default()
        })
        .dispatch_traits(DispatchTraits {
            global_work_size: [Some(0), Some(4), Some(8)],
            local_work_size: [Some(12), Some(16), Some(20)],
            num_work_groups: [Some(24), Some(28), Some(32)],
            work_dim: Some(36),
            ..Default::default()
        })
        .build()
}

/// Kernel with one sampler whose border color sits at the start of the dynamic state blob.
pub fn sampled_kernel() -> KernelDescriptor {
    KernelDescriptor::builder("sampled")
        .attributes(KernelAttributes {
            simd_size: 16,
            flags: KernelFlags {
                uses_sampling: true,
                ..Default::default()
            },
            ..Default::default()
        })
        .arg(ArgDescriptor::Sampler(ArgSampler {
            bindful: Some(64),
            ..Default::default()
        }))
        .sampler_table(SamplerTable {
            num_samplers: 1,
            table_offset: 64,
            border_color: 0,
        })
        .heaps(KernelHeaps {
            dynamic_state: vec![0xcc; 80],
            ..Default::default()
        })
        .build()
}

/// Hands out consecutive payload slots, skipping some at random.
struct Slots<'a> {
    rng: &'a mut fastrand::Rng,
    next: u16,
}

impl Slots<'_> {
    fn take(&mut self, width: u16) -> PayloadOffset {
        if self.rng.bool() {
            return None;
        }
        let offset = self.next;
        self.next += width;
        Some(offset)
    }

    fn take3(&mut self) -> [PayloadOffset; 3] {
        [self.take(4), self.take(4), self.take(4)]
    }
}

/// A valid kernel with random geometry, arguments and state blobs.
///
/// Binding tables are only generated with `bindful`, as heapless devices cannot address them.
pub fn random_kernel(rng: &mut fastrand::Rng, bindful: bool) -> KernelDescriptor {
    let name = format!("random_{:08x}", rng.u32(..));
    let attributes = KernelAttributes {
        simd_size: [1, 8, 16, 32][rng.usize(0..4)],
        barrier_count: rng.u32(0..2),
        required_walk_order: rng.bool().then(|| WALK_ORDERS[rng.usize(0..6)]),
        num_local_id_channels: rng.u32(0..=3),
        slm_inline_size: rng.u32(0..64 << 10),
        flags: KernelFlags {
            passes_inline_data: rng.bool(),
            uses_sampling: rng.bool(),
            uses_images: rng.bool(),
            ..Default::default()
        },
        ..Default::default()
    };

    let mut slots = Slots { rng, next: 0 };
    let dispatch_traits = DispatchTraits {
        global_work_offset: slots.take3(),
        global_work_size: slots.take3(),
        local_work_size: slots.take3(),
        local_work_size2: slots.take3(),
        enqueued_local_work_size: slots.take3(),
        num_work_groups: slots.take3(),
        work_dim: slots.take(4),
    };
    let implicit_args = ImplicitArgs {
        private_memory_address: slots.take(8),
        private_memory_size: slots.take(4),
        scratch_pointer_address: slots.take(8),
        ..Default::default()
    };

    let mut args = vec![];
    for _ in 0..slots.rng.usize(0..4) {
        let arg = match slots.rng.bool() {
            true => ArgDescriptor::Pointer(ArgPointer {
                stateless: slots.take(8),
                bindless: slots.take(4),
                pointer_size: 8,
                ..Default::default()
            }),
            false => ArgDescriptor::Value(ArgValue {
                elements: vec![ArgValueElement {
                    offset: slots.take(4),
                    size: 4,
                    source_offset: 0,
                }],
            }),
        };
        args.push(arg);
    }

    let mut heaps = KernelHeaps {
        isa_address: rng.u64(..1 << 40) << 6,
        skip_per_thread_data_load: rng.u32(0..4) * 64,
        ..Default::default()
    };

    let mut binding_table = BindingTable::default();
    if bindful && rng.bool() {
        let entries = rng.u8(1..=4);
        let states = entries as usize * 64;
        let mut blob = vec![0u8; states + entries as usize * 4];
        rng.fill(&mut blob[..states]);
        for entry in 0..entries as usize {
            blob[states + entry * 4..][..4].copy_from_slice(&(entry as u32 * 64).to_le_bytes());
        }
        heaps.surface_state = blob;
        binding_table = BindingTable {
            num_entries: entries,
            table_offset: states as u16,
        };
    }

    let mut sampler_table = SamplerTable::default();
    if rng.bool() {
        let samplers = rng.u8(1..=3);
        let mut blob = vec![0u8; 64 + samplers as usize * 16];
        rng.fill(&mut blob);
        heaps.dynamic_state = blob;
        sampler_table = SamplerTable {
            num_samplers: samplers,
            table_offset: 64,
            border_color: 0,
        };
    }

    let mut builder = KernelDescriptor::builder(name)
        .attributes(attributes)
        .dispatch_traits(dispatch_traits)
        .implicit_args(implicit_args)
        .binding_table(binding_table)
        .sampler_table(sampler_table)
        .heaps(heaps);
    for arg in args {
        builder = builder.arg(arg);
    }
    builder.build()
}
