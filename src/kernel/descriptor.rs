use std::sync::{
    OnceLock,
    atomic::{AtomicU32, Ordering},
};

use derive_more::Display;
use rustc_hash::FxHashMap as HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::loom::num::Vec3;

/// Offset of a field inside the cross-thread data, or `None` if the compiler dropped it.
pub type PayloadOffset = Option<u16>;

/// How a class of resources is addressed by the kernel.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AddressingMode {
    #[default]
    Stateless,
    Bindful,
    Bindless,
    BindfulAndStateless,
    BindlessAndStateless,
}

/// A buffer argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgPointer {
    /// Payload slot receiving the full GPU address.
    pub stateless: PayloadOffset,
    /// Offset of the argument's surface state within the kernel's surface state blob.
    pub bindful: PayloadOffset,
    /// Payload slot receiving the bindless surface state offset.
    pub bindless: PayloadOffset,
    /// Payload slot receiving the offset of the address inside its allocation.
    pub buffer_offset: PayloadOffset,
    pub pointer_size: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: PayloadOffset,
    pub height: PayloadOffset,
    pub depth: PayloadOffset,
    pub channel_data_type: PayloadOffset,
    pub channel_order: PayloadOffset,
    pub array_size: PayloadOffset,
    pub num_samples: PayloadOffset,
    pub num_mip_levels: PayloadOffset,
    /// 8 bytes wide.
    pub flat_base_offset: PayloadOffset,
    pub flat_width: PayloadOffset,
    pub flat_height: PayloadOffset,
    pub flat_pitch: PayloadOffset,
}

/// An image argument.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgImage {
    pub bindful: PayloadOffset,
    pub bindless: PayloadOffset,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerMetadata {
    pub snap_workaround: PayloadOffset,
    pub addressing_mode: PayloadOffset,
    pub normalized_coords: PayloadOffset,
}

/// A sampler argument. Samplers are always bindful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgSampler {
    /// Offset of the sampler state inside the kernel's dynamic state blob.
    pub bindful: PayloadOffset,
    /// Must stay `None`.
    pub bindless: PayloadOffset,
    pub index: u8,
    pub metadata: SamplerMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgValueElement {
    pub offset: PayloadOffset,
    pub size: u16,
    /// Offset of the element within the caller's argument value.
    pub source_offset: u16,
}

/// A by-value argument, possibly split into several payload elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgValue {
    pub elements: Vec<ArgValueElement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ArgKind {
    Pointer,
    Image,
    Sampler,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ArgDescriptor {
    #[display("pointer")]
    Pointer(ArgPointer),
    #[display("image")]
    Image(ArgImage),
    #[display("sampler")]
    Sampler(ArgSampler),
    #[display("value")]
    Value(ArgValue),
}

macro_rules! impl_arg_accessors {
    ($($kind:ident: $ty:ty => $get:ident, $get_mut:ident;)*) => {$(
        /// # Panics
        /// If the argument is of another kind.
        pub fn $get(&self) -> &$ty {
            match self {
                Self::$kind(arg) => arg,
                _ => panic!("argument type mismatch: expected {}, found {}", ArgKind::$kind, self.kind()),
            }
        }

        /// # Panics
        /// If the argument is of another kind.
        pub fn $get_mut(&mut self) -> &mut $ty {
            let kind = self.kind();
            match self {
                Self::$kind(arg) => arg,
                _ => panic!("argument type mismatch: expected {}, found {kind}", ArgKind::$kind),
            }
        }
    )*};
}

impl ArgDescriptor {
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgDescriptor::Pointer(_) => ArgKind::Pointer,
            ArgDescriptor::Image(_) => ArgKind::Image,
            ArgDescriptor::Sampler(_) => ArgKind::Sampler,
            ArgDescriptor::Value(_) => ArgKind::Value,
        }
    }

    /// Payload offset receiving the bindless surface state offset, if any.
    pub fn bindless_offset(&self) -> PayloadOffset {
        match self {
            ArgDescriptor::Pointer(arg) => arg.bindless,
            ArgDescriptor::Image(arg) => arg.bindless,
            ArgDescriptor::Sampler(arg) => arg.bindless,
            ArgDescriptor::Value(_) => None,
        }
    }

    impl_arg_accessors! {
        Pointer: ArgPointer => as_pointer, as_pointer_mut;
        Image: ArgImage => as_image, as_image_mut;
        Sampler: ArgSampler => as_sampler, as_sampler_mut;
        Value: ArgValue => as_value, as_value_mut;
    }
}

/// Payload slots of the launch geometry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchTraits {
    pub global_work_offset: [PayloadOffset; 3],
    pub global_work_size: [PayloadOffset; 3],
    pub local_work_size: [PayloadOffset; 3],
    pub local_work_size2: [PayloadOffset; 3],
    pub enqueued_local_work_size: [PayloadOffset; 3],
    pub num_work_groups: [PayloadOffset; 3],
    pub work_dim: PayloadOffset,
}

/// Payload slots of runtime-provided arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImplicitArgs {
    pub private_memory_address: PayloadOffset,
    pub private_memory_size: PayloadOffset,
    pub printf_surface_address: PayloadOffset,
    pub sync_buffer_address: PayloadOffset,
    pub global_constants_address: PayloadOffset,
    pub global_variables_address: PayloadOffset,
    pub scratch_pointer_address: PayloadOffset,
    pub implicit_args_buffer: PayloadOffset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingTable {
    pub num_entries: u8,
    /// Offset of the table inside the kernel's surface state blob.
    pub table_offset: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerTable {
    pub num_samplers: u8,
    /// Offset of the sampler states inside the kernel's dynamic state blob.
    pub table_offset: u16,
    /// Offset of the border color inside the kernel's dynamic state blob.
    pub border_color: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelFlags {
    /// The kernel reads its first cross-thread bytes from the walker's inline data.
    pub passes_inline_data: bool,
    /// Sampling benefits from a Y-ordered dispatch walk.
    pub uses_sampling: bool,
    pub uses_images: bool,
    pub uses_printf: bool,
    pub uses_sync_buffer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelAttributes {
    pub simd_size: u32,
    /// Zero when the kernel has no sub-group size requirement.
    pub required_sub_group_size: u32,
    pub barrier_count: u32,
    pub required_workgroup_size: Option<Vec3<u32>>,
    /// Walk order hardware must use when generating local ids.
    pub required_walk_order: Option<[u8; 3]>,
    /// Number of local id channels (0 to 3) the kernel expects in per-thread data.
    pub num_local_id_channels: u32,
    pub buffer_addressing_mode: AddressingMode,
    pub image_addressing_mode: AddressingMode,
    pub sampler_addressing_mode: AddressingMode,
    /// SLM bytes declared statically by the kernel.
    pub slm_inline_size: u32,
    pub per_thread_scratch_size: u32,
    pub pointer_size: u8,
    pub flags: KernelFlags,
}

impl Default for KernelAttributes {
    fn default() -> Self {
        Self {
            simd_size: 32,
            required_sub_group_size: 0,
            barrier_count: 0,
            required_workgroup_size: None,
            required_walk_order: None,
            num_local_id_channels: 0,
            buffer_addressing_mode: AddressingMode::Stateless,
            image_addressing_mode: AddressingMode::Bindful,
            sampler_addressing_mode: AddressingMode::Bindful,
            slm_inline_size: 0,
            per_thread_scratch_size: 0,
            pointer_size: 8,
            flags: KernelFlags::default(),
        }
    }
}

/// Prebuilt state blobs produced by the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelHeaps {
    pub isa_address: u64,
    /// Bytes of the per-thread data load prologue skipped when hardware generates local ids.
    pub skip_per_thread_data_load: u32,
    pub surface_state: Vec<u8>,
    pub dynamic_state: Vec<u8>,
}

/// Immutable metadata of one compiled kernel.
///
/// The only interior mutability is the recorded cross-thread data size, which only grows,
/// and the bindless slot map, which is computed at most once.
#[derive(Debug)]
pub struct KernelDescriptor {
    name: String,
    attributes: KernelAttributes,
    args: Vec<ArgDescriptor>,
    dispatch_traits: DispatchTraits,
    implicit_args: ImplicitArgs,
    binding_table: BindingTable,
    sampler_table: SamplerTable,
    heaps: KernelHeaps,
    pub(super) cross_thread_data_size: AtomicU32,
    bindless_slots: OnceLock<HashMap<u16, u32>>,
}

impl KernelDescriptor {
    pub fn builder(name: impl Into<String>) -> KernelDescriptorBuilder {
        KernelDescriptorBuilder::new(name)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn attributes(&self) -> &KernelAttributes {
        &self.attributes
    }

    #[inline]
    pub fn args(&self) -> &[ArgDescriptor] {
        &self.args
    }

    #[inline]
    pub fn dispatch_traits(&self) -> &DispatchTraits {
        &self.dispatch_traits
    }

    #[inline]
    pub fn implicit_args(&self) -> &ImplicitArgs {
        &self.implicit_args
    }

    #[inline]
    pub fn binding_table(&self) -> BindingTable {
        self.binding_table
    }

    #[inline]
    pub fn sampler_table(&self) -> SamplerTable {
        self.sampler_table
    }

    #[inline]
    pub fn heaps(&self) -> &KernelHeaps {
        &self.heaps
    }

    /// Cross-thread data size recorded so far.
    #[inline]
    pub fn cross_thread_data_size(&self) -> u32 {
        self.cross_thread_data_size.load(Ordering::Acquire)
    }

    /// Maps the payload offset of every bindless argument to its surface state slot.
    ///
    /// Slots are handed out in argument order. Computed on first use.
    pub fn bindless_slots(&self) -> &HashMap<u16, u32> {
        self.bindless_slots.get_or_init(|| {
            let mut slots = HashMap::default();
            let offsets = self.args.iter().filter_map(ArgDescriptor::bindless_offset);
            for offset in offsets {
                let slot = slots.len() as u32;
                slots.entry(offset).or_insert(slot);
            }
            slots
        })
    }

    /// Checks if [`KernelDescriptor::bindless_slots`] has already been computed.
    #[inline]
    pub fn is_bindless_map_computed(&self) -> bool {
        self.bindless_slots.get().is_some()
    }

    #[inline]
    pub fn bindless_slot(&self, offset: u16) -> Option<u32> {
        self.bindless_slots().get(&offset).copied()
    }

    #[inline]
    pub fn uses_barriers(&self) -> bool {
        self.attributes.barrier_count > 0
    }

    /// Checks the invariants the compiler guarantees.
    ///
    /// # Panics
    /// On any violation; a malformed descriptor is a compiler bug.
    pub fn validate(&self) {
        let name = &self.name;
        let attributes = &self.attributes;
        assert!(
            matches!(attributes.simd_size, 1 | 8 | 16 | 32),
            "kernel `{name}`: unsupported SIMD width {}",
            attributes.simd_size
        );
        assert!(
            attributes.num_local_id_channels <= 3,
            "kernel `{name}`: {} local id channels",
            attributes.num_local_id_channels
        );
        if let Some(order) = attributes.required_walk_order {
            let mut sorted = order;
            sorted.sort_unstable();
            assert_eq!(
                sorted,
                [0, 1, 2],
                "kernel `{name}`: walk order {order:?} is not a permutation"
            );
        }

        for (index, arg) in self.args.iter().enumerate() {
            validate_arg(name, index, arg);
        }

        let BindingTable {
            num_entries,
            table_offset,
        } = self.binding_table;
        let end = table_offset as usize + num_entries as usize * 4;
        assert!(
            num_entries == 0 || end <= self.heaps.surface_state.len(),
            "kernel `{name}`: binding table runs past the surface state blob"
        );

        let SamplerTable {
            num_samplers,
            table_offset,
            border_color,
        } = self.sampler_table;
        let end = table_offset as usize + num_samplers as usize * 16;
        assert!(
            num_samplers == 0
                || (end <= self.heaps.dynamic_state.len()
                    && (border_color as usize) < self.heaps.dynamic_state.len()),
            "kernel `{name}`: sampler table runs past the dynamic state blob"
        );
    }
}

/// # Panics
/// If the argument carries contradicting addressing.
pub(crate) fn validate_arg(kernel: &str, index: usize, arg: &ArgDescriptor) {
    match arg {
        ArgDescriptor::Pointer(ArgPointer {
            bindful, bindless, ..
        })
        | ArgDescriptor::Image(ArgImage {
            bindful, bindless, ..
        }) => assert!(
            bindful.is_none() || bindless.is_none(),
            "kernel `{kernel}`: {arg} argument {index} carries both bindful and bindless offsets"
        ),
        ArgDescriptor::Sampler(sampler) => assert!(
            sampler.bindless.is_none(),
            "kernel `{kernel}`: sampler argument {index} carries a bindless offset"
        ),
        ArgDescriptor::Value(value) => assert!(
            value.elements.iter().all(|element| element.size > 0),
            "kernel `{kernel}`: value argument {index} has an empty element"
        ),
    }
}

/// Assembles a [`KernelDescriptor`] the way a binary loader would.
#[derive(Debug, Default)]
pub struct KernelDescriptorBuilder {
    name: String,
    attributes: KernelAttributes,
    args: Vec<ArgDescriptor>,
    dispatch_traits: DispatchTraits,
    implicit_args: ImplicitArgs,
    binding_table: BindingTable,
    sampler_table: SamplerTable,
    heaps: KernelHeaps,
    cross_thread_data_size: u32,
}

impl KernelDescriptorBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attributes(mut self, attributes: KernelAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn arg(mut self, arg: ArgDescriptor) -> Self {
        self.args.push(arg);
        self
    }

    pub fn dispatch_traits(mut self, dispatch_traits: DispatchTraits) -> Self {
        self.dispatch_traits = dispatch_traits;
        self
    }

    pub fn implicit_args(mut self, implicit_args: ImplicitArgs) -> Self {
        self.implicit_args = implicit_args;
        self
    }

    pub fn binding_table(mut self, binding_table: BindingTable) -> Self {
        self.binding_table = binding_table;
        self
    }

    pub fn sampler_table(mut self, sampler_table: SamplerTable) -> Self {
        self.sampler_table = sampler_table;
        self
    }

    pub fn heaps(mut self, heaps: KernelHeaps) -> Self {
        self.heaps = heaps;
        self
    }

    /// Cross-thread data size reported by the compiler; computation never goes below it.
    pub fn cross_thread_data_size(mut self, size: u32) -> Self {
        self.cross_thread_data_size = size;
        self
    }

    /// # Panics
    /// If the assembled descriptor violates an invariant, see [`KernelDescriptor::validate`].
    pub fn build(self) -> KernelDescriptor {
        let descriptor = KernelDescriptor {
            name: self.name,
            attributes: self.attributes,
            args: self.args,
            dispatch_traits: self.dispatch_traits,
            implicit_args: self.implicit_args,
            binding_table: self.binding_table,
            sampler_table: self.sampler_table,
            heaps: self.heaps,
            cross_thread_data_size: AtomicU32::new(self.cross_thread_data_size),
            bindless_slots: OnceLock::new(),
        };
        descriptor.validate();
        descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindless_pointer(offset: u16) -> ArgDescriptor {
        ArgDescriptor::Pointer(ArgPointer {
            bindless: Some(offset),
            pointer_size: 8,
            ..Default::default()
        })
    }

    #[test]
    fn test_bindless_slots() {
        let kernel = KernelDescriptor::builder("bindless")
            .arg(bindless_pointer(0x40))
            .arg(ArgDescriptor::Value(ArgValue {
                elements: vec![ArgValueElement {
                    offset: Some(0),
                    size: 4,
                    source_offset: 0,
                }],
            }))
            .arg(ArgDescriptor::Image(ArgImage {
                bindless: Some(0x48),
                ..Default::default()
            }))
            .arg(bindless_pointer(0x44))
            .build();

        assert!(!kernel.is_bindless_map_computed());
        assert_eq!(kernel.bindless_slot(0x40), Some(0));
        assert_eq!(kernel.bindless_slot(0x48), Some(1));
        assert_eq!(kernel.bindless_slot(0x44), Some(2));
        assert_eq!(kernel.bindless_slot(0x4c), None);
        assert!(kernel.is_bindless_map_computed());

        let first: *const _ = kernel.bindless_slots();
        let second: *const _ = kernel.bindless_slots();
        assert_eq!(first, second);
    }

    #[test]
    #[should_panic(expected = "carries a bindless offset")]
    fn test_bindless_sampler() {
        KernelDescriptor::builder("sampler")
            .arg(ArgDescriptor::Sampler(ArgSampler {
                bindless: Some(0x10),
                ..Default::default()
            }))
            .build();
    }

    #[test]
    #[should_panic(expected = "both bindful and bindless")]
    fn test_bindful_and_bindless() {
        KernelDescriptor::builder("pointer")
            .arg(ArgDescriptor::Pointer(ArgPointer {
                bindful: Some(0),
                bindless: Some(0x20),
                ..Default::default()
            }))
            .build();
    }

    #[test]
    #[should_panic(expected = "argument type mismatch")]
    fn test_type_mismatch() {
        let arg = ArgDescriptor::Value(ArgValue::default());
        arg.as_pointer();
    }

    #[test]
    #[should_panic(expected = "binding table runs past")]
    fn test_binding_table_bounds() {
        KernelDescriptor::builder("table")
            .binding_table(BindingTable {
                num_entries: 2,
                table_offset: 0,
            })
            .heaps(KernelHeaps {
                surface_state: vec![0; 4],
                ..Default::default()
            })
            .build();
    }
}
