//! Compiled kernel metadata.
//!
//! A [`KernelDescriptor`] is produced once by a binary loader and read by every dispatch of
//! the kernel. [`payload`] derives the cross-thread data layout from it.

pub use descriptor::{
    AddressingMode, ArgDescriptor, ArgImage, ArgKind, ArgPointer, ArgSampler, ArgValue,
    ArgValueElement, BindingTable, DispatchTraits, ImageMetadata, ImplicitArgs, KernelAttributes,
    KernelDescriptor, KernelDescriptorBuilder, KernelFlags, KernelHeaps, PayloadOffset,
    SamplerMetadata, SamplerTable,
};
pub use payload::{CROSS_THREAD_ALIGNMENT, PayloadField};

pub mod descriptor;
pub mod payload;
