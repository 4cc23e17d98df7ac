//! Layout of the cross-thread data block.

use std::sync::atomic::Ordering;

use super::descriptor::{ArgDescriptor, KernelDescriptor, PayloadOffset, validate_arg};
use crate::loom::num::align_up;

/// Cross-thread data is always allocated in multiples of this many bytes.
pub const CROSS_THREAD_ALIGNMENT: u32 = 32;

/// One mapped field of the cross-thread data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadField {
    pub offset: u16,
    pub width: u16,
}

impl PayloadField {
    #[inline]
    pub fn end(self) -> u32 {
        self.offset as u32 + self.width as u32
    }
}

impl KernelDescriptor {
    /// Every mapped field of the cross-thread data. Unmapped fields are skipped.
    ///
    /// # Panics
    /// If an argument carries contradicting addressing.
    pub fn payload_fields(&self) -> Vec<PayloadField> {
        let pointer_size = self.attributes().pointer_size as u16;
        let mut fields = vec![];
        let mut push = |offset: PayloadOffset, width: u16| {
            if let Some(offset) = offset {
                fields.push(PayloadField { offset, width });
            }
        };

        let traits = self.dispatch_traits();
        for offset in traits
            .global_work_offset
            .iter()
            .chain(&traits.global_work_size)
            .chain(&traits.local_work_size)
            .chain(&traits.local_work_size2)
            .chain(&traits.enqueued_local_work_size)
            .chain(&traits.num_work_groups)
        {
            push(*offset, 4);
        }
        push(traits.work_dim, 4);

        let implicit = self.implicit_args();
        for offset in [
            implicit.private_memory_address,
            implicit.printf_surface_address,
            implicit.sync_buffer_address,
            implicit.global_constants_address,
            implicit.global_variables_address,
            implicit.scratch_pointer_address,
            implicit.implicit_args_buffer,
        ] {
            push(offset, pointer_size);
        }
        push(implicit.private_memory_size, 4);

        for (index, arg) in self.args().iter().enumerate() {
            validate_arg(self.name(), index, arg);
            match arg {
                ArgDescriptor::Pointer(pointer) => {
                    push(pointer.stateless, pointer.pointer_size as u16);
                    push(pointer.bindless, 4);
                    push(pointer.buffer_offset, 4);
                }
                ArgDescriptor::Image(image) => {
                    let metadata = &image.metadata;
                    push(image.bindless, 4);
                    for offset in [
                        metadata.width,
                        metadata.height,
                        metadata.depth,
                        metadata.channel_data_type,
                        metadata.channel_order,
                        metadata.array_size,
                        metadata.num_samples,
                        metadata.num_mip_levels,
                        metadata.flat_width,
                        metadata.flat_height,
                        metadata.flat_pitch,
                    ] {
                        push(offset, 4);
                    }
                    push(metadata.flat_base_offset, 8);
                }
                ArgDescriptor::Sampler(sampler) => {
                    let metadata = &sampler.metadata;
                    push(metadata.snap_workaround, 4);
                    push(metadata.addressing_mode, 4);
                    push(metadata.normalized_coords, 4);
                }
                ArgDescriptor::Value(value) => {
                    for element in &value.elements {
                        push(element.offset, element.size);
                    }
                }
            }
        }
        fields
    }

    /// Computes the cross-thread data size and records it.
    ///
    /// The result is the smallest multiple of [`CROSS_THREAD_ALIGNMENT`] that holds every mapped
    /// field, but never less than any size recorded before.
    pub fn compute_cross_thread_size(&self) -> u32 {
        let end = self
            .payload_fields()
            .into_iter()
            .map(PayloadField::end)
            .max()
            .unwrap_or(0);
        let size = align_up(end as u64, CROSS_THREAD_ALIGNMENT as u64) as u32;
        let recorded = self.cross_thread_data_size.fetch_max(size, Ordering::AcqRel);
        size.max(recorded)
    }
}

/// Writes a 32-bit value if the field is mapped.
///
/// Returns `false` and leaves `payload` untouched for unmapped fields.
pub fn patch_u32(payload: &mut [u8], offset: PayloadOffset, value: u32) -> bool {
    match offset {
        Some(offset) => {
            let offset = offset as usize;
            payload[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Writes the low `size` bytes of `value` if the field is mapped.
pub fn patch_pointer(payload: &mut [u8], offset: PayloadOffset, size: u8, value: u64) -> bool {
    match offset {
        Some(offset) => {
            let (offset, size) = (offset as usize, size as usize);
            payload[offset..offset + size].copy_from_slice(&value.to_le_bytes()[..size]);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::descriptor::{
        ArgImage, ArgPointer, ArgValue, ArgValueElement, DispatchTraits, ImageMetadata,
        ImplicitArgs,
    };

    #[test]
    fn test_empty_payload() {
        let kernel = KernelDescriptor::builder("empty").build();
        assert_eq!(kernel.compute_cross_thread_size(), 0);
        assert_eq!(kernel.cross_thread_data_size(), 0);
    }

    #[test]
    fn test_field_widths() {
        let kernel = KernelDescriptor::builder("widths")
            .dispatch_traits(DispatchTraits {
                global_work_size: [Some(0), Some(4), None],
                work_dim: Some(12),
                ..Default::default()
            })
            .implicit_args(ImplicitArgs {
                private_memory_address: Some(16),
                ..Default::default()
            })
            .arg(ArgDescriptor::Pointer(ArgPointer {
                stateless: Some(24),
                pointer_size: 8,
                ..Default::default()
            }))
            .build();
        // the last pointer ends at 32
        assert_eq!(kernel.compute_cross_thread_size(), 32);

        let kernel = KernelDescriptor::builder("value")
            .arg(ArgDescriptor::Value(ArgValue {
                elements: vec![ArgValueElement {
                    offset: Some(30),
                    size: 3,
                    source_offset: 0,
                }],
            }))
            .build();
        assert_eq!(kernel.compute_cross_thread_size(), 64);

        let kernel = KernelDescriptor::builder("image")
            .arg(ArgDescriptor::Image(ArgImage {
                bindful: Some(0),
                metadata: ImageMetadata {
                    flat_base_offset: Some(60),
                    ..Default::default()
                },
                ..Default::default()
            }))
            .build();
        assert_eq!(kernel.compute_cross_thread_size(), 96);
    }

    #[test]
    fn test_unmapped_fields_ignored() {
        let kernel = KernelDescriptor::builder("unmapped")
            .arg(ArgDescriptor::Pointer(ArgPointer {
                bindful: Some(0x400),
                pointer_size: 8,
                ..Default::default()
            }))
            .build();
        assert_eq!(kernel.compute_cross_thread_size(), 0);
    }

    #[test]
    fn test_monotone() {
        let kernel = KernelDescriptor::builder("seeded")
            .dispatch_traits(DispatchTraits {
                work_dim: Some(0),
                ..Default::default()
            })
            .cross_thread_data_size(128)
            .build();
        assert_eq!(kernel.compute_cross_thread_size(), 128);
        assert_eq!(kernel.compute_cross_thread_size(), 128);

        for _ in 0..64 {
            let offset = fastrand::u16(0..1024);
            let width = fastrand::u16(1..16);
            let kernel = KernelDescriptor::builder("random")
                .arg(ArgDescriptor::Value(ArgValue {
                    elements: vec![ArgValueElement {
                        offset: Some(offset),
                        size: width,
                        source_offset: 0,
                    }],
                }))
                .cross_thread_data_size(fastrand::u32(0..32) * CROSS_THREAD_ALIGNMENT)
                .build();
            let first = kernel.compute_cross_thread_size();
            let second = kernel.compute_cross_thread_size();
            assert!(second >= first);
            assert_eq!(first % CROSS_THREAD_ALIGNMENT, 0);
            assert!(first >= (offset + width) as u32);
        }
    }

    #[test]
    fn test_patch() {
        let mut payload = vec![0xaa; 16];
        assert!(patch_u32(&mut payload, Some(4), 0x0403_0201));
        assert!(!patch_u32(&mut payload, None, 7));
        assert!(patch_pointer(&mut payload, Some(8), 8, 0x0807_0605_0403_0201));
        assert_eq!(&payload[..4], &[0xaa; 4]);
        assert_eq!(&payload[4..8], &[1, 2, 3, 4]);
        assert_eq!(&payload[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
