//! Placement of kernel-provided state blocks in the builder's heaps.
//!
//! Every placement is described by [`HeapRequirements`] first, so the space a dispatch needs can
//! be checked before any heap is written.

use crate::{
    hal::FieldWidths,
    kernel::{KernelDescriptor, payload::patch_u32},
    loom::{
        heap::{HeapError, HeapKind, Heaps, IndirectHeap},
        num::align_up,
    },
};

/// A contiguous allocation within one heap.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub alignment: usize,
    pub size: usize,
}

impl Chunk {
    #[inline]
    pub fn new(alignment: usize, size: usize) -> Self {
        Self { alignment, size }
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size == 0
    }
}

/// Heap space one dispatch consumes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapRequirements {
    /// Surface states and binding table, copied as one block.
    pub binding_table: Chunk,
    /// Surface states of bindless arguments.
    pub bindless: Chunk,
    /// Border color followed by the sampler states.
    pub samplers: Chunk,
    /// Per-thread and cross-thread data.
    pub payload: Chunk,
}

impl HeapRequirements {
    /// Space the kernel's own state blocks need. The payload chunk is left empty.
    pub fn for_kernel(kernel: &KernelDescriptor, widths: &FieldWidths) -> Self {
        let table = kernel.binding_table();
        let binding_table = match table.num_entries {
            0 => Chunk::default(),
            entries => {
                let end = table.table_offset as usize
                    + entries as usize * widths.binding_table_entry_size;
                let size = kernel.heaps().surface_state.len().max(end);
                Chunk::new(
                    widths.binding_table_alignment,
                    align_up(size as u64, widths.binding_table_alignment as u64) as usize,
                )
            }
        };

        let bindless = match kernel.bindless_slots().len() {
            0 => Chunk::default(),
            slots => Chunk::new(widths.surface_state_size, slots * widths.surface_state_size),
        };

        let samplers = match kernel.sampler_table().num_samplers {
            0 => Chunk::default(),
            count => Chunk::new(
                widths.border_color_size.max(widths.sampler_state_alignment),
                sampler_states_offset(widths) + count as usize * widths.sampler_state_size,
            ),
        };

        Self {
            binding_table,
            bindless,
            samplers,
            payload: Chunk::default(),
        }
    }

    /// Chunks placed in the heap of `kind`, in placement order.
    pub fn chunks(&self, kind: HeapKind) -> Vec<Chunk> {
        let chunks = match kind {
            HeapKind::SurfaceState => vec![self.binding_table, self.bindless],
            HeapKind::DynamicState => vec![self.samplers],
            HeapKind::IndirectObject => vec![self.payload],
        };
        chunks.into_iter().filter(|chunk| !chunk.is_empty()).collect()
    }

    /// Checks if the dispatch places anything in the heap of `kind`.
    pub fn touches(&self, kind: HeapKind) -> bool {
        !self.chunks(kind).is_empty()
    }

    /// Bytes the placement consumes from `heap`, padding included.
    pub fn bytes_needed(&self, heap: &IndirectHeap) -> usize {
        let start = heap.used();
        let end = self.chunks(heap.kind()).into_iter().fold(start, |used, chunk| {
            align_up(used as u64, chunk.alignment as u64) as usize + chunk.size
        });
        end - start
    }

    /// Fails if any heap cannot hold its chunks.
    pub fn check(&self, heaps: &Heaps) -> Result<(), HeapError> {
        for kind in HeapKind::ALL {
            let heap = heaps.get(kind);
            let requested = self.bytes_needed(heap);
            if requested > heap.available() {
                return Err(HeapError::Exhausted {
                    kind,
                    requested,
                    available: heap.available(),
                });
            }
        }
        Ok(())
    }
}

/// Offset of the first sampler state from the border color.
fn sampler_states_offset(widths: &FieldWidths) -> usize {
    align_up(
        widths.border_color_size as u64,
        widths.sampler_state_alignment as u64,
    ) as usize
}

/// Copies `source[offset..offset + dst.len()]` into `dst`, leaving bytes past the source zero.
fn copy_clamped(dst: &mut [u8], source: &[u8], offset: usize) {
    let start = offset.min(source.len());
    let end = (offset + dst.len()).min(source.len());
    dst[..end - start].copy_from_slice(&source[start..end]);
}

/// Copies the surface state blob and patches the binding table entries to heap offsets.
///
/// Returns the heap offset of the binding table, or 0 without touching the heap if the kernel
/// has no binding table.
pub fn place_binding_table(
    heap: &mut IndirectHeap,
    kernel: &KernelDescriptor,
    chunk: Chunk,
    widths: &FieldWidths,
) -> Result<u32, HeapError> {
    let table = kernel.binding_table();
    if table.num_entries == 0 {
        return Ok(0);
    }

    let blob = &kernel.heaps().surface_state;
    heap.align(chunk.alignment)?;
    let (offset, space) = heap.get_space(chunk.size)?;
    space[..blob.len()].copy_from_slice(blob);

    let table_offset = table.table_offset as usize;
    for entry in 0..table.num_entries as usize {
        let at = table_offset + entry * widths.binding_table_entry_size;
        let value = u32::from_le_bytes([space[at], space[at + 1], space[at + 2], space[at + 3]]);
        let patched = value + offset as u32;
        space[at..at + 4].copy_from_slice(&patched.to_le_bytes());
    }

    log::trace!(
        "kernel `{}`: binding table of {} entries at {:#x}",
        kernel.name(),
        table.num_entries,
        offset + table_offset
    );
    Ok((offset + table_offset) as u32)
}

/// Copies the surface states of bindless arguments to their slots and patches the payload with
/// each slot's heap offset.
pub fn place_bindless(
    heap: &mut IndirectHeap,
    kernel: &KernelDescriptor,
    chunk: Chunk,
    widths: &FieldWidths,
    payload: &mut [u8],
) -> Result<(), HeapError> {
    if chunk.is_empty() {
        return Ok(());
    }

    let blob = &kernel.heaps().surface_state;
    let stride = widths.surface_state_size;
    heap.align(chunk.alignment)?;
    let (base, space) = heap.get_space(chunk.size)?;

    for (&payload_offset, &slot) in kernel.bindless_slots() {
        let slot = slot as usize;
        copy_clamped(&mut space[slot * stride..][..stride], blob, slot * stride);
        if (payload_offset as usize) + 4 <= payload.len() {
            patch_u32(payload, Some(payload_offset), (base + slot * stride) as u32);
        }
    }
    Ok(())
}

/// Copies the border color and sampler states, pointing every sampler at the copied border
/// color.
///
/// Returns the heap offset of the first sampler state, or `None` if the kernel has no samplers.
pub fn place_samplers(
    heap: &mut IndirectHeap,
    kernel: &KernelDescriptor,
    chunk: Chunk,
    widths: &FieldWidths,
) -> Result<Option<usize>, HeapError> {
    let table = kernel.sampler_table();
    if table.num_samplers == 0 {
        return Ok(None);
    }

    let blob = &kernel.heaps().dynamic_state;
    heap.align(chunk.alignment)?;
    let (offset, space) = heap.get_space(chunk.size)?;

    let states_offset = sampler_states_offset(widths);
    let (border_color, states) = space.split_at_mut(states_offset);
    copy_clamped(
        &mut border_color[..widths.border_color_size],
        blob,
        table.border_color as usize,
    );
    copy_clamped(states, blob, table.table_offset as usize);

    // dword 2 of a sampler state holds the border color pointer
    for state in states.chunks_exact_mut(widths.sampler_state_size) {
        state[8..12].copy_from_slice(&(offset as u32).to_le_bytes());
    }
    Ok(Some(offset + states_offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{
        ArgDescriptor, ArgPointer, BindingTable, KernelHeaps, SamplerTable,
    };

    fn kernel_with_table(entries: u8) -> KernelDescriptor {
        let mut surface_state = vec![0u8; 4 * entries as usize];
        for entry in 0..entries as usize {
            surface_state[entry * 4..][..4].copy_from_slice(&((entry as u32) * 64).to_le_bytes());
        }
        KernelDescriptor::builder("bt")
            .binding_table(BindingTable {
                num_entries: entries,
                table_offset: 0,
            })
            .heaps(KernelHeaps {
                surface_state,
                ..Default::default()
            })
            .build()
    }

    #[test]
    fn test_no_binding_table() -> Result<(), HeapError> {
        let widths = FieldWidths::default();
        let kernel = kernel_with_table(0);
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        assert!(!requirements.touches(HeapKind::SurfaceState));

        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0, 256);
        heap.get_space(3)?;
        let offset = place_binding_table(&mut heap, &kernel, requirements.binding_table, &widths)?;
        assert_eq!(offset, 0);
        assert_eq!(heap.used(), 3);
        Ok(())
    }

    #[test]
    fn test_single_entry() -> Result<(), HeapError> {
        let widths = FieldWidths::default();
        let kernel = kernel_with_table(1);
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);

        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0, 256);
        heap.get_space(10)?;
        assert_eq!(requirements.bytes_needed(&heap), 54 + 64);

        let offset = place_binding_table(&mut heap, &kernel, requirements.binding_table, &widths)?;
        assert_eq!(offset, 64);
        assert_eq!(offset as usize % widths.binding_table_alignment, 0);
        assert_eq!(heap.used(), 64 + widths.binding_table_alignment);
        // the entry now points at the copied surface state
        assert_eq!(&heap.data()[64..68], &64u32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_patched_entries() -> Result<(), HeapError> {
        let widths = FieldWidths::default();
        let kernel = kernel_with_table(3);
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0, 512);
        heap.align(1)?;
        heap.get_space(128)?;

        let offset = place_binding_table(&mut heap, &kernel, requirements.binding_table, &widths)? as usize;
        let entries: Vec<u32> = heap.data()[offset..offset + 12]
            .chunks_exact(4)
            .map(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]))
            .collect();
        assert_eq!(entries, vec![128, 192, 256]);
        Ok(())
    }

    #[test]
    fn test_samplers() -> Result<(), HeapError> {
        let widths = FieldWidths::default();
        let mut dynamic_state = vec![0u8; 96];
        dynamic_state[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        dynamic_state[64] = 0x11;
        dynamic_state[80] = 0x22;
        let kernel = KernelDescriptor::builder("samplers")
            .sampler_table(SamplerTable {
                num_samplers: 2,
                table_offset: 64,
                border_color: 0,
            })
            .heaps(KernelHeaps {
                dynamic_state,
                ..Default::default()
            })
            .build();
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        assert_eq!(requirements.samplers, Chunk::new(64, 96));

        let mut heap = IndirectHeap::new(HeapKind::DynamicState, 0, 512);
        heap.get_space(1)?;
        let states = place_samplers(&mut heap, &kernel, requirements.samplers, &widths)?;
        assert_eq!(states, Some(128));
        let data = heap.data();
        assert_eq!(&data[64..68], &0xdead_beefu32.to_le_bytes());
        assert_eq!(data[128], 0x11);
        assert_eq!(data[144], 0x22);
        assert_eq!(&data[136..140], &64u32.to_le_bytes());
        assert_eq!(&data[152..156], &64u32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_wide_entries() -> Result<(), HeapError> {
        let widths = FieldWidths {
            binding_table_entry_size: 8,
            ..Default::default()
        };
        let kernel = KernelDescriptor::builder("short")
            .binding_table(BindingTable {
                num_entries: 2,
                table_offset: 60,
            })
            .heaps(KernelHeaps {
                surface_state: vec![0u8; 72],
                ..Default::default()
            })
            .build();
        // the second entry ends past the blob, so the chunk covers the table
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        assert_eq!(requirements.binding_table, Chunk::new(64, 128));

        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0, 256);
        heap.get_space(1)?;
        let offset = place_binding_table(&mut heap, &kernel, requirements.binding_table, &widths)?;
        assert_eq!(offset, 124);
        // entries are 8 bytes apart, each patched with the heap offset of the blob
        assert_eq!(&heap.data()[124..128], &64u32.to_le_bytes());
        assert_eq!(&heap.data()[132..136], &64u32.to_le_bytes());
        assert_eq!(heap.used(), 192);
        Ok(())
    }

    #[test]
    fn test_sampler_alignment() -> Result<(), HeapError> {
        let widths = FieldWidths {
            border_color_size: 16,
            sampler_state_alignment: 64,
            ..Default::default()
        };
        let mut dynamic_state = vec![0u8; 32];
        dynamic_state[16] = 0x33;
        let kernel = KernelDescriptor::builder("aligned")
            .sampler_table(SamplerTable {
                num_samplers: 1,
                table_offset: 16,
                border_color: 0,
            })
            .heaps(KernelHeaps {
                dynamic_state,
                ..Default::default()
            })
            .build();
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        assert_eq!(requirements.samplers, Chunk::new(64, 80));

        let mut heap = IndirectHeap::new(HeapKind::DynamicState, 0, 256);
        heap.get_space(1)?;
        let states = place_samplers(&mut heap, &kernel, requirements.samplers, &widths)?;
        assert_eq!(states, Some(128));
        assert_eq!(heap.data()[128], 0x33);
        assert_eq!(&heap.data()[136..140], &64u32.to_le_bytes());
        Ok(())
    }

    #[test]
    fn test_bindless() -> Result<(), HeapError> {
        let widths = FieldWidths::default();
        let mut surface_state = vec![0u8; 128];
        surface_state[64] = 0x5a;
        let kernel = KernelDescriptor::builder("bindless")
            .arg(ArgDescriptor::Pointer(ArgPointer {
                bindless: Some(0),
                pointer_size: 8,
                ..Default::default()
            }))
            .arg(ArgDescriptor::Pointer(ArgPointer {
                bindless: Some(4),
                pointer_size: 8,
                ..Default::default()
            }))
            .heaps(KernelHeaps {
                surface_state,
                ..Default::default()
            })
            .build();
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        assert_eq!(requirements.bindless, Chunk::new(64, 128));

        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0, 512);
        let mut payload = vec![0u8; 32];
        place_bindless(&mut heap, &kernel, requirements.bindless, &widths, &mut payload)?;
        assert_eq!(&payload[0..4], &0u32.to_le_bytes());
        assert_eq!(&payload[4..8], &64u32.to_le_bytes());
        assert_eq!(heap.data()[64], 0x5a);
        Ok(())
    }

    #[test]
    fn test_check() {
        let widths = FieldWidths::default();
        let kernel = kernel_with_table(1);
        let requirements = HeapRequirements::for_kernel(&kernel, &widths);
        let heaps = Heaps::contiguous(0, 32);
        assert_eq!(
            requirements.check(&heaps),
            Err(HeapError::Exhausted {
                kind: HeapKind::SurfaceState,
                requested: 64,
                available: 32,
            })
        );
        assert!(requirements.check(&Heaps::contiguous(0, 64)).is_ok());
    }
}
