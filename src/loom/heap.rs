use derive_more::Display;
use thiserror::Error;

use super::num::align_up;

/// The resource heaps a command-stream builder owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum HeapKind {
    /// Surface states and binding tables.
    #[display("surface state")]
    SurfaceState,
    /// Sampler states and border colors.
    #[display("dynamic state")]
    DynamicState,
    /// Cross-thread and per-thread payload.
    #[display("indirect object")]
    IndirectObject,
}

impl HeapKind {
    pub const ALL: [HeapKind; 3] = [
        HeapKind::SurfaceState,
        HeapKind::DynamicState,
        HeapKind::IndirectObject,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            HeapKind::SurfaceState => 0,
            HeapKind::DynamicState => 1,
            HeapKind::IndirectObject => 2,
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    #[error("{kind} heap exhausted: {requested} bytes requested, {available} available")]
    Exhausted {
        kind: HeapKind,
        requested: usize,
        available: usize,
    },
}

/// A linearly allocated, GPU-visible heap.
#[derive(Debug, Clone)]
pub struct IndirectHeap {
    kind: HeapKind,
    gpu_base: u64,
    data: Vec<u8>,
    used: usize,
}

impl IndirectHeap {
    pub fn new(kind: HeapKind, gpu_base: u64, capacity: usize) -> Self {
        let data = vec![0; capacity];
        Self {
            kind,
            gpu_base,
            data,
            used: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    #[inline]
    pub fn gpu_base(&self) -> u64 {
        self.gpu_base
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Advances the current offset to `alignment`. Padding bytes stay zero.
    pub fn align(&mut self, alignment: usize) -> Result<(), HeapError> {
        let aligned = align_up(self.used as u64, alignment as u64) as usize;
        if aligned > self.capacity() {
            return Err(self.exhausted(aligned - self.used));
        }
        self.used = aligned;
        Ok(())
    }

    /// Allocates `size` bytes at the current offset, returning the heap-relative offset.
    pub fn get_space(&mut self, size: usize) -> Result<(usize, &mut [u8]), HeapError> {
        if size > self.available() {
            return Err(self.exhausted(size));
        }
        let offset = self.used;
        self.used += size;
        Ok((offset, &mut self.data[offset..offset + size]))
    }

    fn exhausted(&self, requested: usize) -> HeapError {
        HeapError::Exhausted {
            kind: self.kind,
            requested,
            available: self.available(),
        }
    }
}

/// The three heaps of one command-stream builder.
#[derive(Debug, Clone)]
pub struct Heaps {
    heaps: [IndirectHeap; 3],
}

impl Heaps {
    pub fn new(surface: IndirectHeap, dynamic: IndirectHeap, indirect: IndirectHeap) -> Self {
        assert_eq!(surface.kind(), HeapKind::SurfaceState);
        assert_eq!(dynamic.kind(), HeapKind::DynamicState);
        assert_eq!(indirect.kind(), HeapKind::IndirectObject);
        let heaps = [surface, dynamic, indirect];
        Self { heaps }
    }

    /// Allocates three consecutive heaps of `capacity` bytes each starting at `gpu_base`.
    pub fn contiguous(gpu_base: u64, capacity: usize) -> Self {
        let [surface, dynamic, indirect] = HeapKind::ALL
            .map(|kind| IndirectHeap::new(kind, gpu_base + (kind.index() * capacity) as u64, capacity));
        Self::new(surface, dynamic, indirect)
    }

    #[inline]
    pub fn get(&self, kind: HeapKind) -> &IndirectHeap {
        &self.heaps[kind.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, kind: HeapKind) -> &mut IndirectHeap {
        &mut self.heaps[kind.index()]
    }

    /// Swaps in a fresh allocation of the same kind, returning the old one.
    pub fn replace(&mut self, heap: IndirectHeap) -> IndirectHeap {
        std::mem::replace(&mut self.heaps[heap.kind().index()], heap)
    }
}

#[cfg(test)]
mod tests {
    use super::{HeapError, HeapKind, Heaps, IndirectHeap};

    #[test]
    fn test_align_and_space() -> Result<(), HeapError> {
        let mut heap = IndirectHeap::new(HeapKind::SurfaceState, 0x10000, 256);
        let (offset, space) = heap.get_space(4)?;
        assert_eq!(offset, 0);
        space.copy_from_slice(&[1, 2, 3, 4]);

        heap.align(64)?;
        assert_eq!(heap.used(), 64);
        let (offset, _) = heap.get_space(8)?;
        assert_eq!(offset, 64);
        assert_eq!(&heap.data()[..4], &[1, 2, 3, 4]);
        assert_eq!(heap.available(), 184);
        Ok(())
    }

    #[test]
    fn test_exhausted() {
        let mut heap = IndirectHeap::new(HeapKind::DynamicState, 0, 32);
        let err = heap.get_space(33).unwrap_err();
        assert_eq!(
            err,
            HeapError::Exhausted {
                kind: HeapKind::DynamicState,
                requested: 33,
                available: 32
            }
        );
        heap.get_space(1).unwrap();
        assert!(heap.align(64).is_err());
        assert_eq!(err.to_string(), "dynamic state heap exhausted: 33 bytes requested, 32 available");
    }

    #[test]
    fn test_contiguous() {
        let heaps = Heaps::contiguous(0x100000, 0x1000);
        assert_eq!(heaps.get(HeapKind::SurfaceState).gpu_base(), 0x100000);
        assert_eq!(heaps.get(HeapKind::DynamicState).gpu_base(), 0x101000);
        assert_eq!(heaps.get(HeapKind::IndirectObject).gpu_base(), 0x102000);
    }
}
