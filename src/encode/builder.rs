use derive_more::{Deref, Display};

use super::state::StateCache;
use crate::loom::{
    heap::{HeapKind, Heaps, IndirectHeap},
    stream::LinearStream,
};

#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq, Hash, Deref)]
pub struct BuilderId(uid::Id<BuilderId>);

/// One command stream with the heaps its dispatches place state in.
///
/// The builder also remembers the global state last programmed on its stream, so consecutive
/// dispatches skip redundant state commands.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    id: BuilderId,
    stream: LinearStream,
    heaps: Heaps,
    state: StateCache,
}

impl CommandBuilder {
    pub fn new(stream: LinearStream, heaps: Heaps) -> Self {
        let id = BuilderId(uid::Id::new());
        Self {
            id,
            stream,
            heaps,
            state: StateCache::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> BuilderId {
        self.id
    }

    #[inline]
    pub fn stream(&self) -> &LinearStream {
        &self.stream
    }

    #[inline]
    pub fn heaps(&self) -> &Heaps {
        &self.heaps
    }

    #[inline]
    pub fn heap(&self, kind: HeapKind) -> &IndirectHeap {
        self.heaps.get(kind)
    }

    #[inline]
    pub fn state(&self) -> &StateCache {
        &self.state
    }

    /// Borrows the stream, the heaps and the state cache at once.
    #[inline]
    pub(crate) fn parts_mut(&mut self) -> (&mut LinearStream, &mut Heaps, &mut StateCache) {
        (&mut self.stream, &mut self.heaps, &mut self.state)
    }

    /// Rebinds a heap once the old one ran full. The next dispatch using it reprograms the
    /// heap base addresses.
    pub fn replace_heap(&mut self, heap: IndirectHeap) -> IndirectHeap {
        let kind = heap.kind();
        log::debug!("builder {}: replacing {kind} heap", self.id);
        self.state.mark_dirty(kind);
        self.heaps.replace(heap)
    }

    /// Forgets the programmed global state, e.g. when the stream is submitted on its own.
    pub fn reset_state(&mut self) {
        self.state.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_heap() {
        let mut builder =
            CommandBuilder::new(LinearStream::new(0, 256), Heaps::contiguous(0x1_0000, 256));
        assert_eq!(builder.state(), &StateCache::default());
        builder.reset_state();
        assert!(builder.state().is_dirty(HeapKind::SurfaceState));

        let old = builder.replace_heap(IndirectHeap::new(HeapKind::DynamicState, 0x9_0000, 512));
        assert_eq!(old.gpu_base(), 0x1_0100);
        assert_eq!(builder.heap(HeapKind::DynamicState).gpu_base(), 0x9_0000);
        assert!(builder.state().is_dirty(HeapKind::DynamicState));
    }

    #[test]
    fn test_distinct_ids() {
        let a = CommandBuilder::new(LinearStream::new(0, 64), Heaps::contiguous(0, 64));
        let b = CommandBuilder::new(LinearStream::new(0, 64), Heaps::contiguous(0, 64));
        assert_ne!(a.id(), b.id());
    }
}
