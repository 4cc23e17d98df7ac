//! Memory of the global state last programmed on one command stream.
//!
//! The encoder asks the [`StateCache`] for a [`StatePlan`] before every dispatch, emits exactly
//! the commands the plan names and then commits the new values. Two dispatches with the same
//! requirements therefore program global state once.

use crate::{
    hal::{
        CacheUsage, HardwareInfo, HardwareProfile,
        cmds::{BindingTablePoolAlloc, MiLoadRegisterImm, PipeControl, StateBaseAddress, registers},
    },
    loom::{
        heap::{HeapKind, Heaps},
        stream::{Command, LinearStream, StreamError},
    },
};

const PAGE_SIZE: usize = 4096;
const SURFACE_STATE_SIZE: usize = 64;

/// Base addresses and sizes of the heaps bound through state base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseAddresses {
    pub surface_state: u64,
    pub dynamic_state: u64,
    pub indirect_object: u64,
    pub surface_state_size: usize,
    pub dynamic_state_size: usize,
    pub indirect_object_size: usize,
}

impl BaseAddresses {
    pub fn of(heaps: &Heaps) -> Self {
        let surface = heaps.get(HeapKind::SurfaceState);
        let dynamic = heaps.get(HeapKind::DynamicState);
        let indirect = heaps.get(HeapKind::IndirectObject);
        Self {
            surface_state: surface.gpu_base(),
            dynamic_state: dynamic.gpu_base(),
            indirect_object: indirect.gpu_base(),
            surface_state_size: surface.capacity(),
            dynamic_state_size: dynamic.capacity(),
            indirect_object_size: indirect.capacity(),
        }
    }
}

/// Global state one dispatch depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredState {
    pub stateless_mocs: u32,
    /// Cross-tile atomics mode; only tracked on multi-tile devices.
    pub global_atomics: Option<bool>,
    /// `None` in heapless mode, where nothing is addressed relative to a heap base.
    pub base_addresses: Option<BaseAddresses>,
    pub l3_config: Option<u32>,
    /// Heaps the dispatch places data in, indexed by [`HeapKind::index`].
    pub touched: [bool; 3],
}

impl RequiredState {
    pub fn new(
        heaps: &Heaps,
        touched: [bool; 3],
        uncached: bool,
        global_atomics: bool,
        slm_enabled: bool,
        hw: &HardwareInfo,
        profile: &dyn HardwareProfile,
    ) -> Self {
        let usage = match uncached {
            true => CacheUsage::StatelessUncached,
            false => CacheUsage::Stateless,
        };
        Self {
            stateless_mocs: profile.mocs(usage),
            global_atomics: hw.multi_tile().then_some(global_atomics),
            base_addresses: (!hw.heapless).then(|| BaseAddresses::of(heaps)),
            l3_config: profile.l3_config(slm_enabled),
            touched,
        }
    }
}

/// Global state commands one dispatch must emit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatePlan {
    pub state_base_address: bool,
    /// Program state base address a second time.
    pub double_state_base_address: bool,
    pub binding_table_pool: bool,
    pub l3_config: bool,
}

impl StatePlan {
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.state_base_address && !self.l3_config
    }

    /// Bytes [`StatePlan::emit`] writes.
    pub fn size(&self) -> usize {
        let mut size = 0;
        if self.state_base_address {
            size += PipeControl::SIZE + StateBaseAddress::SIZE;
            if self.double_state_base_address {
                size += StateBaseAddress::SIZE;
            }
            if self.binding_table_pool {
                size += BindingTablePoolAlloc::SIZE;
            }
        }
        if self.l3_config {
            size += PipeControl::SIZE + MiLoadRegisterImm::SIZE;
        }
        size
    }

    pub fn emit(
        &self,
        stream: &mut LinearStream,
        required: &RequiredState,
        profile: &dyn HardwareProfile,
    ) -> Result<(), StreamError> {
        if let (true, Some(bases)) = (self.state_base_address, required.base_addresses) {
            let mut flush = PipeControl::init();
            flush.set_cs_stall(1);
            flush.set_dc_flush_enable(1);
            flush.set_hdc_pipeline_flush(1);
            flush.set_untyped_dataport_cache_flush(1);
            flush.set_texture_cache_invalidation(1);
            flush.set_state_cache_invalidation(1);
            flush.set_constant_cache_invalidation(1);
            flush.set_instruction_cache_invalidation(1);
            stream.put(&flush)?;

            let sba = state_base_address(required, &bases);
            stream.put(&sba)?;
            if self.double_state_base_address {
                stream.put(&sba)?;
            }

            if self.binding_table_pool {
                let mut pool = BindingTablePoolAlloc::init();
                pool.set_base_address(bases.surface_state);
                pool.set_buffer_size(encode_heap_size(bases.surface_state_size));
                pool.set_mocs(profile.mocs(CacheUsage::BindingTablePool));
                stream.put(&pool)?;
            }
        }

        if let (true, Some(value)) = (self.l3_config, required.l3_config) {
            let mut stall = PipeControl::init();
            stall.set_cs_stall(1);
            stream.put(&stall)?;

            let mut load = MiLoadRegisterImm::init();
            load.set_register_offset(registers::L3_CONTROL);
            load.set_data(value);
            stream.put(&load)?;
        }
        Ok(())
    }
}

/// Heap size in pages, in the upper bits, with the modify bit set.
fn encode_heap_size(bytes: usize) -> u32 {
    let pages = bytes.div_ceil(PAGE_SIZE).clamp(1, 0xf_ffff) as u32;
    pages << 12 | StateBaseAddress::MODIFY_ENABLE
}

fn state_base_address(required: &RequiredState, bases: &BaseAddresses) -> StateBaseAddress {
    const MODIFY: u64 = StateBaseAddress::MODIFY_ENABLE as u64;

    let mut sba = StateBaseAddress::init();
    sba.set_general_state_base_address(MODIFY);
    sba.set_instruction_base_address(MODIFY);
    sba.set_surface_state_base_address(bases.surface_state | MODIFY);
    sba.set_dynamic_state_base_address(bases.dynamic_state | MODIFY);
    sba.set_indirect_object_base_address(bases.indirect_object | MODIFY);
    sba.set_bindless_surface_state_base_address(bases.surface_state | MODIFY);
    sba.set_bindless_sampler_state_base_address(bases.dynamic_state | MODIFY);

    sba.set_general_state_size(encode_heap_size(usize::MAX));
    sba.set_instruction_size(encode_heap_size(usize::MAX));
    sba.set_dynamic_state_size(encode_heap_size(bases.dynamic_state_size));
    sba.set_indirect_object_size(encode_heap_size(bases.indirect_object_size));
    sba.set_bindless_surface_state_size(
        (bases.surface_state_size / SURFACE_STATE_SIZE).saturating_sub(1) as u32,
    );

    sba.set_stateless_mocs(required.stateless_mocs);
    if let Some(global_atomics) = required.global_atomics {
        sba.set_disable_multi_gpu_atomics(!global_atomics as u32);
        sba.set_disable_multi_gpu_partial_writes(!global_atomics as u32);
    }
    sba
}

/// Last programmed global state of one command stream.
///
/// Starts out knowing nothing, with every heap dirty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCache {
    stateless_mocs: Option<u32>,
    global_atomics: Option<bool>,
    base_addresses: Option<BaseAddresses>,
    l3_config: Option<u32>,
    dirty: [bool; 3],
}

impl Default for StateCache {
    fn default() -> Self {
        Self {
            stateless_mocs: None,
            global_atomics: None,
            base_addresses: None,
            l3_config: None,
            dirty: [true; 3],
        }
    }
}

impl StateCache {
    /// Marks a heap as rebound, forcing state base address before its next use.
    #[inline]
    pub fn mark_dirty(&mut self, kind: HeapKind) {
        self.dirty[kind.index()] = true;
    }

    #[inline]
    pub fn is_dirty(&self, kind: HeapKind) -> bool {
        self.dirty[kind.index()]
    }

    /// Forgets everything, e.g. after the stream was handed to another context.
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    /// Decides which global state commands `required` calls for.
    pub fn plan(
        &self,
        required: &RequiredState,
        hw: &HardwareInfo,
        profile: &dyn HardwareProfile,
    ) -> StatePlan {
        let state_base_address = required.base_addresses.is_some()
            && (self.base_addresses != required.base_addresses
                || self.stateless_mocs != Some(required.stateless_mocs)
                || (required.global_atomics.is_some()
                    && self.global_atomics != required.global_atomics)
                || HeapKind::ALL
                    .into_iter()
                    .any(|kind| required.touched[kind.index()] && self.is_dirty(kind)));

        StatePlan {
            state_base_address,
            double_state_base_address: state_base_address
                && profile.requires_double_state_base_address(hw),
            binding_table_pool: state_base_address && self.is_dirty(HeapKind::SurfaceState),
            l3_config: required.l3_config.is_some() && self.l3_config != required.l3_config,
        }
    }

    /// Records the state `plan` programmed.
    pub fn commit(&mut self, plan: &StatePlan, required: &RequiredState) {
        if plan.state_base_address {
            self.base_addresses = required.base_addresses;
            self.stateless_mocs = Some(required.stateless_mocs);
            if required.global_atomics.is_some() {
                self.global_atomics = required.global_atomics;
            }
            self.dirty = [false; 3];
        }
        if plan.l3_config {
            self.l3_config = required.l3_config;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{XeHp, XeHpc, cmds::parse, cmds::CommandKind};

    fn required(heaps: &Heaps, hw: &HardwareInfo, profile: &dyn HardwareProfile) -> RequiredState {
        RequiredState::new(heaps, [false, false, true], false, false, false, hw, profile)
    }

    #[test]
    fn test_idempotent() -> Result<(), StreamError> {
        let hw = HardwareInfo::xe_hp();
        let heaps = Heaps::contiguous(0x10_0000, 0x1_0000);
        let mut cache = StateCache::default();
        let required = required(&heaps, &hw, &XeHp);

        let plan = cache.plan(&required, &hw, &XeHp);
        assert!(plan.state_base_address);
        assert!(plan.binding_table_pool);
        assert!(plan.l3_config);

        let mut stream = LinearStream::new(0, 4096);
        plan.emit(&mut stream, &required, &XeHp)?;
        assert_eq!(stream.used(), plan.size());
        cache.commit(&plan, &required);

        let plan = cache.plan(&required, &hw, &XeHp);
        assert!(plan.is_empty());
        assert_eq!(plan.size(), 0);
        Ok(())
    }

    #[test]
    fn test_dirty_heap() {
        let hw = HardwareInfo::xe_hp();
        let heaps = Heaps::contiguous(0x10_0000, 0x1_0000);
        let mut cache = StateCache::default();
        let required = required(&heaps, &hw, &XeHp);
        let plan = cache.plan(&required, &hw, &XeHp);
        cache.commit(&plan, &required);

        // an untouched dirty heap does not force state
        cache.mark_dirty(HeapKind::DynamicState);
        assert!(!cache.plan(&required, &hw, &XeHp).state_base_address);

        cache.mark_dirty(HeapKind::IndirectObject);
        let plan = cache.plan(&required, &hw, &XeHp);
        assert!(plan.state_base_address);
        assert!(!plan.binding_table_pool);
        cache.commit(&plan, &required);
        assert!(!cache.is_dirty(HeapKind::DynamicState));
    }

    #[test]
    fn test_changed_values() {
        let hw = HardwareInfo::xe_hpc();
        let heaps = Heaps::contiguous(0x10_0000, 0x1_0000);
        let mut cache = StateCache::default();
        let required = required(&heaps, &hw, &XeHpc);
        assert_eq!(required.global_atomics, Some(false));
        assert_eq!(required.l3_config, None);
        let plan = cache.plan(&required, &hw, &XeHpc);
        assert!(!plan.l3_config);
        cache.commit(&plan, &required);

        let atomics = RequiredState {
            global_atomics: Some(true),
            ..required
        };
        assert!(cache.plan(&atomics, &hw, &XeHpc).state_base_address);

        let uncached = RequiredState::new(&heaps, [false; 3], true, false, false, &hw, &XeHpc);
        assert!(cache.plan(&uncached, &hw, &XeHpc).state_base_address);

        let moved = Heaps::contiguous(0x20_0000, 0x1_0000);
        let rebased = required_with(&moved, &hw);
        assert!(cache.plan(&rebased, &hw, &XeHpc).state_base_address);
    }

    fn required_with(heaps: &Heaps, hw: &HardwareInfo) -> RequiredState {
        RequiredState::new(heaps, [false; 3], false, false, false, hw, &XeHpc)
    }

    #[test]
    fn test_heapless() {
        let hw = HardwareInfo::xe3p();
        let heaps = Heaps::contiguous(0x10_0000, 0x1_0000);
        let profile = crate::hal::profile_for(hw.family);
        let required = RequiredState::new(&heaps, [true; 3], false, false, true, &hw, &*profile);
        let plan = StateCache::default().plan(&required, &hw, &*profile);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_double_state_base_address() -> Result<(), Box<dyn std::error::Error>> {
        let mut hw = HardwareInfo::xe_hp();
        hw.stepping = crate::hal::stepping::A0;
        let heaps = Heaps::contiguous(0x10_0000, 0x1_0000);
        let required = required(&heaps, &hw, &XeHp);
        let plan = StateCache::default().plan(&required, &hw, &XeHp);
        assert!(plan.double_state_base_address);

        let mut stream = LinearStream::new(0, 4096);
        plan.emit(&mut stream, &required, &XeHp)?;
        let kinds: Vec<_> = parse(stream.data())?.into_iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [
                CommandKind::PipeControl,
                CommandKind::StateBaseAddress,
                CommandKind::StateBaseAddress,
                CommandKind::BindingTablePoolAlloc,
                CommandKind::PipeControl,
                CommandKind::MiLoadRegisterImm,
            ]
        );

        let sba: StateBaseAddress = stream.read(PipeControl::SIZE);
        assert_eq!(sba.surface_state_base_address(), 0x10_0001);
        assert_eq!(sba.indirect_object_base_address(), 0x12_0001);
        assert_eq!(sba.stateless_mocs(), XeHp.mocs(CacheUsage::Stateless));
        Ok(())
    }
}
