use super::{
    CacheUsage, DispatchWalkOrder, Family, FencePolicy, HardwareInfo, HardwareProfile,
    PreferredSlm, stepping,
};

const PREFERRED_SLM_SIZES: [PreferredSlm; 6] = [
    PreferredSlm { bytes: 0, encoded: 0 },
    PreferredSlm { bytes: 16 << 10, encoded: 1 },
    PreferredSlm { bytes: 32 << 10, encoded: 2 },
    PreferredSlm { bytes: 64 << 10, encoded: 3 },
    PreferredSlm { bytes: 96 << 10, encoded: 4 },
    PreferredSlm { bytes: 128 << 10, encoded: 5 },
];

/// First generation with the compute walker. SLM is carved out of L3 through a register.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct XeHp;

impl HardwareProfile for XeHp {
    fn family(&self) -> Family {
        Family::XeHp
    }

    fn encode_walk_order(&self, _order: DispatchWalkOrder) -> Option<u32> {
        None
    }

    fn encode_batch_size(&self, groups: u32) -> u32 {
        match groups {
            0 | 1 => 0,
            2 | 3 => 1,
            _ => 2,
        }
    }

    fn max_batch_size(&self) -> u32 {
        4
    }

    fn preferred_slm_sizes(&self) -> &'static [PreferredSlm] {
        &PREFERRED_SLM_SIZES
    }

    fn fence_policy(&self) -> FencePolicy {
        FencePolicy::Never
    }

    fn mocs(&self, usage: CacheUsage) -> u32 {
        match usage {
            CacheUsage::Stateless | CacheUsage::BindingTablePool => 2 << 1,
            CacheUsage::StatelessUncached | CacheUsage::PostSync => 1 << 1,
        }
    }

    fn requires_double_state_base_address(&self, hw: &HardwareInfo) -> bool {
        hw.stepping == stepping::A0
    }

    fn l3_config(&self, slm_enabled: bool) -> Option<u32> {
        match slm_enabled {
            true => Some(0x6000_0121),
            false => Some(0x8000_0141),
        }
    }

    fn binding_table_prefetch(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::XeHp;
    use crate::hal::{HardwareInfo, HardwareProfile, stepping};

    #[test]
    fn test_batch_size() {
        assert_eq!(XeHp.encode_batch_size(1), 0);
        assert_eq!(XeHp.encode_batch_size(2), 1);
        assert_eq!(XeHp.encode_batch_size(4), 2);
        assert_eq!(XeHp.encode_batch_size(8), 2);
    }

    #[test]
    fn test_double_state_base_address() {
        let mut hw = HardwareInfo::xe_hp();
        assert!(!XeHp.requires_double_state_base_address(&hw));
        hw.stepping = stepping::A0;
        assert!(XeHp.requires_double_state_base_address(&hw));
    }

    #[test]
    fn test_l3_config() {
        assert_ne!(XeHp.l3_config(true), XeHp.l3_config(false));
    }
}
