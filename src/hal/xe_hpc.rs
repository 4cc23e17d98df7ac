use super::{
    CacheUsage, DispatchWalkOrder, Family, FencePolicy, HardwareProfile, PreferredSlm, stepping,
};

const PREFERRED_SLM_SIZES: [PreferredSlm; 6] = [
    PreferredSlm { bytes: 0, encoded: 0 },
    PreferredSlm { bytes: 16 << 10, encoded: 1 },
    PreferredSlm { bytes: 32 << 10, encoded: 2 },
    PreferredSlm { bytes: 64 << 10, encoded: 3 },
    PreferredSlm { bytes: 96 << 10, encoded: 4 },
    PreferredSlm { bytes: 128 << 10, encoded: 5 },
];

/// Multi-tile data center generation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct XeHpc;

impl HardwareProfile for XeHpc {
    fn family(&self) -> Family {
        Family::XeHpc
    }

    fn encode_walk_order(&self, _order: DispatchWalkOrder) -> Option<u32> {
        None
    }

    fn encode_batch_size(&self, groups: u32) -> u32 {
        match groups {
            0 | 1 => 0,
            2 | 3 => 1,
            4..=7 => 2,
            _ => 3,
        }
    }

    fn max_batch_size(&self) -> u32 {
        8
    }

    fn preferred_slm_sizes(&self) -> &'static [PreferredSlm] {
        &PREFERRED_SLM_SIZES
    }

    fn fence_policy(&self) -> FencePolicy {
        FencePolicy::FromStepping(stepping::B0)
    }

    fn mocs(&self, usage: CacheUsage) -> u32 {
        match usage {
            CacheUsage::Stateless | CacheUsage::BindingTablePool => 3 << 1,
            CacheUsage::StatelessUncached | CacheUsage::PostSync => 2 << 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::XeHpc;
    use crate::hal::{HardwareInfo, HardwareProfile, stepping};

    #[test]
    fn test_fence_from_b0() {
        let mut hw = HardwareInfo::xe_hpc();
        assert!(XeHpc.fence_policy().required(&hw));
        hw.stepping = stepping::A1;
        assert!(!XeHpc.fence_policy().required(&hw));
    }

    #[test]
    fn test_batch_size() {
        let encoded = [1, 2, 4, 8].map(|n| XeHpc.encode_batch_size(n));
        assert_eq!(encoded, [0, 1, 2, 3]);
    }
}
