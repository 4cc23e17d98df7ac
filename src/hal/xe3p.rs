use super::{CacheUsage, DispatchWalkOrder, Family, FencePolicy, HardwareProfile, PreferredSlm};

const PREFERRED_SLM_SIZES: [PreferredSlm; 10] = [
    PreferredSlm { bytes: 0, encoded: 0 },
    PreferredSlm { bytes: 16 << 10, encoded: 1 },
    PreferredSlm { bytes: 32 << 10, encoded: 2 },
    PreferredSlm { bytes: 64 << 10, encoded: 3 },
    PreferredSlm { bytes: 96 << 10, encoded: 4 },
    PreferredSlm { bytes: 128 << 10, encoded: 5 },
    PreferredSlm { bytes: 160 << 10, encoded: 6 },
    PreferredSlm { bytes: 192 << 10, encoded: 7 },
    PreferredSlm { bytes: 256 << 10, encoded: 8 },
    PreferredSlm { bytes: 384 << 10, encoded: 9 },
];

/// Heapless-capable generation with dispatch walk order and dispatch-all support.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Xe3p;

impl HardwareProfile for Xe3p {
    fn family(&self) -> Family {
        Family::Xe3p
    }

    fn encode_walk_order(&self, order: DispatchWalkOrder) -> Option<u32> {
        match order {
            DispatchWalkOrder::Linear => Some(0),
            DispatchWalkOrder::YOrder => Some(1),
            DispatchWalkOrder::Morton => Some(2),
        }
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

    fn encode_simd(&self, simd: u32) -> u32 {
        match simd {
            1 | 32 => 2,
            _ => 1,
        }
    }

    fn preferred_slm_sizes(&self) -> &'static [PreferredSlm] {
        &PREFERRED_SLM_SIZES
    }

    fn fence_policy(&self) -> FencePolicy {
        FencePolicy::DiscreteOnly
    }

    fn mocs(&self, usage: CacheUsage) -> u32 {
        match usage {
            CacheUsage::Stateless | CacheUsage::BindingTablePool => 4 << 1,
            CacheUsage::StatelessUncached | CacheUsage::PostSync => 1 << 1,
        }
    }

    fn supports_dispatch_all(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::Xe3p;
    use crate::hal::{DispatchWalkOrder, HardwareProfile};

    #[test]
    fn test_walk_order() {
        assert_eq!(Xe3p.encode_walk_order(DispatchWalkOrder::Linear), Some(0));
        assert_eq!(Xe3p.encode_walk_order(DispatchWalkOrder::Morton), Some(2));
    }

    #[test]
    fn test_simd() {
        assert_eq!(Xe3p.encode_simd(16), 1);
        assert_eq!(Xe3p.encode_simd(32), 2);
        assert_eq!(Xe3p.encode_simd(1), 2);
    }
}
