//! Completion signaling through the walker's post-sync block.

use derive_more::Display;

use super::request::{CompletionSignal, SignalKind};
use crate::{
    hal::{CacheUsage, HardwareInfo, HardwareProfile, WalkerFields},
    loom::num::is_aligned,
};

/// Timestamp packets must be aligned to this many bytes.
pub const TIMESTAMP_ALIGNMENT: u64 = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u32)]
pub enum PostSyncOperation {
    #[default]
    NoWrite = 0,
    WriteImmediateData = 1,
    WriteTimestamp = 3,
}

/// Resolved post-sync programming of one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PostSync {
    pub operation: PostSyncOperation,
    pub address: u64,
    pub immediate_data: u64,
    pub dataport_flush: bool,
    pub l3_flush: bool,
    pub system_memory_fence: bool,
    pub mocs: u32,
}

impl PostSync {
    /// Resolves how `signal` is written when the dispatch completes.
    ///
    /// # Panics
    /// If a timestamp destination is not aligned to [`TIMESTAMP_ALIGNMENT`].
    pub fn resolve(
        signal: Option<&CompletionSignal>,
        hw: &HardwareInfo,
        profile: &dyn HardwareProfile,
    ) -> Self {
        let Some(signal) = signal else {
            return Self::default();
        };

        let (operation, immediate_data) = match signal.kind {
            SignalKind::Event => (PostSyncOperation::WriteImmediateData, 0),
            SignalKind::InOrderCounter(value) => (PostSyncOperation::WriteImmediateData, value),
            SignalKind::Timestamp => {
                assert!(
                    is_aligned(signal.address, TIMESTAMP_ALIGNMENT),
                    "timestamp destination {:#x} is not {TIMESTAMP_ALIGNMENT}-byte aligned",
                    signal.address
                );
                (PostSyncOperation::WriteTimestamp, 0)
            }
        };

        let system_memory_fence =
            signal.host_visible && signal.host_signal && profile.fence_policy().required(hw);

        Self {
            operation,
            address: signal.address,
            immediate_data,
            dataport_flush: true,
            l3_flush: signal.flush_l3,
            system_memory_fence,
            mocs: profile.mocs(CacheUsage::PostSync),
        }
    }

    /// Programs the post-sync block of `walker`, offsetting the destination by `offset` bytes.
    pub fn program(&self, walker: &mut dyn WalkerFields, offset: u64) {
        if self.operation == PostSyncOperation::NoWrite {
            return;
        }
        walker.set_post_sync_operation(self.operation as u32);
        walker.set_post_sync_destination_address(self.address + offset);
        walker.set_post_sync_immediate_data(self.immediate_data);
        walker.set_post_sync_dataport_pipeline_flush(self.dataport_flush as u32);
        walker.set_post_sync_l3_flush(self.l3_flush as u32);
        walker.set_post_sync_system_memory_fence_request(self.system_memory_fence as u32);
        walker.set_post_sync_mocs(self.mocs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{WalkerCommand, Xe3p, XeHp, XeHpc};

    #[test]
    fn test_no_signal() {
        let hw = HardwareInfo::xe_hp();
        let post_sync = PostSync::resolve(None, &hw, &XeHp);
        assert_eq!(post_sync, PostSync::default());

        let mut walker = WalkerCommand::new(false);
        post_sync.program(walker.fields_mut(), 0);
        assert_eq!(walker, WalkerCommand::new(false));
    }

    #[test]
    fn test_counter() {
        let hw = HardwareInfo::xe_hpc();
        let signal = CompletionSignal::in_order_counter(0x1000, 7).flush_l3(true);
        let post_sync = PostSync::resolve(Some(&signal), &hw, &XeHpc);
        assert_eq!(post_sync.operation, PostSyncOperation::WriteImmediateData);
        assert_eq!(post_sync.immediate_data, 7);
        assert!(post_sync.l3_flush);
        assert!(!post_sync.system_memory_fence);

        let mut walker = WalkerCommand::new(false);
        post_sync.program(walker.fields_mut(), 16);
        let fields = walker.fields();
        assert_eq!(fields.post_sync_operation(), 1);
        assert_eq!(fields.post_sync_destination_address(), 0x1010);
        assert_eq!(fields.post_sync_immediate_data(), 7);
        assert_eq!(fields.post_sync_dataport_pipeline_flush(), 1);
        assert_eq!(fields.post_sync_mocs(), XeHpc.mocs(CacheUsage::PostSync));
    }

    #[test]
    fn test_fence() {
        let signal = CompletionSignal::event(0x2000)
            .host_visible(true)
            .host_signal(true);

        let hw = HardwareInfo::xe_hpc();
        assert!(PostSync::resolve(Some(&signal), &hw, &XeHpc).system_memory_fence);
        let hw = HardwareInfo::xe_hp();
        assert!(!PostSync::resolve(Some(&signal), &hw, &XeHp).system_memory_fence);

        let mut hw = HardwareInfo::xe3p();
        assert!(PostSync::resolve(Some(&signal), &hw, &Xe3p).system_memory_fence);
        hw.integrated = true;
        assert!(!PostSync::resolve(Some(&signal), &hw, &Xe3p).system_memory_fence);

        let signal = signal.host_signal(false);
        let hw = HardwareInfo::xe_hpc();
        assert!(!PostSync::resolve(Some(&signal), &hw, &XeHpc).system_memory_fence);
    }

    #[test]
    fn test_timestamp() {
        let hw = HardwareInfo::xe_hp();
        let signal = CompletionSignal::timestamp(0x3040);
        let post_sync = PostSync::resolve(Some(&signal), &hw, &XeHp);
        assert_eq!(post_sync.operation, PostSyncOperation::WriteTimestamp);
    }

    #[test]
    #[should_panic(expected = "not 16-byte aligned")]
    fn test_misaligned_timestamp() {
        let hw = HardwareInfo::xe_hp();
        let signal = CompletionSignal::timestamp(0x3044);
        PostSync::resolve(Some(&signal), &hw, &XeHp);
    }
}
