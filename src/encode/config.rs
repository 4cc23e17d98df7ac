#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::partition::PartitionType;

/// Diagnostic and tuning overrides of the encoder.
///
/// Owned by a [`DispatchEncoder`](super::DispatchEncoder) and consulted explicitly by every step
/// that branches on it; there is no ambient global state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct EncoderConfiguration {
    /// Replaces the encoded SLM size of every dispatch.
    pub override_slm_size: Option<u32>,
    /// Forces the number of thread groups dispatched to a subslice at once (1, 2, 4 or 8).
    pub force_thread_group_dispatch_size: Option<u32>,
    /// Forces dispatch-all mode on or off, where the profile supports it.
    pub force_compute_dispatch_all: Option<bool>,
    pub disable_walker_partitioning: bool,
    pub force_morton_walk_order: bool,
    /// Forces hardware (`true`) or runtime (`false`) local id generation.
    pub hw_local_id_generation: Option<bool>,
    /// Forces the axis a partitioned dispatch is split along.
    pub walker_partition_type: Option<PartitionType>,
    /// Prefers splitting the largest axis over an evenly divisible one.
    pub prefer_highest_dimension: Option<bool>,
    /// Minimal thread groups per partition under dynamic partitioning; zero disables the check.
    pub minimal_partition_size: u32,
    /// Lets all tiles meet at a barrier before any of them starts its partition.
    pub synchronize_before_execution: bool,
    /// Resets the cross-tile counters at the end so the sequence can be replayed.
    pub emit_self_cleanup: bool,
    /// Uses atomic moves instead of plain stores to reset the counters.
    pub use_atomics_for_self_cleanup: bool,
    /// Lets all tiles meet at a barrier after their partitions.
    pub cross_tile_atomic_synchronization: bool,
    /// Waits on every partition's post-sync write before the cross-tile barrier.
    pub semaphore_programming_required: bool,
    pub emit_pipe_control_stall: bool,
    /// Never passes cross-thread data inline.
    pub disable_inline_data: bool,
}

impl Default for EncoderConfiguration {
    fn default() -> Self {
        Self {
            override_slm_size: None,
            force_thread_group_dispatch_size: None,
            force_compute_dispatch_all: None,
            disable_walker_partitioning: false,
            force_morton_walk_order: false,
            hw_local_id_generation: None,
            walker_partition_type: None,
            prefer_highest_dimension: None,
            minimal_partition_size: 512,
            synchronize_before_execution: false,
            emit_self_cleanup: true,
            use_atomics_for_self_cleanup: false,
            cross_tile_atomic_synchronization: true,
            semaphore_programming_required: false,
            emit_pipe_control_stall: true,
            disable_inline_data: false,
        }
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::EncoderConfiguration;
    use crate::encode::partition::PartitionType;

    #[test]
    fn test_partial_override() -> Result<(), serde_json::Error> {
        let json = r#"{ "override_slm_size": 3, "walker_partition_type": "Y", "emit_self_cleanup": false }"#;
        let config: EncoderConfiguration = serde_json::from_str(json)?;
        assert_eq!(config.override_slm_size, Some(3));
        assert_eq!(config.walker_partition_type, Some(PartitionType::Y));
        assert!(!config.emit_self_cleanup);
        assert_eq!(config.minimal_partition_size, 512);

        let back: EncoderConfiguration = serde_json::from_str(&serde_json::to_string(&config)?)?;
        assert_eq!(back, config);
        Ok(())
    }
}
