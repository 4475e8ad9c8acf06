use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Dynamic batching policy for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Batch sizes the assembler tries to hit before the delay window
    /// forces a smaller batch. Empty means "max_batch_size only".
    #[serde(default)]
    pub preferred_batch_sizes: Vec<usize>,

    /// How long the oldest queued request may wait before whatever is
    /// queued is flushed as an undersized batch.
    #[serde(default = "default_max_queue_delay_ms")]
    pub max_queue_delay_ms: u64,

    /// Hard cap on batch size.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_queue_delay_ms() -> u64 {
    100
}

fn default_max_batch_size() -> usize {
    8
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            preferred_batch_sizes: Vec::new(),
            max_queue_delay_ms: default_max_queue_delay_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl BatchingConfig {
    pub fn max_queue_delay(&self) -> Duration {
        Duration::from_millis(self.max_queue_delay_ms)
    }

    /// Preferred sizes, ascending and deduplicated; falls back to
    /// `[max_batch_size]` when none are configured.
    pub fn preferred_sizes(&self) -> Vec<usize> {
        if self.preferred_batch_sizes.is_empty() {
            return vec![self.max_batch_size];
        }
        let mut sizes = self.preferred_batch_sizes.clone();
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }
}

/// Per-model scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Number of executor instances; bounds how many batches run at once.
    #[serde(default = "default_instance_count")]
    pub instance_count: usize,

    /// Admission bound on pending requests; enqueues beyond it are rejected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_instance_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            batching: BatchingConfig::default(),
            instance_count: default_instance_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batching.max_batch_size == 0 {
            bail!("max_batch_size must be positive");
        }
        if self.instance_count == 0 {
            bail!("instance_count must be positive");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }
        for &size in &self.batching.preferred_batch_sizes {
            if size == 0 {
                bail!("preferred batch sizes must be positive");
            }
            if size > self.batching.max_batch_size {
                bail!(
                    "preferred batch size {} exceeds max_batch_size {}",
                    size,
                    self.batching.max_batch_size
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ModelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.batching.preferred_sizes(), vec![8]);
        assert_eq!(config.batching.max_queue_delay(), Duration::from_millis(100));
    }

    #[test]
    fn preferred_sizes_are_sorted_and_deduplicated() {
        let batching = BatchingConfig {
            preferred_batch_sizes: vec![8, 4, 8, 2],
            ..Default::default()
        };
        assert_eq!(batching.preferred_sizes(), vec![2, 4, 8]);
    }

    #[test]
    fn rejects_zero_and_oversized_preferred() {
        let mut config = ModelConfig::default();
        config.batching.preferred_batch_sizes = vec![0];
        assert!(config.validate().is_err());

        config.batching.preferred_batch_sizes = vec![16];
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_counts() {
        let mut config = ModelConfig::default();
        config.instance_count = 0;
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.batching.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ModelConfig::default();
        config.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_with_field_defaults() {
        let json = r#"
        {
            "batching": {
                "preferred_batch_sizes": [4, 8],
                "max_queue_delay_ms": 50
            },
            "instance_count": 2
        }
        "#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.batching.preferred_sizes(), vec![4, 8]);
        assert_eq!(config.batching.max_batch_size, 8);
        assert_eq!(config.instance_count, 2);
        assert_eq!(config.queue_capacity, 1024);
    }
}
