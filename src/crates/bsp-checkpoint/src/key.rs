//! Checkpoint addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one partition snapshot: `(job, superstep, partition)`.
///
/// Keys order by job, then superstep, then partition, so a sorted listing
/// walks a job's history oldest-first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointKey {
    /// Job namespace
    pub job_id: String,
    /// Superstep the snapshot resumes at
    pub superstep: u64,
    /// Partition index within the job
    pub partition: u32,
}

impl CheckpointKey {
    pub fn new(job_id: impl Into<String>, superstep: u64, partition: u32) -> Self {
        Self {
            job_id: job_id.into(),
            superstep,
            partition,
        }
    }

    /// Relative storage path, e.g. `job-1/superstep-0000000004/partition-00002`.
    ///
    /// Zero padding keeps lexical and numeric order identical.
    pub fn relative_path(&self) -> String {
        format!(
            "{}/superstep-{:010}/partition-{:05}",
            self.job_id, self.superstep, self.partition
        )
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}#{}",
            self.job_id, self.superstep, self.partition
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_is_zero_padded() {
        let key = CheckpointKey::new("job-1", 4, 2);
        assert_eq!(key.relative_path(), "job-1/superstep-0000000004/partition-00002");
    }

    #[test]
    fn test_key_ordering_by_superstep_then_partition() {
        let mut keys = vec![
            CheckpointKey::new("j", 10, 0),
            CheckpointKey::new("j", 2, 1),
            CheckpointKey::new("j", 2, 0),
        ];
        keys.sort();
        assert_eq!(keys[0], CheckpointKey::new("j", 2, 0));
        assert_eq!(keys[1], CheckpointKey::new("j", 2, 1));
        assert_eq!(keys[2], CheckpointKey::new("j", 10, 0));
    }

    #[test]
    fn test_display() {
        assert_eq!(CheckpointKey::new("pr", 3, 1).to_string(), "pr@3#1");
    }
}
