//! Budgeted selection of batch candidates.

use core_runtime::config::{OversizedPolicy, PipelineConfig, SelectionMode};

/// Budget a batch is filled against. Zero means "unbounded".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_bytes: u64,
    pub max_files: u64,
    pub oversized: OversizedPolicy,
}

impl SelectionLimits {
    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_files: 0,
            oversized: OversizedPolicy::Skip,
        }
    }

    pub fn files(max_files: u64) -> Self {
        Self {
            max_bytes: 0,
            max_files,
            oversized: OversizedPolicy::Skip,
        }
    }

    /// Only the budget matching the configured selection mode applies.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let batch = &config.batch;
        match batch.selection_mode {
            SelectionMode::Size => Self {
                max_bytes: batch.max_size_bytes(),
                max_files: 0,
                oversized: batch.oversized_policy,
            },
            SelectionMode::Count => Self {
                max_bytes: 0,
                max_files: batch.max_files,
                oversized: batch.oversized_policy,
            },
        }
    }
}

/// Indices chosen by [`select_within_limits`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub selected: Vec<usize>,
    /// Files larger than the whole byte budget that were left out
    pub oversized: Vec<usize>,
}

/// Walk `sizes` in order and pick what fits the budget.
///
/// Selection stops at the first file that would overflow the byte budget
/// once something is selected. Before that, a file larger than the whole
/// budget is skipped, or shipped alone under [`OversizedPolicy::Isolate`].
pub fn select_within_limits(sizes: &[u64], limits: SelectionLimits) -> Selection {
    let mut selection = Selection::default();
    let mut running: u64 = 0;

    for (index, &size) in sizes.iter().enumerate() {
        if limits.max_files > 0 && selection.selected.len() as u64 >= limits.max_files {
            break;
        }

        if limits.max_bytes > 0 && running.saturating_add(size) > limits.max_bytes {
            if !selection.selected.is_empty() {
                break;
            }
            if size > limits.max_bytes {
                match limits.oversized {
                    OversizedPolicy::Skip => {
                        selection.oversized.push(index);
                        continue;
                    }
                    OversizedPolicy::Isolate => {
                        selection.selected.push(index);
                        break;
                    }
                }
            }
        }

        selection.selected.push(index);
        running = running.saturating_add(size);
    }

    selection
}
