//! Output budgeting
//!
//! Trims tool output to a per-tool budget. Size is counted by an
//! [`OutputMeasure`] (characters by default) so token-accurate counting can
//! be plugged in without touching the runtime.
//!
//! Trimmed output ends with [`TRUNCATION_MARKER`] and, marker included, never
//! measures more than the budget. Applying the same budget twice is a no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Marker appended to trimmed output
pub const TRUNCATION_MARKER: &str = "\n…[output truncated]";

/// Counts the size of a piece of output
pub trait OutputMeasure: Send + Sync {
    /// Size of `text` in this measure's unit
    fn measure(&self, text: &str) -> usize;

    /// Byte length of the longest prefix of `text` measuring at most `limit`
    ///
    /// The returned index always lies on a char boundary. The default
    /// implementation binary-searches char boundaries and assumes the
    /// measure never shrinks as a prefix grows.
    fn prefix_within(&self, text: &str, limit: usize) -> usize {
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        let (mut lo, mut hi) = (0usize, boundaries.len() - 1);
        while lo < hi {
            let mid = lo + (hi - lo).div_ceil(2);
            if self.measure(&text[..boundaries[mid]]) <= limit {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }
        boundaries[lo]
    }
}

/// Counts Unicode scalar values
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCount;

impl OutputMeasure for CharCount {
    fn measure(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn prefix_within(&self, text: &str, limit: usize) -> usize {
        text.char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    }
}

/// Counts UTF-8 bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteCount;

impl OutputMeasure for ByteCount {
    fn measure(&self, text: &str) -> usize {
        text.len()
    }

    fn prefix_within(&self, text: &str, limit: usize) -> usize {
        if limit >= text.len() {
            return text.len();
        }
        let mut end = limit;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        end
    }
}

impl<F> OutputMeasure for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn measure(&self, text: &str) -> usize {
        self(text)
    }
}

/// Built-in measurement units selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    /// Unicode characters
    #[default]
    Chars,
    /// UTF-8 bytes
    Bytes,
}

impl BudgetUnit {
    /// Measure implementing this unit
    pub fn measure(&self) -> Arc<dyn OutputMeasure> {
        match self {
            BudgetUnit::Chars => Arc::new(CharCount),
            BudgetUnit::Bytes => Arc::new(ByteCount),
        }
    }
}

/// Result of applying a budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetOutcome {
    /// Output after budgeting
    pub output: String,
    /// Whether the output was trimmed
    pub trimmed: bool,
    /// Size of the output before budgeting
    pub original_size: usize,
}

/// Budget enforcer with a configurable marker and measure
#[derive(Clone)]
pub struct OutputBudget {
    marker: String,
    measure: Arc<dyn OutputMeasure>,
}

impl Default for OutputBudget {
    fn default() -> Self {
        Self {
            marker: TRUNCATION_MARKER.to_string(),
            measure: Arc::new(CharCount),
        }
    }
}

impl fmt::Debug for OutputBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBudget")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl OutputBudget {
    /// Create an enforcer counting characters with the default marker
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the truncation marker
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Builder: set the counting function
    pub fn with_measure(mut self, measure: Arc<dyn OutputMeasure>) -> Self {
        self.measure = measure;
        self
    }

    /// The truncation marker in use
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Size of `text` under this enforcer's measure
    pub fn measure(&self, text: &str) -> usize {
        self.measure.measure(text)
    }

    /// Fit `output` into `budget` units
    pub fn apply(&self, output: &str, budget: usize) -> BudgetOutcome {
        let original_size = self.measure.measure(output);
        if original_size <= budget {
            return BudgetOutcome {
                output: output.to_string(),
                trimmed: false,
                original_size,
            };
        }

        BudgetOutcome {
            output: self.trim(output, budget),
            trimmed: true,
            original_size,
        }
    }

    fn trim(&self, output: &str, budget: usize) -> String {
        let marker_size = self.measure.measure(&self.marker);
        if marker_size < budget {
            let mut room = budget - marker_size;
            loop {
                let end = self.measure.prefix_within(output, room);
                let mut candidate = String::with_capacity(end + self.marker.len());
                candidate.push_str(&output[..end]);
                candidate.push_str(&self.marker);

                // Non-additive measures can overshoot once the marker is attached
                let size = self.measure.measure(&candidate);
                if size <= budget {
                    return candidate;
                }
                if room == 0 {
                    break;
                }
                room = room.saturating_sub(size - budget).min(room - 1);
            }
        }

        // Marker alone does not fit: keep as much of it as the budget allows
        let end = self.measure.prefix_within(&self.marker, budget);
        self.marker[..end].to_string()
    }
}

/// Fit `output` into `budget` characters using the default marker
pub fn apply_budget(output: &str, budget: usize) -> BudgetOutcome {
    OutputBudget::default().apply(output, budget)
}
