use crate::config::PipelineConfig;

/// Maps window completion onto job progress.
///
/// The first `base` percent belongs to validation and pre-processing, the
/// next `span` percent is spread evenly over the windows, and the rest is
/// left for finalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPlan {
    pub base: f64,
    pub span: f64,
}

impl Default for ProgressPlan {
    fn default() -> Self {
        Self {
            base: crate::defaults::PROGRESS_BASE,
            span: crate::defaults::PROGRESS_SPAN,
        }
    }
}

impl From<&PipelineConfig> for ProgressPlan {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            base: config.progress_base,
            span: config.progress_span,
        }
    }
}

impl ProgressPlan {
    /// Progress once `completed` of `total` windows are done.
    pub fn after_window(&self, completed: usize, total: usize) -> f64 {
        if total == 0 {
            return self.base + self.span;
        }
        let fraction = completed.min(total) as f64 / total as f64;
        self.base + self.span * fraction
    }
}
