//! Progress tracking for long-running tool stages.

use tracing::info;

/// Latest progress value reported by a tool, relative to a known total.
///
/// Logs one event each time progress crosses a 10% step.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    stage: &'static str,
    subject: String,
    total: f64,
    current: f64,
    last_step: Option<u32>,
}

impl ProgressTracker {
    pub fn new(stage: &'static str, subject: impl Into<String>, total: f64) -> Self {
        Self {
            stage,
            subject: subject.into(),
            total,
            current: 0.0,
            last_step: None,
        }
    }

    /// Record a new raw value (frame index, percentage, ...).
    pub fn update(&mut self, value: f64) {
        self.current = value;
        let Some(percent) = self.percent() else {
            return;
        };
        let step = (percent / 10.0).floor() as u32;
        if self.last_step.map_or(true, |last| step > last) {
            self.last_step = Some(step);
            info!(
                stage = self.stage,
                recording = %self.subject,
                percent = %format!("{:.1}", percent),
                "progress"
            );
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// `current / total` as a percentage clamped to 0..=100, `None` when the
    /// total is unknown.
    pub fn percent(&self) -> Option<f64> {
        if self.total <= 0.0 {
            return None;
        }
        Some((self.current / self.total * 100.0).clamp(0.0, 100.0))
    }
}
