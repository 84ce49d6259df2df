use exam_core::model::Lifecycle;

/// Aggregated view of attempt progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptProgress {
    pub current_index: usize,
    pub question_count: usize,
    pub answered: usize,
    pub remaining_secs: u32,
    pub lifecycle: Lifecycle,
}
