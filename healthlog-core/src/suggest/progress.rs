//! Generation progress, overall and per category.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    Pending,
    Generating,
    Success,
    Error,
}

impl CategoryStatus {
    fn rank(self) -> u8 {
        match self {
            CategoryStatus::Pending => 0,
            CategoryStatus::Generating => 1,
            CategoryStatus::Success | CategoryStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryStatus::Pending => "pending",
            CategoryStatus::Generating => "generating",
            CategoryStatus::Success => "success",
            CategoryStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryState {
    pub status: CategoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    #[default]
    Idle,
    Loading,
    Partial,
    Success,
    Error,
}

/// Progress of one generation run.
///
/// Categories keep the order they were first seen in. A category only moves
/// forward: pending, then generating, then success or error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationProgress {
    pub status: GenerationStatus,
    pub message: Option<String>,
    pub categories: Vec<(String, CategoryState)>,
}

impl GenerationProgress {
    /// A fresh run with every requested category pending.
    pub fn start(categories: &[String]) -> Self {
        Self {
            status: GenerationStatus::Loading,
            message: Some("Preparing data…".to_string()),
            categories: categories
                .iter()
                .map(|key| {
                    (
                        key.clone(),
                        CategoryState {
                            status: CategoryStatus::Pending,
                            message: None,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn category(&self, key: &str) -> Option<&CategoryState> {
        self.categories
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, state)| state)
    }

    /// Move `key` to `status`. Returns false (and changes nothing) if that
    /// would move the category backwards or out of a terminal state.
    pub fn set_category(&mut self, key: &str, status: CategoryStatus, message: Option<String>) -> bool {
        match self.categories.iter_mut().find(|(k, _)| k == key) {
            Some((_, state)) => {
                if status.rank() < state.status.rank()
                    || (state.status.is_terminal() && status != state.status)
                {
                    tracing::debug!(
                        category = key,
                        from = state.status.as_str(),
                        to = status.as_str(),
                        "Ignoring category regression"
                    );
                    return false;
                }
                state.status = status;
                state.message = message;
            }
            None => self
                .categories
                .push((key.to_string(), CategoryState { status, message })),
        }
        true
    }

    pub fn mark_loading(&mut self, message: String) {
        if !self.is_finished() {
            self.status = GenerationStatus::Loading;
            self.message = Some(message);
        }
    }

    pub fn mark_partial(&mut self, message: String) {
        if !self.is_finished() {
            self.status = GenerationStatus::Partial;
            self.message = Some(message);
        }
    }

    /// Finish successfully; unfinished categories count as done.
    pub fn finish_success(&mut self, message: String) {
        self.status = GenerationStatus::Success;
        self.message = Some(message);
        for (_, state) in self.categories.iter_mut() {
            if !state.status.is_terminal() {
                state.status = CategoryStatus::Success;
            }
        }
    }

    /// Fail the run; unfinished categories fail with it.
    pub fn fail(&mut self, message: String) {
        for (_, state) in self.categories.iter_mut() {
            if !state.status.is_terminal() {
                state.status = CategoryStatus::Error;
                state.message = Some(message.clone());
            }
        }
        self.status = GenerationStatus::Error;
        self.message = Some(message);
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            GenerationStatus::Success | GenerationStatus::Error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> Vec<String> {
        vec!["nutrition".to_string(), "exercise".to_string()]
    }

    #[test]
    fn test_categories_never_regress() {
        let mut progress = GenerationProgress::start(&categories());
        assert!(progress.set_category("nutrition", CategoryStatus::Generating, None));
        assert!(progress.set_category("nutrition", CategoryStatus::Success, None));

        assert!(!progress.set_category("nutrition", CategoryStatus::Generating, None));
        assert!(!progress.set_category("nutrition", CategoryStatus::Pending, None));
        assert!(!progress.set_category("nutrition", CategoryStatus::Error, None));
        assert_eq!(
            progress.category("nutrition").unwrap().status,
            CategoryStatus::Success
        );

        // Skipping generating is allowed
        assert!(progress.set_category("exercise", CategoryStatus::Error, Some("boom".into())));
        assert_eq!(
            progress.category("exercise").unwrap().message.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_unknown_category_appended_in_order() {
        let mut progress = GenerationProgress::start(&categories());
        progress.set_category("wellness", CategoryStatus::Generating, None);
        let keys: Vec<&str> = progress.categories.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["nutrition", "exercise", "wellness"]);
    }

    #[test]
    fn test_fail_moves_unfinished_categories_to_error() {
        let mut progress = GenerationProgress::start(&categories());
        progress.set_category("nutrition", CategoryStatus::Success, None);
        progress.set_category("exercise", CategoryStatus::Generating, None);

        progress.fail("stalled".to_string());
        assert_eq!(progress.status, GenerationStatus::Error);
        assert_eq!(
            progress.category("nutrition").unwrap().status,
            CategoryStatus::Success
        );
        assert_eq!(
            progress.category("exercise").unwrap().status,
            CategoryStatus::Error
        );

        // Finished runs ignore late partials
        progress.mark_partial("late".to_string());
        assert_eq!(progress.status, GenerationStatus::Error);
    }

    #[test]
    fn test_finish_success() {
        let mut progress = GenerationProgress::start(&categories());
        progress.set_category("exercise", CategoryStatus::Error, None);
        progress.finish_success("done".to_string());
        assert_eq!(
            progress.category("nutrition").unwrap().status,
            CategoryStatus::Success
        );
        assert_eq!(
            progress.category("exercise").unwrap().status,
            CategoryStatus::Error
        );
    }
}
