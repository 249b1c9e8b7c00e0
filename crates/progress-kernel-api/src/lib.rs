use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use progress_kernel_core::{
    AchievementRule, BadgeGrant, ConceptCompletion, LessonCompletion, ProgressEvent, RewardPolicy,
    StreakUpdate, UserProgress, DEFAULT_USER_ID,
};
use progress_kernel_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Knobs an embedding host can override before opening the tracker.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub user_id: String,
    pub rewards: RewardPolicy,
    pub rules: Vec<AchievementRule>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            rewards: RewardPolicy::default(),
            rules: progress_kernel_core::default_achievement_rules(),
        }
    }
}

/// What happened to the durable copy of the record after a mutation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    /// The mutated record reached the store.
    Saved,
    /// The in-memory mutation stuck but the write failed; already logged.
    Failed,
    /// Nothing changed, so nothing was written.
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompleteConceptResult {
    pub newly_completed: bool,
    pub points_awarded: u64,
    pub total_points: u64,
    pub persistence: PersistOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwardBadgeResult {
    pub newly_granted: bool,
    pub points_awarded: u64,
    pub total_points: u64,
    pub persistence: PersistOutcome,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompleteLessonResult {
    pub newly_completed: bool,
    pub persistence: PersistOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggeredAward {
    pub badge_id: String,
    pub award: AwardBadgeResult,
}

/// Owning facade over the progress ledger and its store.
///
/// One tracker instance is the canonical state for the embedding app: every
/// mutation goes through `&mut self` against the latest in-memory record, so
/// two completions in the same session can never overwrite each other.
/// Persistence is best effort; a failed write keeps the in-memory mutation
/// and reports [`PersistOutcome::Failed`] on the receipt.
pub struct ProgressTracker {
    db_path: PathBuf,
    store: SqliteStore,
    progress: UserProgress,
    config: TrackerConfig,
}

impl ProgressTracker {
    /// Open the tracker with default configuration.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or migrated.
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_config(db_path, TrackerConfig::default())
    }

    /// Open the store, load (or create) the progress record, and normalize
    /// the day-streak once before first use.
    ///
    /// A corrupt or missing stored record is not an error: the tracker
    /// starts from a fresh default and persists it best-effort.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or migrated.
    pub fn open_with_config(db_path: &Path, config: TrackerConfig) -> Result<Self> {
        let mut store = SqliteStore::open(db_path)
            .with_context(|| format!("failed to open progress store at {}", db_path.display()))?;
        store.migrate().context("failed to migrate progress store")?;

        let now = OffsetDateTime::now_utc();
        let (progress, freshly_created) =
            match store.load_progress().context("failed to load progress record")? {
                Some(progress) => (progress, false),
                None => (UserProgress::new(&config.user_id, now), true),
            };

        let mut tracker = Self { db_path: db_path.to_path_buf(), store, progress, config };
        let streak_changed = !matches!(
            progress_kernel_core::evaluate_streak(&mut tracker.progress, now.date()),
            StreakUpdate::AlreadyActiveToday | StreakUpdate::ClockSkewIgnored
        );
        if freshly_created || streak_changed {
            tracker.persist();
        }

        Ok(tracker)
    }

    fn persist(&mut self) -> PersistOutcome {
        match self.store.save_progress(&self.progress) {
            Ok(()) => PersistOutcome::Saved,
            Err(err) => {
                tracing::warn!(
                    "Failed to persist progress record to {}: {}",
                    self.db_path.display(),
                    err
                );
                PersistOutcome::Failed
            }
        }
    }

    /// Record a concept completion and persist the updated record.
    ///
    /// Re-completing a finished concept returns a receipt with
    /// `newly_completed = false` and writes nothing.
    ///
    /// # Errors
    /// Returns an error when either id is blank.
    pub fn complete_concept(
        &mut self,
        lesson_id: &str,
        concept_id: &str,
    ) -> Result<CompleteConceptResult> {
        let now = OffsetDateTime::now_utc();
        let outcome = progress_kernel_core::complete_concept(
            &mut self.progress,
            lesson_id,
            concept_id,
            self.config.rewards.concept_points,
            now,
        )?;

        Ok(match outcome {
            ConceptCompletion::Completed { points_awarded } => CompleteConceptResult {
                newly_completed: true,
                points_awarded,
                total_points: self.progress.points,
                persistence: self.persist(),
            },
            ConceptCompletion::AlreadyCompleted => CompleteConceptResult {
                newly_completed: false,
                points_awarded: 0,
                total_points: self.progress.points,
                persistence: PersistOutcome::Skipped,
            },
        })
    }

    /// Grant a badge plus its point bonus and persist the updated record.
    ///
    /// Granting a held badge returns a receipt with `newly_granted = false`
    /// and writes nothing.
    ///
    /// # Errors
    /// Returns an error when the badge id is blank.
    pub fn award_badge(&mut self, badge_id: &str) -> Result<AwardBadgeResult> {
        let outcome = progress_kernel_core::award_badge(
            &mut self.progress,
            badge_id,
            self.config.rewards.badge_points,
        )?;

        Ok(match outcome {
            BadgeGrant::Granted { points_awarded } => AwardBadgeResult {
                newly_granted: true,
                points_awarded,
                total_points: self.progress.points,
                persistence: self.persist(),
            },
            BadgeGrant::AlreadyHeld => AwardBadgeResult {
                newly_granted: false,
                points_awarded: 0,
                total_points: self.progress.points,
                persistence: PersistOutcome::Skipped,
            },
        })
    }

    /// Flag a lesson as finished and persist the updated record.
    ///
    /// # Errors
    /// Returns an error when the lesson id is blank.
    pub fn complete_lesson(&mut self, lesson_id: &str) -> Result<CompleteLessonResult> {
        let now = OffsetDateTime::now_utc();
        let outcome = progress_kernel_core::complete_lesson(&mut self.progress, lesson_id, now)?;

        Ok(match outcome {
            LessonCompletion::Completed => CompleteLessonResult {
                newly_completed: true,
                persistence: self.persist(),
            },
            LessonCompletion::AlreadyCompleted => CompleteLessonResult {
                newly_completed: false,
                persistence: PersistOutcome::Skipped,
            },
        })
    }

    /// Run the achievement rule table against one event and grant every hit.
    ///
    /// Matching is separate from granting: badges already held come back
    /// with `newly_granted = false`, so driving the same event twice stays
    /// harmless.
    ///
    /// # Errors
    /// Returns an error when a matched rule carries a blank badge id.
    pub fn award_triggered_badges(&mut self, event: &ProgressEvent) -> Result<Vec<TriggeredAward>> {
        let badge_ids: Vec<String> =
            progress_kernel_core::matching_badge_ids(&self.config.rules, event)
                .into_iter()
                .map(str::to_string)
                .collect();

        let mut awards = Vec::with_capacity(badge_ids.len());
        for badge_id in badge_ids {
            let award = self.award_badge(&badge_id)?;
            awards.push(TriggeredAward { badge_id, award });
        }
        Ok(awards)
    }

    /// Share of a lesson's concepts completed, as a whole percentage.
    ///
    /// # Errors
    /// Returns an error when `total_concepts` is zero.
    pub fn completion_percentage(&self, lesson_id: &str, total_concepts: u32) -> Result<u8> {
        Ok(progress_kernel_core::completion_percentage(
            &self.progress,
            lesson_id,
            total_concepts,
        )?)
    }

    #[must_use]
    pub fn is_concept_completed(&self, lesson_id: &str, concept_id: &str) -> bool {
        progress_kernel_core::is_concept_completed(&self.progress, lesson_id, concept_id)
    }

    #[must_use]
    pub fn points(&self) -> u64 {
        self.progress.points
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.progress.streak
    }

    #[must_use]
    pub fn badges(&self) -> &[String] {
        &self.progress.badges
    }

    /// The canonical in-memory snapshot every UI surface should read from.
    #[must_use]
    pub fn progress(&self) -> &UserProgress {
        &self.progress
    }
}
