use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};

pub mod highlight;

/// Identity of the single local profile.
pub const DEFAULT_USER_ID: &str = "local-user";

/// Points granted for a first-time concept completion.
pub const CONCEPT_COMPLETION_POINTS: u64 = 5;

/// Points granted alongside a newly earned badge.
pub const BADGE_BONUS_POINTS: u64 = 25;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ProgressError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConceptRecord {
    pub id: String,
    pub completed: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LessonRecord {
    pub id: String,
    #[serde(default)]
    pub concepts_completed: Vec<String>,
    pub completed: bool,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_visited: OffsetDateTime,
}

/// The one durable record behind every progress surface in the UI.
///
/// Serialized field names are the stored wire format; renaming one is a
/// storage migration, not a refactor.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: String,
    pub points: u64,
    pub streak: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active: OffsetDateTime,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default)]
    pub lessons_progress: BTreeMap<String, LessonRecord>,
    #[serde(default)]
    pub concepts_progress: BTreeMap<String, ConceptRecord>,
}

impl UserProgress {
    #[must_use]
    pub fn new(user_id: &str, now: OffsetDateTime) -> Self {
        Self {
            user_id: user_id.to_string(),
            points: 0,
            streak: 0,
            last_active: now,
            badges: Vec::new(),
            lessons_progress: BTreeMap::new(),
            concepts_progress: BTreeMap::new(),
        }
    }
}

/// Composite key identifying one concept within one lesson.
#[must_use]
pub fn concept_key(lesson_id: &str, concept_id: &str) -> String {
    format!("{lesson_id}-{concept_id}")
}

/// Point values applied by the ledger operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct RewardPolicy {
    pub concept_points: u64,
    pub badge_points: u64,
}

impl Default for RewardPolicy {
    fn default() -> Self {
        Self { concept_points: CONCEPT_COMPLETION_POINTS, badge_points: BADGE_BONUS_POINTS }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConceptCompletion {
    Completed { points_awarded: u64 },
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BadgeGrant {
    Granted { points_awarded: u64 },
    AlreadyHeld,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LessonCompletion {
    Completed,
    AlreadyCompleted,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StreakUpdate {
    AlreadyActiveToday,
    Extended { streak: u32 },
    Reset,
    ClockSkewIgnored,
}

fn require_id(value: &str, field: &str) -> Result<(), ProgressError> {
    if value.trim().is_empty() {
        return Err(ProgressError::Validation(format!("{field} MUST be non-empty")));
    }
    Ok(())
}

/// Record a first-time completion of one concept inside a lesson.
///
/// Re-completing a finished concept is a full no-op: the record is left
/// untouched, no points move, and the caller can skip persistence.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when either id is blank; the record
/// is untouched on error.
pub fn complete_concept(
    progress: &mut UserProgress,
    lesson_id: &str,
    concept_id: &str,
    reward: u64,
    now: OffsetDateTime,
) -> Result<ConceptCompletion, ProgressError> {
    require_id(lesson_id, "lesson_id")?;
    require_id(concept_id, "concept_id")?;

    let key = concept_key(lesson_id, concept_id);
    if progress.concepts_progress.get(&key).is_some_and(|concept| concept.completed) {
        return Ok(ConceptCompletion::AlreadyCompleted);
    }

    progress.concepts_progress.insert(
        key.clone(),
        ConceptRecord { id: key.clone(), completed: true, completed_at: Some(now) },
    );

    let lesson =
        progress.lessons_progress.entry(lesson_id.to_string()).or_insert_with(|| LessonRecord {
            id: lesson_id.to_string(),
            concepts_completed: Vec::new(),
            completed: false,
            completed_at: None,
            last_visited: now,
        });

    // Points ride on the list append, not the concept record, so the two
    // collections disagreeing can never pay twice.
    let points_awarded = if lesson.concepts_completed.contains(&key) {
        0
    } else {
        lesson.concepts_completed.push(key);
        reward
    };
    lesson.last_visited = now;

    progress.points += points_awarded;
    progress.last_active = now;

    Ok(ConceptCompletion::Completed { points_awarded })
}

/// Grant a badge together with its point bonus.
///
/// Granting a badge the user already holds is a full no-op.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the badge id is blank.
pub fn award_badge(
    progress: &mut UserProgress,
    badge_id: &str,
    bonus: u64,
) -> Result<BadgeGrant, ProgressError> {
    require_id(badge_id, "badge_id")?;

    if progress.badges.iter().any(|held| held == badge_id) {
        return Ok(BadgeGrant::AlreadyHeld);
    }

    progress.badges.push(badge_id.to_string());
    progress.points += bonus;
    Ok(BadgeGrant::Granted { points_awarded: bonus })
}

/// Flag a lesson as finished.
///
/// Counts as learner activity: `last_active` moves to `now`. Carries no
/// points: concept completions and badge bonuses are the only point
/// sources. Re-completing keeps the original `completed_at`.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when the lesson id is blank.
pub fn complete_lesson(
    progress: &mut UserProgress,
    lesson_id: &str,
    now: OffsetDateTime,
) -> Result<LessonCompletion, ProgressError> {
    require_id(lesson_id, "lesson_id")?;

    let lesson =
        progress.lessons_progress.entry(lesson_id.to_string()).or_insert_with(|| LessonRecord {
            id: lesson_id.to_string(),
            concepts_completed: Vec::new(),
            completed: false,
            completed_at: None,
            last_visited: now,
        });
    if lesson.completed {
        return Ok(LessonCompletion::AlreadyCompleted);
    }

    lesson.completed = true;
    lesson.completed_at = Some(now);
    lesson.last_visited = now;
    progress.last_active = now;
    Ok(LessonCompletion::Completed)
}

/// Normalize the day-streak against the calendar.
///
/// Invoked once per load, never per operation. Day granularity is the UTC
/// calendar date. A stored `last_active` later than `today` is treated like
/// same-day activity: no streak change, record untouched.
pub fn evaluate_streak(progress: &mut UserProgress, today: Date) -> StreakUpdate {
    let last_day = progress.last_active.to_offset(UtcOffset::UTC).date();
    if last_day == today {
        return StreakUpdate::AlreadyActiveToday;
    }
    if last_day > today {
        return StreakUpdate::ClockSkewIgnored;
    }

    let gap_days = (today - last_day).whole_days();
    progress.last_active = today.midnight().assume_utc();
    if gap_days == 1 {
        progress.streak += 1;
        StreakUpdate::Extended { streak: progress.streak }
    } else {
        progress.streak = 0;
        StreakUpdate::Reset
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Achievement {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: String,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum AchievementTrigger {
    ConceptCompleted { lesson_id: String, concept_id: String },
    LessonCompleted { lesson_id: String },
    StreakAtLeast { days: u32 },
    PointsAtLeast { points: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AchievementRule {
    pub badge_id: String,
    pub trigger: AchievementTrigger,
}

/// One thing that just happened in the ledger, as seen by the rule table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ProgressEvent {
    ConceptCompleted { lesson_id: String, concept_id: String },
    LessonCompleted { lesson_id: String },
    StreakReached { days: u32 },
    PointsReached { points: u64 },
}

/// Badge metadata shown by the UI; ledger state never depends on it.
#[must_use]
pub fn achievement_catalog() -> Vec<Achievement> {
    vec![
        Achievement {
            id: "first-lesson-complete".to_string(),
            name: "First Steps".to_string(),
            description: "Completed the first concept of the introductory lesson".to_string(),
            icon: "star".to_string(),
            color: "gold".to_string(),
        },
        Achievement {
            id: "intro-graduate".to_string(),
            name: "Intro Graduate".to_string(),
            description: "Finished the introductory lesson".to_string(),
            icon: "medal".to_string(),
            color: "emerald".to_string(),
        },
        Achievement {
            id: "three-day-streak".to_string(),
            name: "Warming Up".to_string(),
            description: "Learned on three days in a row".to_string(),
            icon: "flame".to_string(),
            color: "ember".to_string(),
        },
        Achievement {
            id: "seven-day-streak".to_string(),
            name: "Full Week".to_string(),
            description: "Learned on seven days in a row".to_string(),
            icon: "flame".to_string(),
            color: "crimson".to_string(),
        },
        Achievement {
            id: "century-club".to_string(),
            name: "Century Club".to_string(),
            description: "Collected one hundred points".to_string(),
            icon: "trophy".to_string(),
            color: "violet".to_string(),
        },
    ]
}

#[must_use]
pub fn find_achievement(id: &str) -> Option<Achievement> {
    achievement_catalog().into_iter().find(|achievement| achievement.id == id)
}

/// Default condition-to-badge table.
///
/// Threshold triggers use at-least comparisons: points move in +5/+25 steps
/// and can jump past an exact value.
#[must_use]
pub fn default_achievement_rules() -> Vec<AchievementRule> {
    vec![
        AchievementRule {
            badge_id: "first-lesson-complete".to_string(),
            trigger: AchievementTrigger::ConceptCompleted {
                lesson_id: "intro-to-programming".to_string(),
                concept_id: "1".to_string(),
            },
        },
        AchievementRule {
            badge_id: "intro-graduate".to_string(),
            trigger: AchievementTrigger::LessonCompleted {
                lesson_id: "intro-to-programming".to_string(),
            },
        },
        AchievementRule {
            badge_id: "three-day-streak".to_string(),
            trigger: AchievementTrigger::StreakAtLeast { days: 3 },
        },
        AchievementRule {
            badge_id: "seven-day-streak".to_string(),
            trigger: AchievementTrigger::StreakAtLeast { days: 7 },
        },
        AchievementRule {
            badge_id: "century-club".to_string(),
            trigger: AchievementTrigger::PointsAtLeast { points: 100 },
        },
    ]
}

fn trigger_matches(trigger: &AchievementTrigger, event: &ProgressEvent) -> bool {
    match (trigger, event) {
        (
            AchievementTrigger::ConceptCompleted { lesson_id, concept_id },
            ProgressEvent::ConceptCompleted {
                lesson_id: event_lesson,
                concept_id: event_concept,
            },
        ) => lesson_id == event_lesson && concept_id == event_concept,
        (
            AchievementTrigger::LessonCompleted { lesson_id },
            ProgressEvent::LessonCompleted { lesson_id: event_lesson },
        ) => lesson_id == event_lesson,
        (
            AchievementTrigger::StreakAtLeast { days },
            ProgressEvent::StreakReached { days: reached },
        ) => reached >= days,
        (
            AchievementTrigger::PointsAtLeast { points },
            ProgressEvent::PointsReached { points: reached },
        ) => reached >= points,
        _ => false,
    }
}

/// Resolve which badges an event triggers, in rule-table order.
///
/// Matching never grants anything; [`award_badge`] is the only granting
/// primitive and already refuses duplicates.
#[must_use]
pub fn matching_badge_ids<'a>(rules: &'a [AchievementRule], event: &ProgressEvent) -> Vec<&'a str> {
    rules
        .iter()
        .filter(|rule| trigger_matches(&rule.trigger, event))
        .map(|rule| rule.badge_id.as_str())
        .collect()
}

/// Share of a lesson's concepts completed, as a whole percentage.
///
/// Unknown lessons report zero. Rounds half up, and clamps at 100 when the
/// caller's `total_concepts` undercounts what the ledger recorded.
///
/// # Errors
/// Returns [`ProgressError::Validation`] when `total_concepts` is zero.
pub fn completion_percentage(
    progress: &UserProgress,
    lesson_id: &str,
    total_concepts: u32,
) -> Result<u8, ProgressError> {
    if total_concepts == 0 {
        return Err(ProgressError::Validation(
            "total_concepts MUST be >= 1 to compute a percentage".to_string(),
        ));
    }

    let Some(lesson) = progress.lessons_progress.get(lesson_id) else {
        return Ok(0);
    };

    let total = u64::from(total_concepts);
    let completed = u64::try_from(lesson.concepts_completed.len()).unwrap_or(u64::MAX).min(total);
    let percentage = (200 * completed + total) / (2 * total);
    Ok(u8::try_from(percentage).unwrap_or(100))
}

#[must_use]
pub fn is_concept_completed(progress: &UserProgress, lesson_id: &str, concept_id: &str) -> bool {
    progress
        .concepts_progress
        .get(&concept_key(lesson_id, concept_id))
        .is_some_and(|concept| concept.completed)
}
