use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

// Type aliases for clarity
pub type ClassId = u32;
pub type InstructorId = u32;
pub type RoomId = u32;
pub type EntryId = u32;
pub type StudioId = u32;

/// Every day a studio can run classes, Monday first.
pub const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Minutes elapsed since midnight.
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight() / 60
}

/// Inverse of [`minute_of_day`]; `None` past the end of the day.
pub fn time_from_minutes(minutes: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Result<NaiveTime, ValidationError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ValidationError::InvalidTime(raw.to_string()))
}

/// A weekly-recurring window: one day of the week, start inclusive, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(day: Weekday, start: NaiveTime, end: NaiveTime) -> Result<Self, ValidationError> {
        if start >= end {
            return Err(ValidationError::EmptyWindow { start, end });
        }
        Ok(Self { day, start, end })
    }

    /// Convenience constructor from `HH:MM` strings.
    pub fn parse(day: Weekday, start: &str, end: &str) -> Result<Self, ValidationError> {
        Self::new(day, parse_time(start)?, parse_time(end)?)
    }

    pub fn duration_minutes(&self) -> u32 {
        minute_of_day(self.end).saturating_sub(minute_of_day(self.start))
    }

    /// True when both slots are on the same day and share at least one minute.
    /// Back-to-back slots do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }

    /// True when `other` lies entirely within this window.
    pub fn contains(&self, other: &TimeSlot) -> bool {
        self.day == other.day && self.start <= other.start && other.end <= self.end
    }

    /// Idle minutes between two non-overlapping slots on the same day.
    pub fn gap_minutes(&self, other: &TimeSlot) -> Option<u32> {
        if self.day != other.day || self.overlaps(other) {
            return None;
        }
        let gap = if self.end <= other.start {
            minute_of_day(other.start) - minute_of_day(self.end)
        } else {
            minute_of_day(self.start) - minute_of_day(other.end)
        };
        Some(gap)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.day,
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Someone who leads classes, and the weekly windows they can work in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instructor {
    pub id: InstructorId,
    pub name: String,
    pub specialties: Vec<String>,
    pub availability: Vec<TimeSlot>,
    pub max_hours_per_week: u32,
    pub min_break_minutes: u32,
}

impl Instructor {
    pub fn new(id: InstructorId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            specialties: Vec::new(),
            availability: Vec::new(),
            max_hours_per_week: 40,
            min_break_minutes: 15,
        }
    }

    pub fn with_specialties<I, S>(mut self, specialties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specialties = specialties.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_availability(mut self, slot: TimeSlot) -> Self {
        self.availability.push(slot);
        self
    }

    pub fn with_max_hours(mut self, hours: u32) -> Self {
        self.max_hours_per_week = hours;
        self
    }

    /// Case-insensitive specialty match.
    pub fn can_teach(&self, style: &str) -> bool {
        let style = style.trim();
        self.specialties
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(style))
    }

    /// True when the slot falls entirely within one availability window.
    pub fn is_available(&self, slot: &TimeSlot) -> bool {
        self.availability.iter().any(|window| window.contains(slot))
    }
}

/// A physical space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    pub features: Vec<String>,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>, capacity: u32) -> Self {
        Self {
            id,
            name: name.into(),
            capacity,
            features: Vec::new(),
        }
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_features(&self, required: &[String]) -> bool {
        required.iter().all(|f| self.features.contains(f))
    }

    pub fn fits(&self, min_capacity: u32) -> bool {
        self.capacity >= min_capacity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
    AllLevels,
}

impl Level {
    pub fn is_beginner(self) -> bool {
        self == Level::Beginner
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::Beginner => "beginner",
            Level::Intermediate => "intermediate",
            Level::Advanced => "advanced",
            Level::AllLevels => "all_levels",
        };
        f.write_str(label)
    }
}

/// A class waiting to be placed in the weekly timetable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDefinition {
    pub id: ClassId,
    pub name: String,
    pub dance_style: String,
    pub level: Level,
    pub duration_minutes: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub required_features: Vec<String>,
    pub preferred_times: Vec<TimeSlot>,
    pub frequency_per_week: u32,
}

impl ClassDefinition {
    pub fn new(
        id: ClassId,
        name: impl Into<String>,
        dance_style: impl Into<String>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            dance_style: dance_style.into(),
            level: Level::AllLevels,
            duration_minutes,
            min_capacity: 1,
            max_capacity: 20,
            required_features: Vec::new(),
            preferred_times: Vec::new(),
            frequency_per_week: 1,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_capacity(mut self, min: u32, max: u32) -> Self {
        self.min_capacity = min;
        self.max_capacity = max;
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_preferred_time(mut self, slot: TimeSlot) -> Self {
        self.preferred_times.push(slot);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min_capacity > self.max_capacity {
            return Err(ValidationError::CapacityRange {
                min: self.min_capacity,
                max: self.max_capacity,
            });
        }
        if self.duration_minutes == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        Ok(())
    }
}

/// A committed (class, instructor, room, slot) assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledClass {
    pub class: ClassDefinition,
    pub instructor: Instructor,
    pub room: Room,
    pub slot: TimeSlot,
    /// Soft-constraint score at commit time; zero for entries loaded from storage.
    pub score: f64,
}

/// Tunable scheduling policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConstraints {
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub min_break_between_classes: u32,
    pub max_concurrent_classes: u32,
    pub peak_hours_start: NaiveTime,
    pub peak_hours_end: NaiveTime,
    pub prefer_beginners_in_peak: bool,
    pub slot_increment_minutes: u32,
}

impl Default for ScheduleConstraints {
    fn default() -> Self {
        Self {
            opening_time: hm(6, 0),
            closing_time: hm(22, 0),
            min_break_between_classes: 15,
            max_concurrent_classes: 3,
            peak_hours_start: hm(17, 0),
            peak_hours_end: hm(20, 0),
            prefer_beginners_in_peak: true,
            slot_increment_minutes: 30,
        }
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

impl ScheduleConstraints {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.opening_time >= self.closing_time {
            return Err(ValidationError::OpeningAfterClosing {
                opening: self.opening_time,
                closing: self.closing_time,
            });
        }
        if self.peak_hours_start > self.peak_hours_end {
            return Err(ValidationError::InvertedPeak {
                start: self.peak_hours_start,
                end: self.peak_hours_end,
            });
        }
        if self.slot_increment_minutes == 0 {
            return Err(ValidationError::ZeroIncrement);
        }
        if self.max_concurrent_classes == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        Ok(())
    }

    pub fn operating_minutes_per_day(&self) -> u32 {
        minute_of_day(self.closing_time).saturating_sub(minute_of_day(self.opening_time))
    }

    pub fn operating_minutes_per_week(&self) -> u32 {
        self.operating_minutes_per_day() * WEEK.len() as u32
    }

    /// A slot is in peak only when it lies entirely inside the peak window.
    pub fn is_peak(&self, slot: &TimeSlot) -> bool {
        slot.start >= self.peak_hours_start && slot.end <= self.peak_hours_end
    }
}

/// A class the optimizer could not place, with the reason reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledClass {
    pub class: ClassDefinition,
    pub reason: String,
}

/// Percent of capacity consumed, keyed by resource id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub instructors: BTreeMap<InstructorId, f64>,
    pub rooms: BTreeMap<RoomId, f64>,
}

impl Utilization {
    pub fn average_instructor(&self) -> f64 {
        mean(self.instructors.values().copied())
    }

    pub fn average_room(&self) -> f64 {
        mean(self.rooms.values().copied())
    }
}

pub(crate) fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Instructor,
    Room,
    Capacity,
    /// Whole-run failure such as an empty instructor or room pool.
    Configuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Hard,
    Soft,
}

/// A detected scheduling problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub description: String,
    pub affected_class_ids: Vec<ClassId>,
    /// Positions of the affected entries in the schedule that was scanned.
    pub schedule_indices: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<String>,
}

impl Conflict {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self {
            kind: ConflictKind::Configuration,
            severity: Severity::Hard,
            description: reason.into(),
            affected_class_ids: Vec::new(),
            schedule_indices: Vec::new(),
            suggested_resolution: None,
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.kind, self.severity, self.description)
    }
}

/// The outcome of one optimizer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub success: bool,
    pub schedule: Vec<ScheduledClass>,
    pub unscheduled: Vec<UnscheduledClass>,
    pub conflicts: Vec<Conflict>,
    pub utilization: Utilization,
    pub score: f64,
}

impl OptimizationResult {
    /// A run that never reached the optimizer: nothing scheduled, every class
    /// reported with the same reason.
    pub fn configuration_failure(classes: Vec<ClassDefinition>, reason: &str) -> Self {
        let unscheduled = classes
            .into_iter()
            .map(|class| UnscheduledClass {
                class,
                reason: reason.to_string(),
            })
            .collect();
        Self {
            success: false,
            schedule: Vec::new(),
            unscheduled,
            conflicts: vec![Conflict::configuration(reason)],
            utilization: Utilization::default(),
            score: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(day: Weekday, start: &str, end: &str) -> TimeSlot {
        TimeSlot::parse(day, start, end).unwrap()
    }

    #[test]
    fn rejects_empty_window() {
        assert!(TimeSlot::parse(Weekday::Mon, "10:00", "10:00").is_err());
        assert!(TimeSlot::parse(Weekday::Mon, "11:00", "10:00").is_err());
        assert_eq!(
            TimeSlot::parse(Weekday::Mon, "9am", "10:00"),
            Err(ValidationError::InvalidTime("9am".into()))
        );
    }

    #[test]
    fn duration_in_minutes() {
        assert_eq!(slot(Weekday::Tue, "09:15", "10:30").duration_minutes(), 75);
    }

    #[test]
    fn overlap_is_same_day_and_exclusive_at_edges() {
        let a = slot(Weekday::Mon, "09:00", "10:00");
        assert!(a.overlaps(&slot(Weekday::Mon, "09:30", "10:30")));
        assert!(!a.overlaps(&slot(Weekday::Mon, "10:00", "11:00")));
        assert!(!a.overlaps(&slot(Weekday::Tue, "09:00", "10:00")));
    }

    #[test]
    fn gap_between_slots() {
        let a = slot(Weekday::Mon, "09:00", "10:00");
        assert_eq!(a.gap_minutes(&slot(Weekday::Mon, "10:10", "11:00")), Some(10));
        assert_eq!(slot(Weekday::Mon, "10:10", "11:00").gap_minutes(&a), Some(10));
        assert_eq!(a.gap_minutes(&slot(Weekday::Mon, "09:30", "11:00")), None);
        assert_eq!(a.gap_minutes(&slot(Weekday::Wed, "11:00", "12:00")), None);
    }

    #[test]
    fn instructor_matches_style_case_insensitively() {
        let instructor = Instructor::new(1, "Ana").with_specialties(["Salsa", "hip hop"]);
        assert!(instructor.can_teach("salsa"));
        assert!(instructor.can_teach("HIP HOP"));
        assert!(!instructor.can_teach("ballet"));
    }

    #[test]
    fn availability_requires_full_containment() {
        let instructor =
            Instructor::new(1, "Ana").with_availability(slot(Weekday::Mon, "09:00", "12:00"));
        assert!(instructor.is_available(&slot(Weekday::Mon, "11:00", "12:00")));
        assert!(!instructor.is_available(&slot(Weekday::Mon, "11:30", "12:30")));
        assert!(!instructor.is_available(&slot(Weekday::Tue, "09:00", "10:00")));
    }

    #[test]
    fn room_features_and_capacity() {
        let room = Room::new(1, "Studio A", 15).with_features(["mirrors", "barre"]);
        assert!(room.has_features(&["barre".to_string()]));
        assert!(!room.has_features(&["sprung floor".to_string()]));
        assert!(room.fits(15));
        assert!(!room.fits(16));
    }

    #[test]
    fn default_constraints_are_valid() {
        let constraints = ScheduleConstraints::default();
        assert!(constraints.validate().is_ok());
        assert_eq!(constraints.operating_minutes_per_week(), 16 * 60 * 7);
    }

    #[test]
    fn opening_must_precede_closing() {
        let constraints = ScheduleConstraints {
            opening_time: hm(22, 0),
            closing_time: hm(6, 0),
            ..ScheduleConstraints::default()
        };
        assert!(matches!(
            constraints.validate(),
            Err(ValidationError::OpeningAfterClosing { .. })
        ));
    }

    #[test]
    fn peak_requires_the_whole_slot() {
        let constraints = ScheduleConstraints::default();
        assert!(constraints.is_peak(&slot(Weekday::Mon, "17:00", "18:00")));
        assert!(constraints.is_peak(&slot(Weekday::Mon, "18:30", "20:00")));
        assert!(!constraints.is_peak(&slot(Weekday::Mon, "16:30", "17:30")));
        assert!(!constraints.is_peak(&slot(Weekday::Mon, "19:30", "21:00")));
        assert!(!constraints.is_peak(&slot(Weekday::Mon, "20:00", "21:00")));
    }

    #[test]
    fn utilization_averages_each_resource_kind() {
        let utilization = Utilization {
            instructors: BTreeMap::from([(1, 10.0), (2, 30.0)]),
            rooms: BTreeMap::from([(1, 50.0)]),
        };
        assert_eq!(utilization.average_instructor(), 20.0);
        assert_eq!(utilization.average_room(), 50.0);
        assert_eq!(Utilization::default().average_room(), 0.0);
    }

    #[test]
    fn configuration_failure_marks_everything_unscheduled() {
        let classes = vec![ClassDefinition::new(1, "Salsa", "salsa", 60)];
        let result = OptimizationResult::configuration_failure(classes, "No rooms available");
        assert!(!result.success);
        assert_eq!(result.unscheduled.len(), 1);
        assert_eq!(result.conflicts[0].description, "No rooms available");
        assert_eq!(result.conflicts[0].kind, ConflictKind::Configuration);
    }
}
