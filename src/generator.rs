//! Orchestration between storage and the optimizer.
//!
//! The generator is the only component that talks to the [`ScheduleStore`].
//! It turns stored records into domain values, runs the optimizer, and writes
//! the result back. It takes no locks: callers that may run two optimizations
//! for the same studio at once must serialize them.

use chrono::Weekday;
use itertools::Itertools;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::data::{
    ClassDefinition, ClassId, Conflict, EntryId, Instructor, InstructorId, OptimizationResult,
    Room, RoomId, ScheduleConstraints, ScheduledClass, StudioId, TimeSlot, Utilization,
};
use crate::error::{GeneratorError, StoreError};
use crate::resolver::detect_conflicts;
use crate::solver::{candidate_slots, optimize};
use crate::store::{
    AvailabilityRecord, ClassRecord, InstructorRecord, NewScheduleEntry, RoomRecord,
    ScheduleEntryRow, ScheduleStore,
};

/// Styles assumed for instructors with no recorded specialties.
pub const DEFAULT_SPECIALTIES: [&str; 8] = [
    "ballet",
    "jazz",
    "contemporary",
    "hip hop",
    "salsa",
    "bachata",
    "ballroom",
    "tap",
];

pub const MAX_SUGGESTIONS: usize = 5;

/// A stored schedule entry, ready for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub entry_id: EntryId,
    pub class_id: ClassId,
    pub class_name: String,
    pub instructor_id: InstructorId,
    pub instructor_name: String,
    pub room_id: RoomId,
    pub room_name: String,
    pub day: Weekday,
    pub start: String,
    pub end: String,
    pub recurring: bool,
}

/// An admissible place for a class that has not been created yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub day: Weekday,
    pub start: String,
    pub end: String,
    pub instructor_id: InstructorId,
    pub instructor_name: String,
    pub room_id: RoomId,
    pub room_name: String,
}

/// What an optimize-and-replace run changed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub success: bool,
    pub created: Vec<EntryId>,
    pub removed: usize,
    pub unscheduled: usize,
    pub utilization: Utilization,
    pub score: f64,
}

pub struct ScheduleGenerator {
    store: Arc<dyn ScheduleStore>,
    studio: StudioId,
}

impl ScheduleGenerator {
    pub fn new(store: Arc<dyn ScheduleStore>, studio: StudioId) -> Self {
        Self { store, studio }
    }

    pub fn studio(&self) -> StudioId {
        self.studio
    }

    pub fn load_instructors(&self) -> Result<Vec<Instructor>, StoreError> {
        let records = self.store.list_instructors(self.studio)?;
        debug!("Loaded {} instructors", records.len());
        Ok(records.into_iter().map(instructor_from_record).collect())
    }

    pub fn load_rooms(&self) -> Result<Vec<Room>, StoreError> {
        let records = self.store.list_active_rooms(self.studio)?;
        debug!("Loaded {} active rooms", records.len());
        Ok(records.into_iter().map(room_from_record).collect())
    }

    /// Active classes; records with an impossible capacity range or zero
    /// duration are skipped.
    pub fn load_classes(&self) -> Result<Vec<ClassDefinition>, StoreError> {
        let records = self.store.list_active_classes(self.studio)?;
        debug!("Loaded {} active classes", records.len());
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let class = class_from_record(record);
                match class.validate() {
                    Ok(()) => Some(class),
                    Err(e) => {
                        warn!("Skipping class {} '{}': {}", class.id, class.name, e);
                        None
                    }
                }
            })
            .collect())
    }

    /// Loads everything and runs the optimizer. An empty instructor or room
    /// pool short-circuits into a failed result without running the search.
    pub fn generate_optimized_schedule(
        &self,
        constraints: &ScheduleConstraints,
    ) -> Result<OptimizationResult, GeneratorError> {
        constraints.validate()?;

        let instructors = self.load_instructors()?;
        let rooms = self.load_rooms()?;
        let classes = self.load_classes()?;

        if instructors.is_empty() {
            warn!("Studio {} has no instructors", self.studio);
            return Ok(OptimizationResult::configuration_failure(
                classes,
                "No instructors available",
            ));
        }
        if rooms.is_empty() {
            warn!("Studio {} has no active rooms", self.studio);
            return Ok(OptimizationResult::configuration_failure(
                classes,
                "No rooms available",
            ));
        }

        Ok(optimize(&classes, &instructors, &rooms, constraints))
    }

    /// Writes every scheduled class as a new recurring entry. Additive: prior
    /// entries are not touched.
    pub fn save_schedule(&self, result: &OptimizationResult) -> Result<Vec<EntryId>, StoreError> {
        self.write_entries(result).map_err(|(created, e)| {
            warn!(
                "Saved {} of {} entries for studio {} before failing: {}",
                created.len(),
                result.schedule.len(),
                self.studio,
                e
            );
            e
        })
    }

    /// Optimizes, then swaps the studio's recurring entries for the new
    /// schedule. Nothing is deleted when no class could be placed.
    ///
    /// The store has no transactions, so this is not atomic. A write that
    /// fails after the old entries are gone yields
    /// [`GeneratorError::PartialReplace`] with the ids that did get written.
    pub fn optimize_and_replace(
        &self,
        constraints: &ScheduleConstraints,
    ) -> Result<SaveOutcome, GeneratorError> {
        let result = self.generate_optimized_schedule(constraints)?;

        let (removed, created) = if result.schedule.is_empty() {
            info!("Nothing scheduled; keeping the existing timetable");
            (0, Vec::new())
        } else {
            let removed = self.store.delete_recurring_entries(self.studio)?;
            let created = self.write_entries(&result).map_err(|(created, source)| {
                error!(
                    "Timetable for studio {} left incomplete: {} old entries removed, \
                     {} of {} new entries saved: {}",
                    self.studio,
                    removed,
                    created.len(),
                    result.schedule.len(),
                    source
                );
                GeneratorError::PartialReplace {
                    removed,
                    created,
                    planned: result.schedule.len(),
                    source,
                }
            })?;
            (removed, created)
        };

        Ok(SaveOutcome {
            success: result.success,
            created,
            removed,
            unscheduled: result.unscheduled.len(),
            utilization: result.utilization,
            score: result.score,
        })
    }

    /// Stops at the first failed write, handing back the ids written so far.
    fn write_entries(
        &self,
        result: &OptimizationResult,
    ) -> Result<Vec<EntryId>, (Vec<EntryId>, StoreError)> {
        let mut created = Vec::with_capacity(result.schedule.len());
        for scheduled in &result.schedule {
            let entry = NewScheduleEntry {
                class_id: scheduled.class.id,
                instructor_id: scheduled.instructor.id,
                room_id: scheduled.room.id,
                day: scheduled.slot.day,
                start: scheduled.slot.start,
                end: scheduled.slot.end,
                recurring: true,
            };
            match self.store.create_schedule_entry(self.studio, entry) {
                Ok(id) => created.push(id),
                Err(e) => return Err((created, e)),
            }
        }
        info!("Saved {} schedule entries for studio {}", created.len(), self.studio);
        Ok(created)
    }

    pub fn get_current_schedule(&self) -> Result<Vec<ScheduleSummary>, StoreError> {
        let rows = self.store.list_schedule_entries(self.studio)?;
        Ok(rows.into_iter().map(summary_from_row).collect())
    }

    /// Stored entries rebuilt into full assignments. Entries pointing at
    /// classes, instructors or rooms that are gone or inactive are stale and
    /// skipped. Conflict detection and suggestions both read this view.
    pub fn current_schedule_classes(&self) -> Result<Vec<ScheduledClass>, StoreError> {
        let classes: HashMap<ClassId, ClassDefinition> = self
            .load_classes()?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let instructors: HashMap<InstructorId, Instructor> = self
            .load_instructors()?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();
        let rooms: HashMap<RoomId, Room> =
            self.load_rooms()?.into_iter().map(|r| (r.id, r)).collect();

        let rows = self.store.list_schedule_entries(self.studio)?;
        let mut schedule = Vec::with_capacity(rows.len());
        for row in rows {
            let entry = &row.entry.entry;
            let joined = (
                classes.get(&entry.class_id),
                instructors.get(&entry.instructor_id),
                rooms.get(&entry.room_id),
                TimeSlot::new(entry.day, entry.start, entry.end).ok(),
            );
            match joined {
                (Some(class), Some(instructor), Some(room), Some(slot)) => {
                    schedule.push(ScheduledClass {
                        class: class.clone(),
                        instructor: instructor.clone(),
                        room: room.clone(),
                        slot,
                        score: 0.0,
                    });
                }
                _ => warn!("Skipping dangling schedule entry {}", row.entry.id),
            }
        }
        Ok(schedule)
    }

    pub fn detect_current_conflicts(&self) -> Result<Vec<Conflict>, StoreError> {
        Ok(detect_conflicts(&self.current_schedule_classes()?))
    }

    /// Up to [`MAX_SUGGESTIONS`] places for a new class that clash with
    /// nothing in [`Self::current_schedule_classes`]. Slots are tried in day/time order, instructors
    /// in stored order, and each (slot, instructor) pair takes the first free
    /// room. Results are admissible, not ranked.
    pub fn suggest_new_class_time(
        &self,
        candidate: &ClassDefinition,
        constraints: &ScheduleConstraints,
    ) -> Result<Vec<Suggestion>, GeneratorError> {
        candidate.validate()?;
        constraints.validate()?;

        let instructors = self.load_instructors()?;
        let rooms = self.load_rooms()?;
        let booked = self.current_schedule_classes()?;

        let instructor_busy = booked
            .iter()
            .map(|s| (s.instructor.id, s.slot))
            .into_group_map();
        let room_busy = booked.iter().map(|s| (s.room.id, s.slot)).into_group_map();
        let is_free = |busy: &HashMap<u32, Vec<TimeSlot>>, id: u32, slot: &TimeSlot| {
            busy.get(&id)
                .is_none_or(|taken| taken.iter().all(|t| !t.overlaps(slot)))
        };

        let mut suggestions = Vec::new();
        let slots = candidate_slots(constraints)
            .into_iter()
            .filter(|slot| slot.duration_minutes() == candidate.duration_minutes);
        for slot in slots {
            for instructor in instructors.iter().filter(|i| {
                i.can_teach(&candidate.dance_style)
                    && i.is_available(&slot)
                    && is_free(&instructor_busy, i.id, &slot)
            }) {
                let room = rooms.iter().find(|r| {
                    r.fits(candidate.min_capacity)
                        && r.has_features(&candidate.required_features)
                        && is_free(&room_busy, r.id, &slot)
                });
                if let Some(room) = room {
                    suggestions.push(Suggestion {
                        day: slot.day,
                        start: slot.start.format("%H:%M").to_string(),
                        end: slot.end.format("%H:%M").to_string(),
                        instructor_id: instructor.id,
                        instructor_name: instructor.name.clone(),
                        room_id: room.id,
                        room_name: room.name.clone(),
                    });
                    if suggestions.len() == MAX_SUGGESTIONS {
                        return Ok(suggestions);
                    }
                }
            }
        }

        debug!(
            "Found {} suggestions for '{}'",
            suggestions.len(),
            candidate.name
        );
        Ok(suggestions)
    }
}

fn slots_from_records(owner: &str, records: Vec<AvailabilityRecord>) -> Vec<TimeSlot> {
    records
        .into_iter()
        .filter_map(
            |record| match TimeSlot::parse(record.day, &record.start, &record.end) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    warn!("Skipping window {:?} for {}: {}", record, owner, e);
                    None
                }
            },
        )
        .collect()
}

fn instructor_from_record(record: InstructorRecord) -> Instructor {
    let specialties = if record.specialties.is_empty() {
        DEFAULT_SPECIALTIES.iter().map(|s| s.to_string()).collect()
    } else {
        record.specialties
    };
    Instructor {
        availability: slots_from_records(&record.name, record.availability),
        id: record.id,
        name: record.name,
        specialties,
        max_hours_per_week: record.max_hours_per_week,
        min_break_minutes: record.min_break_minutes,
    }
}

fn room_from_record(record: RoomRecord) -> Room {
    Room {
        id: record.id,
        name: record.name,
        capacity: record.capacity,
        features: record.features,
    }
}

fn class_from_record(record: ClassRecord) -> ClassDefinition {
    ClassDefinition {
        preferred_times: slots_from_records(&record.name, record.preferred_times),
        id: record.id,
        name: record.name,
        dance_style: record.dance_style,
        level: record.level,
        duration_minutes: record.duration_minutes,
        min_capacity: record.min_capacity,
        max_capacity: record.max_capacity,
        required_features: record.required_features,
        frequency_per_week: record.frequency_per_week,
    }
}

fn summary_from_row(row: ScheduleEntryRow) -> ScheduleSummary {
    let entry = row.entry.entry;
    ScheduleSummary {
        entry_id: row.entry.id,
        class_id: entry.class_id,
        class_name: row.class_name.unwrap_or_default(),
        instructor_id: entry.instructor_id,
        instructor_name: row.instructor_name.unwrap_or_default(),
        room_id: entry.room_id,
        room_name: row.room_name.unwrap_or_default(),
        day: entry.day,
        start: entry.start.format("%H:%M").to_string(),
        end: entry.end.format("%H:%M").to_string(),
        recurring: entry.recurring,
    }
}
