//! Persistence collaborator for the generator.
//!
//! [`ScheduleStore`] is the minimum surface the generator needs from storage.
//! [`MemoryStore`] backs it with in-process maps and can be seeded from JSON.

use chrono::{NaiveTime, Weekday};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::data::{ClassId, EntryId, InstructorId, Level, RoomId, StudioId};
use crate::error::StoreError;

/// A weekly window as stored, times kept as the raw `HH:MM` text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub day: Weekday,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: ClassId,
    pub name: String,
    pub dance_style: String,
    pub level: Level,
    pub duration_minutes: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub preferred_times: Vec<AvailabilityRecord>,
    #[serde(default = "one")]
    pub frequency_per_week: u32,
    #[serde(default = "yes")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorRecord {
    pub id: InstructorId,
    pub name: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub availability: Vec<AvailabilityRecord>,
    #[serde(default = "default_max_hours")]
    pub max_hours_per_week: u32,
    #[serde(default = "default_min_break")]
    pub min_break_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "yes")]
    pub active: bool,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

fn default_max_hours() -> u32 {
    40
}

fn default_min_break() -> u32 {
    15
}

/// A schedule entry about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScheduleEntry {
    pub class_id: ClassId,
    pub instructor_id: InstructorId,
    pub room_id: RoomId,
    pub day: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub recurring: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: EntryId,
    #[serde(flatten)]
    pub entry: NewScheduleEntry,
}

/// A stored entry joined with the names of what it references. Names are
/// `None` when the referenced record no longer exists.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntryRow {
    #[serde(flatten)]
    pub entry: ScheduleEntry,
    pub class_name: Option<String>,
    pub instructor_name: Option<String>,
    pub room_name: Option<String>,
}

pub trait ScheduleStore: Send + Sync {
    fn list_active_classes(&self, studio: StudioId) -> Result<Vec<ClassRecord>, StoreError>;

    fn list_active_rooms(&self, studio: StudioId) -> Result<Vec<RoomRecord>, StoreError>;

    /// Every instructor, availability included.
    fn list_instructors(&self, studio: StudioId) -> Result<Vec<InstructorRecord>, StoreError>;

    fn create_schedule_entry(
        &self,
        studio: StudioId,
        entry: NewScheduleEntry,
    ) -> Result<EntryId, StoreError>;

    /// Removes recurring entries only; one-off entries survive. Returns how many went.
    fn delete_recurring_entries(&self, studio: StudioId) -> Result<usize, StoreError>;

    /// Entries ordered by day, then start time.
    fn list_schedule_entries(&self, studio: StudioId) -> Result<Vec<ScheduleEntryRow>, StoreError>;
}

/// Everything stored for one studio. Also the shape of a JSON seed file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudioData {
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
    #[serde(default)]
    pub instructors: Vec<InstructorRecord>,
    #[serde(default)]
    pub rooms: Vec<RoomRecord>,
    #[serde(default)]
    pub entries: Vec<ScheduleEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    studios: HashMap<StudioId, StudioData>,
    next_entry_id: EntryId,
    offline: bool,
}

/// In-process store. All studios share one entry id sequence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding a single studio read from a JSON seed file.
    pub fn from_seed_file(path: &Path, studio: StudioId) -> Result<Self, StoreError> {
        let raw = fs::read_to_string(path)?;
        let data: StudioData = serde_json::from_str(&raw)?;
        let store = Self::new();
        store.insert_studio(studio, data);
        Ok(store)
    }

    /// Adds or replaces a studio's data.
    pub fn insert_studio(&self, studio: StudioId, data: StudioData) {
        let mut inner = self.inner.write();
        let highest = data.entries.iter().map(|e| e.id).max().unwrap_or(0);
        inner.next_entry_id = inner.next_entry_id.max(highest);
        inner.studios.insert(studio, data);
    }

    /// Simulates storage going away: every call fails with
    /// [`StoreError::Unavailable`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.write().offline = offline;
    }

    fn read<T>(
        &self,
        studio: StudioId,
        f: impl FnOnce(&StudioData) -> T,
    ) -> Result<T, StoreError> {
        let inner = self.inner.read();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        inner
            .studios
            .get(&studio)
            .map(f)
            .ok_or(StoreError::UnknownStudio(studio))
    }

    fn write<T>(
        &self,
        studio: StudioId,
        f: impl FnOnce(&mut StudioData, &mut EntryId) -> T,
    ) -> Result<T, StoreError> {
        let mut inner = self.inner.write();
        if inner.offline {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        let Inner {
            studios,
            next_entry_id,
            ..
        } = &mut *inner;
        let data = studios
            .get_mut(&studio)
            .ok_or(StoreError::UnknownStudio(studio))?;
        Ok(f(data, next_entry_id))
    }
}

impl ScheduleStore for MemoryStore {
    fn list_active_classes(&self, studio: StudioId) -> Result<Vec<ClassRecord>, StoreError> {
        self.read(studio, |data| {
            data.classes.iter().filter(|c| c.active).cloned().collect()
        })
    }

    fn list_active_rooms(&self, studio: StudioId) -> Result<Vec<RoomRecord>, StoreError> {
        self.read(studio, |data| {
            data.rooms.iter().filter(|r| r.active).cloned().collect()
        })
    }

    fn list_instructors(&self, studio: StudioId) -> Result<Vec<InstructorRecord>, StoreError> {
        self.read(studio, |data| data.instructors.clone())
    }

    fn create_schedule_entry(
        &self,
        studio: StudioId,
        entry: NewScheduleEntry,
    ) -> Result<EntryId, StoreError> {
        self.write(studio, |data, next_id| {
            *next_id += 1;
            data.entries.push(ScheduleEntry { id: *next_id, entry });
            *next_id
        })
    }

    fn delete_recurring_entries(&self, studio: StudioId) -> Result<usize, StoreError> {
        self.write(studio, |data, _| {
            let before = data.entries.len();
            data.entries.retain(|e| !e.entry.recurring);
            before - data.entries.len()
        })
    }

    fn list_schedule_entries(&self, studio: StudioId) -> Result<Vec<ScheduleEntryRow>, StoreError> {
        self.read(studio, |data| {
            let mut rows: Vec<ScheduleEntryRow> = data
                .entries
                .iter()
                .map(|entry| ScheduleEntryRow {
                    class_name: data
                        .classes
                        .iter()
                        .find(|c| c.id == entry.entry.class_id)
                        .map(|c| c.name.clone()),
                    instructor_name: data
                        .instructors
                        .iter()
                        .find(|i| i.id == entry.entry.instructor_id)
                        .map(|i| i.name.clone()),
                    room_name: data
                        .rooms
                        .iter()
                        .find(|r| r.id == entry.entry.room_id)
                        .map(|r| r.name.clone()),
                    entry: entry.clone(),
                })
                .collect();
            rows.sort_by_key(|row| {
                (
                    row.entry.entry.day.num_days_from_monday(),
                    row.entry.entry.start,
                    row.entry.id,
                )
            });
            rows
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn studio() -> StudioData {
        serde_json::from_str(
            r#"{
                "classes": [
                    {"id": 1, "name": "Salsa Basics", "danceStyle": "salsa", "level": "beginner",
                     "durationMinutes": 60, "minCapacity": 3, "maxCapacity": 20},
                    {"id": 2, "name": "Retired", "danceStyle": "tap", "level": "advanced",
                     "durationMinutes": 60, "minCapacity": 3, "maxCapacity": 20, "active": false}
                ],
                "instructors": [
                    {"id": 1, "name": "Ana", "specialties": ["salsa"],
                     "availability": [{"day": "Mon", "start": "09:00", "end": "17:00"}]}
                ],
                "rooms": [
                    {"id": 1, "name": "Studio A", "capacity": 20},
                    {"id": 2, "name": "Closed", "capacity": 50, "active": false}
                ]
            }"#,
        )
        .unwrap()
    }

    fn entry(day: Weekday, start: &str, recurring: bool) -> NewScheduleEntry {
        let start = NaiveTime::parse_from_str(start, "%H:%M").unwrap();
        NewScheduleEntry {
            class_id: 1,
            instructor_id: 1,
            room_id: 1,
            day,
            start,
            end: start + chrono::Duration::minutes(60),
            recurring,
        }
    }

    #[test]
    fn lists_only_active_records() {
        let store = MemoryStore::new();
        store.insert_studio(1, studio());

        let classes = store.list_active_classes(1).unwrap();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].frequency_per_week, 1);
        assert_eq!(store.list_active_rooms(1).unwrap().len(), 1);

        let instructors = store.list_instructors(1).unwrap();
        assert_eq!(instructors[0].max_hours_per_week, 40);
        assert_eq!(instructors[0].availability[0].start, "09:00");
    }

    #[test]
    fn entries_are_numbered_joined_and_sorted() {
        let store = MemoryStore::new();
        store.insert_studio(1, studio());

        let late = store.create_schedule_entry(1, entry(Weekday::Tue, "10:00", true)).unwrap();
        let early = store.create_schedule_entry(1, entry(Weekday::Mon, "18:00", true)).unwrap();
        assert_eq!((late, early), (1, 2));

        let rows = store.list_schedule_entries(1).unwrap();
        assert_eq!(rows[0].entry.id, early);
        assert_eq!(rows[0].class_name.as_deref(), Some("Salsa Basics"));
        assert_eq!(rows[0].instructor_name.as_deref(), Some("Ana"));
        assert_eq!(rows[0].room_name.as_deref(), Some("Studio A"));
    }

    #[test]
    fn delete_keeps_one_off_entries() {
        let store = MemoryStore::new();
        store.insert_studio(1, studio());
        store.create_schedule_entry(1, entry(Weekday::Mon, "09:00", true)).unwrap();
        store.create_schedule_entry(1, entry(Weekday::Mon, "11:00", false)).unwrap();

        assert_eq!(store.delete_recurring_entries(1).unwrap(), 1);
        let rows = store.list_schedule_entries(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].entry.entry.recurring);
    }

    #[test]
    fn unknown_studio_and_outage_are_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.list_active_rooms(42),
            Err(StoreError::UnknownStudio(42))
        ));

        store.insert_studio(1, studio());
        store.set_offline(true);
        assert!(matches!(
            store.list_instructors(1),
            Err(StoreError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.list_instructors(1).is_ok());
    }

    #[test]
    fn loads_bundled_seed_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("seed/studio.json");
        let store = MemoryStore::from_seed_file(&path, 3).unwrap();
        assert_eq!(store.list_active_classes(3).unwrap().len(), 5);
        assert_eq!(store.list_instructors(3).unwrap().len(), 3);
        assert_eq!(store.list_active_rooms(3).unwrap().len(), 3);
        assert!(store.list_schedule_entries(3).unwrap().is_empty());
    }

    #[test]
    fn missing_seed_file_is_an_io_error() {
        let result = MemoryStore::from_seed_file(Path::new("no/such/seed.json"), 1);
        assert!(matches!(result, Err(StoreError::Io(_))));
    }

    #[test]
    fn seeded_entry_ids_are_not_reused() {
        let mut data = studio();
        data.entries.push(ScheduleEntry {
            id: 10,
            entry: entry(Weekday::Wed, "09:00", true),
        });
        let store = MemoryStore::new();
        store.insert_studio(1, data);
        let id = store.create_schedule_entry(1, entry(Weekday::Thu, "09:00", true)).unwrap();
        assert_eq!(id, 11);
    }
}
