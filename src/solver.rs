use crate::data::{
    ClassDefinition, Instructor, InstructorId, OptimizationResult, Room, RoomId,
    ScheduleConstraints, ScheduledClass, TimeSlot, UnscheduledClass, Utilization, WEEK, mean,
    minute_of_day, time_from_minutes,
};
use itertools::Itertools;
use log::{debug, info, trace};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Instant;

/// Class lengths the slot grid is generated for.
pub const STANDARD_DURATIONS: [u32; 3] = [60, 75, 90];

// soft constraint weights
const PREFERRED_TIME_BONUS: f64 = 20.0;
const BEGINNER_PEAK_BONUS: f64 = 15.0;
const ADVANCED_PEAK_PENALTY: f64 = 5.0;
const ROOM_FIT_BONUS: f64 = 10.0;
const ROOM_TOO_SMALL_PENALTY: f64 = 20.0;
const CONTINUITY_BONUS: f64 = 5.0;

/// Greedy, most-constrained-first assignment of classes to
/// (instructor, room, slot) triples.
///
/// Never revisits a committed assignment. Ties between equally scored
/// triples go to the first one found, iterating instructors, then rooms, then
/// slots in the order supplied, so the output depends on input order.
pub fn optimize(
    classes: &[ClassDefinition],
    instructors: &[Instructor],
    rooms: &[Room],
    constraints: &ScheduleConstraints,
) -> OptimizationResult {
    let start_time = Instant::now();
    info!(
        "Optimizing {} classes across {} instructors and {} rooms...",
        classes.len(),
        instructors.len(),
        rooms.len()
    );

    let slots = candidate_slots(constraints);
    trace!("Generated {} candidate slots.", slots.len());

    // most constrained first; sort is stable so ties keep input order
    let ordered = classes
        .iter()
        .sorted_by_key(|class| Reverse(constrainedness(class, instructors)))
        .collect_vec();

    let mut ledger = Ledger::default();
    let mut schedule = Vec::new();
    let mut unscheduled = Vec::new();

    for class in ordered {
        match best_assignment(class, instructors, rooms, &slots, &ledger, constraints) {
            Some(candidate) => {
                debug!(
                    "Scheduled '{}' with {} in {} at {} (score {:.1})",
                    class.name,
                    candidate.instructor.name,
                    candidate.room.name,
                    candidate.slot,
                    candidate.score
                );
                ledger.commit(candidate.instructor.id, candidate.room.id, candidate.slot);
                schedule.push(ScheduledClass {
                    class: class.clone(),
                    instructor: candidate.instructor.clone(),
                    room: candidate.room.clone(),
                    slot: candidate.slot,
                    score: candidate.score,
                });
            }
            None => {
                let reason = diagnose_failure(class, instructors, rooms);
                debug!("Could not schedule '{}': {}", class.name, reason);
                unscheduled.push(UnscheduledClass {
                    class: class.clone(),
                    reason,
                });
            }
        }
    }

    let utilization = utilization(&schedule, instructors, rooms, constraints);
    let score = mean(schedule.iter().map(|s| s.score));

    info!(
        "Scheduled {} of {} classes in {:.2?} (score {:.2})",
        schedule.len(),
        classes.len(),
        start_time.elapsed(),
        score
    );

    OptimizationResult {
        success: unscheduled.is_empty(),
        schedule,
        unscheduled,
        conflicts: Vec::new(),
        utilization,
        score,
    }
}

/// Every (day, start, standard duration) window between opening and closing,
/// ordered by day, then start, then duration.
pub fn candidate_slots(constraints: &ScheduleConstraints) -> Vec<TimeSlot> {
    let opening = minute_of_day(constraints.opening_time);
    let closing = minute_of_day(constraints.closing_time);
    let step = constraints.slot_increment_minutes.max(1) as usize;

    let mut slots = Vec::new();
    for day in WEEK {
        for start in (opening..closing).step_by(step) {
            for duration in STANDARD_DURATIONS {
                let end = start + duration;
                if end > closing {
                    continue;
                }
                if let (Some(start), Some(end)) = (time_from_minutes(start), time_from_minutes(end))
                {
                    slots.push(TimeSlot { day, start, end });
                }
            }
        }
    }
    slots
}

/// Higher means fewer options: few qualified instructors, many required features.
fn constrainedness(class: &ClassDefinition, instructors: &[Instructor]) -> i64 {
    let qualified = instructors
        .iter()
        .filter(|i| i.can_teach(&class.dance_style))
        .count() as i64;
    -qualified + 10 * class.required_features.len() as i64
}

/// Running per-resource record of committed slots, rebuilt for every run.
#[derive(Debug, Default)]
struct Ledger {
    by_instructor: HashMap<InstructorId, Vec<TimeSlot>>,
    by_room: HashMap<RoomId, Vec<TimeSlot>>,
}

impl Ledger {
    fn instructor_slots(&self, id: InstructorId) -> &[TimeSlot] {
        self.by_instructor.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn room_slots(&self, id: RoomId) -> &[TimeSlot] {
        self.by_room.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Classes already running in any room at the same time.
    fn concurrent_with(&self, slot: &TimeSlot) -> usize {
        self.by_room
            .values()
            .flatten()
            .filter(|taken| taken.overlaps(slot))
            .count()
    }

    fn commit(&mut self, instructor: InstructorId, room: RoomId, slot: TimeSlot) {
        self.by_instructor.entry(instructor).or_default().push(slot);
        self.by_room.entry(room).or_default().push(slot);
    }
}

struct Candidate<'a> {
    instructor: &'a Instructor,
    room: &'a Room,
    slot: TimeSlot,
    score: f64,
}

fn best_assignment<'a>(
    class: &ClassDefinition,
    instructors: &'a [Instructor],
    rooms: &'a [Room],
    slots: &[TimeSlot],
    ledger: &Ledger,
    constraints: &ScheduleConstraints,
) -> Option<Candidate<'a>> {
    let fitting_slots = slots
        .iter()
        .filter(|slot| slot.duration_minutes() == class.duration_minutes)
        .collect_vec();

    let mut best: Option<Candidate<'a>> = None;
    let mut admissible = 0usize;

    for instructor in instructors.iter().filter(|i| i.can_teach(&class.dance_style)) {
        for room in rooms
            .iter()
            .filter(|r| r.fits(class.min_capacity) && r.has_features(&class.required_features))
        {
            for slot in &fitting_slots {
                if !satisfies_hard_constraints(instructor, room, slot, ledger, constraints) {
                    continue;
                }
                admissible += 1;
                let score = soft_score(class, instructor, room, slot, ledger, constraints);
                let improves = match &best {
                    Some(current) => score > current.score,
                    None => true,
                };
                if improves {
                    best = Some(Candidate {
                        instructor,
                        room,
                        slot: **slot,
                        score,
                    });
                }
            }
        }
    }

    trace!("'{}': {} admissible triples", class.name, admissible);
    best
}

fn satisfies_hard_constraints(
    instructor: &Instructor,
    room: &Room,
    slot: &TimeSlot,
    ledger: &Ledger,
    constraints: &ScheduleConstraints,
) -> bool {
    if !instructor.is_available(slot) {
        return false;
    }

    // no overlap, and at least the minimum break either side
    let instructor_clear = ledger
        .instructor_slots(instructor.id)
        .iter()
        .filter(|taken| taken.day == slot.day)
        .all(|taken| match taken.gap_minutes(slot) {
            Some(gap) => gap >= constraints.min_break_between_classes,
            None => false,
        });
    if !instructor_clear {
        return false;
    }

    if ledger
        .room_slots(room.id)
        .iter()
        .any(|taken| taken.overlaps(slot))
    {
        return false;
    }

    ledger.concurrent_with(slot) < constraints.max_concurrent_classes as usize
}

fn soft_score(
    class: &ClassDefinition,
    instructor: &Instructor,
    room: &Room,
    slot: &TimeSlot,
    ledger: &Ledger,
    constraints: &ScheduleConstraints,
) -> f64 {
    let mut score = 0.0;

    if class.preferred_times.iter().any(|hint| hint.contains(slot)) {
        score += PREFERRED_TIME_BONUS;
    }

    if constraints.prefer_beginners_in_peak && constraints.is_peak(slot) {
        if class.level.is_beginner() {
            score += BEGINNER_PEAK_BONUS;
        } else {
            score -= ADVANCED_PEAK_PENALTY;
        }
    }

    if class.max_capacity > room.capacity {
        score -= ROOM_TOO_SMALL_PENALTY;
    } else if room.capacity > 0 {
        let fill = class.max_capacity as f64 / room.capacity as f64;
        if (0.5..=1.0).contains(&fill) {
            score += ROOM_FIT_BONUS;
        }
    }

    let same_day = ledger
        .instructor_slots(instructor.id)
        .iter()
        .filter(|taken| taken.day == slot.day)
        .count();
    score += CONTINUITY_BONUS * same_day as f64;

    score
}

/// Re-derives a plausible reason after the search fails. Checks run in a
/// fixed order and the first match wins; it does not report which hard
/// constraint actually rejected each triple.
pub fn diagnose_failure(
    class: &ClassDefinition,
    instructors: &[Instructor],
    rooms: &[Room],
) -> String {
    if !instructors.iter().any(|i| i.can_teach(&class.dance_style)) {
        return format!("No instructor qualified to teach {}", class.dance_style);
    }
    if !rooms.iter().any(|r| r.fits(class.min_capacity)) {
        return format!(
            "No room with capacity for at least {} students",
            class.min_capacity
        );
    }
    if !rooms.iter().any(|r| r.has_features(&class.required_features)) {
        return format!(
            "No room with required features: {}",
            class.required_features.join(", ")
        );
    }
    "No time slot satisfies all constraints".to_string()
}

fn utilization(
    schedule: &[ScheduledClass],
    instructors: &[Instructor],
    rooms: &[Room],
    constraints: &ScheduleConstraints,
) -> Utilization {
    let instructor_minutes: HashMap<InstructorId, u32> = schedule
        .iter()
        .map(|s| (s.instructor.id, s.slot.duration_minutes()))
        .into_grouping_map()
        .sum();
    let room_minutes: HashMap<RoomId, u32> = schedule
        .iter()
        .map(|s| (s.room.id, s.slot.duration_minutes()))
        .into_grouping_map()
        .sum();

    let weekly_room_minutes = constraints.operating_minutes_per_week();

    Utilization {
        instructors: instructors
            .iter()
            .map(|i| {
                let used = instructor_minutes.get(&i.id).copied().unwrap_or(0);
                (i.id, percent(used, i.max_hours_per_week * 60))
            })
            .collect(),
        rooms: rooms
            .iter()
            .map(|r| {
                let used = room_minutes.get(&r.id).copied().unwrap_or(0);
                (r.id, percent(used, weekly_room_minutes))
            })
            .collect(),
    }
}

fn percent(used: u32, available: u32) -> f64 {
    if available == 0 {
        return 0.0;
    }
    used as f64 / available as f64 * 100.0
}
