//! Conflict detection and single-class repair for any schedule, including
//! ones edited by hand after optimization.

use crate::data::{
    Conflict, ConflictKind, Instructor, InstructorId, Room, RoomId, ScheduledClass, Severity,
    TimeSlot,
};
use itertools::Itertools;
use log::{debug, info};

/// Scans a schedule for double-booked instructors and rooms (hard) and rooms
/// smaller than a class's minimum capacity (soft).
///
/// Entries are grouped by resource first so only classes sharing an
/// instructor or a room are compared. Output order is stable: instructor
/// conflicts by instructor id, then room conflicts by room id, then capacity
/// conflicts in schedule order.
pub fn detect_conflicts(schedule: &[ScheduledClass]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    let by_instructor = schedule
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.instructor.id, index))
        .into_group_map();
    for (_, indices) in by_instructor.into_iter().sorted_by_key(|(id, _)| *id) {
        for (a, b) in indices.into_iter().tuple_combinations() {
            if schedule[a].slot.overlaps(&schedule[b].slot) {
                conflicts.push(double_booking(ConflictKind::Instructor, schedule, a, b));
            }
        }
    }

    let by_room = schedule
        .iter()
        .enumerate()
        .map(|(index, entry)| (entry.room.id, index))
        .into_group_map();
    for (_, indices) in by_room.into_iter().sorted_by_key(|(id, _)| *id) {
        for (a, b) in indices.into_iter().tuple_combinations() {
            if schedule[a].slot.overlaps(&schedule[b].slot) {
                conflicts.push(double_booking(ConflictKind::Room, schedule, a, b));
            }
        }
    }

    for (index, entry) in schedule.iter().enumerate() {
        if entry.room.capacity < entry.class.min_capacity {
            conflicts.push(Conflict {
                kind: ConflictKind::Capacity,
                severity: Severity::Soft,
                description: format!(
                    "Room '{}' holds {} but '{}' needs at least {}",
                    entry.room.name, entry.room.capacity, entry.class.name, entry.class.min_capacity
                ),
                affected_class_ids: vec![entry.class.id],
                schedule_indices: vec![index],
                suggested_resolution: Some(format!(
                    "Move '{}' to a room holding at least {} students",
                    entry.class.name, entry.class.min_capacity
                )),
            });
        }
    }

    if !conflicts.is_empty() {
        info!(
            "Detected {} conflicts in a schedule of {} classes",
            conflicts.len(),
            schedule.len()
        );
    }
    conflicts
}

fn double_booking(
    kind: ConflictKind,
    schedule: &[ScheduledClass],
    a: usize,
    b: usize,
) -> Conflict {
    let (first, second) = (&schedule[a], &schedule[b]);
    let (description, suggestion) = match kind {
        ConflictKind::Instructor => (
            format!(
                "Instructor '{}' is double-booked: '{}' ({}) overlaps '{}' ({})",
                first.instructor.name, first.class.name, first.slot, second.class.name, second.slot
            ),
            format!(
                "Assign another qualified instructor to '{}' or move it to a free time",
                second.class.name
            ),
        ),
        _ => (
            format!(
                "Room '{}' is double-booked: '{}' ({}) overlaps '{}' ({})",
                first.room.name, first.class.name, first.slot, second.class.name, second.slot
            ),
            format!("Move '{}' to another free room", second.class.name),
        ),
    };
    Conflict {
        kind,
        severity: Severity::Hard,
        description,
        affected_class_ids: vec![first.class.id, second.class.id],
        schedule_indices: vec![a, b],
        suggested_resolution: Some(suggestion),
    }
}

/// The entry a repair replaces: the second of the two conflicting classes.
fn repair_target<'a>(
    conflict: &Conflict,
    kind: ConflictKind,
    schedule: &'a [ScheduledClass],
) -> Option<(usize, &'a ScheduledClass)> {
    if conflict.kind != kind {
        return None;
    }
    let index = *conflict.schedule_indices.get(1)?;
    schedule.get(index).map(|entry| (index, entry))
}

fn instructor_is_free(
    schedule: &[ScheduledClass],
    skip: usize,
    instructor: InstructorId,
    slot: &TimeSlot,
) -> bool {
    schedule
        .iter()
        .enumerate()
        .filter(|(index, entry)| *index != skip && entry.instructor.id == instructor)
        .all(|(_, entry)| !entry.slot.overlaps(slot))
}

fn room_is_free(schedule: &[ScheduledClass], skip: usize, room: RoomId, slot: &TimeSlot) -> bool {
    schedule
        .iter()
        .enumerate()
        .filter(|(index, entry)| *index != skip && entry.room.id == room)
        .all(|(_, entry)| !entry.slot.overlaps(slot))
}

/// Proposes a replacement for the second class of an instructor conflict,
/// using the first candidate (in input order) who can teach the style, is
/// available for the slot and is not already teaching at that time.
///
/// The schedule is left untouched; applying the replacement is up to the caller.
pub fn resolve_instructor_conflict(
    conflict: &Conflict,
    schedule: &[ScheduledClass],
    candidates: &[Instructor],
) -> Option<ScheduledClass> {
    let (index, target) = repair_target(conflict, ConflictKind::Instructor, schedule)?;

    let replacement = candidates.iter().find(|candidate| {
        candidate.id != target.instructor.id
            && candidate.can_teach(&target.class.dance_style)
            && candidate.is_available(&target.slot)
            && instructor_is_free(schedule, index, candidate.id, &target.slot)
    });

    match replacement {
        Some(instructor) => {
            debug!(
                "Reassigning '{}' from {} to {}",
                target.class.name, target.instructor.name, instructor.name
            );
            Some(ScheduledClass {
                instructor: instructor.clone(),
                ..target.clone()
            })
        }
        None => {
            debug!("No free instructor can take over '{}'", target.class.name);
            None
        }
    }
}

/// Room counterpart of [`resolve_instructor_conflict`]: the first candidate
/// room that meets capacity and features and is free for the slot.
pub fn resolve_room_conflict(
    conflict: &Conflict,
    schedule: &[ScheduledClass],
    candidates: &[Room],
) -> Option<ScheduledClass> {
    let (index, target) = repair_target(conflict, ConflictKind::Room, schedule)?;

    let replacement = candidates.iter().find(|candidate| {
        candidate.id != target.room.id
            && candidate.fits(target.class.min_capacity)
            && candidate.has_features(&target.class.required_features)
            && room_is_free(schedule, index, candidate.id, &target.slot)
    });

    match replacement {
        Some(room) => {
            debug!(
                "Moving '{}' from {} to {}",
                target.class.name, target.room.name, room.name
            );
            Some(ScheduledClass {
                room: room.clone(),
                ..target.clone()
            })
        }
        None => {
            debug!("No free room can take '{}'", target.class.name);
            None
        }
    }
}
