//! Weekly class timetabling for a studio: a greedy optimizer that assigns
//! classes to instructors, rooms and time slots, a conflict resolver for
//! existing timetables, and a generator that connects both to storage.

pub mod config;
pub mod data;
pub mod error;
pub mod generator;
pub mod resolver;
pub mod server;
pub mod solver;
pub mod store;

pub use data::{
    ClassDefinition, Conflict, ConflictKind, Instructor, Level, OptimizationResult, Room,
    ScheduleConstraints, ScheduledClass, Severity, TimeSlot, UnscheduledClass, Utilization,
};
pub use generator::ScheduleGenerator;
pub use resolver::{detect_conflicts, resolve_instructor_conflict, resolve_room_conflict};
pub use solver::optimize;
