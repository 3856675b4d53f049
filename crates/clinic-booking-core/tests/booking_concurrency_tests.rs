//! Concurrent booking against a shared database file.
//!
//! Each worker opens its own connection, the way separate request handlers
//! would. Coordination happens only through SQLite locking.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use clinic_booking_core::db::Database;
use clinic_booking_core::{BookingEngine, FixedClock, PenaltyPolicy, Period, Status};
use tempfile::TempDir;

const PROVIDER: i64 = 7;

fn clinic_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn open(path: &Path) -> Database {
    Database::open_with_timeout(path, Duration::from_secs(30)).unwrap()
}

fn setup() -> (TempDir, Arc<FixedClock>) {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(clinic_day().and_hms_opt(8, 0, 0).unwrap()));
    // Create the schema once before any worker starts.
    open(&dir.path().join("clinic.db"));
    (dir, clock)
}

#[test]
fn test_concurrent_creates_fill_exactly_capacity() {
    const CAPACITY: i64 = 5;
    const WORKERS: i64 = 12;

    let (dir, clock) = setup();
    let path = dir.path().join("clinic.db");
    let policy = PenaltyPolicy::default();

    let session_id = {
        let mut db = open(&path);
        BookingEngine::new(&mut db, clock.as_ref(), &policy)
            .create_session(PROVIDER, clinic_day(), Period::Morning, CAPACITY)
            .unwrap()
            .session_id
    };

    let barrier = Arc::new(Barrier::new(WORKERS as usize));
    let handles: Vec<_> = (1..=WORKERS)
        .map(|patient_id| {
            let path = path.clone();
            let clock = Arc::clone(&clock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut db = open(&path);
                let policy = PenaltyPolicy::default();
                let mut engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
                barrier.wait();
                engine
                    .create(patient_id, session_id)
                    .map(|view| view.slot_seq())
                    .map_err(|e| e.code())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut slots: Vec<i64> = results.iter().filter_map(|r| r.clone().ok()).collect();
    slots.sort_unstable();
    assert_eq!(slots, (1..=CAPACITY).collect::<Vec<_>>());

    let rejected: Vec<_> = results.iter().filter_map(|r| r.clone().err()).collect();
    assert_eq!(rejected.len() as i64, WORKERS - CAPACITY);
    assert!(rejected.iter().all(|code| *code == "SESSION_FULL"));

    let mut db = open(&path);
    let engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
    let info = engine.capacity_info(session_id).unwrap();
    assert_eq!(info.active_booked, CAPACITY);
    assert_eq!(info.remaining(), 0);
}

#[test]
fn test_concurrent_duplicate_create_books_once() {
    const WORKERS: usize = 6;

    let (dir, clock) = setup();
    let path = dir.path().join("clinic.db");
    let policy = PenaltyPolicy::default();

    let session_id = {
        let mut db = open(&path);
        BookingEngine::new(&mut db, clock.as_ref(), &policy)
            .create_session(PROVIDER, clinic_day(), Period::Afternoon, 10)
            .unwrap()
            .session_id
    };

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = path.clone();
            let clock = Arc::clone(&clock);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut db = open(&path);
                let policy = PenaltyPolicy::default();
                let mut engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
                barrier.wait();
                engine.create(42, session_id).map_err(|e| e.code())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|code| *code == "DUPLICATE_BOOKING"));
}

#[test]
fn test_opposing_reschedules_do_not_deadlock() {
    const ROUNDS: usize = 5;

    let (dir, clock) = setup();
    let path = dir.path().join("clinic.db");
    let policy = PenaltyPolicy::default();

    // Each session keeps a checked-in patient at the head of the queue so
    // moved appointments are never passed over by the cascade.
    let (first, second, mover_a, mover_b) = {
        let mut db = open(&path);
        let mut engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
        let first = engine
            .create_session(PROVIDER, clinic_day(), Period::Morning, 4)
            .unwrap()
            .session_id;
        let second = engine
            .create_session(PROVIDER, clinic_day(), Period::Evening, 4)
            .unwrap()
            .session_id;

        let head = engine.create(1, first).unwrap();
        engine.checkin(head.appt_id(), 1).unwrap();
        let head = engine.create(2, second).unwrap();
        engine.checkin(head.appt_id(), 2).unwrap();

        let mover_a = engine.create(3, first).unwrap().appt_id();
        let mover_b = engine.create(4, second).unwrap().appt_id();
        (first, second, mover_a, mover_b)
    };

    let barrier = Arc::new(Barrier::new(2));
    let spawn_mover = |appt_id: i64, patient_id: i64, from: i64, to: i64| {
        let path = path.clone();
        let clock = Arc::clone(&clock);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let mut db = open(&path);
            let policy = PenaltyPolicy::default();
            let (mut from, mut to) = (from, to);
            for _ in 0..ROUNDS {
                barrier.wait();
                let mut engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
                let moved = engine.reschedule(appt_id, from, to, patient_id).unwrap();
                assert_eq!(moved.appointment.session_id, to);
                assert_eq!(moved.status, Status::Booked);
                std::mem::swap(&mut from, &mut to);
            }
        })
    };

    let a = spawn_mover(mover_a, 3, first, second);
    let b = spawn_mover(mover_b, 4, second, first);
    a.join().unwrap();
    b.join().unwrap();

    // An odd number of rounds leaves each mover in the other session.
    let mut db = open(&path);
    let engine = BookingEngine::new(&mut db, clock.as_ref(), &policy);
    assert_eq!(engine.appointment(mover_a).unwrap().appointment.session_id, second);
    assert_eq!(engine.appointment(mover_b).unwrap().appointment.session_id, first);
    assert_eq!(engine.history(mover_a).unwrap().len(), 1 + ROUNDS);
    assert_eq!(engine.capacity_info(first).unwrap().active_booked, 2);
    assert_eq!(engine.capacity_info(second).unwrap().active_booked, 2);
}
