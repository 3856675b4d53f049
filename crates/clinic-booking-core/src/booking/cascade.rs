//! No-show cascade.
//!
//! A booked patient is passed over once everyone queued strictly ahead of
//! them is resolved (completed, cancelled or no-show). Promotions count as
//! resolved for the rest of the pass, so one pass reaches a fixed point.

use rusqlite::Connection;
use tracing::info;

use super::error::BookingResult;
use super::ledger::StatusLedger;
use crate::clock::Clock;
use crate::db;
use crate::models::{Actor, AppointmentView, Status};

/// Appointments to promote to `NoShow`, in queue order.
///
/// Pure over a snapshot of the session queue. Appointments sharing a
/// `slot_seq` do not count as ahead of each other.
pub fn plan_no_shows(queue: &[AppointmentView]) -> Vec<i64> {
    let mut ordered: Vec<&AppointmentView> = queue.iter().collect();
    ordered.sort_by_key(|v| (v.slot_seq(), v.appt_id()));

    let mut promoted = Vec::new();
    let mut ahead_resolved = true;
    let mut i = 0;

    while i < ordered.len() {
        let slot = ordered[i].slot_seq();
        let mut group_resolved = true;

        while i < ordered.len() && ordered[i].slot_seq() == slot {
            let view = ordered[i];
            let mut status = view.status;
            if status == Status::Booked && slot > 1 && ahead_resolved {
                promoted.push(view.appt_id());
                status = Status::NoShow;
            }
            group_resolved &= status.is_terminal();
            i += 1;
        }

        ahead_resolved &= group_resolved;
    }

    promoted
}

pub struct NoShowCascade<'c> {
    conn: &'c Connection,
    clock: &'c dyn Clock,
}

impl<'c> NoShowCascade<'c> {
    pub fn new(conn: &'c Connection, clock: &'c dyn Clock) -> Self {
        Self { conn, clock }
    }

    /// Re-evaluate a session's queue and append a `Booked -> NoShow` event
    /// for each promotion, attributed to `actor`. Returns the promoted ids.
    pub fn run(&self, session_id: i64, actor: Actor) -> BookingResult<Vec<i64>> {
        let queue = db::session_queue(self.conn, session_id)?;
        let promoted = plan_no_shows(&queue);
        if promoted.is_empty() {
            return Ok(promoted);
        }

        let ledger = StatusLedger::new(self.conn, self.clock);
        for &appt_id in &promoted {
            ledger.append_event(appt_id, Some(Status::Booked), Status::NoShow, actor)?;
        }
        info!(session_id, promoted = ?promoted, "no-show cascade promoted appointments");
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Appointment;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn view(appt_id: i64, slot_seq: i64, status: Status) -> AppointmentView {
        AppointmentView {
            appointment: Appointment {
                appt_id,
                patient_id: appt_id * 100,
                session_id: 1,
                slot_seq,
                created_at: NaiveDate::from_ymd_opt(2026, 3, 1)
                    .unwrap()
                    .and_hms_opt(8, 0, 0)
                    .unwrap(),
            },
            status,
        }
    }

    fn apply(queue: &mut [AppointmentView], promoted: &[i64]) {
        for v in queue.iter_mut() {
            if promoted.contains(&v.appt_id()) {
                v.status = Status::NoShow;
            }
        }
    }

    #[test]
    fn test_first_slot_never_promoted() {
        let queue = vec![view(1, 1, Status::Booked)];
        assert!(plan_no_shows(&queue).is_empty());
    }

    #[test]
    fn test_unresolved_head_blocks_queue() {
        let queue = vec![
            view(1, 1, Status::Booked),
            view(2, 2, Status::Booked),
            view(3, 3, Status::Completed),
        ];
        assert!(plan_no_shows(&queue).is_empty());
    }

    #[test]
    fn test_checked_in_head_blocks_queue() {
        let queue = vec![view(1, 1, Status::CheckedIn), view(2, 2, Status::Booked)];
        assert!(plan_no_shows(&queue).is_empty());
    }

    #[test]
    fn test_cancelled_heads_pass_over_next() {
        let queue = vec![
            view(1, 1, Status::Cancelled),
            view(2, 2, Status::Cancelled),
            view(3, 3, Status::Booked),
        ];
        assert_eq!(plan_no_shows(&queue), vec![3]);
    }

    #[test]
    fn test_promotion_propagates_in_one_pass() {
        let queue = vec![
            view(1, 1, Status::Completed),
            view(2, 2, Status::Booked),
            view(3, 3, Status::Booked),
        ];
        assert_eq!(plan_no_shows(&queue), vec![2, 3]);
    }

    #[test]
    fn test_checked_in_stops_propagation() {
        let queue = vec![
            view(1, 1, Status::Completed),
            view(2, 2, Status::Booked),
            view(3, 3, Status::CheckedIn),
            view(4, 4, Status::Booked),
        ];
        assert_eq!(plan_no_shows(&queue), vec![2]);
    }

    #[test]
    fn test_shared_slot_is_not_ahead() {
        let queue = vec![
            view(1, 1, Status::Cancelled),
            view(2, 2, Status::Booked),
            view(3, 2, Status::Booked),
        ];
        assert_eq!(plan_no_shows(&queue), vec![2, 3]);

        let blocked = vec![
            view(1, 1, Status::Booked),
            view(2, 2, Status::Cancelled),
            view(3, 2, Status::Booked),
        ];
        assert!(plan_no_shows(&blocked).is_empty());
    }

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop::sample::select(Status::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_second_pass_is_noop(
            entries in prop::collection::vec((1i64..6, status_strategy()), 0..12)
        ) {
            let mut queue: Vec<AppointmentView> = entries
                .iter()
                .enumerate()
                .map(|(i, (slot, status))| view(i as i64 + 1, *slot, *status))
                .collect();

            let first = plan_no_shows(&queue);
            apply(&mut queue, &first);
            prop_assert!(plan_no_shows(&queue).is_empty());
        }

        #[test]
        fn prop_only_booked_are_promoted(
            entries in prop::collection::vec((1i64..6, status_strategy()), 0..12)
        ) {
            let queue: Vec<AppointmentView> = entries
                .iter()
                .enumerate()
                .map(|(i, (slot, status))| view(i as i64 + 1, *slot, *status))
                .collect();

            for appt_id in plan_no_shows(&queue) {
                let v = queue.iter().find(|v| v.appt_id() == appt_id).unwrap();
                prop_assert_eq!(v.status, Status::Booked);
                prop_assert!(v.slot_seq() > 1);
            }
        }
    }
}
