use std::cmp::Ordering;

use serde::Serialize;

use crate::types::{PatientId, SimTime};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Event {
    /// Generator wakes at midnight of scenario day `day` and creates that day's batch.
    GenerateBatch { day: usize },
    /// A generated patient finishes its intra-day wait and is admitted.
    PatientArrives { patient: PatientId },
    /// The patient's stay is over; its bed holds are released.
    PatientDischarged { patient: PatientId },
}

impl Event {
    /// Tie-break among events at the same instant: discharges free beds
    /// before arrivals take them, and a new batch is generated last.
    fn rank(&self) -> u8 {
        match self {
            Event::PatientDischarged { .. } => 0,
            Event::PatientArrives { .. } => 1,
            Event::GenerateBatch { .. } => 2,
        }
    }
}

/// Queue entry and log record. Ordered by `time`, then event rank,
/// then `seq` (scheduling order), so equal-time events are FIFO per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimEvent {
    pub time: SimTime,
    pub seq: u64,
    pub event: Event,
}

impl Ord for SimEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.event.rank().cmp(&other.event.rank()))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for SimEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    use super::*;

    fn ev(time: f64, seq: u64, event: Event) -> SimEvent {
        SimEvent { time: SimTime(time), seq, event }
    }

    #[test]
    fn earlier_time_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(ev(2.0, 0, Event::GenerateBatch { day: 2 })));
        heap.push(Reverse(ev(0.5, 1, Event::PatientArrives { patient: PatientId(0) })));
        heap.push(Reverse(ev(1.0, 2, Event::GenerateBatch { day: 1 })));
        let times: Vec<f64> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.time.0)).collect();
        assert_eq!(times, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn same_time_orders_discharge_arrival_batch() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(ev(3.0, 0, Event::GenerateBatch { day: 3 })));
        heap.push(Reverse(ev(3.0, 1, Event::PatientArrives { patient: PatientId(7) })));
        heap.push(Reverse(ev(3.0, 2, Event::PatientDischarged { patient: PatientId(1) })));
        let kinds: Vec<u8> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.event.rank())).collect();
        assert_eq!(kinds, vec![0, 1, 2]);
    }

    #[test]
    fn same_time_same_kind_is_fifo() {
        let a = ev(1.0, 5, Event::PatientArrives { patient: PatientId(5) });
        let b = ev(1.0, 9, Event::PatientArrives { patient: PatientId(9) });
        assert!(a < b);
    }

    #[test]
    fn sim_event_serializes_time_and_event_fields() {
        let e = ev(1.5, 3, Event::PatientDischarged { patient: PatientId(4) });
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, r#"{"time":1.5,"seq":3,"event":{"PatientDischarged":{"patient":4}}}"#);
    }
}
