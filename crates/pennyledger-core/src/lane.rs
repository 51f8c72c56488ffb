//! Per-transaction write ordering
//!
//! Every remote write for a transaction id takes a ticket when it is issued.
//! A ticket's remote call may start only once every earlier ticket for the
//! same id has finished or been dropped, so the store sees writes in the
//! order the user made them.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct LaneState {
    next_ticket: u64,
    /// Lowest ticket that has not finished
    serving: u64,
    finished: BTreeSet<u64>,
}

#[derive(Debug)]
struct Lane {
    state: Mutex<LaneState>,
    turn: watch::Sender<u64>,
}

impl Lane {
    fn new() -> Self {
        let (turn, _) = watch::channel(0);
        Self {
            state: Mutex::new(LaneState::default()),
            turn,
        }
    }

    fn state(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_idle(&self) -> bool {
        let state = self.state();
        state.serving == state.next_ticket
    }

    fn finish(&self, ticket: u64) {
        let mut state = self.state();
        state.finished.insert(ticket);
        loop {
            let serving = state.serving;
            if !state.finished.remove(&serving) {
                break;
            }
            state.serving += 1;
        }
        self.turn.send_replace(state.serving);
    }
}

/// Issued position in a transaction's write lane
#[derive(Debug)]
pub(crate) struct Ticket {
    lane: Arc<Lane>,
    number: u64,
}

impl Ticket {
    /// Resolve once all earlier writes for the same id are done
    pub(crate) async fn wait_turn(&self) {
        let mut turn = self.lane.turn.subscribe();
        let number = self.number;
        let _ = turn.wait_for(|serving| *serving >= number).await;
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.lane.finish(self.number);
    }
}

/// Write lanes keyed by transaction id
#[derive(Debug, Default)]
pub(crate) struct WriteLanes {
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
}

impl WriteLanes {
    /// Take the next ticket for `id`, synchronously at issuance time
    pub(crate) fn issue(&self, id: &str) -> Ticket {
        let mut lanes = self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        lanes.retain(|key, lane| key == id || !lane.is_idle());
        let lane = lanes
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Lane::new()))
            .clone();
        let number = {
            let mut state = lane.state();
            let number = state.next_ticket;
            state.next_ticket += 1;
            number
        };
        Ticket { lane, number }
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes.lock().map(|l| l.len()).unwrap_or(0)
    }
}
