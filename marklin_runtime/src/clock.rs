//! Clock service (§4.2): tick counter, `Delay`/`DelayUntil`, and the
//! notifier that turns a hardware tick interrupt into a message.
//!
//! Ordering guarantee: every task whose `wake_tick <= now` is replied to
//! before any later-waking task, in tick order; ties are broken by
//! insertion order. This is implemented with a binary min-heap keyed on
//! `(wake_tick, sequence)`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread;
use std::time::Duration;

use marklin_common::consts::TICK_MS;
use marklin_common::ids::{TaskId, Tick};

use crate::ipc::{channel, Mailbox, ReplyToken};

enum Request {
    Time,
    Delay(u64),
    DelayUntil(Tick),
}

enum Reply {
    Time(Tick),
    Woken(Tick),
}

/// Client handle to the clock service.
#[derive(Clone)]
pub struct ClockHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl ClockHandle {
    /// `Time()`: the current tick count.
    pub fn time(&self, me: TaskId) -> Tick {
        match self.mailbox.call(me, Request::Time) {
            Reply::Time(t) => t,
            Reply::Woken(_) => unreachable!("Time always replies with Reply::Time"),
        }
    }

    /// `Delay(ticks)`: block until `ticks` ticks have elapsed, return the
    /// tick at which the caller was woken.
    pub fn delay(&self, me: TaskId, ticks: u64) -> Tick {
        match self.mailbox.call(me, Request::Delay(ticks)) {
            Reply::Woken(t) => t,
            Reply::Time(_) => unreachable!("Delay always replies with Reply::Woken"),
        }
    }

    /// `DelayUntil(tick)`: block until the clock reaches `tick` (a no-op
    /// wake at the current tick if `tick` has already passed).
    pub fn delay_until(&self, me: TaskId, tick: Tick) -> Tick {
        match self.mailbox.call(me, Request::DelayUntil(tick)) {
            Reply::Woken(t) => t,
            Reply::Time(_) => unreachable!("DelayUntil always replies with Reply::Woken"),
        }
    }
}

struct WaitEntry {
    wake_tick: Tick,
    seq: u64,
    token: ReplyToken<Reply>,
}

impl PartialEq for WaitEntry {
    fn eq(&self, other: &Self) -> bool {
        self.wake_tick == other.wake_tick && self.seq == other.seq
    }
}
impl Eq for WaitEntry {}

impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitEntry {
    /// Reversed so [`BinaryHeap`] (a max-heap) behaves as a min-heap over
    /// `(wake_tick, seq)`.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .wake_tick
            .cmp(&self.wake_tick)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Spawn the clock server. `tick_period` is the wall-clock duration of one
/// tick; production wiring uses [`TICK_MS`], tests use a much shorter period
/// so the ordering guarantees can be exercised quickly.
pub fn spawn(tick_period: Duration) -> ClockHandle {
    let (mailbox, endpoint) = channel();
    thread::Builder::new()
        .name("clock_server".into())
        .spawn(move || run(endpoint, tick_period))
        .expect("failed to spawn clock_server thread");
    ClockHandle { mailbox }
}

/// Spawn the clock server at the production tick rate ([`TICK_MS`]).
pub fn spawn_realtime() -> ClockHandle {
    spawn(Duration::from_millis(TICK_MS))
}

fn run(endpoint: crate::ipc::ServerEndpoint<Request, Reply>, tick_period: Duration) {
    let mut now = Tick(0);
    let mut wait_list: BinaryHeap<WaitEntry> = BinaryHeap::new();
    let mut next_seq: u64 = 0;

    loop {
        match endpoint.receive_timeout(tick_period) {
            Some(call) => {
                let (_from, request, token) = call.into_parts();
                match request {
                    Request::Time => token.reply(Reply::Time(now)),
                    Request::Delay(ticks) => {
                        let wake_tick = now.add(ticks.max(1));
                        wait_list.push(WaitEntry { wake_tick, seq: next_seq, token });
                        next_seq += 1;
                    }
                    Request::DelayUntil(target) => {
                        if target <= now {
                            token.reply(Reply::Woken(now));
                        } else {
                            wait_list.push(WaitEntry { wake_tick: target, seq: next_seq, token });
                            next_seq += 1;
                        }
                    }
                }
            }
            None => {
                // Tick interrupt notifier fired: advance the clock and wake
                // every task whose wake_tick has arrived, in heap order.
                now = now.add(1);
                while let Some(top) = wait_list.peek() {
                    if top.wake_tick <= now {
                        let entry = wait_list.pop().expect("peeked Some");
                        entry.token.reply(Reply::Woken(now));
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn time_starts_at_zero() {
        let clock = spawn(Duration::from_millis(1));
        assert_eq!(clock.time(TaskId(1)), Tick(0));
    }

    #[test]
    fn delay_wakes_after_requested_ticks() {
        let clock = spawn(Duration::from_millis(2));
        let before = clock.time(TaskId(1));
        let woken_at = clock.delay(TaskId(1), 5);
        assert!(woken_at.since(before).unwrap() >= 5);
    }

    #[test]
    fn delay_until_past_tick_returns_immediately() {
        let clock = spawn(Duration::from_millis(50));
        let woken_at = clock.delay_until(TaskId(1), Tick(0));
        assert_eq!(woken_at, Tick(0));
    }

    #[test]
    fn ordering_matches_scenario_s2() {
        // T1 Delay(10) at tick 0, T2 DelayUntil(5) at tick 1: T2 must be
        // woken strictly before T1, and T2's wake tick must be <= T1's.
        let clock = spawn(Duration::from_millis(3));
        let order = Arc::new(Mutex::new(Vec::new()));

        let clock1 = clock.clone();
        let order1 = order.clone();
        let t1 = thread::spawn(move || {
            clock1.delay(TaskId(1), 10);
            order1.lock().unwrap().push(1);
        });

        thread::sleep(Duration::from_millis(5));

        let clock2 = clock.clone();
        let order2 = order.clone();
        let t2 = thread::spawn(move || {
            clock2.delay(TaskId(2), 4);
            order2.lock().unwrap().push(2);
        });

        t1.join().unwrap();
        t2.join().unwrap();
        let seen = order.lock().unwrap().clone();
        assert_eq!(seen, vec![2, 1]);
    }
}
