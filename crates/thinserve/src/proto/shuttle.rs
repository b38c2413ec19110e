//! The long-poll delivery rendezvous between an outbound message queue and
//! the next GET that comes along to collect it.
//!
//! Three states: nothing queued and nobody waiting ([`State::Empty`]),
//! messages queued with nobody waiting ([`State::Queued`]), and nobody
//! queued but a long-poll GET already parked ([`State::Blocked`]). A second
//! GET arriving while one is already parked "bumps" the first: the older
//! waiter resolves immediately with an empty batch rather than being left to
//! time out, and the new GET takes its place.

use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

enum State {
    Empty,
    Queued(Vec<Value>),
    Blocked(oneshot::Sender<Vec<Value>>),
}

/// A single-reader, multi-writer message rendezvous for one session's
/// outbound traffic.
pub struct Shuttle {
    state: Mutex<State>,
}

impl Shuttle {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::Empty) }
    }

    /// Enqueue a message for delivery. Wakes a parked long-poll GET if one
    /// is waiting; otherwise the message sits in the queue for the next
    /// `gather_messages` call.
    pub fn send_message(&self, msg: Value) {
        let mut state = self.state.lock().expect("shuttle mutex poisoned");
        *state = match std::mem::replace(&mut *state, State::Empty) {
            State::Empty => State::Queued(vec![msg]),
            State::Queued(mut pending) => {
                pending.push(msg);
                State::Queued(pending)
            }
            State::Blocked(waiter) => {
                let _ = waiter.send(vec![msg]);
                State::Empty
            }
        };
    }

    /// Collect whatever is queued, or park until something arrives. If
    /// another `gather_messages` call is already parked, that older waiter
    /// is bumped: it resolves immediately to `[]` and this call takes its
    /// place as the new waiter.
    pub async fn gather_messages(&self) -> Vec<Value> {
        let rx = {
            let mut state = self.state.lock().expect("shuttle mutex poisoned");
            match std::mem::replace(&mut *state, State::Empty) {
                State::Empty => {
                    let (tx, rx) = oneshot::channel();
                    *state = State::Blocked(tx);
                    rx
                }
                State::Queued(pending) => {
                    *state = State::Empty;
                    return pending;
                }
                State::Blocked(old_waiter) => {
                    let _ = old_waiter.send(Vec::new());
                    let (tx, rx) = oneshot::channel();
                    *state = State::Blocked(tx);
                    rx
                }
            }
        };
        rx.await.unwrap_or_default()
    }
}

impl Default for Shuttle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queued_messages_are_delivered_in_fifo_order() {
        let shuttle = Shuttle::new();
        shuttle.send_message(json!("first"));
        shuttle.send_message(json!("second"));
        let batch = shuttle.gather_messages().await;
        assert_eq!(batch, vec![json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn gather_drains_the_queue() {
        let shuttle = Shuttle::new();
        shuttle.send_message(json!("only"));
        assert_eq!(shuttle.gather_messages().await, vec![json!("only")]);
        // A second gather with nothing queued parks; confirm it's not
        // immediately resolved by racing it against a timeout.
        let gather = shuttle.gather_messages();
        tokio::select! {
            _ = gather => panic!("gather_messages resolved with nothing queued and nobody sending"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }
    }

    #[tokio::test]
    async fn a_blocked_gather_wakes_on_send() {
        let shuttle = Shuttle::new();
        let gather = shuttle.gather_messages();
        tokio::pin!(gather);
        // Poll once to park it, via select with an immediately-ready branch.
        tokio::select! {
            biased;
            _ = &mut gather => panic!("resolved before any message was sent"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
        }
        shuttle.send_message(json!("woke you up"));
        let batch = gather.await;
        assert_eq!(batch, vec![json!("woke you up")]);
    }

    #[tokio::test]
    async fn a_second_long_poll_bumps_the_first_with_an_empty_batch() {
        let shuttle = Shuttle::new();
        let first = shuttle.gather_messages();
        tokio::pin!(first);
        tokio::select! {
            biased;
            _ = &mut first => panic!("resolved before being bumped"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
        }

        let second = shuttle.gather_messages();
        tokio::pin!(second);

        let first_result = first.await;
        assert_eq!(first_result, Vec::<Value>::new());

        shuttle.send_message(json!("for the new waiter"));
        let second_result = second.await;
        assert_eq!(second_result, vec![json!("for the new waiter")]);
    }
}
