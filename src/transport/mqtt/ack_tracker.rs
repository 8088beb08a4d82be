//! Pairing of publish requests with broker acknowledgments
//!
//! rumqttc assigns packet ids inside the network loop, so callers never see
//! them. Requests leave the loop in the order they were queued, which lets us
//! register a waiter per publish (in queue order) and bind it to the packet id
//! reported by the next `Outgoing::Publish` event.

use rumqttc::QoS;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Default)]
pub struct AckTracker {
    queued: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publish about to be queued. Must be called in queue order.
    pub fn register(&mut self, qos: QoS) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        debug!("Registered publish waiter (qos {:?})", qos);
        self.queued.push_back(tx);
        rx
    }

    /// Undo the most recent registration after the request failed to queue
    pub fn cancel_latest(&mut self) {
        self.queued.pop_back();
    }

    /// A publish was written to the socket with packet id `pkid` (0 for QoS 0)
    pub fn on_publish_sent(&mut self, pkid: u16) {
        if pkid != 0 && self.in_flight.contains_key(&pkid) {
            // Retransmission after reconnect; the waiter is already bound
            return;
        }

        match self.queued.pop_front() {
            Some(waiter) if pkid == 0 => {
                let _ = waiter.send(());
            }
            Some(waiter) => {
                self.in_flight.insert(pkid, waiter);
            }
            None => debug!("Publish {} sent without a registered waiter", pkid),
        }
    }

    /// Broker acknowledged packet `pkid` (PUBACK or PUBCOMP)
    pub fn on_acknowledged(&mut self, pkid: u16) {
        if let Some(waiter) = self.in_flight.remove(&pkid) {
            let _ = waiter.send(());
        }
    }

    /// Drop every waiter; their handles resolve with an error
    pub fn fail_all(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }

    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot::error::TryRecvError;

    #[test]
    fn test_qos0_completes_on_send() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.register(QoS::AtMostOnce);

        tracker.on_publish_sent(0);

        assert_eq!(rx.try_recv(), Ok(()));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_qos1_completes_on_puback() {
        let mut tracker = AckTracker::new();
        let mut rx = tracker.register(QoS::AtLeastOnce);

        tracker.on_publish_sent(7);
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        tracker.on_acknowledged(7);
        assert_eq!(rx.try_recv(), Ok(()));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_waiters_bind_in_queue_order() {
        let mut tracker = AckTracker::new();
        let mut presence = tracker.register(QoS::AtMostOnce);
        let mut first = tracker.register(QoS::AtLeastOnce);
        let mut second = tracker.register(QoS::AtLeastOnce);

        tracker.on_publish_sent(0);
        tracker.on_publish_sent(1);
        tracker.on_publish_sent(2);

        assert_eq!(presence.try_recv(), Ok(()));

        tracker.on_acknowledged(2);
        assert_eq!(second.try_recv(), Ok(()));
        assert_eq!(first.try_recv(), Err(TryRecvError::Empty));

        tracker.on_acknowledged(1);
        assert_eq!(first.try_recv(), Ok(()));
    }

    #[test]
    fn test_retransmission_does_not_consume_registration() {
        let mut tracker = AckTracker::new();
        let mut first = tracker.register(QoS::AtLeastOnce);
        tracker.on_publish_sent(1);

        let mut second = tracker.register(QoS::AtLeastOnce);
        // Reconnect replays pkid 1 before the new publish goes out
        tracker.on_publish_sent(1);
        tracker.on_publish_sent(2);

        tracker.on_acknowledged(1);
        tracker.on_acknowledged(2);
        assert_eq!(first.try_recv(), Ok(()));
        assert_eq!(second.try_recv(), Ok(()));
    }

    #[test]
    fn test_cancel_latest() {
        let mut tracker = AckTracker::new();
        let mut kept = tracker.register(QoS::AtLeastOnce);
        let mut cancelled = tracker.register(QoS::AtLeastOnce);
        tracker.cancel_latest();

        assert_eq!(cancelled.try_recv(), Err(TryRecvError::Closed));
        tracker.on_publish_sent(3);
        tracker.on_acknowledged(3);
        assert_eq!(kept.try_recv(), Ok(()));
    }

    #[test]
    fn test_unknown_ack_is_ignored() {
        let mut tracker = AckTracker::new();
        tracker.on_acknowledged(42);
        tracker.on_publish_sent(5);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_fail_all_closes_waiters() {
        let mut tracker = AckTracker::new();
        let mut bound = tracker.register(QoS::AtLeastOnce);
        let mut waiting = tracker.register(QoS::AtLeastOnce);
        tracker.on_publish_sent(9);

        tracker.fail_all();

        assert_eq!(bound.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(waiting.try_recv(), Err(TryRecvError::Closed));
        assert_eq!(tracker.pending(), 0);
    }
}
