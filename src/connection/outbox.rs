//! Bounded FIFO of frames queued while the channel is down.
//!
//! When the queue is full the oldest droppable frame — application
//! `message` traffic — is evicted first; control frames such as
//! `task_update` are retained as long as possible. Every drop is logged.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::protocol::Frame;

/// Ordered buffer of frames awaiting a connection.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: Mutex<VecDeque<Frame>>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self { frames: Mutex::new(VecDeque::new()), capacity: capacity.max(1) }
    }

    /// Enqueue a frame, evicting under pressure. Returns whether an older
    /// frame had to be dropped to make room.
    pub fn push(&self, frame: Frame) -> bool {
        let mut frames = self.frames.lock();
        let mut dropped = false;
        if frames.len() >= self.capacity {
            let victim = frames
                .iter()
                .position(Frame::is_droppable)
                .unwrap_or(0);
            if let Some(evicted) = frames.remove(victim) {
                log::warn!(
                    "outbox full ({} frames); dropping {}",
                    self.capacity,
                    evicted
                        .correlation_id()
                        .map(|id| format!("frame `{id}`"))
                        .unwrap_or_else(|| "control frame".to_string())
                );
                dropped = true;
            }
        }
        frames.push_back(frame);
        dropped
    }

    /// Take every queued frame, oldest first.
    pub fn drain(&self) -> Vec<Frame> {
        self.frames.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::UpdateStatus;
    use serde_json::json;

    fn message_frame(id: &str) -> Frame {
        Frame::Message {
            id: id.to_string(),
            from: "a1".to_string(),
            to: "a2".to_string(),
            content: json!({}),
        }
    }

    fn update_frame(task_id: &str) -> Frame {
        Frame::TaskUpdate {
            task_id: task_id.to_string(),
            status: UpdateStatus::Completed,
            result: None,
            error: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = OutboundQueue::new(8);
        queue.push(message_frame("m1"));
        queue.push(message_frame("m2"));
        queue.push(update_frame("t1"));

        let ids: Vec<_> = queue
            .drain()
            .iter()
            .map(|f| f.correlation_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "t1"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_oldest_message_first() {
        let queue = OutboundQueue::new(3);
        queue.push(update_frame("t1"));
        queue.push(message_frame("m1"));
        queue.push(message_frame("m2"));

        // Full: the oldest `message` (m1) goes, not the older task_update.
        assert!(queue.push(update_frame("t2")));

        let ids: Vec<_> = queue
            .drain()
            .iter()
            .map(|f| f.correlation_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["t1", "m2", "t2"]);
    }

    #[test]
    fn test_all_control_frames_drops_oldest() {
        let queue = OutboundQueue::new(2);
        queue.push(update_frame("t1"));
        queue.push(update_frame("t2"));
        assert!(queue.push(update_frame("t3")));

        let ids: Vec<_> = queue
            .drain()
            .iter()
            .map(|f| f.correlation_id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["t2", "t3"]);
    }

    #[test]
    fn test_push_below_capacity_never_drops() {
        let queue = OutboundQueue::new(4);
        assert!(!queue.push(message_frame("m1")));
        assert!(!queue.push(message_frame("m2")));
        assert_eq!(queue.len(), 2);
    }
}
