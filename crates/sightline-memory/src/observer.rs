//! Read-only tail of the audit database.
//!
//! Tracks the highest detection and spoken-message id seen so far and, on
//! each [`AuditObserver::poll`], returns only rows inserted since. Meant to
//! run in a separate process against the same database file while the
//! perception loop is writing.

use serde::Serialize;

use crate::audit::{AuditError, AuditStore};
use crate::records::{DetectionRecord, SpokenMessage};

/// Rows that appeared since the previous poll.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservedBatch {
    pub detections: Vec<DetectionRecord>,
    pub messages: Vec<SpokenMessage>,
}

impl ObservedBatch {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty() && self.messages.is_empty()
    }
}

/// Watermark-based poller over `detection` and `spoken_message`.
#[derive(Debug, Clone)]
pub struct AuditObserver {
    detection_mark: i64,
    message_mark: i64,
    page_size: usize,
}

impl AuditObserver {
    /// Start from the beginning of the tables, fetching at most `page_size`
    /// rows per table per poll.
    pub fn new(page_size: usize) -> Self {
        Self {
            detection_mark: 0,
            message_mark: 0,
            page_size: page_size.max(1),
        }
    }

    /// Skip everything already in the database.
    pub fn from_tail(store: &AuditStore, page_size: usize) -> Result<Self, AuditError> {
        let (detection_mark, message_mark) = store.latest_ids()?;
        Ok(Self {
            detection_mark,
            message_mark,
            ..Self::new(page_size)
        })
    }

    pub fn poll(&mut self, store: &AuditStore) -> Result<ObservedBatch, AuditError> {
        let detections = store.detections_after(self.detection_mark, self.page_size)?;
        let messages = store.messages_after(self.message_mark, self.page_size)?;

        if let Some(last) = detections.last() {
            self.detection_mark = last.id.0;
        }
        if let Some(last) = messages.last() {
            self.message_mark = last.id.0;
        }
        Ok(ObservedBatch { detections, messages })
    }

    pub fn detection_watermark(&self) -> i64 {
        self.detection_mark
    }

    pub fn message_watermark(&self) -> i64 {
        self.message_mark
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_types::{BoundingBox, Detection};

    fn seeded() -> (AuditStore, crate::records::SessionId, crate::records::FrameId) {
        let store = AuditStore::open_in_memory().unwrap();
        let session = store.create_session("test", None, None).unwrap();
        let frame = store.insert_frame_event(session, 3, 5, 1).unwrap();
        (store, session, frame)
    }

    #[test]
    fn poll_returns_only_new_rows() {
        let (store, session, frame) = seeded();
        let mut observer = AuditObserver::new(10);
        store
            .insert_detection(session, frame, &Detection::new("person", 0.9, BoundingBox::default()))
            .unwrap();
        store.insert_spoken_message(session, Some(frame), "person", "en").unwrap();

        let first = observer.poll(&store).unwrap();
        assert_eq!(first.detections.len(), 1);
        assert_eq!(first.messages.len(), 1);
        assert!(observer.poll(&store).unwrap().is_empty());

        store
            .insert_detection(session, frame, &Detection::new("dog", 0.7, BoundingBox::default()))
            .unwrap();
        let second = observer.poll(&store).unwrap();
        assert_eq!(second.detections.len(), 1);
        assert_eq!(second.detections[0].label, "dog");
        assert!(second.messages.is_empty());
    }

    #[test]
    fn page_size_caps_each_poll() {
        let (store, session, frame) = seeded();
        for _ in 0..5 {
            store
                .insert_detection(session, frame, &Detection::new("cup", 0.5, BoundingBox::default()))
                .unwrap();
        }
        let mut observer = AuditObserver::new(2);
        assert_eq!(observer.poll(&store).unwrap().detections.len(), 2);
        assert_eq!(observer.poll(&store).unwrap().detections.len(), 2);
        assert_eq!(observer.poll(&store).unwrap().detections.len(), 1);
        assert_eq!(observer.detection_watermark(), 5);
    }

    #[test]
    fn from_tail_skips_existing_rows() {
        let (store, session, frame) = seeded();
        store.insert_spoken_message(session, Some(frame), "old", "en").unwrap();
        store
            .insert_detection(session, frame, &Detection::new("cup", 0.5, BoundingBox::default()))
            .unwrap();
        let mut observer = AuditObserver::from_tail(&store, 1).unwrap();
        assert_eq!(observer.detection_watermark(), 1);
        assert_eq!(observer.message_watermark(), 1);
        assert!(observer.poll(&store).unwrap().is_empty());

        store.insert_spoken_message(session, None, "new", "en").unwrap();
        let batch = observer.poll(&store).unwrap();
        assert_eq!(batch.messages[0].text, "new");
    }
}
