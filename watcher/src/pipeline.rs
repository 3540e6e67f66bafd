use plate_watch_common::plate::{Classification, PlateValidator};
use std::ops::ControlFlow;
use tracing::{debug, error, info, warn};

use crate::bus::PlateBus;
use crate::camera::FrameSource;
use crate::db::{InsertOutcome, PlateDb};
use crate::detector::PlateDetector;
use crate::notify::Notifier;
use crate::ocr::TextRecognizer;

/// Why the capture loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A known plate was read; carries the plate string.
    MatchFound(String),
    /// The frame source ended or failed.
    CameraFailure,
}

/// Owns everything a recognition touches after OCR: the known-plate set,
/// the store, the bus and the notifier.
pub struct PlateWatcher<B, N> {
    validator: PlateValidator,
    db: PlateDb,
    bus: B,
    notifier: N,
}

impl<B: PlateBus, N: Notifier> PlateWatcher<B, N> {
    pub fn new(validator: PlateValidator, db: PlateDb, bus: B, notifier: N) -> Self {
        Self {
            validator,
            db,
            bus,
            notifier,
        }
    }

    /// Read frames until a known plate shows up or the source gives out.
    pub fn run<S, R>(
        &mut self,
        source: &mut S,
        detector: &PlateDetector,
        recognizer: &mut R,
    ) -> StopReason
    where
        S: FrameSource,
        R: TextRecognizer,
    {
        let mut frames: u64 = 0;

        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    error!(frames, "failed to capture frame from camera");
                    return StopReason::CameraFailure;
                }
                Err(e) => {
                    error!(error = %e, frames, "camera error");
                    return StopReason::CameraFailure;
                }
            };

            frames += 1;
            if frames % 100 == 0 {
                debug!(frames, "frames processed");
            }

            let candidates = match detector.detect(&frame) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, frames, "plate detection failed, skipping frame");
                    continue;
                }
            };

            for candidate in candidates {
                let text = match recognizer.recognize(&candidate.region) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(error = %e, bbox = ?candidate.bbox, "OCR failed, skipping candidate");
                        continue;
                    }
                };

                if let ControlFlow::Break(plate) = self.handle_text(&text) {
                    return StopReason::MatchFound(plate);
                }
            }
        }
    }

    /// Publish, classify and act on one recognized string. `Break` carries a
    /// known plate and means the watcher should stop.
    pub fn handle_text(&mut self, text: &str) -> ControlFlow<String> {
        info!(text, "detected plate");

        if let Err(e) = self.bus.publish(text) {
            warn!(error = %e, text, "failed to publish recognition");
        }

        match self.validator.classify(text) {
            Classification::Match => {
                info!(plate = text, "match found");
                self.persist(text);
                ControlFlow::Break(text.to_string())
            }
            Classification::NewValid => {
                info!(plate = text, "new valid plate format detected");
                self.validator.learn(text);
                self.persist(text);
                if let Err(e) = self.notifier.notify_new_plate(text) {
                    error!(error = %e, plate = text, "failed to send new plate email");
                }
                ControlFlow::Continue(())
            }
            Classification::Noise => ControlFlow::Continue(()),
        }
    }

    fn persist(&self, plate: &str) {
        match self.db.insert(plate) {
            Ok(InsertOutcome::Inserted { id }) => info!(id, plate, "saved plate to database"),
            Ok(InsertOutcome::Duplicate) => match self.db.find(plate) {
                Ok(Some(record)) => warn!(
                    plate = record.plate_number,
                    id = record.id,
                    first_seen = %record.timestamp,
                    "plate already exists in the database"
                ),
                Ok(None) => warn!(plate, "plate already exists in the database"),
                Err(e) => warn!(
                    error = %e,
                    plate,
                    "plate already exists in the database, lookup failed"
                ),
            },
            Err(e) => error!(error = %e, plate, "database error, plate not recorded"),
        }
    }

    /// Hand back the bus so the caller can disconnect it.
    pub fn into_bus(self) -> B {
        self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use crate::camera::CameraError;
    use crate::notify::NotifyError;
    use crate::ocr::OcrError;
    use opencv::core::{Rect, Scalar, CV_8UC3};
    use opencv::imgproc;
    use opencv::prelude::*;
    use plate_watch_common::config::{DetectorConfig, PlatesConfig};
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::Path;

    #[derive(Default)]
    struct RecordingBus {
        published: Vec<String>,
    }

    impl PlateBus for RecordingBus {
        fn publish(&mut self, text: &str) -> Result<(), BusError> {
            self.published.push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify_new_plate(&self, plate: &str) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push(plate.to_string());
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify_new_plate(&self, _plate: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Message(lettre::error::Error::MissingFrom))
        }
    }

    struct ScriptedFrames {
        frames: VecDeque<Mat>,
        reads: usize,
    }

    impl FrameSource for ScriptedFrames {
        fn next_frame(&mut self) -> Result<Option<Mat>, CameraError> {
            self.reads += 1;
            Ok(self.frames.pop_front())
        }
    }

    struct ScriptedOcr {
        texts: VecDeque<String>,
        calls: usize,
    }

    impl TextRecognizer for ScriptedOcr {
        fn recognize(&mut self, _region: &Mat) -> Result<String, OcrError> {
            self.calls += 1;
            Ok(self.texts.pop_front().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FailingBus {
        attempts: usize,
    }

    impl PlateBus for FailingBus {
        fn publish(&mut self, _text: &str) -> Result<(), BusError> {
            self.attempts += 1;
            Err(BusError::Publish(
                "number_plate".into(),
                KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull),
            ))
        }
    }

    fn watcher_with<B: PlateBus, N: Notifier>(bus: B, notifier: N) -> PlateWatcher<B, N> {
        PlateWatcher::new(
            PlateValidator::from_config(&PlatesConfig::default()).unwrap(),
            PlateDb::open(Path::new(":memory:")).unwrap(),
            bus,
            notifier,
        )
    }

    fn watcher<N: Notifier>(notifier: N) -> PlateWatcher<RecordingBus, N> {
        watcher_with(RecordingBus::default(), notifier)
    }

    fn plate_frame() -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(0.0)).unwrap();
        imgproc::rectangle(
            &mut frame,
            Rect::new(100, 100, 120, 40),
            Scalar::all(255.0),
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )
        .unwrap();
        frame
    }

    #[test]
    fn known_plate_stops_and_is_stored_without_email() {
        let mut w = watcher(RecordingNotifier::default());
        let flow = w.handle_text("WB 74 AH 6561");

        assert_eq!(flow, ControlFlow::Break("WB 74 AH 6561".to_string()));
        assert_eq!(w.bus.published, vec!["WB 74 AH 6561"]);
        assert_eq!(w.db.count().unwrap(), 1);
        assert!(w.notifier.sent.borrow().is_empty());
    }

    #[test]
    fn new_valid_plate_is_stored_emailed_and_loop_continues() {
        let mut w = watcher(RecordingNotifier::default());
        let flow = w.handle_text("AB 12 CD 3456");

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(w.bus.published, vec!["AB 12 CD 3456"]);
        assert!(w.db.find("AB 12 CD 3456").unwrap().is_some());
        assert_eq!(*w.notifier.sent.borrow(), vec!["AB 12 CD 3456".to_string()]);
        assert!(w.validator.is_known("AB 12 CD 3456"));
    }

    #[test]
    fn empty_text_is_published_but_nothing_else() {
        let mut w = watcher(RecordingNotifier::default());
        assert_eq!(w.handle_text(""), ControlFlow::Continue(()));
        assert_eq!(w.bus.published, vec![""]);
        assert_eq!(w.db.count().unwrap(), 0);
        assert!(w.notifier.sent.borrow().is_empty());
    }

    #[test]
    fn unspaced_plate_is_noise() {
        let mut w = watcher(RecordingNotifier::default());
        assert_eq!(w.handle_text("AB12CD3456"), ControlFlow::Continue(()));
        assert_eq!(w.bus.published, vec!["AB12CD3456"]);
        assert_eq!(w.db.count().unwrap(), 0);
        assert!(w.notifier.sent.borrow().is_empty());
    }

    #[test]
    fn new_plate_emails_once_then_matches() {
        let mut w = watcher(RecordingNotifier::default());
        assert_eq!(w.handle_text("AB 12 CD 3456"), ControlFlow::Continue(()));
        // the learned plate is now known: second sighting stops the watcher
        assert_eq!(
            w.handle_text("AB 12 CD 3456"),
            ControlFlow::Break("AB 12 CD 3456".to_string())
        );
        assert_eq!(w.notifier.sent.borrow().len(), 1);
        assert_eq!(w.db.count().unwrap(), 1);
        assert_eq!(w.bus.published.len(), 2);
    }

    #[test]
    fn email_failure_does_not_undo_persistence() {
        let mut w = watcher(FailingNotifier);
        assert_eq!(w.handle_text("AB 12 CD 3456"), ControlFlow::Continue(()));
        assert_eq!(w.db.count().unwrap(), 1);
        assert!(w.validator.is_known("AB 12 CD 3456"));
    }

    #[test]
    fn bus_failure_does_not_stop_processing() {
        let mut w = watcher_with(FailingBus::default(), RecordingNotifier::default());

        assert_eq!(w.handle_text("AB 12 CD 3456"), ControlFlow::Continue(()));
        assert!(w.db.find("AB 12 CD 3456").unwrap().is_some());
        assert_eq!(*w.notifier.sent.borrow(), vec!["AB 12 CD 3456".to_string()]);

        assert_eq!(
            w.handle_text("WB 74 AH 6561"),
            ControlFlow::Break("WB 74 AH 6561".to_string())
        );
        assert_eq!(w.bus.attempts, 2);
        assert_eq!(w.db.count().unwrap(), 2);
    }

    #[test]
    fn store_failure_still_emails_and_matches() {
        let mut w = watcher(RecordingNotifier::default());
        w.db.conn().execute_batch("DROP TABLE plates;").unwrap();

        assert_eq!(w.handle_text("AB 12 CD 3456"), ControlFlow::Continue(()));
        assert_eq!(*w.notifier.sent.borrow(), vec!["AB 12 CD 3456".to_string()]);
        assert!(w.validator.is_known("AB 12 CD 3456"));

        assert!(w.handle_text("WB 74 AH 6561").is_break());
        assert_eq!(w.bus.published, vec!["AB 12 CD 3456", "WB 74 AH 6561"]);
    }

    #[test]
    fn plate_already_in_store_still_matches() {
        let mut w = watcher(RecordingNotifier::default());
        w.db.insert("WB 74 AH 6561").unwrap();
        assert!(w.handle_text("WB 74 AH 6561").is_break());
        assert_eq!(w.db.count().unwrap(), 1);
    }

    #[test]
    fn end_of_stream_on_first_read_touches_nothing() {
        let mut w = watcher(RecordingNotifier::default());
        let mut source = ScriptedFrames {
            frames: VecDeque::new(),
            reads: 0,
        };
        let mut ocr = ScriptedOcr {
            texts: VecDeque::new(),
            calls: 0,
        };
        let detector = PlateDetector::new(&DetectorConfig::default());

        let reason = w.run(&mut source, &detector, &mut ocr);

        assert_eq!(reason, StopReason::CameraFailure);
        assert_eq!(source.reads, 1);
        assert_eq!(ocr.calls, 0);
        assert!(w.bus.published.is_empty());
        assert_eq!(w.db.count().unwrap(), 0);
    }

    #[test]
    fn run_stops_on_known_plate() {
        let mut w = watcher(RecordingNotifier::default());
        let mut source = ScriptedFrames {
            frames: VecDeque::from([plate_frame(), plate_frame()]),
            reads: 0,
        };
        let mut ocr = ScriptedOcr {
            texts: VecDeque::from(["WB 74 AH 6561".to_string()]),
            calls: 0,
        };
        let detector = PlateDetector::new(&DetectorConfig::default());

        let reason = w.run(&mut source, &detector, &mut ocr);

        assert_eq!(reason, StopReason::MatchFound("WB 74 AH 6561".into()));
        assert_eq!(source.reads, 1);
        assert_eq!(ocr.calls, 1);
        assert_eq!(w.bus.published, vec!["WB 74 AH 6561"]);
        assert_eq!(w.db.count().unwrap(), 1);
    }

    #[test]
    fn run_keeps_going_past_new_plates_until_frames_end() {
        let mut w = watcher(RecordingNotifier::default());
        let mut source = ScriptedFrames {
            frames: VecDeque::from([plate_frame()]),
            reads: 0,
        };
        let mut ocr = ScriptedOcr {
            texts: VecDeque::from(["AB 12 CD 3456".to_string()]),
            calls: 0,
        };
        let detector = PlateDetector::new(&DetectorConfig::default());

        let reason = w.run(&mut source, &detector, &mut ocr);

        assert_eq!(reason, StopReason::CameraFailure);
        assert_eq!(source.reads, 2);
        assert!(ocr.calls >= 1);
        assert_eq!(w.notifier.sent.borrow().len(), 1);
        assert_eq!(w.db.count().unwrap(), 1);
    }
}
