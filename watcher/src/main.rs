mod bus;
mod camera;
mod db;
mod detector;
mod notify;
mod ocr;
mod pipeline;

use bus::KafkaBus;
use camera::Camera;
use db::PlateDb;
use detector::PlateDetector;
use notify::SmtpNotifier;
use ocr::TesseractRecognizer;
use pipeline::{PlateWatcher, StopReason};
use plate_watch_common::config::Config;
use plate_watch_common::plate::PlateValidator;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        camera = config.camera.index,
        brokers = config.kafka.brokers,
        topic = config.kafka.topic,
        database = config.database.path,
        known_plates = config.plates.known.len(),
        "starting plate-watch"
    );

    // The bus must be reachable before anything else is touched.
    let bus = match KafkaBus::connect(&config.kafka) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to connect to message bus");
            std::process::exit(1);
        }
    };

    let db = match PlateDb::open(Path::new(&config.database.path)) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to open plate database");
            std::process::exit(1);
        }
    };
    match db.count() {
        Ok(n) => info!(plates = n, "plates on record"),
        Err(e) => error!(error = %e, "failed to count stored plates"),
    }

    let validator = match PlateValidator::from_config(&config.plates) {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, format = config.plates.format, "invalid plate format pattern");
            std::process::exit(1);
        }
    };
    if validator.is_empty() {
        warn!("no known plates configured, the watcher only stops on plates it learns");
    } else {
        info!(known_plates = validator.len(), "known plates loaded");
    }

    let notifier = match SmtpNotifier::new(&config.email) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "invalid email configuration");
            std::process::exit(1);
        }
    };

    let mut recognizer = match TesseractRecognizer::new(&config.ocr) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to initialize OCR");
            std::process::exit(1);
        }
    };

    let detector = PlateDetector::new(&config.detector);
    let mut watcher = PlateWatcher::new(validator, db, bus, notifier);

    let mut camera = match Camera::open(&config.camera) {
        Ok(c) => c,
        Err(e) => {
            // Same outcome as a camera that stops delivering frames.
            error!(error = %e, "failed to open camera");
            watcher.into_bus().disconnect();
            return;
        }
    };

    info!("entering capture loop");
    let reason = watcher.run(&mut camera, &detector, &mut recognizer);

    camera.release();
    watcher.into_bus().disconnect();

    match reason {
        StopReason::MatchFound(plate) => info!(plate, "stopping after known plate match"),
        StopReason::CameraFailure => info!("stopping after camera failure"),
    }
}
