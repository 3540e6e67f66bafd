use opencv::core::{Point, Rect, Vector};
use opencv::imgproc::{self, CHAIN_APPROX_SIMPLE, COLOR_BGR2GRAY, RETR_TREE};
use opencv::prelude::*;
use plate_watch_common::config::DetectorConfig;
use tracing::debug;

/// A rectangular piece of a frame that might hold a number plate.
pub struct Candidate {
    pub bbox: Rect,
    /// Contiguous grayscale copy of the frame under `bbox`.
    pub region: Mat,
}

/// Open size window for plate bounding boxes: both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeWindow {
    pub min_width: i32,
    pub max_width: i32,
    pub min_height: i32,
    pub max_height: i32,
}

impl SizeWindow {
    pub fn contains(&self, width: i32, height: i32) -> bool {
        self.min_width < width
            && width < self.max_width
            && self.min_height < height
            && height < self.max_height
    }
}

/// Contour-based plate finder.
///
/// Pipeline: grayscale, Canny edges, contour tree, polygon approximation at
/// `epsilon_ratio` of each contour's perimeter. Quadrilaterals whose
/// axis-aligned bounding box fits the [`SizeWindow`] become candidates, in
/// contour discovery order.
pub struct PlateDetector {
    canny_low: f64,
    canny_high: f64,
    epsilon_ratio: f64,
    window: SizeWindow,
}

impl PlateDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            canny_low: config.canny_low,
            canny_high: config.canny_high,
            epsilon_ratio: config.epsilon_ratio,
            window: SizeWindow {
                min_width: config.min_width,
                max_width: config.max_width,
                min_height: config.min_height,
                max_height: config.max_height,
            },
        }
    }

    pub fn detect(&self, frame: &Mat) -> opencv::Result<Vec<Candidate>> {
        let mut gray = Mat::default();
        imgproc::cvt_color_def(frame, &mut gray, COLOR_BGR2GRAY)?;

        let mut edges = Mat::default();
        imgproc::canny_def(&gray, &mut edges, self.canny_low, self.canny_high)?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours_def(&edges, &mut contours, RETR_TREE, CHAIN_APPROX_SIMPLE)?;

        let mut candidates = Vec::new();
        for contour in contours.iter() {
            let perimeter = imgproc::arc_length(&contour, true)?;
            let mut polygon = Vector::<Point>::new();
            imgproc::approx_poly_dp(&contour, &mut polygon, self.epsilon_ratio * perimeter, true)?;
            if polygon.len() != 4 {
                continue;
            }

            let bbox = imgproc::bounding_rect(&polygon)?;
            if !self.window.contains(bbox.width, bbox.height) {
                continue;
            }

            let region = Mat::roi(&gray, bbox)?.try_clone()?;
            candidates.push(Candidate { bbox, region });
        }

        debug!(
            contours = contours.len(),
            candidates = candidates.len(),
            "plate candidates extracted"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn detector() -> PlateDetector {
        PlateDetector::new(&DetectorConfig::default())
    }

    fn frame_with(rects: &[Rect]) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(0.0)).unwrap();
        for rect in rects {
            imgproc::rectangle(
                &mut frame,
                *rect,
                Scalar::all(255.0),
                imgproc::FILLED,
                imgproc::LINE_8,
                0,
            )
            .unwrap();
        }
        frame
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let window = detector().window;
        assert!(window.contains(61, 16));
        assert!(window.contains(199, 79));
        assert!(!window.contains(60, 40));
        assert!(!window.contains(200, 40));
        assert!(!window.contains(100, 15));
        assert!(!window.contains(100, 80));
        assert!(!window.contains(0, 0));
    }

    #[test]
    fn blank_frame_has_no_candidates() {
        let candidates = detector().detect(&frame_with(&[])).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn plate_sized_rectangle_is_found() {
        let plate = Rect::new(100, 100, 120, 40);
        let candidates = detector().detect(&frame_with(&[plate])).unwrap();
        assert!(!candidates.is_empty());

        for candidate in &candidates {
            let b = candidate.bbox;
            assert!((b.x - plate.x).abs() <= 2, "{b:?}");
            assert!((b.y - plate.y).abs() <= 2, "{b:?}");
            assert!((b.width - plate.width).abs() <= 3, "{b:?}");
            assert!((b.height - plate.height).abs() <= 3, "{b:?}");
            assert_eq!(candidate.region.cols(), b.width);
            assert_eq!(candidate.region.rows(), b.height);
            assert_eq!(candidate.region.channels(), 1);
        }
    }

    #[test]
    fn out_of_window_shapes_are_dropped() {
        let too_wide = Rect::new(10, 10, 260, 40);
        let too_small = Rect::new(20, 150, 30, 30);
        let too_tall = Rect::new(200, 100, 100, 120);
        let candidates = detector()
            .detect(&frame_with(&[too_wide, too_small, too_tall]))
            .unwrap();
        assert!(candidates.is_empty());
    }
}
