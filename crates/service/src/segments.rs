//! Frame-accurate segment planning.
//!
//! All boundaries are computed in whole frames at the output frame rate so
//! that consecutive segments tile the source without gaps or overlaps.

use thiserror::Error;

/// Tolerance applied before flooring `duration * fps`, so that durations such
/// as `95.0` reported as `94.99999999` still count their last frame.
const FRAME_EPSILON: f64 = 1e-6;

/// Rejected segment request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SegmentError {
    #[error("segment duration must be at least 1 second")]
    TooShort,
    #[error("segment duration ({segment}s) exceeds video duration ({duration:.2}s)")]
    ExceedsDuration { segment: u32, duration: f64 },
    #[error("video duration is unknown")]
    UnknownDuration,
}

/// One planned output clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpan {
    /// Zero-based position in the output order.
    pub index: usize,
    pub start_frame: u64,
    pub frame_count: u64,
    pub fps: u32,
}

impl SegmentSpan {
    pub fn start_secs(&self) -> f64 {
        self.start_frame as f64 / self.fps as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count as f64 / self.fps as f64
    }

    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frame_count
    }
}

/// Number of whole frames in `duration` seconds at `fps`.
pub fn total_frames(duration: f64, fps: u32) -> u64 {
    if !duration.is_finite() || duration <= 0.0 || fps == 0 {
        return 0;
    }
    (duration * fps as f64 + FRAME_EPSILON).floor() as u64
}

/// Check a requested segment length against the source duration.
pub fn validate_segment_duration(segment: u32, duration: f64) -> Result<(), SegmentError> {
    if segment < 1 {
        return Err(SegmentError::TooShort);
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(SegmentError::UnknownDuration);
    }
    if segment as f64 > duration + FRAME_EPSILON {
        return Err(SegmentError::ExceedsDuration { segment, duration });
    }
    Ok(())
}

/// Split `duration` seconds into consecutive spans of `segment` seconds.
///
/// The last span carries the remainder. A remainder shorter than one frame
/// interval is dropped, so the plan may have `floor(D/s)` spans instead of
/// `ceil(D/s)`.
pub fn plan_segments(duration: f64, segment: u32, fps: u32) -> Vec<SegmentSpan> {
    let total = total_frames(duration, fps);
    let per_segment = segment as u64 * fps as u64;
    if total == 0 || per_segment == 0 {
        return Vec::new();
    }

    let mut spans = Vec::with_capacity(total.div_ceil(per_segment) as usize);
    let mut start_frame = 0;
    while start_frame < total {
        let frame_count = per_segment.min(total - start_frame);
        spans.push(SegmentSpan {
            index: spans.len(),
            start_frame,
            frame_count,
            fps,
        });
        start_frame += frame_count;
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ninety_five_seconds_by_thirty() {
        let spans = plan_segments(95.0, 30, 30);
        let durations: Vec<f64> = spans.iter().map(|s| s.duration_secs()).collect();
        assert_eq!(durations, vec![30.0, 30.0, 30.0, 5.0]);
        assert_eq!(spans[3].start_secs(), 90.0);
        assert_eq!(spans.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let spans = plan_segments(60.0, 30, 30);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].frame_count, 900);
    }

    #[test]
    fn test_sub_frame_remainder_dropped() {
        // 60.01s at 30 fps leaves 0.3 of a frame after 1800 frames.
        let spans = plan_segments(60.01, 30, 30);
        assert_eq!(spans.len(), 2);
    }

    #[test]
    fn test_float_noise_keeps_last_frame() {
        assert_eq!(total_frames(94.99999999, 30), 2850);
        assert_eq!(total_frames(0.0, 30), 0);
        assert_eq!(total_frames(f64::NAN, 30), 0);
    }

    #[test]
    fn test_validate_segment_duration() {
        assert_eq!(validate_segment_duration(0, 10.0), Err(SegmentError::TooShort));
        assert_eq!(validate_segment_duration(5, 0.0), Err(SegmentError::UnknownDuration));
        assert!(matches!(
            validate_segment_duration(11, 10.0),
            Err(SegmentError::ExceedsDuration { segment: 11, .. })
        ));
        assert!(validate_segment_duration(10, 10.0).is_ok());
        assert!(validate_segment_duration(1, 1.5).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_spans_tile_the_source(
            duration in 1.0f64..7200.0,
            segment in 1u32..600,
            fps in prop::sample::select(vec![24u32, 25, 30, 60]),
        ) {
            let spans = plan_segments(duration, segment, fps);
            let total = total_frames(duration, fps);

            // contiguous and non-overlapping
            let mut expected_start = 0;
            for (i, span) in spans.iter().enumerate() {
                prop_assert_eq!(span.index, i);
                prop_assert_eq!(span.start_frame, expected_start);
                prop_assert!(span.frame_count > 0);
                prop_assert!(span.frame_count <= segment as u64 * fps as u64);
                expected_start = span.end_frame();
            }
            prop_assert_eq!(expected_start, total);

            // total duration within one frame of the source
            let sum: f64 = spans.iter().map(|s| s.duration_secs()).sum();
            prop_assert!((sum - duration).abs() <= 1.0 / fps as f64 + 1e-6);
        }

        #[test]
        fn prop_segment_count(
            duration in 1.0f64..7200.0,
            segment in 1u32..600,
        ) {
            let fps = 30;
            let spans = plan_segments(duration, segment, fps);
            let ceil = (duration / segment as f64).ceil() as usize;
            let floor = (duration / segment as f64).floor() as usize;
            prop_assert!(spans.len() == ceil || spans.len() == floor);
            prop_assert!(!spans.is_empty());
        }
    }
}
