//! Subtitle timing for concatenated clips.
//!
//! Boundaries come from the running sample count, converted to whole
//! milliseconds once per boundary. Segment `i + 1` therefore starts exactly
//! where segment `i` ends, and rounding error never accumulates across a long
//! episode.

use std::fmt::Write;
use std::time::Duration;

pub const LEAD_IN_CAPTION: &str = "[AI GENERATED MUSIC]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineSegment {
    pub start: Duration,
    pub end: Duration,
    pub caption: String,
}

/// Offset in seconds rounded to whole milliseconds.
pub fn offset_millis(offset_secs: f64) -> u64 {
    if offset_secs.is_finite() && offset_secs > 0.0 {
        (offset_secs * 1000.0).round() as u64
    } else {
        0
    }
}

fn samples_to_millis(samples: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let rate = sample_rate as u64;
    (samples * 1000 + rate / 2) / rate
}

/// Build the segment list for clips of `(sample_count, caption)` played back
/// to back after `offset_secs` of lead-in. An empty clip list gives an empty
/// timeline.
pub fn build_timeline<'a, I>(clips: I, sample_rate: u32, offset_secs: f64) -> Vec<TimelineSegment>
where
    I: IntoIterator<Item = (usize, &'a str)>,
{
    let offset_ms = offset_millis(offset_secs);
    let mut segments = Vec::new();
    let mut cumulative_samples: u64 = 0;
    let mut start_ms = offset_ms;

    for (sample_count, caption) in clips {
        if segments.is_empty() && offset_ms > 0 {
            segments.push(TimelineSegment {
                start: Duration::ZERO,
                end: Duration::from_millis(offset_ms),
                caption: LEAD_IN_CAPTION.to_string(),
            });
        }
        cumulative_samples += sample_count as u64;
        let end_ms = offset_ms + samples_to_millis(cumulative_samples, sample_rate);
        segments.push(TimelineSegment {
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(end_ms),
            caption: caption.to_string(),
        });
        start_ms = end_ms;
    }

    segments
}

/// `HH:MM:SS,mmm`
pub fn format_timestamp(time: Duration) -> String {
    let total_ms = time.as_millis();
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// Render segments as an SRT document with 1-based indices.
pub fn to_srt(segments: &[TimelineSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(segment.start),
            format_timestamp(segment.end)
        );
        let _ = writeln!(out, "{}", segment.caption);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24000;

    fn ranges(segments: &[TimelineSegment]) -> Vec<String> {
        segments
            .iter()
            .map(|s| format!("{}-->{}", format_timestamp(s.start), format_timestamp(s.end)))
            .collect()
    }

    #[test]
    fn consecutive_clips_without_offset() {
        let clips = [(48000, "a"), (36000, "b"), (72000, "c")];
        let segments = build_timeline(clips, RATE, 0.0);
        assert_eq!(
            ranges(&segments),
            vec![
                "00:00:00,000-->00:00:02,000",
                "00:00:02,000-->00:00:03,500",
                "00:00:03,500-->00:00:06,500",
            ]
        );
    }

    #[test]
    fn lead_in_precedes_first_utterance() {
        let segments = build_timeline([(48000, "hello")], RATE, 5.0);
        assert_eq!(
            ranges(&segments),
            vec!["00:00:00,000-->00:00:05,000", "00:00:05,000-->00:00:07,000"]
        );
        assert_eq!(segments[0].caption, LEAD_IN_CAPTION);
        assert_eq!(segments[1].caption, "hello");
    }

    #[test]
    fn empty_clip_list_is_empty_timeline() {
        assert!(build_timeline(Vec::<(usize, &str)>::new(), RATE, 5.0).is_empty());
    }

    #[test]
    fn segments_stay_contiguous_over_many_odd_clips() {
        // 1/3-second-ish clips whose durations are not whole milliseconds.
        let clips: Vec<(usize, String)> = (0..5000).map(|i| (7999 + (i % 7), format!("line {}", i))).collect();
        let offset = 3.25;
        let segments = build_timeline(clips.iter().map(|(n, c)| (*n, c.as_str())), RATE, offset);

        assert_eq!(segments[1].start, Duration::from_millis(3250));
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert!(pair[0].start <= pair[0].end);
        }
        let total_samples: u64 = clips.iter().map(|(n, _)| *n as u64).sum();
        let expected_end_ms = 3250 + (total_samples * 1000 + 12000) / 24000;
        assert_eq!(segments.last().unwrap().end, Duration::from_millis(expected_end_ms));
    }

    #[test]
    fn first_segment_starts_at_offset_without_lead_in() {
        let segments = build_timeline([(100, "x")], RATE, 0.0);
        assert_eq!(segments[0].start, Duration::ZERO);
    }

    #[test]
    fn formats_hours_and_milliseconds() {
        assert_eq!(format_timestamp(Duration::from_millis(3_723_045)), "01:02:03,045");
        assert_eq!(format_timestamp(Duration::from_secs(36_000)), "10:00:00,000");
    }

    #[test]
    fn offset_rounds_to_millis() {
        assert_eq!(offset_millis(0.0006), 1);
        assert_eq!(offset_millis(1.2344), 1234);
        assert_eq!(offset_millis(-2.0), 0);
    }

    #[test]
    fn srt_layout() {
        let segments = build_timeline([(24000, "Hi there"), (12000, "Hello")], RATE, 0.0);
        assert_eq!(
            to_srt(&segments),
            "1\n00:00:00,000 --> 00:00:01,000\nHi there\n\n2\n00:00:01,000 --> 00:00:01,500\nHello\n\n"
        );
    }
}
