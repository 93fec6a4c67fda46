//! Presence heuristics for the cell's non-camera sensors.

use workcell_types::RangeReading;

/// A range reading this far below `max_range` counts as an object.
pub const RANGE_PRESENCE_MARGIN: f32 = 0.01;

/// `true` when the range sensor is returning something closer than its
/// maximum range.
pub fn range_detects_object(reading: &RangeReading) -> bool {
    reading.max_range - reading.range > RANGE_PRESENCE_MARGIN
}

/// Number of laser profiler beams that hit something.
pub fn laser_hits(ranges: &[f32]) -> usize {
    ranges.iter().filter(|r| r.is_finite()).count()
}

pub fn laser_detects_object(ranges: &[f32]) -> bool {
    laser_hits(ranges) > 0
}
