//! Play window bookkeeping.
//!
//! A play window (section) restricts playback to `[start, start + duration)`
//! of a track, which is how previews and cue-sheet tracks are played. All
//! positions handed to callers are relative to the window; all positions
//! handed to the native pipeline are absolute.

use tracing::warn;

/// Window as requested by the caller, before validation against the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RequestedSection {
    start: i64,
    /// `None` means "until the end of the track".
    duration: Option<i64>,
}

/// Translates between window-relative and absolute positions.
///
/// Requested values are kept verbatim and validated lazily against the total
/// duration, so a window set before the duration is known is re-clamped as
/// soon as [`SectionTracker::update_total_duration`] reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionTracker {
    requested: Option<RequestedSection>,
    total_duration: Option<i64>,
}

impl SectionTracker {
    /// Creates a tracker with no window and unknown duration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a play window, or clears it when `start` is negative.
    ///
    /// A non-positive `duration` extends the window to the end of the track.
    pub fn set_section(&mut self, start: i64, duration: i64) {
        if start < 0 {
            self.requested = None;
            return;
        }
        self.requested = Some(RequestedSection {
            start,
            duration: (duration > 0).then_some(duration),
        });
        self.warn_if_truncated();
    }

    /// Forgets the window and the total duration.
    pub fn reset(&mut self) {
        self.requested = None;
        self.total_duration = None;
    }

    /// Forgets the total duration but keeps the requested window.
    pub fn clear_total_duration(&mut self) {
        self.total_duration = None;
    }

    /// Window as last requested, `(start, duration)` with `-1` for an
    /// open end. Unaffected by the total duration.
    #[must_use]
    pub fn requested_window(&self) -> Option<(i64, i64)> {
        self.requested
            .map(|section| (section.start, section.duration.unwrap_or(-1)))
    }

    /// Whether a play window is installed.
    #[must_use]
    pub fn has_section(&self) -> bool {
        self.requested.is_some()
    }

    /// Total duration of the track, if known.
    #[must_use]
    pub fn total_duration(&self) -> Option<i64> {
        self.total_duration
    }

    /// Records the total duration of the track and re-validates the window.
    ///
    /// # Returns
    ///
    /// `true` if the installed window had to be truncated to fit.
    pub fn update_total_duration(&mut self, total_ms: i64) -> bool {
        self.total_duration = Some(total_ms.max(0));
        self.warn_if_truncated()
    }

    /// Effective window start in absolute milliseconds, `0` without a window.
    #[must_use]
    pub fn start(&self) -> i64 {
        let Some(section) = self.requested else {
            return 0;
        };
        match self.total_duration {
            Some(total) if total > 0 => section.start.min(total - 1),
            Some(_) => 0,
            None => section.start,
        }
    }

    /// Effective duration: the window length, or the whole track without one.
    ///
    /// Returns `0` while the value depends on a total duration that is not
    /// known yet.
    #[must_use]
    pub fn duration(&self) -> i64 {
        let Some(section) = self.requested else {
            return self.total_duration.unwrap_or(0);
        };
        match (section.duration, self.total_duration) {
            (Some(duration), Some(total)) => duration.min(total - self.start()).max(0),
            (Some(duration), None) => duration,
            (None, Some(total)) => (total - self.start()).max(0),
            (None, None) => 0,
        }
    }

    /// Absolute end of the window, if it can be computed yet.
    #[must_use]
    pub fn end(&self) -> Option<i64> {
        match (self.requested, self.total_duration) {
            (None, total) => total,
            (Some(RequestedSection { duration: None, .. }), None) => None,
            _ => Some(self.start() + self.duration()),
        }
    }

    /// Converts a window-relative position to an absolute stream position.
    #[must_use]
    pub fn to_absolute(&self, relative_ms: i64) -> i64 {
        if self.has_section() {
            self.start() + relative_ms
        } else {
            relative_ms
        }
    }

    /// Converts an absolute stream position to a window-relative position.
    ///
    /// With a window installed the result is clamped to `[0, duration]`.
    #[must_use]
    pub fn to_relative(&self, absolute_ms: i64) -> i64 {
        if self.has_section() {
            (absolute_ms - self.start()).clamp(0, self.duration())
        } else {
            absolute_ms
        }
    }

    /// Whether an absolute position lies outside the window.
    #[must_use]
    pub fn is_outside(&self, absolute_ms: i64) -> bool {
        if !self.has_section() {
            return false;
        }
        absolute_ms < self.start() || self.end().is_some_and(|end| absolute_ms >= end)
    }

    fn warn_if_truncated(&mut self) -> bool {
        let (Some(section), Some(total)) = (self.requested, self.total_duration) else {
            return false;
        };
        let requested_end = section.start.saturating_add(section.duration.unwrap_or(0));
        let truncated = section.start >= total || requested_end > total;
        if truncated {
            warn!(
                start = section.start,
                duration = ?section.duration,
                total,
                "Play section exceeds track, truncating"
            );
        }
        truncated
    }
}
