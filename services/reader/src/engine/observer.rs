//! services/reader/src/engine/observer.rs
//!
//! Passive reading inference. The host reports how much of each rendered item
//! intersects the reading band (roughly the 10–40% strip from the top of the
//! viewport); the lowest-indexed item over the threshold is the one being read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fraction of the viewport, from the top, where the reading band starts.
pub const BAND_TOP: f32 = 0.10;
/// Fraction of the viewport, from the top, where the reading band ends.
pub const BAND_BOTTOM: f32 = 0.40;

/// One visibility change for an item against the reading band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilitySample {
    pub index: usize,
    /// Share of the item inside the band, `0.0` once it has left.
    pub ratio: f32,
}

impl VisibilitySample {
    /// Derives a sample from item bounds expressed as viewport fractions.
    pub fn from_bounds(index: usize, top: f32, bottom: f32) -> Self {
        let height = (bottom - top).max(f32::EPSILON);
        let overlap = (bottom.min(BAND_BOTTOM) - top.max(BAND_TOP)).max(0.0);
        Self {
            index,
            ratio: (overlap / height).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug)]
pub struct ReadingObserver {
    enabled: bool,
    threshold: f32,
    visible: BTreeMap<usize, f32>,
    current: Option<usize>,
}

impl ReadingObserver {
    pub fn new(enabled: bool, threshold: f32) -> Self {
        Self {
            enabled,
            threshold,
            visible: BTreeMap::new(),
            current: None,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.reset();
        }
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn reset(&mut self) {
        self.visible.clear();
        self.current = None;
    }

    /// Applies a batch of samples. Returns the new current item when it changed.
    pub fn observe(&mut self, samples: &[VisibilitySample]) -> Option<usize> {
        for sample in samples {
            if sample.ratio >= self.threshold {
                self.visible.insert(sample.index, sample.ratio);
            } else {
                self.visible.remove(&sample.index);
            }
        }

        let candidate = self.visible.keys().next().copied();
        match candidate {
            Some(index) if self.current != Some(index) => {
                self.current = Some(index);
                Some(index)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(index: usize, ratio: f32) -> VisibilitySample {
        VisibilitySample { index, ratio }
    }

    #[test]
    fn topmost_item_in_band_is_current() {
        let mut observer = ReadingObserver::new(true, 0.1);
        assert_eq!(observer.observe(&[sample(5, 0.6), sample(4, 0.3)]), Some(4));
        assert_eq!(observer.observe(&[sample(5, 0.9)]), None);
        assert_eq!(observer.current(), Some(4));
    }

    #[test]
    fn leaving_the_band_promotes_the_next_item() {
        let mut observer = ReadingObserver::new(true, 0.1);
        observer.observe(&[sample(2, 0.5), sample(3, 0.5)]);
        assert_eq!(observer.observe(&[sample(2, 0.0)]), Some(3));
    }

    #[test]
    fn slivers_below_threshold_are_ignored() {
        let mut observer = ReadingObserver::new(true, 0.25);
        assert_eq!(observer.observe(&[sample(1, 0.05)]), None);
        assert_eq!(observer.current(), None);
    }

    #[test]
    fn bounds_are_measured_against_the_band() {
        let inside = VisibilitySample::from_bounds(0, 0.15, 0.35);
        assert!((inside.ratio - 1.0).abs() < 1e-6);
        let below = VisibilitySample::from_bounds(1, 0.5, 0.9);
        assert_eq!(below.ratio, 0.0);
        let straddling = VisibilitySample::from_bounds(2, 0.0, 0.2);
        assert!((straddling.ratio - 0.5).abs() < 1e-6);
    }

    #[test]
    fn disabling_forgets_what_was_seen() {
        let mut observer = ReadingObserver::new(true, 0.1);
        observer.observe(&[sample(7, 1.0)]);
        observer.set_enabled(false);
        assert_eq!(observer.current(), None);
    }
}
