//! Load-more sentinel at the bottom of the related feed.
//!
//! The browser (`static/feed.js`) reports the sentinel's position relative to
//! the viewport; a [`Sentinel`] turns those reports into a single "start
//! loading" edge each time the sentinel scrolls into the margin-extended
//! viewport.

use serde::Deserialize;

use crate::config::SensorSettings;

/// Sentinel position in viewport coordinates, in CSS pixels.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Geometry {
    pub viewport_height: f64,
    /// Distance from the top of the viewport to the top of the sentinel.
    pub top: f64,
    #[serde(default)]
    pub height: f64,
}

#[derive(Debug, Clone)]
pub struct Sentinel {
    settings: SensorSettings,
    intersecting: bool,
    attached: bool,
}

impl Sentinel {
    pub fn new(settings: SensorSettings) -> Self {
        Self {
            settings,
            intersecting: false,
            attached: true,
        }
    }

    /// Visible fraction of the sentinel within the viewport grown by the
    /// root margin on every side.
    pub fn intersection_ratio(&self, geometry: &Geometry) -> f64 {
        let margin = f64::from(self.settings.root_margin_px);
        let root_top = -margin;
        let root_bottom = geometry.viewport_height + margin;
        let bottom = geometry.top + geometry.height.max(0.0);

        if geometry.height <= 0.0 {
            let inside = geometry.top >= root_top && geometry.top <= root_bottom;
            return if inside { 1.0 } else { 0.0 };
        }

        let visible = bottom.min(root_bottom) - geometry.top.max(root_top);
        (visible / geometry.height).clamp(0.0, 1.0)
    }

    pub fn is_intersecting(&self, geometry: &Geometry) -> bool {
        let ratio = self.intersection_ratio(geometry);
        ratio > 0.0 && ratio >= self.settings.threshold
    }

    /// Feed a new position report. Returns `true` only on the transition
    /// into the intersecting state while attached.
    pub fn observe(&mut self, geometry: &Geometry) -> bool {
        if !self.attached {
            return false;
        }
        let now = self.is_intersecting(geometry);
        let fired = now && !self.intersecting;
        self.intersecting = now;
        fired
    }

    /// Stop reacting to reports; used when the page goes away.
    pub fn detach(&mut self) {
        self.attached = false;
        self.intersecting = false;
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Forget the in-view state so the next in-view report fires again.
    /// Used once a page has been appended and a new sentinel sits below it.
    pub fn rearm(&mut self) {
        self.intersecting = false;
    }

    /// Threshold handed to the browser observer.
    pub fn threshold(&self) -> f64 {
        self.settings.threshold
    }

    /// CSS margin string for a browser IntersectionObserver.
    pub fn root_margin(&self) -> String {
        format!("{}px", self.settings.root_margin_px)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel() -> Sentinel {
        Sentinel::new(SensorSettings::default())
    }

    fn at(top: f64, height: f64) -> Geometry {
        Geometry {
            viewport_height: 800.0,
            top,
            height,
        }
    }

    mod ratio_tests {
        use super::*;

        #[test]
        fn test_fully_inside_viewport() {
            assert_eq!(sentinel().intersection_ratio(&at(400.0, 40.0)), 1.0);
        }

        #[test]
        fn test_inside_root_margin_counts() {
            // Sentinel starts 50px below the fold, margin is 100px.
            assert_eq!(sentinel().intersection_ratio(&at(850.0, 40.0)), 1.0);
            assert!(sentinel().is_intersecting(&at(850.0, 40.0)));
        }

        #[test]
        fn test_far_below_viewport() {
            assert_eq!(sentinel().intersection_ratio(&at(2000.0, 40.0)), 0.0);
            assert!(!sentinel().is_intersecting(&at(2000.0, 40.0)));
        }

        #[test]
        fn test_sliver_below_threshold() {
            // 2 of 40px inside the extended root: 5% < 10%.
            let geometry = at(898.0, 40.0);
            assert!((sentinel().intersection_ratio(&geometry) - 0.05).abs() < 1e-9);
            assert!(!sentinel().is_intersecting(&geometry));
        }

        #[test]
        fn test_partial_above_threshold() {
            // 8 of 40px inside: 20%.
            assert!(sentinel().is_intersecting(&at(892.0, 40.0)));
        }

        #[test]
        fn test_zero_height_sentinel() {
            assert!(sentinel().is_intersecting(&at(880.0, 0.0)));
            assert!(!sentinel().is_intersecting(&at(950.0, 0.0)));
        }

        #[test]
        fn test_scrolled_past_above() {
            assert!(!sentinel().is_intersecting(&at(-500.0, 40.0)));
        }
    }

    mod transition_tests {
        use super::*;

        #[test]
        fn test_fires_once_per_entry() {
            let mut s = sentinel();
            assert!(!s.observe(&at(2000.0, 40.0)));
            assert!(s.observe(&at(850.0, 40.0)));
            assert!(!s.observe(&at(840.0, 40.0)));
            assert!(!s.observe(&at(700.0, 40.0)));
        }

        #[test]
        fn test_fires_again_after_leaving() {
            let mut s = sentinel();
            assert!(s.observe(&at(500.0, 40.0)));
            assert!(!s.observe(&at(1500.0, 40.0)));
            assert!(s.observe(&at(600.0, 40.0)));
        }

        #[test]
        fn test_detached_never_fires() {
            let mut s = sentinel();
            s.detach();
            assert!(!s.is_attached());
            assert!(!s.observe(&at(500.0, 40.0)));
        }

        #[test]
        fn test_rearm_fires_while_still_in_view() {
            let mut s = sentinel();
            assert!(s.observe(&at(500.0, 40.0)));
            assert!(!s.observe(&at(500.0, 40.0)));
            s.rearm();
            assert!(s.observe(&at(500.0, 40.0)));
        }

        #[test]
        fn test_custom_threshold() {
            let mut s = Sentinel::new(SensorSettings {
                threshold: 1.0,
                root_margin_px: 0,
            });
            assert!(!s.observe(&at(790.0, 40.0)));
            assert!(s.observe(&at(760.0, 40.0)));
        }
    }

    #[test]
    fn test_rendered_parameters() {
        let s = sentinel();
        assert_eq!(s.threshold(), 0.1);
        assert_eq!(s.root_margin(), "100px");
    }
}
