//! Reading positions stored inside bookmarks, and navigation back to them.
//!
//! The persisted payload is a JSON object with optional `scrollY`,
//! `chapterSlug` and `percentage` keys. Raw offsets go stale after reflow, so
//! the percentage is always stored as a fallback.

use std::future::Future;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PositionError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    #[serde(rename = "scrollY", default, skip_serializing_if = "Option::is_none")]
    pub scroll_y: Option<f64>,
    #[serde(rename = "chapterSlug", default, skip_serializing_if = "Option::is_none")]
    pub chapter_anchor: Option<String>,
    #[serde(
        default,
        deserialize_with = "de_percentage",
        skip_serializing_if = "Option::is_none"
    )]
    pub percentage: Option<u8>,
}

/// Accept any JSON number (older payloads may carry floats) and clamp it.
fn de_percentage<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
    let value: Option<f64> = Option::deserialize(d)?;
    Ok(value
        .filter(|v| v.is_finite())
        .map(|v| v.round().clamp(0.0, 100.0) as u8))
}

/// Percentage of the scrollable range covered by `scroll_y`.
pub fn scroll_percentage(scroll_y: f64, scrollable_height: f64) -> u8 {
    if scrollable_height <= 0.0 || !scroll_y.is_finite() {
        return 0;
    }
    (scroll_y / scrollable_height * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Snapshot the reader's position. `document_height` is the full content
/// height; the scrollable range is that minus the viewport.
pub fn capture(
    current_chapter: Option<&str>,
    scroll_y: f64,
    document_height: f64,
    viewport_height: f64,
) -> PositionSnapshot {
    PositionSnapshot {
        scroll_y: scroll_y.is_finite().then_some(scroll_y.max(0.0)),
        chapter_anchor: current_chapter.filter(|c| !c.is_empty()).map(str::to_string),
        percentage: Some(scroll_percentage(scroll_y, document_height - viewport_height)),
    }
}

impl PositionSnapshot {
    pub fn to_payload(&self) -> Result<String, PositionError> {
        serde_json::to_string(self).map_err(|e| PositionError::Malformed(e.to_string()))
    }

    pub fn from_payload(payload: &str) -> Result<Self, PositionError> {
        let value: serde_json::Value =
            serde_json::from_str(payload).map_err(|e| PositionError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(PositionError::Malformed(format!(
                "expected a JSON object, got {payload}"
            )));
        }
        serde_json::from_value(value).map_err(|e| PositionError::Malformed(e.to_string()))
    }

    /// The offset to seek to, if any: a positive `scrollY` wins, otherwise the
    /// percentage against the document as it is laid out now.
    pub fn scroll_target(&self) -> Option<ScrollTarget> {
        match (self.scroll_y, self.percentage) {
            (Some(y), _) if y > 0.0 => Some(ScrollTarget::Offset(y)),
            (_, Some(p)) => Some(ScrollTarget::Percentage(p)),
            _ => None,
        }
    }
}

/// Default bookmark title: the chapter's TOC title with the percentage, or a
/// generic label.
pub fn bookmark_title(chapter_title: Option<&str>, percentage: u8) -> String {
    match chapter_title.filter(|t| !t.trim().is_empty()) {
        Some(title) => format!("{} ({}%)", title.trim(), percentage),
        None => format!("Reading position {}%", percentage),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ScrollTarget {
    /// Absolute offset captured earlier.
    Offset(f64),
    /// Share of the current scrollable range.
    Percentage(u8),
}

impl ScrollTarget {
    pub fn resolve(&self, scrollable_height: f64) -> f64 {
        match *self {
            Self::Offset(y) => y,
            Self::Percentage(p) => (f64::from(p) / 100.0 * scrollable_height.max(0.0)).round(),
        }
    }
}

/// What navigating to a snapshot involves, decided before touching the
/// surface. The chapter switch always precedes the seek.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationPlan {
    pub switch_to: Option<String>,
    pub seek: Option<ScrollTarget>,
}

impl NavigationPlan {
    pub fn is_noop(&self) -> bool {
        self.switch_to.is_none() && self.seek.is_none()
    }
}

pub fn plan(snapshot: &PositionSnapshot, current_chapter: Option<&str>) -> NavigationPlan {
    let Some(seek) = snapshot.scroll_target() else {
        return NavigationPlan::default();
    };
    let switch_to = snapshot
        .chapter_anchor
        .as_deref()
        .filter(|anchor| !anchor.is_empty() && Some(*anchor) != current_chapter)
        .map(str::to_string);
    NavigationPlan {
        switch_to,
        seek: Some(seek),
    }
}

/// The scrollable view a bookmark navigates within.
pub trait ReadingSurface {
    /// Start loading another chapter. Content may mount later.
    fn switch_chapter(&mut self, anchor: &str);
    /// Scrollable range of the current content (content height − viewport).
    fn scrollable_height(&self) -> f64;
    fn scroll_to(&mut self, y: f64);
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationOutcome {
    pub switched_to: Option<String>,
    pub scrolled_to: Option<f64>,
}

/// Navigate in two phases: switch chapter, wait for it to settle, then seek.
///
/// `settle` is awaited only after a switch. Pass a fixed delay (the reading
/// config's `settle_delay_ms`) or, where the surface can report it, a future
/// that completes once the chapter has mounted.
pub async fn navigate<S, W, Fut>(
    snapshot: &PositionSnapshot,
    current_chapter: Option<&str>,
    surface: &mut S,
    settle: W,
) -> NavigationOutcome
where
    S: ReadingSurface + ?Sized,
    W: FnOnce(&str) -> Fut,
    Fut: Future<Output = ()>,
{
    let plan = plan(snapshot, current_chapter);
    let mut outcome = NavigationOutcome::default();

    if let Some(anchor) = plan.switch_to.as_deref() {
        tracing::debug!(anchor = %anchor, "Switching chapter before seek");
        surface.switch_chapter(anchor);
        settle(anchor).await;
        outcome.switched_to = Some(anchor.to_string());
    }

    if let Some(target) = plan.seek {
        let y = target.resolve(surface.scrollable_height());
        surface.scroll_to(y);
        outcome.scrolled_to = Some(y);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_capture_percentage() {
        let snap = capture(Some("ch1"), 300.0, 1300.0, 300.0);
        assert_eq!(snap.percentage, Some(30));
        assert_eq!(snap.scroll_y, Some(300.0));
        assert_eq!(snap.chapter_anchor.as_deref(), Some("ch1"));
    }

    #[test]
    fn test_capture_short_document_is_zero() {
        assert_eq!(capture(None, 0.0, 200.0, 800.0).percentage, Some(0));
        assert_eq!(capture(None, 50.0, 800.0, 800.0).percentage, Some(0));
        // Overscroll clamps.
        assert_eq!(capture(None, 2000.0, 1300.0, 300.0).percentage, Some(100));
    }

    #[test]
    fn test_payload_wire_keys() {
        let snap = capture(Some("intro"), 120.5, 1000.0, 200.0);
        let value: serde_json::Value = serde_json::from_str(&snap.to_payload().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"scrollY": 120.5, "chapterSlug": "intro", "percentage": 15})
        );
        let without_chapter = capture(None, 0.0, 1000.0, 200.0).to_payload().unwrap();
        assert!(!without_chapter.contains("chapterSlug"));
    }

    #[test]
    fn test_from_payload() {
        let snap = PositionSnapshot::from_payload(r#"{"percentage": 49.6, "extra": true}"#).unwrap();
        assert_eq!(snap.percentage, Some(50));
        assert_eq!(snap.scroll_y, None);

        assert!(PositionSnapshot::from_payload("[1,2]").is_err());
        assert!(PositionSnapshot::from_payload("not json").is_err());
        assert!(PositionSnapshot::from_payload(r#"{"scrollY": "high"}"#).is_err());
    }

    #[test]
    fn test_scroll_target_preference() {
        let both = PositionSnapshot {
            scroll_y: Some(400.0),
            chapter_anchor: None,
            percentage: Some(10),
        };
        assert_eq!(both.scroll_target(), Some(ScrollTarget::Offset(400.0)));

        let zero_offset = PositionSnapshot {
            scroll_y: Some(0.0),
            percentage: Some(25),
            ..Default::default()
        };
        assert_eq!(zero_offset.scroll_target(), Some(ScrollTarget::Percentage(25)));
        assert_eq!(ScrollTarget::Percentage(25).resolve(2000.0), 500.0);

        assert_eq!(PositionSnapshot::default().scroll_target(), None);
    }

    #[test]
    fn test_plan() {
        let snap = PositionSnapshot {
            scroll_y: None,
            chapter_anchor: Some("intro".into()),
            percentage: Some(50),
        };
        let p = plan(&snap, Some("chapter-3"));
        assert_eq!(p.switch_to.as_deref(), Some("intro"));
        assert_eq!(p.seek, Some(ScrollTarget::Percentage(50)));

        assert_eq!(plan(&snap, Some("intro")).switch_to, None);

        let unusable = PositionSnapshot {
            scroll_y: Some(0.0),
            chapter_anchor: Some("intro".into()),
            percentage: None,
        };
        assert!(plan(&unusable, Some("chapter-3")).is_noop());
    }

    #[test]
    fn test_bookmark_title() {
        assert_eq!(bookmark_title(Some("Prologue"), 42), "Prologue (42%)");
        assert_eq!(bookmark_title(None, 7), "Reading position 7%");
        assert_eq!(bookmark_title(Some("  "), 7), "Reading position 7%");
    }

    #[derive(Debug, PartialEq)]
    enum Call {
        Switch(String, Instant),
        Scroll(f64, Instant),
    }

    struct MockSurface {
        height: f64,
        calls: Vec<Call>,
    }

    impl ReadingSurface for MockSurface {
        fn switch_chapter(&mut self, anchor: &str) {
            self.calls.push(Call::Switch(anchor.to_string(), Instant::now()));
            // New chapter is longer.
            self.height = 4000.0;
        }
        fn scrollable_height(&self) -> f64 {
            self.height
        }
        fn scroll_to(&mut self, y: f64) {
            self.calls.push(Call::Scroll(y, Instant::now()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_switches_then_waits_then_seeks() {
        let snap = PositionSnapshot {
            scroll_y: None,
            chapter_anchor: Some("intro".into()),
            percentage: Some(50),
        };
        let mut surface = MockSurface {
            height: 1000.0,
            calls: Vec::new(),
        };
        let start = Instant::now();

        let outcome = navigate(&snap, Some("chapter-3"), &mut surface, |_| {
            tokio::time::sleep(Duration::from_millis(500))
        })
        .await;

        assert_eq!(outcome.switched_to.as_deref(), Some("intro"));
        assert_eq!(outcome.scrolled_to, Some(2000.0));
        assert_eq!(surface.calls.len(), 2);
        match (&surface.calls[0], &surface.calls[1]) {
            (Call::Switch(anchor, t0), Call::Scroll(y, t1)) => {
                assert_eq!(anchor, "intro");
                assert_eq!(*t0, start);
                assert_eq!(*y, 2000.0);
                assert!(t1.duration_since(*t0) >= Duration::from_millis(500));
            }
            other => panic!("unexpected call order: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigate_same_chapter_does_not_wait() {
        let snap = capture(Some("intro"), 640.0, 2000.0, 400.0);
        let mut surface = MockSurface {
            height: 1600.0,
            calls: Vec::new(),
        };
        let start = Instant::now();
        let outcome = navigate(&snap, Some("intro"), &mut surface, |_: &str| -> std::future::Ready<()> {
            panic!("settle must not run without a chapter switch")
        })
        .await;
        assert_eq!(outcome.switched_to, None);
        assert_eq!(surface.calls, vec![Call::Scroll(640.0, start)]);
    }

    #[tokio::test]
    async fn test_navigate_with_mounted_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let snap = PositionSnapshot {
            scroll_y: Some(90.0),
            chapter_anchor: Some("b".into()),
            percentage: Some(3),
        };
        let mut surface = MockSurface {
            height: 100.0,
            calls: Vec::new(),
        };
        tx.send(()).unwrap();
        let outcome = navigate(&snap, Some("a"), &mut surface, |_| async move {
            let _ = rx.await;
        })
        .await;
        assert_eq!(outcome.scrolled_to, Some(90.0));
    }

    #[tokio::test]
    async fn test_navigate_noop() {
        let mut surface = MockSurface {
            height: 100.0,
            calls: Vec::new(),
        };
        let outcome = navigate(&PositionSnapshot::default(), None, &mut surface, |_| async {}).await;
        assert_eq!(outcome, NavigationOutcome::default());
        assert!(surface.calls.is_empty());
    }
}
