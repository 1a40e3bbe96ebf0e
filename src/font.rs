//! Font readiness checks and font-change bookkeeping.
//!
//! Selecting a custom font is optimistic: the style switches immediately,
//! then a [`FontReadinessGate`] is asked to wait (bounded by a timeout) until
//! the font is really usable. If the wait fails the choice is kept, but a
//! hint is shown and text falls back to the ambient family.
//!
//! Rapid changes are guarded by [`FontLoadTracker`] generations: only the
//! most recently started load may apply its result.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::text::{AMBIENT_FAMILY, FontSpec, FontStack, TextEngine};

/// Wait bound for an interactive font change.
pub const INTERACTIVE_FONT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait bound for each font in a bulk preload.
pub const PRELOAD_FONT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Interval between readiness checks.
pub const FONT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shown when a font did not become ready in time.
pub const FONT_TIMEOUT_HINT: &str =
    "⚠️ The font may take a while to load. Select it again if it does not apply.";

/// Shown when loading a font failed outright.
pub const FONT_FAILED_HINT: &str =
    "⚠️ The font failed to load. Check the font source and select it again.";

const PROBE_TEXT: &str = "测";
const PROBE_SIZE_PX: f32 = 30.0;

/// Decides when a named font is usable for rendering.
pub trait FontReadinessGate {
    /// Hints that `name` will be needed soon. Has no observable result.
    fn force_load(&self, name: &str);

    /// Resolves to true once `name` renders differently from the fallback
    /// font, or false when `timeout` elapses first.
    fn wait_for_ready(&self, name: &str, timeout: Duration) -> impl Future<Output = bool>;
}

/// Gate backed by the font database of a shared [`TextEngine`].
///
/// A font is ready when the database lists its family, or when the probe
/// glyph shapes to a different width than with the fallback family.
#[derive(Debug, Clone)]
pub struct FontDbGate {
    engine: Arc<Mutex<TextEngine>>,
    poll_interval: Duration,
}

impl FontDbGate {
    pub fn new(engine: Arc<Mutex<TextEngine>>) -> Self {
        Self {
            engine,
            poll_interval: FONT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Checks readiness once, without waiting.
    pub fn is_ready(&self, name: &str) -> bool {
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if engine.has_family(name) {
            return true;
        }

        let candidate = FontStack::ambient(name);
        let fallback = FontStack::ambient(AMBIENT_FAMILY);
        let candidate_width = engine.measure_width(PROBE_TEXT, &probe_spec(&candidate));
        let fallback_width = engine.measure_width(PROBE_TEXT, &probe_spec(&fallback));
        (candidate_width - fallback_width).abs() > 0.01
    }
}

fn probe_spec(stack: &FontStack) -> FontSpec<'_> {
    FontSpec {
        stack,
        size_px: PROBE_SIZE_PX,
        weight: 400,
        italic: false,
    }
}

impl FontReadinessGate for FontDbGate {
    fn force_load(&self, name: &str) {
        // The database is loaded eagerly; there is nothing to trigger.
        log::debug!(target: "fonts", "force load requested for \"{}\"", name);
    }

    fn wait_for_ready(&self, name: &str, timeout: Duration) -> impl Future<Output = bool> {
        async move {
            let start = Instant::now();
            log::debug!(target: "fonts", "waiting for font \"{}\"", name);
            loop {
                if self.is_ready(name) {
                    log::debug!(target: "fonts", "font \"{}\" ready after {:?}", name, start.elapsed());
                    return true;
                }
                if start.elapsed() >= timeout {
                    log::warn!(target: "fonts", "font \"{}\" not ready after {:?}", name, timeout);
                    return false;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

/// Result of waiting for a font.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontLoadOutcome {
    Ready,
    TimedOut,
    Failed(String),
}

impl FontLoadOutcome {
    pub fn from_ready(ready: bool) -> Self {
        if ready { Self::Ready } else { Self::TimedOut }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// The user-facing hint for this outcome, if any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Ready => None,
            Self::TimedOut => Some(FONT_TIMEOUT_HINT),
            Self::Failed(_) => Some(FONT_FAILED_HINT),
        }
    }
}

/// Token identifying one font load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontLoadTicket {
    generation: u64,
    font: String,
}

impl FontLoadTicket {
    pub fn font(&self) -> &str {
        &self.font
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Hands out font load tickets; only the newest ticket is current.
#[derive(Debug, Default)]
pub struct FontLoadTracker {
    generation: u64,
    loading: bool,
}

impl FontLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new request, superseding every earlier ticket.
    pub fn begin(&mut self, font: &str) -> FontLoadTicket {
        self.generation = self.generation.wrapping_add(1);
        self.loading = true;
        FontLoadTicket {
            generation: self.generation,
            font: font.to_string(),
        }
    }

    /// Invalidates every outstanding ticket without starting a new load.
    pub fn supersede(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.loading = false;
    }

    pub fn is_current(&self, ticket: &FontLoadTicket) -> bool {
        ticket.generation == self.generation
    }

    /// Ends the request if `ticket` is still current.
    ///
    /// Returns false for a superseded ticket, which must then be ignored.
    pub fn complete(&mut self, ticket: &FontLoadTicket) -> bool {
        if !self.is_current(ticket) {
            log::debug!(
                target: "fonts",
                "discarding stale load of \"{}\" (generation {} < {})",
                ticket.font,
                ticket.generation,
                self.generation
            );
            return false;
        }
        self.loading = false;
        true
    }

    /// True between [`begin`](Self::begin) and the matching
    /// [`complete`](Self::complete).
    pub fn is_loading(&self) -> bool {
        self.loading
    }
}

/// Waits for every named font in parallel, with the preload timeout.
///
/// Returns one readiness flag per name, in order. Empty names are never
/// ready.
pub async fn preload_fonts<G: FontReadinessGate>(gate: &G, names: &[String]) -> Vec<bool> {
    let waits = names.iter().map(|name| async move {
        if name.trim().is_empty() {
            return false;
        }
        gate.force_load(name);
        let ready = gate.wait_for_ready(name, PRELOAD_FONT_TIMEOUT).await;
        if !ready {
            log::warn!(target: "fonts", "preloading font \"{}\" failed", name);
        }
        ready
    });
    futures::future::join_all(waits).await
}

// ============================================================================
// Tests
// ============================================================================
