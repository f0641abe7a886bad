use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event as CtEvent, KeyEvent, KeyEventKind};
use log::debug;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// While no run is animating, input is polled this many frame intervals apart.
const IDLE_WAIT_FRAMES: u32 = 5;

/// Wall-clock source, in unix milliseconds.
///
/// Every instance stamps writes and integrates frames against this, so tests
/// swap in a [`ManualClock`] and drive time by hand.
pub trait Clock {
    fn now_epoch_ms(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Shared, hand-advanced clock. Clones observe the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_epoch_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_epoch_ms)),
        }
    }

    pub fn advance(&self, ms: i64) -> i64 {
        self.now.fetch_add(ms, Ordering::SeqCst) + ms
    }
}

impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_epoch_ms(&self) -> i64 {
        (**self).now_epoch_ms()
    }
}

/// Per-instance animation loop handle.
///
/// Tracks whether frames are currently scheduled so a status that flips back
/// to running never ends up with two loops for the same overlay, and paces
/// the caller's event wait to the frame interval.
#[derive(Debug)]
pub struct FrameLoop {
    interval: Duration,
    scheduled: bool,
    starts: u64,
    frames: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::with_interval(DEFAULT_FRAME_INTERVAL)
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            scheduled: false,
            starts: 0,
            frames: 0,
        }
    }

    /// Schedule frames. Returns false if a loop was already scheduled.
    pub fn start(&mut self) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        self.starts += 1;
        debug!("frame loop started (start #{})", self.starts);
        true
    }

    /// Cancel frames. Returns false if nothing was scheduled.
    pub fn stop(&mut self) -> bool {
        if !self.scheduled {
            return false;
        }
        self.scheduled = false;
        debug!("frame loop stopped after {} frames", self.frames);
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to wait for input before the next frame is due.
    pub fn next_wait(&self) -> Duration {
        if self.scheduled {
            self.interval
        } else {
            self.interval * IDLE_WAIT_FRAMES
        }
    }

    /// Hand out the frame for `now` if the loop is live.
    pub fn frame(&mut self, now_epoch_ms: i64) -> Option<i64> {
        if !self.scheduled {
            return None;
        }
        self.frames += 1;
        Some(now_epoch_ms)
    }

    /// Wait for the next input from `events`, or [`OverlayEvent::Frame`] once
    /// the wait runs out.
    pub fn pace<E: EventSource>(&self, events: &mut E) -> io::Result<OverlayEvent> {
        Ok(events
            .next_event(self.next_wait())?
            .unwrap_or(OverlayEvent::Frame))
    }

    /// How many times the loop went from stopped to scheduled
    pub fn start_count(&self) -> u64 {
        self.starts
    }
}

/// What the interactive overlay reacts to between frames
#[derive(Clone, Debug, PartialEq)]
pub enum OverlayEvent {
    Key(KeyEvent),
    Resize,
    Frame,
}

/// Input feeding an interactive overlay
pub trait EventSource {
    /// Wait up to `timeout` for input. `None` means the wait ran out.
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<OverlayEvent>>;
}

/// Keyboard and resize input read straight from the terminal
#[derive(Debug, Default)]
pub struct TerminalEvents;

impl EventSource for TerminalEvents {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<OverlayEvent>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        Ok(match event::read()? {
            // presses only
            CtEvent::Key(key) if key.kind == KeyEventKind::Press => Some(OverlayEvent::Key(key)),
            CtEvent::Resize(_, _) => Some(OverlayEvent::Resize),
            _ => None,
        })
    }
}

/// Scripted input for headless runs. Never waits: an empty queue reads as a
/// timed-out wait, so every call past the script yields a frame.
#[derive(Debug, Default)]
pub struct ScriptedEvents {
    queue: VecDeque<OverlayEvent>,
}

impl ScriptedEvents {
    pub fn new<I: IntoIterator<Item = OverlayEvent>>(events: I) -> Self {
        Self {
            queue: events.into_iter().collect(),
        }
    }
}

impl EventSource for ScriptedEvents {
    fn next_event(&mut self, _timeout: Duration) -> io::Result<Option<OverlayEvent>> {
        Ok(self.queue.pop_front())
    }
}
