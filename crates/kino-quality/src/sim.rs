//! In-memory playback surface
//!
//! Behaves like a media element closely enough to drive the controller
//! without a browser: loading a source resets it to `HaveNothing` and pauses
//! it until [`SimulatedSurface::complete_load`] is called.

use crate::error::SurfaceError;
use crate::surface::{PlaybackSurface, ReadyState};
use std::sync::{Mutex, MutexGuard};
use url::Url;

#[derive(Debug, Clone)]
struct SimState {
    position: f64,
    playing: bool,
    buffered_ahead: f64,
    ready_state: ReadyState,
    dimensions: Option<(u32, u32)>,
    loaded: Vec<Url>,
    reject_loads: bool,
    seeks: usize,
    plays: usize,
}

/// Simulated playback surface with interior mutability
#[derive(Debug)]
pub struct SimulatedSurface {
    state: Mutex<SimState>,
}

impl Default for SimulatedSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSurface {
    /// Paused surface with metadata and nothing buffered
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                position: 0.0,
                playing: false,
                buffered_ahead: 0.0,
                ready_state: ReadyState::HaveMetadata,
                dimensions: None,
                loaded: Vec::new(),
                reject_loads: false,
                seeks: 0,
                plays: 0,
            }),
        }
    }

    /// Surface already playing at `position` with `buffered_ahead` seconds buffered
    pub fn playing(position: f64, buffered_ahead: f64) -> Self {
        let surface = Self::new();
        {
            let mut state = surface.lock();
            state.position = position;
            state.buffered_ahead = buffered_ahead;
            state.playing = true;
            state.ready_state = ReadyState::HaveEnoughData;
        }
        surface
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A poisoned lock only means a test panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_buffered_ahead(&self, seconds: f64) {
        self.lock().buffered_ahead = seconds.max(0.0);
    }

    pub fn set_position(&self, seconds: f64) {
        self.lock().position = seconds.max(0.0);
    }

    pub fn set_ready_state(&self, ready_state: ReadyState) {
        self.lock().ready_state = ready_state;
    }

    pub fn set_dimensions(&self, width: u32, height: u32) {
        self.lock().dimensions = Some((width, height));
    }

    pub fn pause(&self) {
        self.lock().playing = false;
    }

    /// Make subsequent `load` calls fail synchronously
    pub fn reject_loads(&self, reject: bool) {
        self.lock().reject_loads = reject;
    }

    /// Advance playback time while playing, consuming buffer
    pub fn advance(&self, seconds: f64) {
        let mut state = self.lock();
        if state.playing {
            state.position += seconds;
            state.buffered_ahead = (state.buffered_ahead - seconds).max(0.0);
        }
    }

    /// Finish loading the current source: metadata and data are available
    pub fn complete_load(&self, buffered_ahead: f64) {
        let mut state = self.lock();
        state.ready_state = ReadyState::HaveEnoughData;
        state.buffered_ahead = buffered_ahead;
    }

    /// Every source loaded so far, oldest first
    pub fn loaded(&self) -> Vec<Url> {
        self.lock().loaded.clone()
    }

    pub fn seek_count(&self) -> usize {
        self.lock().seeks
    }

    pub fn play_count(&self) -> usize {
        self.lock().plays
    }
}

impl PlaybackSurface for SimulatedSurface {
    fn current_position(&self) -> f64 {
        self.lock().position
    }

    fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn buffered_ahead(&self) -> f64 {
        self.lock().buffered_ahead
    }

    fn ready_state(&self) -> ReadyState {
        self.lock().ready_state
    }

    fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.lock().dimensions
    }

    fn load(&self, url: &Url) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if state.reject_loads {
            return Err(SurfaceError(format!("source rejected: {}", url)));
        }
        state.loaded.push(url.clone());
        state.ready_state = ReadyState::HaveNothing;
        state.playing = false;
        state.position = 0.0;
        state.buffered_ahead = 0.0;
        Ok(())
    }

    fn seek(&self, position: f64) {
        let mut state = self.lock();
        state.position = position.max(0.0);
        state.seeks += 1;
    }

    fn play(&self) {
        let mut state = self.lock();
        state.playing = true;
        state.plays += 1;
    }
}
