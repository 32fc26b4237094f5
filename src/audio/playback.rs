// Gapless playback scheduling for inbound model audio
//
// Replies arrive as variable-length chunks at irregular times. Each chunk is
// placed on the output timeline at max(now, clock) and the clock advances by
// the chunk duration, so consecutive chunks play back-to-back without overlap.

use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::codec::AudioChunk;

/// One scheduled (possibly still playing) output buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackSourceHandle(u64);

impl PlaybackSourceHandle {
    pub fn id(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_id(id: u64) -> Self {
        Self(id)
    }
}

/// Placement of a buffer on the output timeline (seconds)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub handle: PlaybackSourceHandle,
    pub start_time: f64,
    pub end_time: f64,
}

/// Output device seen by the scheduler
///
/// Implementations own the output clock; `play` must start the chunk at
/// `start_at` on that clock.
pub trait AudioOutput: Send {
    /// Current position of the output clock in seconds
    fn current_time(&self) -> f64;

    /// Begin playing `chunk` at `start_at`
    fn play(&mut self, handle: PlaybackSourceHandle, chunk: &AudioChunk, start_at: f64)
        -> Result<()>;

    /// Halt a buffer immediately (no-op if it already finished)
    fn stop(&mut self, handle: PlaybackSourceHandle);

    /// Buffers that finished playing since the last call
    ///
    /// Outputs that cannot observe completion report nothing; the scheduler
    /// then retires buffers by their end time alone.
    fn take_finished(&mut self) -> Vec<PlaybackSourceHandle> {
        Vec::new()
    }

    /// Flush and release the device
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Schedules decoded chunks onto an [`AudioOutput`] in arrival order
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    /// Next available start time
    clock: f64,
    /// Buffers that may still be audible
    live: BTreeMap<PlaybackSourceHandle, ScheduledSource>,
    next_handle: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        debug!("Playback scheduler using output: {}", output.name());
        Self {
            output,
            clock: 0.0,
            live: BTreeMap::new(),
            next_handle: 0,
        }
    }

    /// Current output clock position
    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// Schedule `chunk` right after everything already queued
    pub fn schedule(&mut self, chunk: &AudioChunk, current_output_time: f64) -> Result<ScheduledSource> {
        self.reap(current_output_time);

        let start_time = current_output_time.max(self.clock);
        let handle = PlaybackSourceHandle(self.next_handle);
        self.next_handle += 1;

        self.output.play(handle, chunk, start_time)?;

        let source = ScheduledSource {
            handle,
            start_time,
            end_time: start_time + chunk.duration(),
        };
        self.clock = source.end_time;
        self.live.insert(handle, source);

        debug!(
            "Scheduled source {} at {:.3}s ({:.3}s, {} live)",
            handle.id(),
            start_time,
            chunk.duration(),
            self.live.len()
        );

        Ok(source)
    }

    /// Schedule against the output's own clock
    pub fn schedule_now(&mut self, chunk: &AudioChunk) -> Result<ScheduledSource> {
        let now = self.output.current_time();
        self.schedule(chunk, now)
    }

    /// Deregister a buffer whose playback completed
    pub fn finished(&mut self, handle: PlaybackSourceHandle) {
        self.live.remove(&handle);
    }

    /// Deregister buffers the output reports done, then every buffer that
    /// has ended by `now`
    pub fn reap(&mut self, now: f64) {
        for handle in self.output.take_finished() {
            self.finished(handle);
        }
        self.live.retain(|_, source| source.end_time > now);
    }

    /// Halt all live buffers, clear the registry and reset the clock
    pub fn stop_all(&mut self) {
        let stopped = self.live.len();
        for handle in self.live.keys() {
            self.output.stop(*handle);
        }
        self.live.clear();
        self.clock = 0.0;

        if stopped > 0 {
            debug!("Stopped {} playback sources", stopped);
        }
    }

    /// Stop everything and close the output device
    pub fn shutdown(&mut self) {
        self.stop_all();
        if let Err(e) = self.output.close() {
            warn!("Failed to close audio output {}: {}", self.output.name(), e);
        }
    }

    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_sources(&self) -> Vec<ScheduledSource> {
        self.live.values().copied().collect()
    }
}
