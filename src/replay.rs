//! Replay buffer (C7): records a run of key-down/key-up virtual keycodes,
//! normalizes it on stop (collapsing auto-repeat, dropping dangling ups),
//! and can play the normalized sequence back through the engine.

use log::{error, info, warn};

use crate::keycode::KeyCode;

const DEFAULT_MAX_SEQ: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordedKey {
    pub vk: KeyCode,
    pub down: bool,
}

pub struct ReplayBuffer {
    recording: bool,
    seq: Vec<RecordedKey>,
    max_seq: usize,
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        ReplayBuffer { recording: false, seq: Vec::new(), max_seq: DEFAULT_MAX_SEQ }
    }
}

impl ReplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn start_recording(&mut self) {
        self.seq.clear();
        self.recording = true;
        info!("replay: started recording");
    }

    /// Appends a raw (unnormalized) key event while recording. Drops and
    /// logs once the buffer is full rather than growing without bound.
    pub fn record(&mut self, vk: KeyCode, down: bool) {
        if !self.recording {
            return;
        }
        if self.seq.len() >= self.max_seq {
            error!("replay buffer is full, dropping event");
            return;
        }
        self.seq.push(RecordedKey { vk, down });
    }

    /// Stops recording and normalizes the buffer in place: collapses
    /// auto-repeated key-downs (only the first down of an unbroken run is
    /// kept) and drops any key-up whose matching down was never recorded
    /// (a "dangling up", e.g. one whose down predates recording).
    pub fn stop_recording(&mut self) {
        self.recording = false;
        self.seq = normalize(&self.seq);
    }

    pub fn toggle_recording(&mut self) {
        if self.recording {
            self.stop_recording();
        } else {
            self.start_recording();
        }
    }

    pub fn clear(&mut self) {
        self.seq.clear();
        self.recording = false;
        info!("replay: buffer cleared");
    }

    /// Plays back the normalized sequence, calling `dispatch(vk, down)`
    /// for each event in order. `dispatch` should return `true` if the
    /// engine handled (consumed) the event; when it returns `false`
    /// (pass-through), the caller is expected to re-emit the event itself
    /// through an `InputContext` in replay mode.
    pub fn playback<F: FnMut(KeyCode, bool) -> bool>(&mut self, mut dispatch: F) {
        if self.recording {
            warn!("replay: cannot play back while recording");
            return;
        }
        if self.seq.is_empty() {
            warn!("replay: nothing recorded");
            return;
        }
        for event in self.seq.clone() {
            dispatch(event.vk, event.down);
        }
    }

    #[cfg(test)]
    pub fn seq(&self) -> &[RecordedKey] {
        &self.seq
    }
}

/// Implements the collapse/drop normalization as a single forward pass:
/// for each key, track whether its most recent down is still
/// "unfinalized" (no matching up seen yet, and no finalized entry kept
/// for it since). A repeated down while unfinalized is dropped outright
/// (auto-repeat); an up with no corresponding pending down is dropped
/// (dangling). This produces the same kept/dropped set as the reference
/// implementation's backward-walk.
fn normalize(raw: &[RecordedKey]) -> Vec<RecordedKey> {
    use std::collections::HashSet;
    let mut pending_down: HashSet<KeyCode> = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for event in raw {
        if event.down {
            if pending_down.contains(&event.vk) {
                continue; // auto-repeat: drop the repeated down
            }
            pending_down.insert(event.vk);
            out.push(*event);
        } else {
            if !pending_down.remove(&event.vk) {
                continue; // dangling up: no matching down was recorded
            }
            out.push(*event);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(vk: KeyCode) -> RecordedKey {
        RecordedKey { vk, down: true }
    }
    fn up(vk: KeyCode) -> RecordedKey {
        RecordedKey { vk, down: false }
    }

    #[test]
    fn normal_down_up_pair_is_kept() {
        let out = normalize(&[down(1), up(1)]);
        assert_eq!(out, vec![down(1), up(1)]);
    }

    #[test]
    fn auto_repeat_downs_collapse_to_first() {
        let out = normalize(&[down(1), down(1), down(1), up(1)]);
        assert_eq!(out, vec![down(1), up(1)]);
    }

    #[test]
    fn dangling_up_is_dropped() {
        let out = normalize(&[up(1), down(1), up(1)]);
        assert_eq!(out, vec![down(1), up(1)]);
    }

    #[test]
    fn interleaved_keys_are_independent() {
        let out = normalize(&[down(1), down(2), up(1), up(2)]);
        assert_eq!(out, vec![down(1), down(2), up(1), up(2)]);
    }

    #[test]
    fn buffer_caps_and_drops_when_full() {
        let mut buf = ReplayBuffer { recording: true, seq: Vec::new(), max_seq: 2 };
        buf.record(1, true);
        buf.record(1, false);
        buf.record(2, true);
        assert_eq!(buf.seq().len(), 2);
    }

    #[test]
    fn playback_refuses_while_recording() {
        let mut buf = ReplayBuffer::new();
        buf.start_recording();
        buf.record(1, true);
        let mut calls = 0;
        buf.playback(|_, _| {
            calls += 1;
            true
        });
        assert_eq!(calls, 0);
    }
}
