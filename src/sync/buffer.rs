//! Frame Input Buffer
//!
//! Ordered storage of per-frame input sets. The server buffers inputs
//! arriving ahead of the authority frame; clients buffer completed frames
//! arriving from the server faster than they simulate.

use std::collections::BTreeMap;

use crate::sync::input::{LSInput, OneFrameInputs};

/// Buffer of per-frame input sets, keyed (and iterated) by frame number.
#[derive(Clone, Debug, Default)]
pub struct FrameBuffer {
    frames: BTreeMap<u32, OneFrameInputs>,
}

impl FrameBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one player's input, creating the frame entry on demand.
    ///
    /// Returns false if the frame is already complete (the input is
    /// discarded - completed frames are immutable).
    pub fn add_input(&mut self, input: LSInput) -> bool {
        let frame = input.frame;
        self.frames
            .entry(frame)
            .or_insert_with(|| OneFrameInputs::new(frame))
            .insert(input)
    }

    /// Insert an already-completed frame (received from the server).
    /// Replaces any partial entry for that frame.
    pub fn insert_completed(&mut self, inputs: OneFrameInputs) {
        self.frames.insert(inputs.frame, inputs);
    }

    /// Whether a frame holds inputs from at least `expected` players.
    pub fn has_all_inputs(&self, frame: u32, expected: usize) -> bool {
        self.frames
            .get(&frame)
            .is_some_and(|f| f.player_count() >= expected)
    }

    /// Get a frame's input set.
    pub fn get_frame(&self, frame: u32) -> Option<&OneFrameInputs> {
        self.frames.get(&frame)
    }

    /// Get a frame's input set mutably.
    pub fn get_frame_mut(&mut self, frame: u32) -> Option<&mut OneFrameInputs> {
        self.frames.get_mut(&frame)
    }

    /// Completed frames in `[start, end]`, ascending. Used to catch a
    /// late joiner up from its snapshot frame.
    pub fn get_frame_range(&self, start: u32, end: u32) -> Vec<&OneFrameInputs> {
        self.frames
            .range(start..=end)
            .map(|(_, inputs)| inputs)
            .filter(|inputs| inputs.is_complete())
            .collect()
    }

    /// Drop every frame strictly below `threshold`.
    pub fn remove_old_frames(&mut self, threshold: u32) {
        self.frames.retain(|frame, _| *frame >= threshold);
    }

    /// Lowest buffered frame number.
    pub fn first_frame(&self) -> Option<u32> {
        self.frames.keys().next().copied()
    }

    /// Highest buffered frame number.
    pub fn last_frame(&self) -> Option<u32> {
        self.frames.keys().next_back().copied()
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
