//! Frame Authority
//!
//! The server-side collector that turns raw input uploads into the
//! authoritative frame sequence. One authority per room. It buffers
//! inputs ahead of the authority frame, completes a frame when every
//! seated player has reported (or the collection deadline fires), and
//! hands back the broadcastable `FrameSyncData`.
//!
//! The authority never simulates; attaching a state hash to outgoing
//! frames is the caller's choice when it also runs the world.

use std::collections::{BTreeMap, BTreeSet};

use crate::sync::buffer::FrameBuffer;
use crate::sync::input::{LSInput, PlayerId};
use crate::sync::protocol::{FrameSyncData, FrameSyncStartData, PlayerSeat, RoomId, ServerMessage};

/// How many completed frames stay buffered behind the authority frame for
/// `SyncRequest` re-sends and late-join catch-up.
pub const FRAME_RETENTION: u32 = 600;

/// Per-room authoritative input collector.
#[derive(Debug)]
pub struct FrameAuthority {
    room_id: RoomId,
    expected: BTreeSet<PlayerId>,
    buffer: FrameBuffer,
    /// The frame currently being collected. Everything below it is
    /// completed history.
    authority_frame: u32,
    /// Most recent input seen from each player, used as the substitute
    /// when a deadline fires before the player reports.
    last_inputs: BTreeMap<PlayerId, LSInput>,
}

impl FrameAuthority {
    /// Authority for a room with the given seated players, starting at
    /// frame 0.
    pub fn new(room_id: RoomId, players: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            room_id,
            expected: players.into_iter().collect(),
            buffer: FrameBuffer::new(),
            authority_frame: 0,
            last_inputs: BTreeMap::new(),
        }
    }

    /// The frame currently being collected.
    pub fn authority_frame(&self) -> u32 {
        self.authority_frame
    }

    /// Players the authority waits for each frame.
    pub fn players(&self) -> impl Iterator<Item = &PlayerId> {
        self.expected.iter()
    }

    /// Remove a departed player. Frames no longer wait for them.
    pub fn remove_player(&mut self, player: PlayerId) {
        self.expected.remove(&player);
        self.last_inputs.remove(&player);
    }

    /// Accept one uploaded input.
    ///
    /// Inputs for frames the authority has already completed are stale
    /// (their frame is immutable history) and are dropped with a log.
    /// Inputs from unseated players are dropped too.
    pub fn accept_input(&mut self, input: LSInput) -> bool {
        if !self.expected.contains(&input.player) {
            tracing::warn!(player = %input.player, "dropping input from unseated player");
            return false;
        }
        if input.frame < self.authority_frame {
            tracing::warn!(
                player = %input.player,
                frame = input.frame,
                authority_frame = self.authority_frame,
                "dropping stale input for completed frame"
            );
            return false;
        }

        let newer = self
            .last_inputs
            .get(&input.player)
            .map_or(true, |last| input.frame >= last.frame);
        if newer {
            self.last_inputs.insert(input.player, input.clone());
        }
        self.buffer.add_input(input)
    }

    /// Try to complete the authority frame.
    ///
    /// Completes when every seated player has reported, or unconditionally
    /// when `deadline_expired` is set - missing players get their
    /// last-seen input re-targeted at this frame (idle if they have never
    /// reported). Returns the broadcastable frame and advances, or `None`
    /// if still waiting.
    pub fn try_advance(&mut self, deadline_expired: bool, timestamp: u64) -> Option<FrameSyncData> {
        let frame = self.authority_frame;
        let have_all = self.buffer.has_all_inputs(frame, self.expected.len());
        if !have_all && !deadline_expired {
            return None;
        }

        if !have_all {
            let missing: Vec<PlayerId> = {
                let current = self.buffer.get_frame(frame);
                self.expected
                    .iter()
                    .filter(|p| current.and_then(|f| f.get(**p)).is_none())
                    .copied()
                    .collect()
            };
            for player in missing {
                let substitute = self
                    .last_inputs
                    .get(&player)
                    .map(|last| last.retargeted(frame))
                    .unwrap_or_else(|| LSInput::idle(player, frame));
                tracing::debug!(
                    %player,
                    frame,
                    "deadline expired, substituting last-seen input"
                );
                self.buffer.add_input(substitute);
            }
        }

        let inputs = {
            let entry = self.buffer.get_frame_mut(frame)?;
            entry.mark_complete_if(self.expected.len());
            if !entry.is_complete() {
                // Players can only be removed, never added, so reaching
                // here means expected shrank mid-collection.
                entry.force_complete();
            }
            entry.clone()
        };

        self.authority_frame += 1;
        self.buffer
            .remove_old_frames(self.authority_frame.saturating_sub(FRAME_RETENTION));

        Some(FrameSyncData {
            room_id: self.room_id,
            authority_frame: frame,
            inputs,
            timestamp,
            state_hash: None,
        })
    }

    /// Completed frames in `[from, to]` for a `SyncRequest` re-send.
    /// Frames already pruned or not yet completed are simply absent.
    pub fn completed_range(&self, from: u32, to: u32) -> Vec<FrameSyncData> {
        let to = to.min(self.authority_frame.saturating_sub(1));
        self.buffer
            .get_frame_range(from, to)
            .into_iter()
            .map(|inputs| FrameSyncData {
                room_id: self.room_id,
                authority_frame: inputs.frame,
                inputs: inputs.clone(),
                timestamp: 0,
                state_hash: None,
            })
            .collect()
    }

    /// Build the match-start announcement.
    pub fn start_message(
        &self,
        tick_rate: u32,
        frame_interval: crate::core::fixed::Fixed,
        seed: u64,
        roster: Vec<PlayerSeat>,
        start_time: u64,
    ) -> ServerMessage {
        ServerMessage::FrameSyncStart(FrameSyncStartData {
            room_id: self.room_id,
            tick_rate,
            frame_interval,
            start_frame: 0,
            start_time,
            seed,
            roster,
        })
    }

    /// Build the match-end announcement.
    pub fn end_message(&self, reason: impl Into<String>, end_time: u64) -> ServerMessage {
        ServerMessage::FrameSyncEnd {
            room_id: self.room_id,
            final_frame: self.authority_frame.saturating_sub(1),
            end_time,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, FIXED_ONE};
    use crate::core::vec3::FixedVec2;
    use uuid::Uuid;

    fn authority() -> FrameAuthority {
        FrameAuthority::new(Uuid::new_v4(), [PlayerId(1), PlayerId(2)])
    }

    #[test]
    fn test_advances_when_all_players_report() {
        let mut auth = authority();
        auth.accept_input(LSInput::idle(PlayerId(1), 0));
        assert!(auth.try_advance(false, 10).is_none(), "still missing P2");

        auth.accept_input(LSInput::idle(PlayerId(2), 0));
        let frame = auth.try_advance(false, 10).expect("frame complete");

        assert_eq!(frame.authority_frame, 0);
        assert!(frame.inputs.is_complete());
        assert_eq!(frame.inputs.player_count(), 2);
        assert_eq!(auth.authority_frame(), 1);
    }

    #[test]
    fn test_deadline_substitutes_last_seen_input() {
        let mut auth = authority();

        // P1 reported frame 0 with movement; P2 never reported.
        auth.accept_input(LSInput::with_movement(
            PlayerId(1),
            0,
            FixedVec2::new(FIXED_ONE, 0),
        ));
        auth.try_advance(true, 10).expect("deadline completes frame 0");

        // Frame 1: nobody reports, deadline fires.
        let frame = auth.try_advance(true, 20).expect("deadline completes frame 1");
        let p1 = frame.inputs.get(PlayerId(1)).unwrap();
        assert_eq!(p1.frame, 1, "re-targeted at the completed frame");
        assert_eq!(p1.move_vec, FixedVec2::new(FIXED_ONE, 0), "last-seen movement kept");

        let p2 = frame.inputs.get(PlayerId(2)).unwrap();
        assert!(p2.is_idle(), "never-seen player substituted with idle");
    }

    #[test]
    fn test_stale_and_unseated_inputs_dropped() {
        let mut auth = authority();
        auth.accept_input(LSInput::idle(PlayerId(1), 0));
        auth.accept_input(LSInput::idle(PlayerId(2), 0));
        auth.try_advance(false, 0).unwrap();

        assert!(!auth.accept_input(LSInput::idle(PlayerId(1), 0)), "stale frame");
        assert!(!auth.accept_input(LSInput::idle(PlayerId(9), 1)), "unseated player");
        assert!(auth.accept_input(LSInput::idle(PlayerId(1), 1)));
    }

    #[test]
    fn test_future_inputs_buffer_until_their_frame() {
        let mut auth = authority();
        // P1 uploads several frames ahead
        for frame in 0..3 {
            auth.accept_input(LSInput::idle(PlayerId(1), frame));
        }

        for frame in 0..3 {
            assert!(auth.try_advance(false, 0).is_none());
            auth.accept_input(LSInput::idle(PlayerId(2), frame));
            let completed = auth.try_advance(false, 0).unwrap();
            assert_eq!(completed.authority_frame, frame);
        }
    }

    #[test]
    fn test_completed_range_for_sync_request() {
        let mut auth = authority();
        for frame in 0..5 {
            auth.accept_input(LSInput::idle(PlayerId(1), frame));
            auth.accept_input(LSInput::idle(PlayerId(2), frame));
            auth.try_advance(false, 0).unwrap();
        }

        let frames = auth.completed_range(1, 3);
        let numbers: Vec<u32> = frames.iter().map(|f| f.authority_frame).collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        // Range clamped to completed history
        let frames = auth.completed_range(3, 99);
        let numbers: Vec<u32> = frames.iter().map(|f| f.authority_frame).collect();
        assert_eq!(numbers, vec![3, 4]);
    }

    #[test]
    fn test_removed_player_no_longer_blocks() {
        let mut auth = authority();
        auth.remove_player(PlayerId(2));

        auth.accept_input(LSInput::idle(PlayerId(1), 0));
        let frame = auth.try_advance(false, 0).expect("only P1 is seated now");
        assert_eq!(frame.inputs.player_count(), 1);
    }

    #[test]
    fn test_substitute_uses_latest_not_first_input() {
        let mut auth = authority();
        auth.accept_input(LSInput::with_movement(
            PlayerId(1),
            0,
            FixedVec2::new(FIXED_ONE, 0),
        ));
        auth.accept_input(LSInput::with_movement(
            PlayerId(1),
            1,
            FixedVec2::new(0, to_fixed(0.5)),
        ));
        auth.accept_input(LSInput::idle(PlayerId(2), 0));
        auth.try_advance(false, 0).unwrap();

        // Frame 1: P2 silent, deadline fires; P1 already reported frame 1
        let frame = auth.try_advance(true, 0).unwrap();
        assert_eq!(
            frame.inputs.get(PlayerId(1)).unwrap().move_vec,
            FixedVec2::new(0, to_fixed(0.5))
        );
    }
}
