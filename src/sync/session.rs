//! Client Simulation Session
//!
//! Drives one client's world from the authority's message stream. The
//! pump never blocks: each call drains whatever messages have arrived,
//! then steps the world through any buffered completed frames, bounded
//! per pump so a long catch-up (after a stall or a late join) cannot
//! freeze the caller.
//!
//! Messages arrive on a tokio mpsc channel; the transport task owns the
//! socket and just forwards decoded `ServerMessage`s here.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::hash::StateHash;
use crate::sim::capability::CapabilityRegistry;
use crate::sim::effects::EffectHandlerRegistry;
use crate::sim::scheduler::step_world;
use crate::sim::world::World;
use crate::sync::buffer::FrameBuffer;
use crate::sync::protocol::{FrameSyncStartData, ServerMessage};
use crate::sync::snapshot::{decode_world, SnapshotAssembler};

/// Most frames simulated in a single `pump` call.
pub const MAX_CATCHUP_PER_PUMP: u32 = 30;

/// Lifecycle of a client session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Late joiner waiting for its snapshot to finish arriving.
    AwaitingSnapshot,
    /// World ready, waiting for `FrameSyncStart`.
    Syncing,
    /// Simulating completed frames as they arrive.
    Running,
    /// `FrameSyncEnd` received; the world is final.
    Ended,
}

/// One client's view of a lockstep match.
pub struct SimSession {
    state: SessionState,
    world: Option<World>,
    capabilities: Arc<CapabilityRegistry>,
    effects: Arc<EffectHandlerRegistry>,
    inbound: UnboundedReceiver<ServerMessage>,
    frames: FrameBuffer,
    /// Authority hashes per frame, compared after simulating that frame.
    expected_hashes: BTreeMap<u32, StateHash>,
    assembler: SnapshotAssembler,
    start: Option<FrameSyncStartData>,
    diverged_at: Option<u32>,
}

impl SimSession {
    /// Session for a from-the-start participant: the caller builds the
    /// initial world (spawning the roster) before frame 0.
    pub fn new(
        world: World,
        capabilities: Arc<CapabilityRegistry>,
        effects: Arc<EffectHandlerRegistry>,
        inbound: UnboundedReceiver<ServerMessage>,
    ) -> Self {
        Self {
            state: SessionState::Syncing,
            world: Some(world),
            capabilities,
            effects,
            inbound,
            frames: FrameBuffer::new(),
            expected_hashes: BTreeMap::new(),
            assembler: SnapshotAssembler::new(),
            start: None,
            diverged_at: None,
        }
    }

    /// Session for a late joiner: the world arrives as a snapshot.
    pub fn late_join(
        capabilities: Arc<CapabilityRegistry>,
        effects: Arc<EffectHandlerRegistry>,
        inbound: UnboundedReceiver<ServerMessage>,
    ) -> Self {
        Self {
            state: SessionState::AwaitingSnapshot,
            world: None,
            capabilities,
            effects,
            inbound,
            frames: FrameBuffer::new(),
            expected_hashes: BTreeMap::new(),
            assembler: SnapshotAssembler::new(),
            start: None,
            diverged_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The simulated world, once one exists.
    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    /// First frame whose hash disagreed with the authority, if any.
    pub fn diverged_at(&self) -> Option<u32> {
        self.diverged_at
    }

    /// Drain pending messages and simulate as far as the buffered frames
    /// allow (bounded by [`MAX_CATCHUP_PER_PUMP`]). Returns the number of
    /// frames simulated.
    pub fn pump(&mut self) -> u32 {
        while let Ok(message) = self.inbound.try_recv() {
            self.handle_message(message);
        }
        self.step_buffered()
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::FrameSyncStart(start) => {
                if let Some(world) = &self.world {
                    if world.delta_time != start.frame_interval {
                        tracing::warn!(
                            world_dt = world.delta_time,
                            start_dt = start.frame_interval,
                            "frame interval mismatch between world and start message"
                        );
                    }
                }
                self.start = Some(start);
                if self.world.is_some() && self.state == SessionState::Syncing {
                    self.state = SessionState::Running;
                }
            }
            ServerMessage::FrameSync(frame) => {
                if let Some(hash) = frame.state_hash {
                    self.expected_hashes.insert(frame.authority_frame, hash);
                }
                let current = self.world.as_ref().map_or(0, |w| w.frame);
                if frame.authority_frame < current {
                    tracing::debug!(
                        frame = frame.authority_frame,
                        current,
                        "ignoring already-simulated frame"
                    );
                } else {
                    self.frames.insert_completed(frame.inputs);
                }
            }
            ServerMessage::SnapshotStart {
                snapshot_frame,
                chunk_count,
                total_bytes,
                ..
            } => {
                if self.state == SessionState::AwaitingSnapshot {
                    self.assembler
                        .accept_start(snapshot_frame, chunk_count, total_bytes);
                } else {
                    tracing::warn!("unexpected snapshot start, ignoring");
                }
            }
            ServerMessage::SnapshotChunk { index, data, .. } => {
                if self.state != SessionState::AwaitingSnapshot {
                    tracing::warn!(index, "unexpected snapshot chunk, ignoring");
                    return;
                }
                match self.assembler.accept_chunk(index, data) {
                    Ok(Some(bytes)) => self.finish_snapshot(&bytes),
                    Ok(None) => {}
                    Err(error) => {
                        tracing::error!(%error, "snapshot reassembly failed, awaiting restart");
                    }
                }
            }
            ServerMessage::FrameSyncEnd {
                final_frame,
                reason,
                ..
            } => {
                tracing::info!(final_frame, reason, "match ended");
                // Simulate out whatever completed frames we already hold.
                self.step_buffered();
                self.state = SessionState::Ended;
            }
            ServerMessage::Pong { .. } => {}
        }
    }

    fn finish_snapshot(&mut self, bytes: &[u8]) {
        match decode_world(bytes) {
            Ok(world) => {
                tracing::info!(frame = world.frame, "snapshot restored, catching up");
                // Frames at or behind the snapshot are already baked in.
                self.frames.remove_old_frames(world.frame);
                self.world = Some(world);
                self.state = if self.start.is_some() {
                    SessionState::Running
                } else {
                    SessionState::Syncing
                };
            }
            Err(error) => {
                tracing::error!(%error, "snapshot decode failed, awaiting restart");
            }
        }
    }

    fn step_buffered(&mut self) -> u32 {
        if self.state != SessionState::Running && self.state != SessionState::Ended {
            return 0;
        }
        let Some(world) = self.world.as_mut() else {
            return 0;
        };

        let mut stepped = 0;
        while stepped < MAX_CATCHUP_PER_PUMP {
            let frame = world.frame;
            let Some(inputs) = self.frames.get_frame(frame) else {
                break;
            };
            if !inputs.is_complete() {
                break;
            }
            let inputs = inputs.clone();
            step_world(world, &self.capabilities, &self.effects, &inputs);
            stepped += 1;

            if let Some(expected) = self.expected_hashes.remove(&frame) {
                let actual = world.state_hash();
                if actual != expected && self.diverged_at.is_none() {
                    tracing::error!(
                        frame,
                        expected = %hex::encode(expected),
                        actual = %hex::encode(actual),
                        "state divergence detected"
                    );
                    self.diverged_at = Some(frame);
                }
            }
        }

        let threshold = world.frame;
        self.frames.remove_old_frames(threshold);
        self.expected_hashes.retain(|frame, _| *frame >= threshold);
        stepped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, Fixed, FIXED_ONE};
    use crate::core::quat::FixedQuat;
    use crate::core::vec3::{FixedVec2, FixedVec3};
    use crate::sim::capabilities::MovementCapability;
    use crate::sim::capability::Capability;
    use crate::sim::component::{
        Component, MovementComponent, PlayerInputComponent, TransformComponent,
    };
    use crate::sim::entity::EntityId;
    use crate::sync::input::{LSInput, OneFrameInputs, PlayerId};
    use crate::sync::protocol::{FrameSyncData, RoomId};
    use crate::sync::snapshot::{chunk_snapshot, encode_world};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use uuid::Uuid;

    const DT: Fixed = 1092;

    fn registries() -> (Arc<CapabilityRegistry>, Arc<EffectHandlerRegistry>) {
        let caps: Vec<Arc<dyn Capability>> = vec![Arc::new(MovementCapability)];
        (
            Arc::new(CapabilityRegistry::new(caps).unwrap()),
            Arc::new(EffectHandlerRegistry::with_default_handlers()),
        )
    }

    fn base_world() -> (World, EntityId) {
        let mut world = World::new(7, DT);
        let id = world.spawn_entity("hero");
        world
            .attach_component(
                id,
                Component::Transform(TransformComponent {
                    position: FixedVec3::ZERO,
                    rotation: FixedQuat::IDENTITY,
                }),
            )
            .unwrap();
        world
            .attach_component(
                id,
                Component::Movement(MovementComponent {
                    speed: to_fixed(4.0),
                }),
            )
            .unwrap();
        world
            .attach_component(
                id,
                Component::PlayerInput(PlayerInputComponent::new(PlayerId(1))),
            )
            .unwrap();
        world.attach_capability(id, &MovementCapability).unwrap();
        (world, id)
    }

    fn start_message(room_id: RoomId) -> ServerMessage {
        ServerMessage::FrameSyncStart(crate::sync::protocol::FrameSyncStartData {
            room_id,
            tick_rate: 60,
            frame_interval: DT,
            start_frame: 0,
            start_time: 0,
            seed: 7,
            roster: vec![],
        })
    }

    fn send_frame(
        tx: &UnboundedSender<ServerMessage>,
        room_id: RoomId,
        frame: u32,
        move_vec: FixedVec2,
        state_hash: Option<StateHash>,
    ) {
        let mut inputs = OneFrameInputs::new(frame);
        inputs.insert(LSInput::with_movement(PlayerId(1), frame, move_vec));
        inputs.force_complete();
        tx.send(ServerMessage::FrameSync(FrameSyncData {
            room_id,
            authority_frame: frame,
            inputs,
            timestamp: 0,
            state_hash,
        }))
        .unwrap();
    }

    #[test]
    fn test_session_steps_only_completed_frames() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();
        let (world, hero) = base_world();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::new(world, caps, effects, rx);

        assert_eq!(session.pump(), 0, "nothing to do before start");
        assert_eq!(session.state(), SessionState::Syncing);

        tx.send(start_message(room_id)).unwrap();
        send_frame(&tx, room_id, 0, FixedVec2::new(FIXED_ONE, 0), None);
        send_frame(&tx, room_id, 1, FixedVec2::new(FIXED_ONE, 0), None);
        // Frame 3 arrives but frame 2 is missing: must stop at 2
        send_frame(&tx, room_id, 3, FixedVec2::new(FIXED_ONE, 0), None);

        let stepped = session.pump();
        assert_eq!(stepped, 2);
        assert_eq!(session.state(), SessionState::Running);
        let world = session.world().unwrap();
        assert_eq!(world.frame, 2);
        let (position, _) = world.transform_of(hero).unwrap();
        assert!(position.x > 0);

        // The gap fills in, both frames simulate
        send_frame(&tx, room_id, 2, FixedVec2::ZERO, None);
        assert_eq!(session.pump(), 2);
        assert_eq!(session.world().unwrap().frame, 4);
    }

    #[test]
    fn test_catchup_is_bounded_per_pump() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();
        let (world, _) = base_world();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::new(world, caps, effects, rx);

        tx.send(start_message(room_id)).unwrap();
        for frame in 0..(MAX_CATCHUP_PER_PUMP + 10) {
            send_frame(&tx, room_id, frame, FixedVec2::ZERO, None);
        }

        assert_eq!(session.pump(), MAX_CATCHUP_PER_PUMP);
        assert_eq!(session.pump(), 10, "remainder simulated next pump");
    }

    #[test]
    fn test_divergence_detection() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();
        let (world, _) = base_world();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::new(world, caps, effects, rx);

        tx.send(start_message(room_id)).unwrap();
        send_frame(&tx, room_id, 0, FixedVec2::ZERO, Some([0xAA; 32]));
        session.pump();

        assert_eq!(session.diverged_at(), Some(0));
    }

    #[test]
    fn test_matching_hash_is_clean() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();

        // Reference run computes the authority-side hash
        let (mut reference, _) = base_world();
        let mut inputs = OneFrameInputs::new(0);
        inputs.insert(LSInput::idle(PlayerId(1), 0));
        inputs.force_complete();
        let (ref_caps, ref_effects) = registries();
        step_world(&mut reference, &ref_caps, &ref_effects, &inputs);
        let expected = reference.state_hash();

        let (world, _) = base_world();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::new(world, caps, effects, rx);
        tx.send(start_message(room_id)).unwrap();
        send_frame(&tx, room_id, 0, FixedVec2::ZERO, Some(expected));
        session.pump();

        assert_eq!(session.diverged_at(), None);
    }

    #[test]
    fn test_late_join_via_snapshot() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();

        // Authority-side world simulated to frame 5
        let (mut source, hero) = base_world();
        let (src_caps, src_effects) = registries();
        for frame in 0..5 {
            let mut inputs = OneFrameInputs::new(frame);
            inputs.insert(LSInput::with_movement(
                PlayerId(1),
                frame,
                FixedVec2::new(FIXED_ONE, 0),
            ));
            inputs.force_complete();
            step_world(&mut source, &src_caps, &src_effects, &inputs);
        }

        let snapshot = encode_world(&source).unwrap();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::late_join(caps, effects, rx);

        for message in chunk_snapshot(room_id, source.frame, &snapshot, 128) {
            tx.send(message).unwrap();
        }
        tx.send(start_message(room_id)).unwrap();
        // Live frames 5 and 6 arrive during the join
        send_frame(&tx, room_id, 5, FixedVec2::ZERO, None);
        send_frame(&tx, room_id, 6, FixedVec2::ZERO, None);

        let stepped = session.pump();
        assert_eq!(stepped, 2);
        let world = session.world().unwrap();
        assert_eq!(world.frame, 7);

        // Restored world carries the snapshot's simulated movement
        let (position, _) = world.transform_of(hero).unwrap();
        let (source_position, _) = source.transform_of(hero).unwrap();
        assert_eq!(position, source_position, "idle frames after join");
    }

    #[test]
    fn test_end_message_finalizes_session() {
        let room_id = Uuid::new_v4();
        let (caps, effects) = registries();
        let (world, _) = base_world();
        let (tx, rx) = unbounded_channel();
        let mut session = SimSession::new(world, caps, effects, rx);

        tx.send(start_message(room_id)).unwrap();
        send_frame(&tx, room_id, 0, FixedVec2::ZERO, None);
        tx.send(ServerMessage::FrameSyncEnd {
            room_id,
            final_frame: 0,
            end_time: 0,
            reason: "test over".to_string(),
        })
        .unwrap();

        session.pump();
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.world().unwrap().frame, 1, "buffered frame still simulated");
    }
}
