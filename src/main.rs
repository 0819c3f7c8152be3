//! Lockstep Arena Demo
//!
//! Runs a scripted two-player match through the full stack: frame
//! authority, deterministic simulation, replay recording, then verifies
//! determinism by seeking the replay timeline and comparing state hashes.

use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use lockstep_arena::hitquery::parse_shape_list;
use lockstep_arena::replay::{ReplayRecorder, ReplayTimeline};
use lockstep_arena::sim::capabilities::{MeleeAttackCapability, MovementCapability};
use lockstep_arena::sim::component::{
    Component, HealthComponent, MovementComponent, PlayerInputComponent, TransformComponent,
    VelocityComponent,
};
use lockstep_arena::sim::scheduler::step_world;
use lockstep_arena::sync::authority::FrameAuthority;
use lockstep_arena::sync::protocol::PlayerSeat;
use lockstep_arena::{
    to_fixed, Capability, CapabilityRegistry, EffectHandlerRegistry, EntityId, Fixed, FixedQuat,
    FixedVec2, FixedVec3, LSInput, PlayerId, SkillEffectConfig, World, FIXED_ONE, FRAME_INTERVAL,
    TICK_RATE, VERSION,
};

const DEMO_FRAMES: u32 = 600;
const SNAPSHOT_EVERY: u32 = 120;
const RNG_SEED: u64 = 12345;

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Lockstep Arena v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    demo_match()
}

fn build_registries() -> anyhow::Result<(Arc<CapabilityRegistry>, Arc<EffectHandlerRegistry>)> {
    let swing_shapes = parse_shape_list("Box:0,0,1.2:0,0,0,1:0.8,1,1.2");
    let swing = swing_shapes
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("swing shape config failed to parse"))?;

    let caps: Vec<Arc<dyn Capability>> = vec![
        Arc::new(MovementCapability),
        Arc::new(MeleeAttackCapability::new(swing, 1)),
    ];
    let capabilities = Arc::new(
        CapabilityRegistry::new(caps).map_err(|e| anyhow::anyhow!("registry: {e}"))?,
    );

    let mut effects = EffectHandlerRegistry::with_default_handlers();
    effects.register_config(SkillEffectConfig {
        id: 1,
        effect_type: "damage".to_string(),
        amount: to_fixed(15.0),
    });
    Ok((capabilities, Arc::new(effects)))
}

fn spawn_fighter(
    world: &mut World,
    capabilities: &CapabilityRegistry,
    player: PlayerId,
    position: FixedVec3,
) -> EntityId {
    let id = world.spawn_entity(format!("fighter-{player}"));
    let attach = |world: &mut World, component| {
        if let Err(error) = world.attach_component(id, component) {
            tracing::error!(%error, "fighter setup failed");
        }
    };
    attach(
        world,
        Component::Transform(TransformComponent {
            position,
            rotation: FixedQuat::IDENTITY,
        }),
    );
    attach(world, Component::Velocity(VelocityComponent::default()));
    attach(world, Component::Health(HealthComponent::full(to_fixed(200.0))));
    attach(
        world,
        Component::Movement(MovementComponent {
            speed: to_fixed(6.0),
        }),
    );
    attach(world, Component::PlayerInput(PlayerInputComponent::new(player)));

    for capability in capabilities.iter() {
        if let Err(error) = world.attach_capability(id, capability.as_ref()) {
            tracing::error!(%error, "fighter capability setup failed");
        }
    }

    let hull = parse_shape_list("Sphere:0,1,0:0,0,0,1:0.5");
    world.hit_query.register_entity(id, hull, position, FixedQuat::IDENTITY);
    id
}

fn build_world(
    seed: u64,
    capabilities: &CapabilityRegistry,
) -> (World, Vec<(PlayerId, EntityId)>) {
    let mut world = World::new(seed, FRAME_INTERVAL);
    let seats = vec![
        (
            PlayerId(1),
            spawn_fighter(
                &mut world,
                capabilities,
                PlayerId(1),
                FixedVec3::from_ints(-3, 0, 0),
            ),
        ),
        (
            PlayerId(2),
            spawn_fighter(
                &mut world,
                capabilities,
                PlayerId(2),
                FixedVec3::from_ints(3, 0, 0),
            ),
        ),
    ];
    (world, seats)
}

/// Scripted joystick: integer arithmetic only, so the replay verification
/// regenerates the exact same inputs.
fn scripted_input(player: PlayerId, frame: u32) -> LSInput {
    let phase = (frame as i32 * 7 + player.0 as i32 * 31) % 254;
    let axis = (phase - 127).clamp(-63, 63);
    let move_vec = FixedVec2::new(
        axis * FIXED_ONE / 63,
        if player.0 == 1 { FIXED_ONE / 2 } else { -FIXED_ONE / 2 },
    );

    let mut input = LSInput::with_movement(player, frame, move_vec);
    // Swing for 10 frames out of every 60
    input.set_flag(LSInput::FLAG_ATTACK, frame % 60 < 10);
    input.timestamp = u64::from(frame) * 16;
    input
}

fn health_of(world: &World, entity: EntityId) -> Fixed {
    world
        .entity(entity)
        .and_then(|e| e.component(lockstep_arena::ComponentKind::Health))
        .and_then(|c| c.as_health())
        .map(|h| h.current)
        .unwrap_or(0)
}

fn demo_match() -> anyhow::Result<()> {
    info!("=== Starting Demo Match ===");

    let room_id = Uuid::new_v4();
    info!("Room: {room_id}");
    info!("RNG Seed: {RNG_SEED}");

    let (capabilities, effects) = build_registries()?;
    let (mut world, seats) = build_world(RNG_SEED, &capabilities);
    let roster: Vec<PlayerSeat> = seats
        .iter()
        .map(|(player, entity)| PlayerSeat {
            player: *player,
            entity: *entity,
            display_name: format!("fighter-{player}"),
        })
        .collect();

    let mut authority = FrameAuthority::new(room_id, seats.iter().map(|(p, _)| *p));
    let mut recorder =
        ReplayRecorder::new(room_id, TICK_RATE, FRAME_INTERVAL, RNG_SEED, roster);

    for frame in 0..DEMO_FRAMES {
        if frame % SNAPSHOT_EVERY == 0 {
            recorder
                .record_snapshot(&world)
                .map_err(|e| anyhow::anyhow!("snapshot: {e}"))?;
        }

        for (player, _) in &seats {
            authority.accept_input(scripted_input(*player, frame));
        }
        let mut sync = authority
            .try_advance(false, u64::from(frame) * 16)
            .ok_or_else(|| anyhow::anyhow!("frame {frame} did not complete"))?;

        step_world(&mut world, &capabilities, &effects, &sync.inputs);
        sync.state_hash = Some(world.state_hash());
        recorder
            .record_frame(sync.inputs.clone())
            .map_err(|e| anyhow::anyhow!("record: {e}"))?;

        if frame % 120 == 0 {
            let (p1, p2) = (seats[0].1, seats[1].1);
            info!(
                "Frame {:3}: P1 hp {:5.1}, P2 hp {:5.1}",
                frame,
                lockstep_arena::core::fixed::to_float(health_of(&world, p1)),
                lockstep_arena::core::fixed::to_float(health_of(&world, p2)),
            );
        }
    }

    let final_hash = world.state_hash();
    info!("=== Match Results ===");
    info!("Final frame: {}", world.frame);
    info!("Final State Hash: {}", hex::encode(final_hash));

    // -------------------------------------------------------------------------
    // Verify determinism through the replay timeline
    // -------------------------------------------------------------------------
    info!("=== Verifying Determinism ===");
    let replay = recorder.finish();
    let bytes = replay
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("replay encode: {e}"))?;
    info!("Replay size: {} bytes", bytes.len());

    let timeline = ReplayTimeline::load(replay).map_err(|e| anyhow::anyhow!("replay: {e}"))?;
    for target in [DEMO_FRAMES / 4, DEMO_FRAMES / 2, DEMO_FRAMES] {
        let seeked = timeline
            .seek(target, &capabilities, &effects)
            .map_err(|e| anyhow::anyhow!("seek {target}: {e}"))?;
        info!(
            "Seek to frame {:3}: hash {}",
            target,
            hex::encode(&seeked.state_hash()[..8])
        );
        if target == DEMO_FRAMES && seeked.state_hash() != final_hash {
            anyhow::bail!("replay diverged from the live match");
        }
    }
    info!("Replay matches the live match bit-for-bit");
    Ok(())
}
