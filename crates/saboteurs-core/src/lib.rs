pub mod action;
pub mod assign;
pub mod engine;
pub mod log;
pub mod net;
pub mod phase;
pub mod player;
pub mod projection;
pub mod role;
pub mod room;
pub mod video;
pub mod win;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::action::Action;
    use crate::engine::PhaseEngine;
    use crate::phase::required_set;
    use crate::player::{Player, PlayerId};
    use crate::room::{RoleToggles, Room, RoomRules};

    /// Deterministic rng for engine tests.
    pub fn seeded_rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    /// A lobby room with `n` players named Player1..PlayerN, ids 1..=n,
    /// player 1 hosting.
    pub fn make_room(n: usize) -> Room {
        let mut room = Room::new("TEST-0001".to_string(), Player::new(1, "Player1".to_string()));
        for i in 2..=n as PlayerId {
            room.add_player(Player::new(i, format!("Player{i}")))
                .expect("lobby join must succeed");
        }
        room
    }

    /// Rules with every special role switched off.
    pub fn bare_rules() -> RoomRules {
        RoomRules {
            roles: RoleToggles {
                doctor: false,
                security: false,
                radar: false,
                ai_agent: false,
                engineer: false,
                chameleon: false,
            },
            manual_roles: false,
        }
    }

    /// Acks the current phase for every player still missing from the
    /// gate, which completes it.
    pub fn ack_phase(engine: &PhaseEngine, room: &mut Room, rng: &mut StdRng) {
        let phase = room.phase;
        while room.phase == phase {
            let pending = required_set(room)
                .into_iter()
                .find(|id| !room.phase_ack.contains(id));
            let Some(next) = pending else {
                break;
            };
            engine
                .apply(room, next, Action::Ack, rng)
                .expect("ack must be accepted");
        }
    }
}
