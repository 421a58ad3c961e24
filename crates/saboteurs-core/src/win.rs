use serde::{Deserialize, Serialize};

use crate::role::{Faction, Role};
use crate::room::Room;

/// Outcome of a finished game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Crew,
    Saboteurs,
    /// Two mutually-linked survivors from opposite factions win together.
    Lovers,
    Aborted,
}

/// Evaluates the win condition. Pure; the engine applies the result
/// (setting `aborted`, ending the game). `min_active` is the viability
/// floor below which the game aborts.
pub fn evaluate(room: &Room, min_active: usize) -> Option<Winner> {
    if room.aborted {
        return Some(Winner::Aborted);
    }
    if room.started && room.active_count() < min_active {
        return Some(Winner::Aborted);
    }

    let alive: Vec<_> = room.players.values().filter(|p| p.is_alive()).collect();
    let saboteurs = alive
        .iter()
        .filter(|p| p.role.map(Role::faction) == Some(Faction::Saboteurs))
        .count();
    let crew = alive.len() - saboteurs;

    // Linked survivors from opposite factions beat the faction rule.
    if let [a, b] = alive.as_slice()
        && a.linked_to == Some(b.id)
        && b.linked_to == Some(a.id)
        && a.role.map(Role::faction) != b.role.map(Role::faction)
    {
        return Some(Winner::Lovers);
    }

    if saboteurs == 0 {
        return Some(Winner::Crew);
    }

    if saboteurs >= crew {
        // At exact 2-vs-2 parity the crew gets one more chance when a
        // still-unspent ability could flip the balance before next night.
        if saboteurs == 2 && crew == 2 && reversal_possible(room) {
            return None;
        }
        return Some(Winner::Saboteurs);
    }

    None
}

/// Whether any unspent one-shot could still change the balance: a doctor
/// holding a potion, the chameleon's night-1 swap, or a living security
/// chief whose death still triggers a revenge shot.
fn reversal_possible(room: &Room) -> bool {
    let doctor_ready = room.living_holder(Role::Doctor).is_some()
        && (!room.doctor_life_used || !room.doctor_death_used);
    let chameleon_ready = room.living_holder(Role::Chameleon).is_some()
        && !room.chameleon_used
        && room.night <= 1;
    let chief_ready = room.living_holder(Role::SecurityChief).is_some();
    doctor_ready || chameleon_ready || chief_ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{Player, PlayerId, PlayerStatus};

    const MIN_ACTIVE: usize = 4;

    fn room_with_roles(roles: &[Role]) -> Room {
        let mut room = Room::new("TEST-0001".into(), Player::new(1, "P1".into()));
        for i in 2..=roles.len() as PlayerId {
            room.add_player(Player::new(i, format!("P{i}"))).unwrap();
        }
        for (i, &role) in roles.iter().enumerate() {
            room.player_mut(i as PlayerId + 1).unwrap().role = Some(role);
        }
        room.started = true;
        room
    }

    #[test]
    fn no_winner_mid_game() {
        let room = room_with_roles(&[
            Role::Saboteur,
            Role::Crewmate,
            Role::Crewmate,
            Role::Crewmate,
            Role::Doctor,
        ]);
        assert_eq!(evaluate(&room, MIN_ACTIVE), None);
    }

    #[test]
    fn crew_wins_with_no_living_saboteurs() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Crewmate,
            Role::Crewmate,
            Role::Crewmate,
            Role::Doctor,
        ]);
        room.player_mut(1).unwrap().status = PlayerStatus::Dead;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Crew));
    }

    #[test]
    fn saboteurs_win_at_parity() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Crewmate,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(2).unwrap().status = PlayerStatus::Dead;
        room.player_mut(3).unwrap().status = PlayerStatus::Dead;
        // 1 saboteur vs 1 crew.
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Saboteurs));
    }

    #[test]
    fn two_v_two_deferred_while_doctor_holds_a_potion() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Saboteur,
            Role::Doctor,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(5).unwrap().status = PlayerStatus::Dead;
        assert_eq!(evaluate(&room, MIN_ACTIVE), None);

        // Both potions spent: the deferral lapses.
        room.doctor_life_used = true;
        room.doctor_death_used = true;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Saboteurs));
    }

    #[test]
    fn two_v_two_deferred_while_chief_lives() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Saboteur,
            Role::SecurityChief,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(5).unwrap().status = PlayerStatus::Dead;
        room.night = 3;
        assert_eq!(evaluate(&room, MIN_ACTIVE), None);

        room.player_mut(3).unwrap().status = PlayerStatus::Dead;
        // 2 saboteurs vs 1 crew now.
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Saboteurs));
    }

    #[test]
    fn chameleon_deferral_only_before_first_night_ends() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Saboteur,
            Role::Chameleon,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(5).unwrap().status = PlayerStatus::Dead;
        room.night = 1;
        assert_eq!(evaluate(&room, MIN_ACTIVE), None);

        room.night = 2;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Saboteurs));
    }

    #[test]
    fn linked_cross_faction_pair_wins_as_lovers() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::AiAgent,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(1).unwrap().linked_to = Some(2);
        room.player_mut(2).unwrap().linked_to = Some(1);
        room.player_mut(3).unwrap().status = PlayerStatus::Dead;
        room.player_mut(4).unwrap().status = PlayerStatus::Dead;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Lovers));
    }

    #[test]
    fn same_faction_pair_is_not_lovers() {
        let mut room = room_with_roles(&[
            Role::AiAgent,
            Role::Crewmate,
            Role::Saboteur,
            Role::Crewmate,
        ]);
        room.player_mut(1).unwrap().linked_to = Some(2);
        room.player_mut(2).unwrap().linked_to = Some(1);
        room.player_mut(3).unwrap().status = PlayerStatus::Dead;
        room.player_mut(4).unwrap().status = PlayerStatus::Dead;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Crew));
    }

    #[test]
    fn too_few_active_players_aborts() {
        let mut room = room_with_roles(&[
            Role::Saboteur,
            Role::Crewmate,
            Role::Crewmate,
            Role::Crewmate,
            Role::Crewmate,
        ]);
        room.player_mut(4).unwrap().status = PlayerStatus::Left;
        room.player_mut(5).unwrap().status = PlayerStatus::Left;
        assert_eq!(evaluate(&room, MIN_ACTIVE), Some(Winner::Aborted));
    }
}
