use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::player::PlayerId;
use crate::role::{Role, saboteur_count};
use crate::room::{RoomRules, Room};

/// Builds the role pool for `n` players: saboteurs fill first, then as
/// many enabled specials as the remaining slots allow, then plain crew.
pub fn build_pool(n: usize, rules: &RoomRules) -> Vec<Role> {
    let saboteurs = saboteur_count(n).min(n);
    let mut pool = vec![Role::Saboteur; saboteurs];

    let special_slots = n.saturating_sub(saboteurs);
    for &role in Role::SPECIALS {
        if pool.len() - saboteurs >= special_slots {
            break;
        }
        if rules.roles.enabled(role) {
            pool.push(role);
        }
    }

    while pool.len() < n {
        pool.push(Role::Crewmate);
    }
    pool
}

/// Deals the pool uniformly: both the player order and the pool are
/// shuffled, then zipped one-to-one.
pub fn auto_assign(room: &mut Room, rng: &mut impl Rng) {
    let mut pool = build_pool(room.active_count(), &room.rules);
    pool.shuffle(rng);
    let mut ids: Vec<PlayerId> = room.active_ids().collect();
    ids.shuffle(rng);
    for (id, role) in ids.into_iter().zip(pool) {
        if let Some(p) = room.player_mut(id) {
            p.role = Some(role);
        }
    }
}

/// Remaining picks during the manual role-selection flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePool {
    remaining: BTreeMap<Role, usize>,
}

impl RolePool {
    pub fn from_roles(roles: &[Role]) -> Self {
        let mut remaining = BTreeMap::new();
        for &role in roles {
            *remaining.entry(role).or_insert(0) += 1;
        }
        Self { remaining }
    }

    /// Takes one copy of `role` out of the pool.
    pub fn take(&mut self, role: Role) -> bool {
        match self.remaining.get_mut(&role) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            },
            _ => false,
        }
    }

    /// Returns a previously-taken role, for pick changes.
    pub fn give_back(&mut self, role: Role) {
        *self.remaining.entry(role).or_insert(0) += 1;
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining.values().all(|&c| c == 0)
    }

    /// Remaining count per role, zero entries included.
    pub fn counts(&self) -> &BTreeMap<Role, usize> {
        &self.remaining
    }

    /// Deals the leftovers randomly to the given players. Used when the
    /// host forces the pick phase to a close.
    pub fn drain_to(&mut self, room: &mut Room, unpicked: &[PlayerId], rng: &mut impl Rng) {
        let mut leftovers: Vec<Role> = self
            .remaining
            .iter()
            .flat_map(|(&role, &count)| std::iter::repeat_n(role, count))
            .collect();
        leftovers.shuffle(rng);
        for (&id, role) in unpicked.iter().zip(leftovers) {
            if let Some(p) = room.player_mut(id) {
                p.role = Some(role);
            }
        }
        self.remaining.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;
    use crate::role::Faction;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn room_with(n: usize) -> Room {
        let mut room = Room::new("TEST-0001".into(), Player::new(1, "P1".into()));
        for i in 2..=n as PlayerId {
            room.add_player(Player::new(i, format!("P{i}"))).unwrap();
        }
        room
    }

    #[test]
    fn pool_has_one_saboteur_for_six() {
        let pool = build_pool(6, &RoomRules::default());
        assert_eq!(pool.len(), 6);
        assert_eq!(pool.iter().filter(|r| **r == Role::Saboteur).count(), 1);
    }

    #[test]
    fn pool_has_three_saboteurs_for_twelve() {
        let pool = build_pool(12, &RoomRules::default());
        assert_eq!(pool.iter().filter(|r| **r == Role::Saboteur).count(), 3);
    }

    #[test]
    fn disabled_specials_become_crew() {
        let rules = RoomRules {
            roles: crate::room::RoleToggles {
                doctor: false,
                security: false,
                radar: false,
                ai_agent: false,
                engineer: false,
                chameleon: false,
            },
            manual_roles: false,
        };
        let pool = build_pool(6, &rules);
        assert_eq!(pool.iter().filter(|r| **r == Role::Crewmate).count(), 5);
    }

    #[test]
    fn specials_capped_by_party_size() {
        // 4 players, 1 saboteur: only 3 special slots despite 6 specials enabled.
        let pool = build_pool(4, &RoomRules::default());
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.iter().filter(|r| r.is_special()).count(), 3);
        assert!(!pool.contains(&Role::Crewmate));
    }

    #[test]
    fn auto_assign_gives_everyone_exactly_one_role() {
        let mut room = room_with(6);
        let mut rng = StdRng::seed_from_u64(42);
        auto_assign(&mut room, &mut rng);
        assert!(room.players.values().all(|p| p.role.is_some()));
        let saboteurs = room
            .players
            .values()
            .filter(|p| p.role.map(|r| r.faction()) == Some(Faction::Saboteurs))
            .count();
        assert_eq!(saboteurs, 1);
    }

    #[test]
    fn pool_take_and_give_back() {
        let mut pool = RolePool::from_roles(&[Role::Saboteur, Role::Doctor, Role::Crewmate]);
        assert!(pool.take(Role::Doctor));
        assert!(!pool.take(Role::Doctor));
        pool.give_back(Role::Doctor);
        assert!(pool.take(Role::Doctor));
        assert!(!pool.is_exhausted());
        assert!(pool.take(Role::Saboteur));
        assert!(pool.take(Role::Crewmate));
        assert!(pool.is_exhausted());
    }

    #[test]
    fn drain_assigns_leftovers() {
        let mut room = room_with(4);
        let mut pool = RolePool::from_roles(&build_pool(4, &room.rules));
        let mut rng = StdRng::seed_from_u64(3);
        let everyone: Vec<PlayerId> = room.active_ids().collect();
        pool.drain_to(&mut room, &everyone, &mut rng);
        assert!(pool.is_exhausted());
        assert!(room.players.values().all(|p| p.role.is_some()));
    }
}
