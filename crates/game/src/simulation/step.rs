use glam::IVec2;

use crate::entity::{Entity, EntityId, Traits};
use crate::world::WorldContainer;

/// Total mass a single player can shove in one step.
pub const PUSH_STRENGTH: u32 = 2;

/// Advances the world by one tick: every pending player intent is consumed
/// and resolved against blockers. Players move in id order.
///
/// Returns the number of players that actually moved.
pub fn step(world: &mut WorldContainer) -> usize {
    let mut movers: Vec<(EntityId, IVec2)> = world
        .players()
        .filter_map(|e| {
            let intent = e.as_player()?.intent;
            (intent != IVec2::ZERO).then_some((e.id(), intent))
        })
        .collect();
    movers.sort_unstable_by_key(|(id, _)| *id);

    let mut moved = 0;
    for (id, intent) in movers {
        if let Some(player) = world.get_mut(id).and_then(Entity::as_player_mut) {
            player.intent = IVec2::ZERO;
        }
        let direction = intent.clamp(IVec2::NEG_ONE, IVec2::ONE);
        if try_move(world, id, direction) {
            moved += 1;
        } else {
            // The cleared intent still has to reach the replicas.
            world.mark_changed(id);
        }
    }
    moved
}

fn offset(position: IVec2, direction: IVec2) -> Option<IVec2> {
    Some(IVec2::new(
        position.x.checked_add(direction.x)?,
        position.y.checked_add(direction.y)?,
    ))
}

fn try_move(world: &mut WorldContainer, id: EntityId, direction: IVec2) -> bool {
    let Some(origin) = world.get(id).map(|e| e.position) else {
        return false;
    };

    let mut chain = Vec::new();
    let mut mass = 0;
    let Some(mut cursor) = offset(origin, direction) else {
        log::trace!("{} at the edge of the grid", id);
        return false;
    };
    while let Some(blocker) = world.blocker_at(cursor) {
        if !blocker.traits().contains(Traits::PUSHABLE) {
            log::trace!("{} blocked by {} at {}", id, blocker.kind().name(), cursor);
            return false;
        }
        mass += blocker.mass();
        if mass > PUSH_STRENGTH {
            log::trace!("{} cannot push mass {} at {}", id, mass, cursor);
            return false;
        }
        chain.push(blocker.id());
        let Some(next) = offset(cursor, direction) else {
            log::trace!("{} cannot push past the edge of the grid", id);
            return false;
        };
        cursor = next;
    }

    // Farthest first so no two blockers ever share a tile.
    for pushed in chain.into_iter().rev() {
        shift(world, pushed, direction);
    }
    shift(world, id, direction);
    true
}

fn shift(world: &mut WorldContainer, id: EntityId, direction: IVec2) {
    if let Some(entity) = world.get_mut(id) {
        entity.position += direction;
    }
    world.mark_changed(id);
}
