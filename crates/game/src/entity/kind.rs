use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::wire::{DecodeError, WireReader};

use super::player::Player;
use super::{EntityBody, Sign};

bitflags! {
    /// Construction-time properties, fixed per kind and never sent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Traits: u8 {
        const BLOCKS_MOVEMENT = 1 << 0;
        const PUSHABLE = 1 << 1;
        const BLOCKS_LIGHT = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityKind {
    Player = 0,
    Wall = 1,
    Crate = 2,
    Boulder = 3,
    Sign = 4,
}

impl EntityKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn info(self) -> &'static KindInfo {
        &KINDS[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        KINDS
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(name))
            .map(|info| info.kind)
    }
}

impl TryFrom<u8> for EntityKind {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        KindInfo::for_tag(tag).map(|info| info.kind)
    }
}

/// Reads the creation-time fields of a kind and yields a body whose
/// dynamic fields still hold defaults.
pub type Construct = fn(&mut WireReader<'_>) -> Result<EntityBody, DecodeError>;

#[derive(Debug)]
pub struct KindInfo {
    pub kind: EntityKind,
    pub name: &'static str,
    pub traits: Traits,
    /// Zero for kinds that cannot be pushed.
    pub mass: u32,
    pub construct: Construct,
}

impl KindInfo {
    pub fn for_tag(tag: u8) -> Result<&'static KindInfo, DecodeError> {
        KINDS
            .get(tag as usize)
            .ok_or(DecodeError::UnknownKind(tag))
    }
}

// Indexed by tag.
static KINDS: [KindInfo; 5] = [
    KindInfo {
        kind: EntityKind::Player,
        name: "player",
        traits: Traits::BLOCKS_MOVEMENT,
        mass: 0,
        construct: construct_player,
    },
    KindInfo {
        kind: EntityKind::Wall,
        name: "wall",
        traits: Traits::BLOCKS_MOVEMENT.union(Traits::BLOCKS_LIGHT),
        mass: 0,
        construct: construct_wall,
    },
    KindInfo {
        kind: EntityKind::Crate,
        name: "crate",
        traits: Traits::BLOCKS_MOVEMENT
            .union(Traits::PUSHABLE)
            .union(Traits::BLOCKS_LIGHT),
        mass: 1,
        construct: construct_crate,
    },
    KindInfo {
        kind: EntityKind::Boulder,
        name: "boulder",
        traits: Traits::BLOCKS_MOVEMENT
            .union(Traits::PUSHABLE)
            .union(Traits::BLOCKS_LIGHT),
        mass: 3,
        construct: construct_boulder,
    },
    KindInfo {
        kind: EntityKind::Sign,
        name: "sign",
        traits: Traits::empty(),
        mass: 0,
        construct: construct_sign,
    },
];

fn construct_player(reader: &mut WireReader<'_>) -> Result<EntityBody, DecodeError> {
    let username = reader.read_string()?;
    Ok(EntityBody::Player(Player::new(username, String::new())))
}

fn construct_wall(_: &mut WireReader<'_>) -> Result<EntityBody, DecodeError> {
    Ok(EntityBody::Wall)
}

fn construct_crate(_: &mut WireReader<'_>) -> Result<EntityBody, DecodeError> {
    Ok(EntityBody::Crate)
}

fn construct_boulder(_: &mut WireReader<'_>) -> Result<EntityBody, DecodeError> {
    Ok(EntityBody::Boulder)
}

fn construct_sign(_: &mut WireReader<'_>) -> Result<EntityBody, DecodeError> {
    Ok(EntityBody::Sign(Sign::default()))
}
