mod kind;
mod player;

use glam::IVec2;
use uuid::Uuid;

use crate::wire::{DecodeError, MAX_STRING_LEN, WireReader, WireWriter};

pub use kind::{Construct, EntityKind, KindInfo, Traits};
pub use player::{Player, UsernameError, validate_username};

pub type EntityId = Uuid;

// kind + id + position
const FRAMING_SIZE: usize = 1 + 16 + 8;
const STRING_SIZE_HINT: usize = 4 + 64;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sign {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityBody {
    Player(Player),
    Wall,
    Crate,
    Boulder,
    Sign(Sign),
}

impl EntityBody {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Player(_) => EntityKind::Player,
            Self::Wall => EntityKind::Wall,
            Self::Crate => EntityKind::Crate,
            Self::Boulder => EntityKind::Boulder,
            Self::Sign(_) => EntityKind::Sign,
        }
    }

    /// Plain body for kinds that need no creation data.
    pub fn simple(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Wall => Some(Self::Wall),
            EntityKind::Crate => Some(Self::Crate),
            EntityKind::Boulder => Some(Self::Boulder),
            EntityKind::Sign => Some(Self::Sign(Sign::default())),
            EntityKind::Player => None,
        }
    }

    fn write_creation(&self, writer: &mut WireWriter) {
        if let Self::Player(player) = self {
            writer.write_str(player.username());
        }
    }

    fn write_dynamic(&self, writer: &mut WireWriter) {
        match self {
            Self::Player(player) => {
                writer.write_str(&player.display_name);
                writer.write_ivec2(player.intent);
            }
            Self::Sign(sign) => writer.write_str(&sign.text),
            Self::Wall | Self::Crate | Self::Boulder => {}
        }
    }

    fn read_dynamic(&mut self, reader: &mut WireReader<'_>) -> Result<(), DecodeError> {
        match self {
            Self::Player(player) => {
                player.display_name = reader.read_string()?;
                player.intent = reader.read_ivec2()?;
            }
            Self::Sign(sign) => sign.text = reader.read_string()?,
            Self::Wall | Self::Crate | Self::Boulder => {}
        }
        Ok(())
    }

    fn size_hint(&self) -> usize {
        match self {
            Self::Player(player) => {
                2 * STRING_SIZE_HINT + player.username().len() + player.display_name.len() + 8
            }
            Self::Sign(sign) => STRING_SIZE_HINT + sign.text.len().min(MAX_STRING_LEN),
            Self::Wall | Self::Crate | Self::Boulder => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: EntityId,
    pub position: IVec2,
    pub body: EntityBody,
}

impl Entity {
    pub fn new(id: EntityId, position: IVec2, body: EntityBody) -> Self {
        Self { id, position, body }
    }

    /// Creates an entity with a fresh random id.
    pub fn spawn(position: IVec2, body: EntityBody) -> Self {
        Self::new(Uuid::new_v4(), position, body)
    }

    pub fn player(position: IVec2, player: Player) -> Self {
        Self::spawn(position, EntityBody::Player(player))
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.body.kind()
    }

    pub fn info(&self) -> &'static KindInfo {
        self.kind().info()
    }

    pub fn traits(&self) -> Traits {
        self.info().traits
    }

    pub fn mass(&self) -> u32 {
        self.info().mass
    }

    pub fn blocks_movement(&self) -> bool {
        self.traits().contains(Traits::BLOCKS_MOVEMENT)
    }

    pub fn is_player(&self) -> bool {
        matches!(self.body, EntityBody::Player(_))
    }

    pub fn as_player(&self) -> Option<&Player> {
        match &self.body {
            EntityBody::Player(player) => Some(player),
            _ => None,
        }
    }

    pub fn as_player_mut(&mut self) -> Option<&mut Player> {
        match &mut self.body {
            EntityBody::Player(player) => Some(player),
            _ => None,
        }
    }

    /// Conservative upper bound for a full serialization.
    pub fn size_hint(&self) -> usize {
        FRAMING_SIZE + self.body.size_hint()
    }

    pub fn serialize_full(&self, writer: &mut WireWriter) {
        writer.write_u8(self.kind().tag());
        writer.write_id(self.id);
        writer.write_ivec2(self.position);
        self.body.write_creation(writer);
        self.body.write_dynamic(writer);
    }

    pub fn serialize_delta(&self, writer: &mut WireWriter) {
        writer.write_ivec2(self.position);
        self.body.write_dynamic(writer);
    }

    pub fn deserialize_full(reader: &mut WireReader<'_>) -> Result<Self, DecodeError> {
        let info = KindInfo::for_tag(reader.read_u8()?)?;
        let id = reader.read_id()?;
        let position = reader.read_ivec2()?;
        let mut body = (info.construct)(reader)?;
        body.read_dynamic(reader)?;
        Ok(Self { id, position, body })
    }

    pub fn deserialize_delta(&mut self, reader: &mut WireReader<'_>) -> Result<(), DecodeError> {
        // Decode into a scratch copy so a short buffer leaves us untouched.
        let position = reader.read_ivec2()?;
        let mut body = self.body.clone();
        body.read_dynamic(reader)?;
        self.position = position;
        self.body = body;
        Ok(())
    }

    pub fn to_full_bytes(&self) -> Vec<u8> {
        let mut writer = WireWriter::with_capacity(self.size_hint());
        self.serialize_full(&mut writer);
        writer.into_bytes()
    }

    pub fn from_full_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = WireReader::new(bytes);
        let entity = Self::deserialize_full(&mut reader)?;
        reader.finish()?;
        Ok(entity)
    }
}
