use glam::Vec3;

pub const MAX_PACKET_SIZE: usize = 1200;

pub const STATE_HEADER_SIZE: usize = 9;
pub const OBJECT_STATE_SIZE: usize = 28;
pub const INPUT_PACKET_SIZE: usize = 25;
pub const JOIN_ACK_SIZE: usize = 5;
pub const CHANNEL_INFO_SIZE: usize = 17;
pub const PING_PACKET_SIZE: usize = 9;
pub const BULLET_PACKET_SIZE: usize = 29;
pub const SIGNAL_PACKET_SIZE: usize = 1;

/// Largest object count that still fits a State packet in one datagram.
pub const MAX_STATE_OBJECTS: usize = (MAX_PACKET_SIZE - STATE_HEADER_SIZE) / OBJECT_STATE_SIZE;

/// Reserved: never assigned to a participant.
pub const UNASSIGNED_ID: u32 = 0;
pub const HOST_ID: u32 = 1;
pub const FIRST_CLIENT_ID: u32 = 2;

/// Ids exchanged by a frame sync.
pub const FRAME_SYNC_IDS: [u32; 2] = [HOST_ID, FIRST_CLIENT_ID];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Discover = 0,
    DiscoverReply = 1,
    Join = 2,
    JoinAck = 3,
    Input = 4,
    State = 5,
    Ping = 6,
    ChannelScan = 7,
    ChannelInfo = 8,
    Bullet = 9,
}

impl TryFrom<u8> for PacketKind {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Discover,
            1 => Self::DiscoverReply,
            2 => Self::Join,
            3 => Self::JoinAck,
            4 => Self::Input,
            5 => Self::State,
            6 => Self::Ping,
            7 => Self::ChannelScan,
            8 => Self::ChannelInfo,
            9 => Self::Bullet,
            other => return Err(PacketError::UnknownKind(other)),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("expected {expected:?} packet, got {actual:?}")]
    UnexpectedKind {
        expected: PacketKind,
        actual: PacketKind,
    },
    #[error("truncated packet: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Pose of one replicated entity. Rotation is Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ObjectState {
    pub id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
}

impl ObjectState {
    pub fn new(id: u32, position: Vec3, rotation: Vec3) -> Self {
        Self {
            id,
            position,
            rotation,
        }
    }

    pub fn zeroed(id: u32) -> Self {
        Self::new(id, Vec3::ZERO, Vec3::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatePacket {
    pub sequence: u32,
    pub objects: Vec<ObjectState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputPacket {
    pub sequence: u32,
    pub player_id: u32,
    pub movement: Vec3,
    pub buttons: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelInfo {
    pub channel_id: u32,
    pub user_count: u32,
    pub base_port: u32,
    pub discovery_port: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PingPacket {
    pub sequence: u32,
    pub timestamp_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BulletPacket {
    pub owner_id: u32,
    pub origin: Vec3,
    pub direction: Vec3,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Discover,
    DiscoverReply,
    Join,
    JoinAck { player_id: u32 },
    Input(InputPacket),
    State(StatePacket),
    Ping(PingPacket),
    ChannelScan,
    ChannelInfo(ChannelInfo),
    Bullet(BulletPacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::Discover => PacketKind::Discover,
            Self::DiscoverReply => PacketKind::DiscoverReply,
            Self::Join => PacketKind::Join,
            Self::JoinAck { .. } => PacketKind::JoinAck,
            Self::Input(_) => PacketKind::Input,
            Self::State(_) => PacketKind::State,
            Self::Ping(_) => PacketKind::Ping,
            Self::ChannelScan => PacketKind::ChannelScan,
            Self::ChannelInfo(_) => PacketKind::ChannelInfo,
            Self::Bullet(_) => PacketKind::Bullet,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Discover | Self::DiscoverReply | Self::Join | Self::ChannelScan => {
                encode_signal(self.kind())
            }
            Self::JoinAck { player_id } => encode_join_ack(*player_id),
            Self::Input(input) => encode_input(input),
            Self::State(state) => encode_state(state.sequence, &state.objects),
            Self::Ping(ping) => encode_ping(ping),
            Self::ChannelInfo(info) => encode_channel_info(info),
            Self::Bullet(bullet) => encode_bullet(bullet),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PacketError> {
        let kind = peek_kind(bytes)?;
        Ok(match kind {
            PacketKind::Discover => Self::Discover,
            PacketKind::DiscoverReply => Self::DiscoverReply,
            PacketKind::Join => Self::Join,
            PacketKind::ChannelScan => Self::ChannelScan,
            PacketKind::JoinAck => Self::JoinAck {
                player_id: decode_join_ack(bytes)?,
            },
            PacketKind::Input => Self::Input(decode_input(bytes)?),
            PacketKind::State => Self::State(decode_state(bytes)?),
            PacketKind::Ping => Self::Ping(decode_ping(bytes)?),
            PacketKind::ChannelInfo => Self::ChannelInfo(decode_channel_info(bytes)?),
            PacketKind::Bullet => Self::Bullet(decode_bullet(bytes)?),
        })
    }
}

pub fn peek_kind(bytes: &[u8]) -> Result<PacketKind, PacketError> {
    let tag = *bytes.first().ok_or(PacketError::Empty)?;
    PacketKind::try_from(tag)
}

pub fn encode_signal(kind: PacketKind) -> Vec<u8> {
    vec![kind as u8]
}

pub fn encode_state(sequence: u32, objects: &[ObjectState]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATE_HEADER_SIZE + objects.len() * OBJECT_STATE_SIZE);
    buf.push(PacketKind::State as u8);
    put_u32(&mut buf, sequence);
    put_u32(&mut buf, objects.len() as u32);
    for object in objects {
        put_u32(&mut buf, object.id);
        put_vec3(&mut buf, object.position);
        put_vec3(&mut buf, object.rotation);
    }
    buf
}

pub fn decode_state(bytes: &[u8]) -> Result<StatePacket, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::State)?;
    reader.require(STATE_HEADER_SIZE)?;
    let sequence = reader.u32_le()?;
    let count = reader.u32_le()? as usize;

    let expected = count
        .checked_mul(OBJECT_STATE_SIZE)
        .and_then(|body| body.checked_add(STATE_HEADER_SIZE))
        .unwrap_or(usize::MAX);
    reader.require(expected)?;

    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        objects.push(ObjectState {
            id: reader.u32_le()?,
            position: reader.vec3()?,
            rotation: reader.vec3()?,
        });
    }

    Ok(StatePacket { sequence, objects })
}

pub fn encode_input(input: &InputPacket) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INPUT_PACKET_SIZE);
    buf.push(PacketKind::Input as u8);
    put_u32(&mut buf, input.sequence);
    put_u32(&mut buf, input.player_id);
    put_vec3(&mut buf, input.movement);
    put_u32(&mut buf, input.buttons);
    buf
}

pub fn decode_input(bytes: &[u8]) -> Result<InputPacket, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::Input)?;
    reader.require(INPUT_PACKET_SIZE)?;
    Ok(InputPacket {
        sequence: reader.u32_le()?,
        player_id: reader.u32_le()?,
        movement: reader.vec3()?,
        buttons: reader.u32_le()?,
    })
}

/// The assigned id is the one field sent in network byte order.
pub fn encode_join_ack(player_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(JOIN_ACK_SIZE);
    buf.push(PacketKind::JoinAck as u8);
    buf.extend_from_slice(&player_id.to_be_bytes());
    buf
}

pub fn decode_join_ack(bytes: &[u8]) -> Result<u32, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::JoinAck)?;
    reader.require(JOIN_ACK_SIZE)?;
    reader.u32_be()
}

pub fn encode_channel_info(info: &ChannelInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHANNEL_INFO_SIZE);
    buf.push(PacketKind::ChannelInfo as u8);
    put_u32(&mut buf, info.channel_id);
    put_u32(&mut buf, info.user_count);
    put_u32(&mut buf, info.base_port);
    put_u32(&mut buf, info.discovery_port);
    buf
}

pub fn decode_channel_info(bytes: &[u8]) -> Result<ChannelInfo, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::ChannelInfo)?;
    reader.require(CHANNEL_INFO_SIZE)?;
    Ok(ChannelInfo {
        channel_id: reader.u32_le()?,
        user_count: reader.u32_le()?,
        base_port: reader.u32_le()?,
        discovery_port: reader.u32_le()?,
    })
}

pub fn encode_ping(ping: &PingPacket) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PING_PACKET_SIZE);
    buf.push(PacketKind::Ping as u8);
    put_u32(&mut buf, ping.sequence);
    put_u32(&mut buf, ping.timestamp_ms);
    buf
}

pub fn decode_ping(bytes: &[u8]) -> Result<PingPacket, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::Ping)?;
    reader.require(PING_PACKET_SIZE)?;
    Ok(PingPacket {
        sequence: reader.u32_le()?,
        timestamp_ms: reader.u32_le()?,
    })
}

pub fn encode_bullet(bullet: &BulletPacket) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BULLET_PACKET_SIZE);
    buf.push(PacketKind::Bullet as u8);
    put_u32(&mut buf, bullet.owner_id);
    put_vec3(&mut buf, bullet.origin);
    put_vec3(&mut buf, bullet.direction);
    buf
}

pub fn decode_bullet(bytes: &[u8]) -> Result<BulletPacket, PacketError> {
    let mut reader = Reader::new(bytes, PacketKind::Bullet)?;
    reader.require(BULLET_PACKET_SIZE)?;
    Ok(BulletPacket {
        owner_id: reader.u32_le()?,
        origin: reader.vec3()?,
        direction: reader.vec3()?,
    })
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_vec3(buf: &mut Vec<u8>, value: Vec3) {
    for component in value.to_array() {
        buf.extend_from_slice(&component.to_le_bytes());
    }
}

/// Bounds-checked cursor positioned just past the kind byte.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], expected: PacketKind) -> Result<Self, PacketError> {
        let actual = peek_kind(bytes)?;
        if actual != expected {
            return Err(PacketError::UnexpectedKind { expected, actual });
        }
        Ok(Self { bytes, pos: 1 })
    }

    fn require(&self, total: usize) -> Result<(), PacketError> {
        if self.bytes.len() < total {
            return Err(PacketError::Truncated {
                expected: total,
                actual: self.bytes.len(),
            });
        }
        Ok(())
    }

    fn take4(&mut self) -> Result<[u8; 4], PacketError> {
        let end = self.pos + 4;
        let chunk = self
            .bytes
            .get(self.pos..end)
            .ok_or(PacketError::Truncated {
                expected: end,
                actual: self.bytes.len(),
            })?;
        self.pos = end;
        Ok([chunk[0], chunk[1], chunk[2], chunk[3]])
    }

    fn u32_le(&mut self) -> Result<u32, PacketError> {
        self.take4().map(u32::from_le_bytes)
    }

    fn u32_be(&mut self) -> Result<u32, PacketError> {
        self.take4().map(u32::from_be_bytes)
    }

    fn f32_le(&mut self) -> Result<f32, PacketError> {
        self.take4().map(f32::from_le_bytes)
    }

    fn vec3(&mut self) -> Result<Vec3, PacketError> {
        Ok(Vec3::new(self.f32_le()?, self.f32_le()?, self.f32_le()?))
    }
}
