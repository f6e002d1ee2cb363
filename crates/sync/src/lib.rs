pub mod error;
pub mod input;
pub mod net;
pub mod session;
pub mod world;

pub use error::{NetError, NetResult};
pub use input::{Buttons, InputRecord};
pub use net::{
    Channel, ChannelTable, DEFAULT_CHANNELS, FIRST_CLIENT_ID, HOST_ID, MAX_PACKET_SIZE,
    NetworkStats, ObjectState, Packet, PacketError, PacketKind, StatePacket, UNASSIGNED_ID,
};
pub use session::{
    Client, ClientPhase, FRAME_SYNC_INTERVAL, Host, NetConfig, NetworkSession, SessionEvent,
};
pub use world::{ObjectList, SyncEntity, WorldObject, WorldObjects};
