mod channel;
mod protocol;
mod queue;
mod stats;
mod transport;

pub use channel::{Channel, ChannelTable, ChannelUsage, DEFAULT_CHANNELS};
pub use protocol::{
    BULLET_PACKET_SIZE, BulletPacket, CHANNEL_INFO_SIZE, ChannelInfo, FIRST_CLIENT_ID,
    FRAME_SYNC_IDS, HOST_ID, INPUT_PACKET_SIZE, InputPacket, JOIN_ACK_SIZE, MAX_PACKET_SIZE,
    MAX_STATE_OBJECTS, OBJECT_STATE_SIZE, ObjectState, PING_PACKET_SIZE, Packet, PacketError,
    PacketKind, PingPacket, SIGNAL_PACKET_SIZE, STATE_HEADER_SIZE, StatePacket, UNASSIGNED_ID,
    decode_bullet, decode_channel_info, decode_input, decode_join_ack, decode_ping, decode_state,
    encode_bullet, encode_channel_info, encode_input, encode_join_ack, encode_ping, encode_signal,
    encode_state, peek_kind,
};
pub use queue::{DEFAULT_QUEUE_CAPACITY, ReceiveQueue, RecvPacket};
pub use stats::{NetworkStats, TrafficCounters};
pub use transport::{DYNAMIC_ATTEMPTS_PER_RANGE, Datagram, RECV_BUFFER_SIZE, Transport, local_ip};
