//! Protocol messages and their binary codec.
//!
//! The codec is deliberately static: a fixed table maps each opcode to its
//! payload shape, so frame boundaries can be computed from the header alone
//! and a byte stream can be split into frames without any per-message
//! registration.
//!
//! Payload encodings follow three patterns:
//! - empty payloads (plain requests and acks with nothing to say),
//! - fixed-width big-endian u16 fields in declared order,
//! - variable-length bodies as a u16 length prefix followed by raw bytes.
//!
//! Nacks always carry a single u16 [`NackCode`] value.

use crate::codes::NackCode;
use crate::error::WireError;

/// Logical connection identifier allocated by the daemon.
pub type ConnId = u16;

/// Event id correlating a reply with the request it answers.
///
/// Sent on the wire as two big-endian u16 halves. The daemon echoes the
/// event id of the request in the reply frame.
pub type EventId = u32;

/// Size of the fixed frame header: opcode plus the two event id halves.
pub const HEADER_LEN: usize = 6;

/// Opcode values for every message kind.
pub mod opcode {
    pub const NEW_CONNECTION_REQUEST: u16 = 0;
    pub const NEW_CONNECTION_ACK: u16 = 1;
    pub const NEW_CONNECTION_NACK: u16 = 2;
    pub const CLOSE_CONNECTION_REQUEST: u16 = 3;
    pub const CLOSE_CONNECTION_ACK: u16 = 4;
    pub const CLOSE_CONNECTION_NACK: u16 = 5;
    pub const LISTEN_REQUEST: u16 = 6;
    pub const LISTEN_ACK: u16 = 7;
    pub const LISTEN_NACK: u16 = 8;
    pub const WAIT_FOR_PEER_REQUEST: u16 = 9;
    pub const WAIT_FOR_PEER_ACK: u16 = 10;
    pub const WAIT_FOR_PEER_NACK: u16 = 11;
    pub const CONNECT_REQUEST: u16 = 12;
    pub const CONNECT_ACK: u16 = 13;
    pub const CONNECT_NACK: u16 = 14;
    pub const RECV_REQUEST: u16 = 15;
    pub const RECV_ACK: u16 = 16;
    pub const RECV_NACK: u16 = 17;
    pub const SEND_REQUEST: u16 = 18;
    pub const SEND_ACK: u16 = 19;
    pub const SEND_NACK: u16 = 20;
}

/// Payload layout for one opcode.
#[derive(Debug, Clone, Copy)]
enum PayloadShape {
    /// Zero-length body.
    Empty,
    /// Exactly this many payload bytes.
    Fixed(usize),
    /// `head` fixed bytes whose trailing u16 declares how many raw data
    /// bytes follow.
    Prefixed { head: usize },
}

/// Static opcode-to-shape table, indexed by opcode.
const SHAPES: [PayloadShape; 21] = [
    PayloadShape::Empty,                // 0  NewConnectionRequest
    PayloadShape::Fixed(2),             // 1  NewConnectionAck: conn
    PayloadShape::Fixed(2),             // 2  NewConnectionNack: code
    PayloadShape::Fixed(2),             // 3  CloseConnectionRequest: conn
    PayloadShape::Empty,                // 4  CloseConnectionAck
    PayloadShape::Fixed(2),             // 5  CloseConnectionNack: code
    PayloadShape::Fixed(4),             // 6  ListenRequest: conn, port
    PayloadShape::Empty,                // 7  ListenAck
    PayloadShape::Fixed(2),             // 8  ListenNack: code
    PayloadShape::Fixed(2),             // 9  WaitForPeerRequest: conn
    PayloadShape::Fixed(2),             // 10 WaitForPeerAck: peer_port
    PayloadShape::Fixed(2),             // 11 WaitForPeerNack: code
    PayloadShape::Fixed(4),             // 12 ConnectRequest: conn, port
    PayloadShape::Fixed(2),             // 13 ConnectAck: local_port
    PayloadShape::Fixed(2),             // 14 ConnectNack: code
    PayloadShape::Fixed(4),             // 15 RecvRequest: conn, max_len
    PayloadShape::Prefixed { head: 2 }, // 16 RecvAck: len, data
    PayloadShape::Fixed(2),             // 17 RecvNack: code
    PayloadShape::Prefixed { head: 4 }, // 18 SendRequest: conn, len, data
    PayloadShape::Empty,                // 19 SendAck
    PayloadShape::Fixed(2),             // 20 SendNack: code
];

/// A control-protocol message.
///
/// Each variant carries only the fields its opcode defines; the variant tag
/// always matches the opcode it decodes from or encodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    NewConnectionRequest,
    NewConnectionAck { conn: ConnId },
    NewConnectionNack { code: NackCode },

    CloseConnectionRequest { conn: ConnId },
    CloseConnectionAck,
    CloseConnectionNack { code: NackCode },

    ListenRequest { conn: ConnId, port: u16 },
    ListenAck,
    ListenNack { code: NackCode },

    WaitForPeerRequest { conn: ConnId },
    WaitForPeerAck { peer_port: u16 },
    WaitForPeerNack { code: NackCode },

    ConnectRequest { conn: ConnId, port: u16 },
    ConnectAck { local_port: u16 },
    ConnectNack { code: NackCode },

    RecvRequest { conn: ConnId, max_len: u16 },
    RecvAck { data: Vec<u8> },
    RecvNack { code: NackCode },

    SendRequest { conn: ConnId, data: Vec<u8> },
    SendAck,
    SendNack { code: NackCode },
}

impl Message {
    /// The opcode this message encodes with.
    pub fn opcode(&self) -> u16 {
        match self {
            Message::NewConnectionRequest => opcode::NEW_CONNECTION_REQUEST,
            Message::NewConnectionAck { .. } => opcode::NEW_CONNECTION_ACK,
            Message::NewConnectionNack { .. } => opcode::NEW_CONNECTION_NACK,
            Message::CloseConnectionRequest { .. } => opcode::CLOSE_CONNECTION_REQUEST,
            Message::CloseConnectionAck => opcode::CLOSE_CONNECTION_ACK,
            Message::CloseConnectionNack { .. } => opcode::CLOSE_CONNECTION_NACK,
            Message::ListenRequest { .. } => opcode::LISTEN_REQUEST,
            Message::ListenAck => opcode::LISTEN_ACK,
            Message::ListenNack { .. } => opcode::LISTEN_NACK,
            Message::WaitForPeerRequest { .. } => opcode::WAIT_FOR_PEER_REQUEST,
            Message::WaitForPeerAck { .. } => opcode::WAIT_FOR_PEER_ACK,
            Message::WaitForPeerNack { .. } => opcode::WAIT_FOR_PEER_NACK,
            Message::ConnectRequest { .. } => opcode::CONNECT_REQUEST,
            Message::ConnectAck { .. } => opcode::CONNECT_ACK,
            Message::ConnectNack { .. } => opcode::CONNECT_NACK,
            Message::RecvRequest { .. } => opcode::RECV_REQUEST,
            Message::RecvAck { .. } => opcode::RECV_ACK,
            Message::RecvNack { .. } => opcode::RECV_NACK,
            Message::SendRequest { .. } => opcode::SEND_REQUEST,
            Message::SendAck => opcode::SEND_ACK,
            Message::SendNack { .. } => opcode::SEND_NACK,
        }
    }

    /// Compute the total length of the frame at the start of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed before the length is
    /// known (the header or a variable-length prefix is still incomplete).
    ///
    /// # Errors
    ///
    /// Returns `UnknownOpcode` if the header names an opcode outside the
    /// static table; the frame's event id is included so the caller can
    /// still answer it.
    pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, WireError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let op = read_u16(buf, 0);
        let Some(shape) = SHAPES.get(op as usize) else {
            return Err(WireError::UnknownOpcode {
                opcode: op,
                event: read_event(buf),
            });
        };
        match *shape {
            PayloadShape::Empty => Ok(Some(HEADER_LEN)),
            PayloadShape::Fixed(len) => Ok(Some(HEADER_LEN + len)),
            PayloadShape::Prefixed { head } => {
                if buf.len() < HEADER_LEN + head {
                    return Ok(None);
                }
                let data_len = read_u16(buf, HEADER_LEN + head - 2) as usize;
                Ok(Some(HEADER_LEN + head + data_len))
            }
        }
    }

    /// Decode one complete frame into a message and its event id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOpcode` for opcodes outside the table, `Truncated`
    /// if the buffer is shorter than the frame's declared length, and
    /// `TrailingBytes` if it is longer. Never reads out of bounds.
    pub fn decode(frame: &[u8]) -> Result<(Self, EventId), WireError> {
        let total = match Self::frame_len(frame)? {
            Some(total) => total,
            None => {
                let needed = if frame.len() < HEADER_LEN {
                    HEADER_LEN
                } else {
                    frame.len() + 1
                };
                return Err(WireError::Truncated {
                    needed,
                    have: frame.len(),
                });
            }
        };
        if frame.len() < total {
            return Err(WireError::Truncated {
                needed: total,
                have: frame.len(),
            });
        }
        if frame.len() > total {
            return Err(WireError::TrailingBytes {
                frame_len: total,
                have: frame.len(),
            });
        }

        let event = read_event(frame);
        let p = &frame[HEADER_LEN..];
        let msg = match read_u16(frame, 0) {
            opcode::NEW_CONNECTION_REQUEST => Message::NewConnectionRequest,
            opcode::NEW_CONNECTION_ACK => Message::NewConnectionAck { conn: read_u16(p, 0) },
            opcode::NEW_CONNECTION_NACK => Message::NewConnectionNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::CLOSE_CONNECTION_REQUEST => {
                Message::CloseConnectionRequest { conn: read_u16(p, 0) }
            }
            opcode::CLOSE_CONNECTION_ACK => Message::CloseConnectionAck,
            opcode::CLOSE_CONNECTION_NACK => Message::CloseConnectionNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::LISTEN_REQUEST => Message::ListenRequest {
                conn: read_u16(p, 0),
                port: read_u16(p, 2),
            },
            opcode::LISTEN_ACK => Message::ListenAck,
            opcode::LISTEN_NACK => Message::ListenNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::WAIT_FOR_PEER_REQUEST => Message::WaitForPeerRequest { conn: read_u16(p, 0) },
            opcode::WAIT_FOR_PEER_ACK => Message::WaitForPeerAck {
                peer_port: read_u16(p, 0),
            },
            opcode::WAIT_FOR_PEER_NACK => Message::WaitForPeerNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::CONNECT_REQUEST => Message::ConnectRequest {
                conn: read_u16(p, 0),
                port: read_u16(p, 2),
            },
            opcode::CONNECT_ACK => Message::ConnectAck {
                local_port: read_u16(p, 0),
            },
            opcode::CONNECT_NACK => Message::ConnectNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::RECV_REQUEST => Message::RecvRequest {
                conn: read_u16(p, 0),
                max_len: read_u16(p, 2),
            },
            opcode::RECV_ACK => Message::RecvAck {
                data: p[2..].to_vec(),
            },
            opcode::RECV_NACK => Message::RecvNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            opcode::SEND_REQUEST => Message::SendRequest {
                conn: read_u16(p, 0),
                data: p[4..].to_vec(),
            },
            opcode::SEND_ACK => Message::SendAck,
            opcode::SEND_NACK => Message::SendNack {
                code: NackCode::from_wire(read_u16(p, 0)),
            },
            op => {
                return Err(WireError::UnknownOpcode {
                    opcode: op,
                    event,
                });
            }
        };
        Ok((msg, event))
    }

    /// Encode this message into a complete frame carrying `event`.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if a variable-length body exceeds what a
    /// u16 length prefix can declare.
    pub fn frame(&self, event: EventId) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(HEADER_LEN + 8);
        put_u16(&mut out, self.opcode());
        put_u16(&mut out, (event >> 16) as u16);
        put_u16(&mut out, event as u16);
        self.encode_payload(&mut out)?;
        Ok(out)
    }

    /// The nack message of this message's request family, carrying `code`.
    ///
    /// Used to answer requests that fail and to reject messages that are
    /// not requests at all (a tool sending us an ack gets its family's nack
    /// back with a malformed-request code).
    pub fn family_nack(&self, code: NackCode) -> Message {
        match self.opcode() / 3 {
            0 => Message::NewConnectionNack { code },
            1 => Message::CloseConnectionNack { code },
            2 => Message::ListenNack { code },
            3 => Message::WaitForPeerNack { code },
            4 => Message::ConnectNack { code },
            5 => Message::RecvNack { code },
            _ => Message::SendNack { code },
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        match self {
            Message::NewConnectionRequest
            | Message::CloseConnectionAck
            | Message::ListenAck
            | Message::SendAck => {}

            Message::NewConnectionAck { conn }
            | Message::CloseConnectionRequest { conn }
            | Message::WaitForPeerRequest { conn } => put_u16(out, *conn),

            Message::WaitForPeerAck { peer_port } => put_u16(out, *peer_port),
            Message::ConnectAck { local_port } => put_u16(out, *local_port),

            Message::NewConnectionNack { code }
            | Message::CloseConnectionNack { code }
            | Message::ListenNack { code }
            | Message::WaitForPeerNack { code }
            | Message::ConnectNack { code }
            | Message::RecvNack { code }
            | Message::SendNack { code } => put_u16(out, code.to_wire()),

            Message::ListenRequest { conn, port } | Message::ConnectRequest { conn, port } => {
                put_u16(out, *conn);
                put_u16(out, *port);
            }

            Message::RecvRequest { conn, max_len } => {
                put_u16(out, *conn);
                put_u16(out, *max_len);
            }

            Message::RecvAck { data } => {
                put_data_len(out, data)?;
                out.extend_from_slice(data);
            }

            Message::SendRequest { conn, data } => {
                put_u16(out, *conn);
                put_data_len(out, data)?;
                out.extend_from_slice(data);
            }
        }
        Ok(())
    }
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

fn read_event(buf: &[u8]) -> EventId {
    (u32::from(read_u16(buf, 2)) << 16) | u32::from(read_u16(buf, 4))
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_data_len(out: &mut Vec<u8>, data: &[u8]) -> Result<(), WireError> {
    let len = u16::try_from(data.len())
        .map_err(|_| WireError::PayloadTooLarge { len: data.len() })?;
    put_u16(out, len);
    Ok(())
}
