//! WebSocket wire protocol: frames, masking, opcodes, and the opening
//! handshake.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, ParsePolicy, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{compute_accept_key, HandshakeRequest, HandshakeResponse, WS_GUID};
pub use mask::{apply_mask, apply_mask_fast};
pub use opcode::OpCode;
