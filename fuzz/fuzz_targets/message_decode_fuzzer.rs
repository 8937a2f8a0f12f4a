//! Fuzz target for client message decoding
//!
//! Every byte sequence a peer can send ends up in `ClientMessage::decode`
//! once the framer has cut it out of the stream.
//!
//! # Invariants
//!
//! - Decoding NEVER panics; malformed input is a structured error
//! - A decoded message re-encodes and decodes to an equal message
//! - `requires_membership` holds exactly for chat and signal messages

#![no_main]

use libfuzzer_sys::fuzz_target;
use roomrelay_proto::{ClientMessage, JsonFramer, ServerMessage};

fn check(bytes: &[u8]) {
    // Replies share the codec; they must not panic either
    let _ = ServerMessage::decode(bytes);

    let Ok(message) = ClientMessage::decode(bytes) else {
        return;
    };

    let encoded = message.encode().expect("decoded message must re-encode");
    let decoded = ClientMessage::decode(&encoded).expect("re-encoded message must decode");
    assert_eq!(message, decoded);

    let needs_room = matches!(message.message_type(), "chat_message" | "webrtc_signal");
    assert_eq!(message.requires_membership(), needs_room);
}

fuzz_target!(|data: &[u8]| {
    check(data);

    let mut framer = JsonFramer::default();
    framer.extend(data);
    while let Some(frame) = framer.next_frame() {
        if let Ok(frame) = frame {
            check(&frame);
        }
    }
});
