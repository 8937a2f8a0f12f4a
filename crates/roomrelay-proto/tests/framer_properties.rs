//! Property-based tests for the JSON framer
//!
//! The framer must recover the exact document sequence no matter how the
//! stream is chopped into reads, and must never be fooled by brace or quote
//! characters inside string payloads.

use proptest::prelude::*;
use roomrelay_proto::{ClientMessage, JsonFramer, ServerMessage};

/// Strategy for chat text that is heavy on framing-hostile characters
fn hostile_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("}{".to_string()),
            Just("{".to_string()),
            Just("}".to_string()),
            Just("\"".to_string()),
            Just("\\".to_string()),
            Just("\\\"}{".to_string()),
            Just("ü".to_string()),
            "[a-z ]{0,8}",
        ],
        0..12,
    )
    .prop_map(|parts| parts.concat())
}

/// Strategy for arbitrary client messages
fn arbitrary_client_message() -> impl Strategy<Value = ClientMessage> {
    prop_oneof![
        proptest::option::of(hostile_text())
            .prop_map(|username| ClientMessage::CreateRoom { username }),
        ("[A-Z0-9]{6}", proptest::option::of(hostile_text()))
            .prop_map(|(room_code, username)| ClientMessage::JoinRoom { room_code, username }),
        hostile_text().prop_map(|message| ClientMessage::ChatMessage { message }),
        (hostile_text(), any::<u32>()).prop_map(|(sdp, target)| ClientMessage::WebrtcSignal {
            signal: serde_json::json!({ "sdp": sdp.clone(), "candidates": [sdp, { "x": "}{" }] }),
            target: serde_json::json!(target),
        }),
    ]
}

/// Feed `stream` to a fresh framer using the given read sizes (cycled) and
/// decode everything that comes out.
fn frame_all(stream: &[u8], read_sizes: &[usize]) -> Vec<ClientMessage> {
    let mut framer = JsonFramer::new(1024 * 1024);
    let mut decoded = Vec::new();
    let mut offset = 0;
    let mut sizes = read_sizes.iter().cycle();

    while offset < stream.len() {
        let size = (*sizes.next().unwrap_or(&1)).max(1);
        let end = (offset + size).min(stream.len());
        framer.extend(&stream[offset..end]);
        offset = end;

        while let Some(frame) = framer.next_frame() {
            let frame = frame.expect("no document should be oversized");
            decoded.push(ClientMessage::decode(&frame).expect("framed document should decode"));
        }
    }

    decoded
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: concatenated documents decode to the same sequence regardless
    /// of read boundaries
    #[test]
    fn prop_split_invariance(
        messages in prop::collection::vec(arbitrary_client_message(), 1..16),
        read_sizes in prop::collection::vec(1usize..64, 1..16)
    ) {
        let mut stream = Vec::new();
        for msg in &messages {
            stream.extend_from_slice(&msg.encode()?);
        }

        let decoded = frame_all(&stream, &read_sizes);
        prop_assert_eq!(decoded, messages);
    }

    /// Property: single-byte reads are equivalent to one big read
    #[test]
    fn prop_single_byte_reads(
        messages in prop::collection::vec(arbitrary_client_message(), 1..8)
    ) {
        let mut stream = Vec::new();
        for msg in &messages {
            stream.extend_from_slice(&msg.encode()?);
        }

        let one_shot = frame_all(&stream, &[stream.len()]);
        let byte_by_byte = frame_all(&stream, &[1]);
        prop_assert_eq!(&one_shot, &messages);
        prop_assert_eq!(&byte_by_byte, &messages);
    }

    /// Property: a malformed document between valid ones only loses itself
    #[test]
    fn prop_malformed_document_is_isolated(
        before in arbitrary_client_message(),
        after in arbitrary_client_message(),
        junk in "[a-z:,0-9]{0,16}",
        read_size in 1usize..32
    ) {
        let mut stream = Vec::new();
        stream.extend_from_slice(&before.encode()?);
        stream.extend_from_slice(format!("{{{junk}}}").as_bytes());
        stream.extend_from_slice(&after.encode()?);

        let mut framer = JsonFramer::default();
        let mut decoded = Vec::new();
        for chunk in stream.chunks(read_size) {
            framer.extend(chunk);
            while let Some(frame) = framer.next_frame() {
                if let Ok(msg) = ClientMessage::decode(&frame?) {
                    decoded.push(msg);
                }
            }
        }

        prop_assert_eq!(decoded, vec![before, after]);
    }

    /// Property: a truncated document costs at most one size window of the
    /// stream; everything after it is framed normally
    #[test]
    fn prop_truncated_document_is_recovered_from(
        texts in prop::collection::vec("[a-z ]{0,16}", 24..40),
        cut in any::<prop::sample::Index>(),
        read_size in 1usize..64
    ) {
        const LIMIT: usize = 256;

        let messages: Vec<ClientMessage> = texts
            .into_iter()
            .map(|message| ClientMessage::ChatMessage { message })
            .collect();
        let head = messages[0].encode()?;
        // Any prefix short of the closing brace leaves the document open
        let truncated = &head[..1 + cut.index(head.len() - 1)];

        let mut stream = truncated.to_vec();
        for msg in &messages {
            stream.extend_from_slice(&msg.encode()?);
        }

        let mut framer = JsonFramer::new(LIMIT);
        let mut decoded = Vec::new();
        let mut errors = 0;
        for chunk in stream.chunks(read_size) {
            framer.extend(chunk);
            while let Some(frame) = framer.next_frame() {
                match frame {
                    Ok(frame) => decoded.push(ClientMessage::decode(&frame)?),
                    Err(_) => errors += 1,
                }
            }
        }

        prop_assert_eq!(errors, 1);
        prop_assert!(!framer.is_mid_document());
        prop_assert!(!decoded.is_empty());
        prop_assert!(messages.ends_with(&decoded), "recovered documents must be a suffix");
    }
}

#[test]
fn chat_text_containing_boundary_pattern_is_one_message() {
    let text = "look: }{ and again }{\"type\":\"create_room\"}";
    let msg = ClientMessage::ChatMessage { message: text.to_string() };
    let encoded = msg.encode().unwrap();

    for split in 1..encoded.len() {
        let decoded = frame_all(&encoded, &[split, encoded.len()]);
        assert_eq!(decoded, vec![msg.clone()], "split at {split}");
    }
}

#[test]
fn server_messages_frame_back_to_back() {
    let messages = vec![
        ServerMessage::room_joined("QWERTY", 2),
        ServerMessage::chat("a}{b", "x\"}{\"y", "09:15:00"),
        ServerMessage::user_left("a}{b", 1),
    ];

    let mut stream = Vec::new();
    for msg in &messages {
        stream.extend_from_slice(&msg.encode().unwrap());
    }

    let mut framer = JsonFramer::default();
    framer.extend(&stream);
    let mut decoded = Vec::new();
    while let Some(frame) = framer.next_frame() {
        decoded.push(ServerMessage::decode(&frame.unwrap()).unwrap());
    }

    assert_eq!(decoded, messages);
}
