//! Fuzz target for JSON document framing across read boundaries
//!
//! Prevent desync between peers whose TCP stacks split the stream
//! differently (HIGH priority)
//!
//! # Strategy
//!
//! - Arbitrary bytes: garbage, unbalanced braces, unterminated strings
//! - Arbitrary split points: every possible way a socket could chunk the
//!   same stream
//! - Small document limits to exercise the oversized-document path
//!
//! # Invariants
//!
//! - Framing MUST NOT depend on how the stream is split
//! - Every yielded frame starts with `{` and ends with `}`
//! - Buffered bytes never exceed the input length
//! - The framer NEVER panics

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use roomrelay_proto::JsonFramer;

#[derive(Debug, Arbitrary)]
struct SplitInput {
    stream: Vec<u8>,
    cuts: Vec<u16>,
    max_document_size: u8,
}

/// Drain every frame, recording oversized documents as `None`.
fn drain(framer: &mut JsonFramer, out: &mut Vec<Option<Vec<u8>>>) {
    while let Some(frame) = framer.next_frame() {
        out.push(frame.ok().map(|bytes| bytes.to_vec()));
    }
}

fuzz_target!(|input: SplitInput| {
    let limit = usize::from(input.max_document_size).max(2);

    let mut whole = JsonFramer::new(limit);
    let mut expected = Vec::new();
    whole.extend(&input.stream);
    drain(&mut whole, &mut expected);

    let mut cuts: Vec<usize> =
        input.cuts.iter().map(|c| usize::from(*c) % (input.stream.len() + 1)).collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut pieces = JsonFramer::new(limit);
    let mut actual = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(input.stream.len())) {
        pieces.extend(&input.stream[start..cut]);
        drain(&mut pieces, &mut actual);
        assert!(pieces.buffered() <= input.stream.len());
        start = cut;
    }

    assert_eq!(expected, actual, "framing changed with split points");
    assert_eq!(whole.is_mid_document(), pieces.is_mid_document());

    for frame in actual.into_iter().flatten() {
        assert_eq!(frame.first(), Some(&b'{'));
        assert_eq!(frame.last(), Some(&b'}'));
        assert!(frame.len() <= limit);
    }
});
