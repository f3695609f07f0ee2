use rand::Rng;
use rstest::rstest;

use remora_core::buffer::{BLOCK_SIZE, ChainedBuffer};

// For any interleaving of writes and reads, the bytes read out are exactly
// the prefix of the bytes written in.
//
#[test]
fn test_randomized_interleaving_preserves_byte_order() {
    let mut rng = rand::rng();

    for _ in 0..20 {
        let mut buffer = ChainedBuffer::new();
        let mut written: Vec<u8> = Vec::new();
        let mut read_back: Vec<u8> = Vec::new();

        for _ in 0..400 {
            if rng.random_bool(0.55) {
                let len = rng.random_range(1..=3 * BLOCK_SIZE / 2);
                let chunk: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                buffer.write(&chunk);
                written.extend_from_slice(&chunk);
            } else {
                let len = rng.random_range(1..=BLOCK_SIZE);
                let mut out = vec![0u8; len];
                let n = buffer.read(&mut out);
                read_back.extend_from_slice(&out[..n]);
            }
            assert_eq!(buffer.size(), written.len() - read_back.len());
        }

        let mut out = vec![0u8; buffer.size()];
        let n = buffer.read(&mut out);
        read_back.extend_from_slice(&out[..n]);

        assert_eq!(read_back, written);
        assert_eq!(buffer.input_byte_count(), written.len() as u64);
    }
}

// input_next followed by input_back_up of the same count leaves the buffer
// semantically unchanged, at any point of a consumption sequence.
//
#[test]
fn test_next_back_up_is_identity() {
    let mut rng = rand::rng();
    let payload: Vec<u8> = (0..4 * BLOCK_SIZE + 33).map(|_| rng.random()).collect();

    let mut buffer = ChainedBuffer::new();
    buffer.write(&payload);

    let mut offset = 0;
    while buffer.size() > 0 {
        let span_len = buffer.input_next().unwrap().len();
        buffer.input_back_up(span_len);

        // The same bytes are still there.
        //
        let span = buffer.input_next().unwrap();
        assert_eq!(span, &payload[offset..offset + span.len()]);
        offset += span.len();
    }
    assert_eq!(offset, payload.len());
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(BLOCK_SIZE - 1)]
#[case(BLOCK_SIZE)]
#[case(BLOCK_SIZE + 1)]
#[case(3 * BLOCK_SIZE + 7)]
fn test_commit_send_drains_exactly(#[case] len: usize) {
    let mut buffer = ChainedBuffer::new();
    let payload = vec![0xAB; len];
    buffer.write(&payload);

    // Drain in uneven steps the way a partial writev would.
    //
    let mut remaining = len;
    while remaining > 0 {
        let step = remaining.min(1000);
        buffer.commit_send(step);
        remaining -= step;
        assert_eq!(buffer.size(), remaining);
    }
    assert!(buffer.is_empty());
    assert_eq!(buffer.input_byte_count(), len as u64);
}

#[test]
fn test_write_view_round_trip_across_blocks() {
    let mut buffer = ChainedBuffer::new();

    // Feed bytes through the syscall-facing view protocol.
    //
    let mut fill: u8 = 0;
    for _ in 0..10 {
        let deposited = {
            let view = buffer.write_view();
            let n = view.len().min(1500);
            for byte in view[..n].iter_mut() {
                *byte = fill;
                fill = fill.wrapping_add(1);
            }
            n
        };
        buffer.commit_resv(deposited);
    }

    let mut out = vec![0u8; buffer.size()];
    buffer.read(&mut out);
    let expected: Vec<u8> = (0..out.len() as u32).map(|i| i as u8).collect();
    assert_eq!(out, expected);
}

// A buffer spanning more blocks than a single gather write may carry
// (IOV_MAX is 1024 on Linux) drains over several gather/commit rounds, the
// way the connection's writev loop drives it.
//
#[test]
fn test_gather_drain_spans_multiple_rounds_past_the_iovec_cap() {
    const MAX_SPANS: usize = 1024;

    let mut buffer = ChainedBuffer::new();
    let payload: Vec<u8> = (0..(MAX_SPANS + 200) * BLOCK_SIZE)
        .map(|i| (i % 241) as u8)
        .collect();
    buffer.write(&payload);
    assert!(buffer.block_count() > MAX_SPANS);

    let mut drained: Vec<u8> = Vec::with_capacity(payload.len());
    let mut rounds = 0;
    while buffer.size() > 0 {
        let round: Vec<u8> = {
            let spans = buffer.unread_spans(MAX_SPANS);
            assert!(spans.len() <= MAX_SPANS);
            spans.iter().flat_map(|span| span.iter().copied()).collect()
        };
        buffer.commit_send(round.len());
        drained.extend_from_slice(&round);
        rounds += 1;
    }

    assert!(rounds >= 2, "cap never forced a second gather round");
    assert_eq!(drained, payload);
    assert_eq!(buffer.input_byte_count(), payload.len() as u64);
}

#[test]
fn test_limit_bounds_a_framed_region() {
    let mut buffer = ChainedBuffer::new();
    buffer.write(b"headerpayloadtrailer");

    buffer.input_skip(6);
    buffer.push_limit(7);

    let mut framed = Vec::new();
    while let Some(span) = buffer.input_next() {
        framed.extend_from_slice(span);
    }
    buffer.pop_limit();

    assert_eq!(framed, b"payload");
    assert_eq!(buffer.size(), 7);
}
