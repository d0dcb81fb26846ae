//! Connected-state receive path: buffering, closing-marker removal, and the
//! CONNECTED -> CLOSED -> END_OF_STREAM walk.

mod common;

use common::{connected_client, FakeClock, FakePower, FakeTransport};
use sim900::client::{ConnectionState, Stream};

#[test]
fn payload_then_marker_reads_out_then_ends() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    transport.feed(b"hello\r\nCLOSED\r\n");

    let mut out = Vec::new();
    while let Some(byte) = client.read_byte() {
        out.push(byte);
    }
    assert_eq!(out, b"hello");
    // Marker bytes never surfaced, and the stream ended.
    assert_eq!(client.read_byte(), None);
    assert_eq!(client.state(), ConnectionState::EndOfStream);
}

#[test]
fn marker_with_remaining_bytes_enters_closed_first() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    transport.feed(b"abcde\r\nCLOSED\r\n");
    assert_eq!(client.available(), Some(5));
    // Bytes remain, so the connection reports closed-but-drainable.
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(client.connected());

    let mut buf = [0u8; 16];
    assert_eq!(client.read(&mut buf), 5);
    assert_eq!(&buf[..5], b"abcde");

    // Drained: the state tips over to end-of-stream.
    assert_eq!(client.read_byte(), None);
    assert_eq!(client.state(), ConnectionState::EndOfStream);
    assert!(!client.connected());
    assert_eq!(client.available(), None);
}

#[test]
fn marker_only_stream_goes_straight_to_end_of_stream() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    transport.feed(b"\r\nCLOSED\r\n");
    assert_eq!(client.read_byte(), None);
    assert_eq!(client.state(), ConnectionState::EndOfStream);
}

#[test]
fn peek_does_not_consume() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    transport.feed(b"xy");
    assert_eq!(client.peek(), Some(b'x'));
    assert_eq!(client.peek(), Some(b'x'));
    assert_eq!(client.read_byte(), Some(b'x'));
    assert_eq!(client.peek(), Some(b'y'));
}

#[test]
fn buffer_never_exceeds_capacity() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    let payload: Vec<u8> = (0..100u8).map(|i| b'a' + (i % 26)).collect();
    transport.feed(&payload);

    let available = client.available().expect("connected");
    assert!(available <= 48, "fill count {available} exceeds capacity");

    // Everything still reads out in order across refills.
    let mut out = Vec::new();
    while out.len() < payload.len() {
        match client.read_byte() {
            Some(byte) => out.push(byte),
            None => break,
        }
    }
    assert_eq!(out, payload);
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn writes_only_accepted_while_connected() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);

    assert_eq!(client.write(b"GET /\r\n"), 7);
    assert_eq!(client.write_byte(b'!'), 1);

    transport.feed(b"\r\nCLOSED\r\n");
    assert_eq!(client.read_byte(), None);
    // Closed stream: writes are refused.
    assert_eq!(client.write(b"more"), 0);
    assert_eq!(client.write_byte(b'x'), 0);
}

#[test]
fn engine_usable_through_the_stream_trait() {
    let transport = FakeTransport::new();
    let power = FakePower::new();
    let clock = FakeClock::new();
    let mut client = connected_client(&transport, &power, &clock);
    transport.feed(b"ping");

    let stream: &mut dyn Stream = &mut client;
    assert!(stream.connected());
    assert_eq!(stream.available(), Some(4));
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf), 4);
    assert_eq!(&buf[..4], b"ping");
    assert_eq!(stream.write(b"pong"), 4);
}
