mod support;

use std::sync::mpsc::channel;
use std::sync::Arc;

use netloop::{Callback, Event, Loop, LoopConfig, LoopWorker};

#[test]
fn connect_deadline_closes_a_stuck_handshake() {
    let (tx, rx) = channel::<Event>();
    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let callback: Callback = Arc::new(move |_channel_ref, event| {
        let _ = tx.send(event);
    });
    // 192.0.2.0/24 is reserved for documentation (RFC 5737) and never
    // routed anywhere; the handshake can't complete, so the 1s deadline
    // is what has to close the channel.
    client_loop
        .connect_with_deadline("192.0.2.1", 80, callback, 1)
        .unwrap();
    let _client = LoopWorker::from_loop("netloop-test-connect-timeout", client_loop).unwrap();

    let event = support::recv_within(&rx, "connect-deadline close");
    assert_eq!(event, Event::Close);
}
