mod support;

use std::sync::mpsc::channel;
use std::sync::Arc;

use netloop::{Callback, Event, Loop, LoopConfig, LoopWorker};

#[test]
fn idle_channel_closes_after_idle_timeout() {
    let mut server_loop = Loop::new(LoopConfig::default()).unwrap();
    let server_callback: Callback = Arc::new(|_channel_ref, _event| {});
    let listener = server_loop.listen("127.0.0.1", 0, server_callback).unwrap();
    let addr = listener.local_address().unwrap();
    let _server = LoopWorker::from_loop("netloop-test-idle-server", server_loop).unwrap();

    let (tx, rx) = channel::<Event>();
    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let client_callback: Callback = Arc::new(move |channel_ref, event| {
        if event == Event::Connect {
            channel_ref.set_idle_timeout(1);
        }
        let _ = tx.send(event);
    });
    client_loop
        .connect(&addr.ip().to_string(), addr.port(), client_callback)
        .unwrap();
    let _client = LoopWorker::from_loop("netloop-test-idle-client", client_loop).unwrap();

    assert_eq!(support::recv_within(&rx, "connect"), Event::Connect);
    assert_eq!(support::recv_within(&rx, "idle close"), Event::Close);
}
