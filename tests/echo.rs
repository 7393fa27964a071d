mod support;

use std::sync::mpsc::channel;
use std::sync::Arc;

use netloop::{Callback, Event, Loop, LoopConfig, LoopWorker};

#[test]
fn local_echo_round_trips_bytes() {
    let mut server_loop = Loop::new(LoopConfig::default()).unwrap();
    let echo_callback: Callback = Arc::new(|channel_ref, event| {
        if event == Event::Recv {
            let mut buf = [0u8; 4096];
            let n = channel_ref.read(&mut buf);
            if n > 0 {
                let _ = channel_ref.write(&buf[..n]);
            }
        }
    });
    let listener = server_loop.listen("127.0.0.1", 0, echo_callback).unwrap();
    let addr = listener.local_address().unwrap();
    let _server = LoopWorker::from_loop("netloop-test-echo-server", server_loop).unwrap();

    let (tx, rx) = channel::<Vec<u8>>();
    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let client_callback: Callback = Arc::new(move |channel_ref, event| match event {
        Event::Connect => {
            let _ = channel_ref.write(b"hello, loop");
        }
        Event::Recv => {
            let mut buf = [0u8; 4096];
            let n = channel_ref.read(&mut buf);
            let _ = tx.send(buf[..n].to_vec());
        }
        _ => {}
    });
    client_loop
        .connect(&addr.ip().to_string(), addr.port(), client_callback)
        .unwrap();
    let _client = LoopWorker::from_loop("netloop-test-echo-client", client_loop).unwrap();

    let echoed = support::recv_within(&rx, "echoed bytes");
    assert_eq!(echoed, b"hello, loop");
}
