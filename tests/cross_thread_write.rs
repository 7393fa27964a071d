mod support;

use std::sync::mpsc::channel;
use std::sync::Arc;

use netloop::{Callback, ChannelRef, Event, Loop, LoopConfig, LoopWorker};

#[test]
fn write_from_a_non_owning_thread_is_delivered() {
    let (recv_tx, recv_rx) = channel::<Vec<u8>>();
    let mut server_loop = Loop::new(LoopConfig::default()).unwrap();
    let server_callback: Callback = Arc::new(move |channel_ref, event| {
        if event == Event::Recv {
            let mut buf = [0u8; 4096];
            let n = channel_ref.read(&mut buf);
            let _ = recv_tx.send(buf[..n].to_vec());
        }
    });
    let listener = server_loop.listen("127.0.0.1", 0, server_callback).unwrap();
    let addr = listener.local_address().unwrap();
    let _server = LoopWorker::from_loop("netloop-test-cross-write-server", server_loop).unwrap();

    let (ref_tx, ref_rx) = channel::<ChannelRef>();
    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let client_callback: Callback = Arc::new(move |channel_ref, event| {
        if event == Event::Connect {
            let _ = ref_tx.send(channel_ref.share());
        }
    });
    client_loop
        .connect(&addr.ip().to_string(), addr.port(), client_callback)
        .unwrap();
    let _client = LoopWorker::from_loop("netloop-test-cross-write-client", client_loop).unwrap();

    let connected = support::recv_within(&ref_rx, "client connect");
    // Neither loop's owning thread is the one running this test: `write`
    // has to hop through the owning loop's inbox rather than touch the
    // socket right here.
    connected.write(b"posted from the test thread").unwrap();

    let received = support::recv_within(&recv_rx, "server recv");
    assert_eq!(received, b"posted from the test thread");
}
