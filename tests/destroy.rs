use std::sync::Arc;

use netloop::{Callback, Loop, LoopConfig, LoopWorker};

#[test]
fn share_leave_and_destroy_compose_correctly() {
    let mut server_loop = Loop::new(LoopConfig::default()).unwrap();
    let server_callback: Callback = Arc::new(|_channel_ref, _event| {});
    let listener = server_loop.listen("127.0.0.1", 0, server_callback).unwrap();
    let addr = listener.local_address().unwrap();
    let _server = LoopWorker::from_loop("netloop-test-destroy-server", server_loop).unwrap();

    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let client_callback: Callback = Arc::new(|_channel_ref, _event| {});
    let channel_ref = client_loop
        .connect(&addr.ip().to_string(), addr.port(), client_callback)
        .unwrap();
    let client = LoopWorker::from_loop("netloop-test-destroy-client", client_loop).unwrap();

    let shares: Vec<_> = (0..4).map(|_| channel_ref.share()).collect();
    // Outstanding shares plus the owning loop's own bookkeeping clone
    // mean destroy must refuse.
    assert!(channel_ref.clone().destroy().is_err());

    for s in shares {
        s.leave();
    }

    channel_ref.close();
    // Closing the worker's loop drops its own clone once the background
    // thread exits, leaving `channel_ref` as the only reference.
    client.join();

    assert!(channel_ref.destroy().is_ok());
}
