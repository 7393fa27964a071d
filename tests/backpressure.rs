use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::Duration;

use netloop::{Callback, Event, Loop, LoopConfig, LoopWorker};

const CONNECTIONS: usize = 1000;

#[test]
fn listener_accepts_and_releases_a_thousand_connections() {
    let accepted = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = channel::<()>();

    let mut server_loop = Loop::new(LoopConfig::default()).unwrap();
    let accepted_count = accepted.clone();
    let closed_count = closed.clone();
    let server_callback: Callback = Arc::new(move |channel_ref, event| match event {
        Event::Accept => {
            accepted_count.fetch_add(1, Ordering::SeqCst);
            // Exercise the full accept-then-close lifecycle per child
            // instead of just counting arrivals.
            channel_ref.close();
        }
        Event::Close => {
            let n = closed_count.fetch_add(1, Ordering::SeqCst) + 1;
            if n == CONNECTIONS {
                let _ = done_tx.send(());
            }
        }
        _ => {}
    });
    let listener = server_loop.listen("127.0.0.1", 0, server_callback).unwrap();
    let addr = listener.local_address().unwrap();
    let server_handle = server_loop.handle();
    let _server = LoopWorker::from_loop("netloop-test-backpressure-server", server_loop).unwrap();

    let mut client_loop = Loop::new(LoopConfig::default()).unwrap();
    let client_callback: Callback = Arc::new(|_channel_ref, _event| {});
    let mut clients = Vec::with_capacity(CONNECTIONS);
    for _ in 0..CONNECTIONS {
        let channel_ref = client_loop
            .connect(&addr.ip().to_string(), addr.port(), client_callback.clone())
            .unwrap();
        clients.push(channel_ref);
    }
    let _client = LoopWorker::from_loop("netloop-test-backpressure-client", client_loop).unwrap();

    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("all 1000 accepted children should have closed");
    assert_eq!(accepted.load(Ordering::SeqCst), CONNECTIONS);
    assert_eq!(closed.load(Ordering::SeqCst), CONNECTIONS);

    // Every accepted child fired exactly one accept and one close, so the
    // server loop's live reference count has settled back to baseline: the
    // listener itself, and nothing else.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while server_handle.channel_count() != 1 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(server_handle.channel_count(), 1);

    for c in clients {
        c.close();
    }
}
