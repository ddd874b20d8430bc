use std::{
    net::TcpStream,
    sync::{Arc, atomic::AtomicBool},
    thread,
    time::Duration,
};

use netframe::{EchoHandler, Settings, blocking::BlockingWorker, cooperative::BusyLoopServer};
use serde_json::json;

/// Three clients each fire 100 messages as fast as possible at a busy-loop
/// server; none may be starved while another runs ahead (spec.md §8
/// scenario 5). The real `run()` loop drives accept + scheduling on its
/// own threads, same as production.
#[test]
fn three_concurrent_clients_all_make_progress() {
    let settings = Settings::default().with_port(0);
    let server = BusyLoopServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
    let port = server.local_addr().unwrap().port();

    let shutdown = Arc::new(AtomicBool::new(false));
    let server_shutdown = Arc::clone(&shutdown);
    let server_handle = thread::spawn(move || {
        let _ = server.run(&server_shutdown);
    });

    const MESSAGES_PER_CLIENT: usize = 100;
    let clients: Vec<_> = (0..3)
        .map(|client_id| {
            let settings = settings.clone().with_port(port).with_socket_timeout(Duration::from_secs(5));
            thread::spawn(move || {
                let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
                let mut worker = BlockingWorker::new(stream, settings);
                for seq in 0..MESSAGES_PER_CLIENT {
                    worker.send(&json!({"client": client_id, "seq": seq})).unwrap();
                    let reply = worker.receive_one().unwrap();
                    assert_eq!(reply, json!({"client": client_id, "seq": seq}));
                }
            })
        })
        .collect();

    for client in clients {
        client.join().unwrap();
    }

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    server_handle.join().unwrap();
}
