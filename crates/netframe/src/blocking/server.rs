use std::{net::TcpListener, sync::Arc};

use tracing::{error, info, warn};

use crate::{error::Result, handler::MessageHandler, settings::Settings};

use super::{pool::ThreadPool, worker::BlockingWorker};

/// Classic thread-per-connection server: the accept loop blocks on the
/// listener, and every accepted socket is handed to a fixed-size pool
/// (`settings.thread_pool_size()`) where one worker thread blocks on it for
/// its whole lifetime.
pub struct ThreadPoolServer {
    listener: TcpListener,
    pool: ThreadPool,
    settings: Settings,
    handler: Arc<dyn MessageHandler>,
}

impl ThreadPoolServer {
    pub fn bind(settings: Settings, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        let addr = (settings.server_address(), settings.port());
        let listener = TcpListener::bind(addr)?;
        info!(?addr, pool_size = settings.thread_pool_size(), "listening");
        let pool = ThreadPool::new(settings.thread_pool_size());
        Ok(Self { listener, pool, settings, handler })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener itself errors. A single
    /// connection's own errors never take the server down with it — only a
    /// broken listener is logged at error level.
    pub fn run(&self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "listener accept failed");
                    return Err(e.into());
                }
            };
            info!(%peer, "accepted connection");
            if let Err(e) = stream.set_read_timeout(self.settings.blocking_read_timeout()) {
                warn!(%peer, error = %e, "failed to set read timeout, dropping connection");
                continue;
            }

            let settings = self.settings.clone();
            let handler = Arc::clone(&self.handler);
            self.pool.execute(move || {
                let mut worker = BlockingWorker::new(stream, settings);
                if let Err(e) = worker.run(handler.as_ref()) {
                    warn!(%peer, error = %e, "connection ended with an error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{frame, handler::EchoHandler};

    #[test]
    fn echoes_a_single_message_back_to_the_client() {
        let settings = Settings::default().with_port(0).with_thread_pool_size(2);
        let server = ThreadPoolServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
        let port = server.local_addr().unwrap().port();
        let server = Arc::new(server);
        let server_for_thread = Arc::clone(&server);
        thread::spawn(move || server_for_thread.run());

        thread::sleep(Duration::from_millis(50));
        let client_settings = settings.with_port(port);
        let mut client = super::super::client::BlockingClient::connect(client_settings).unwrap();
        client.send(&json!("hello")).unwrap();
        assert_eq!(client.receive().unwrap(), json!("hello"));
    }

    #[test]
    fn serves_several_clients_concurrently() {
        let settings = Settings::default().with_port(0).with_thread_pool_size(4);
        let server = ThreadPoolServer::bind(settings.clone(), Arc::new(EchoHandler)).unwrap();
        let port = server.local_addr().unwrap().port();
        let server = Arc::new(server);
        let server_for_thread = Arc::clone(&server);
        thread::spawn(move || server_for_thread.run());
        thread::sleep(Duration::from_millis(50));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let settings = settings.clone().with_port(port);
                thread::spawn(move || {
                    let mut client = super::super::client::BlockingClient::connect(settings).unwrap();
                    client.send(&json!(i)).unwrap();
                    assert_eq!(client.receive().unwrap(), json!(i));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
