//! Local HTTP fixtures shared by the unit tests.

use std::net::{SocketAddr, TcpListener as StdTcpListener};

use axum::Router;
use reqwest::Client;
use tokio::{net::TcpListener, sync::oneshot};

pub(crate) struct TestServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub(crate) async fn spawn_server(router: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        shutdown: Some(tx),
    }
}

/// URL pointing at a loopback port nothing listens on.
pub(crate) fn closed_port_url() -> String {
    let listener = StdTcpListener::bind(("127.0.0.1", 0)).expect("ephemeral port should bind");
    let port = listener
        .local_addr()
        .expect("address should resolve")
        .port();
    drop(listener);
    format!("http://127.0.0.1:{port}/")
}

pub(crate) fn no_redirect_client() -> Client {
    Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
