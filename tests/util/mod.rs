//! Local servers for driving a feed without touching the real venue: a real
//! websocket endpoint and an HTTP endpoint whose responses the test sends by
//! hand, so a request can be held open while other traffic happens.

#![allow(dead_code)]

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

/// How long a test waits for anything before declaring failure.
pub const TIMEOUT: Duration = Duration::from_secs(1);

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A websocket server accepting any stream path.
pub struct WsServer {
    url: Url,
    connections: mpsc::UnboundedReceiver<WsPeer>,
}

impl WsServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = Url::parse(&format!("ws://{}", listener.local_addr()?))?;
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(socket).await else {
                    continue;
                };
                if tx.send(WsPeer { ws }).is_err() {
                    break;
                }
            }
        });

        Ok(Self { url, connections })
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> WsPeer {
        timeout(TIMEOUT, self.connections.recv())
            .await
            .expect("no websocket connection within the timeout")
            .expect("websocket listener stopped")
    }
}

/// Server side of one accepted websocket connection.
pub struct WsPeer {
    ws: WebSocketStream<TcpStream>,
}

impl WsPeer {
    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_owned()))
            .await
            .expect("send to the connected client");
    }

    pub async fn send_json(&mut self, value: serde_json::Value) {
        self.send_text(&value.to_string()).await;
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Assert that the client closes the connection within the timeout.
    pub async fn expect_closed(mut self) {
        loop {
            match timeout(TIMEOUT, self.ws.next())
                .await
                .expect("client did not close the websocket within the timeout")
            {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }
}

/// An HTTP server that answers only when the test tells it to.
pub struct RestServer {
    url: Url,
    requests: mpsc::UnboundedReceiver<RestRequest>,
}

impl RestServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = Url::parse(&format!("http://{}", listener.local_addr()?))?;
        let (tx, requests) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(request) = RestRequest::read(socket).await {
                        let _ = tx.send(request);
                    }
                });
            }
        });

        Ok(Self { url, requests })
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// Wait for the next request. The client stays blocked until
    /// [`RestRequest::respond_json`] is called or the request is dropped.
    pub async fn expect_request(&mut self) -> RestRequest {
        timeout(TIMEOUT, self.requests.recv())
            .await
            .expect("no REST request within the timeout")
            .expect("REST listener stopped")
    }
}

/// One received, not yet answered HTTP request.
pub struct RestRequest {
    socket: TcpStream,
    /// Request target, e.g. `/api/v1/depth?symbol=BTCUSDT&limit=1000`.
    pub target: String,
}

impl RestRequest {
    async fn read(mut socket: TcpStream) -> Result<Self> {
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 1024];
        while !raw.windows(4).any(|window| window == b"\r\n\r\n") {
            let n = socket.read(&mut chunk).await?;
            if n == 0 {
                anyhow::bail!("client closed before sending a full request");
            }
            raw.extend_from_slice(&chunk[..n]);
        }

        let head = String::from_utf8_lossy(&raw);
        let target = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or_default()
            .to_owned();

        Ok(Self { socket, target })
    }

    pub async fn respond_json(mut self, body: &str) {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len(),
        );
        self.socket
            .write_all(response.as_bytes())
            .await
            .expect("write the response");
        let _ = self.socket.shutdown().await;
    }
}
