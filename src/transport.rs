//! # Gateway transport layer
//!
//! The session talks to the gateway through a message-oriented duplex link:
//! every outbound message is one Modbus TCP request frame and every inbound
//! message one response frame. [`Connector`] opens such a link and splits it
//! into a [`FrameSender`] and a [`FrameReceiver`] so the receive side can run
//! on its own task.
//!
//! ## Implementations
//!
//! - [`WebSocketConnector`] - binary WebSocket messages (`websocket` feature)
//! - a channel-backed mock used by the crate's tests

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_GATEWAY_HOST, DEFAULT_GATEWAY_PATH, DEFAULT_GATEWAY_PORT};
use crate::error::ModbusResult;

/// Address of the Modbus gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl GatewayEndpoint {
    /// Endpoint on the default port and path
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Override the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the path
    pub fn with_path<S: Into<String>>(mut self, path: S) -> Self {
        self.path = path.into();
        self
    }

    /// WebSocket URL, e.g. `ws://192.168.16.200:8080/v1`
    pub fn url(&self) -> String {
        if self.path.starts_with('/') {
            format!("ws://{}:{}{}", self.host, self.port, self.path)
        } else {
            format!("ws://{}:{}/{}", self.host, self.port, self.path)
        }
    }
}

impl Default for GatewayEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_GATEWAY_HOST.to_string(),
            port: DEFAULT_GATEWAY_PORT,
            path: DEFAULT_GATEWAY_PATH.to_string(),
        }
    }
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Outbound half of a gateway link
pub trait FrameSender: Send + 'static {
    /// Send one complete frame as a single message
    fn send_frame(&mut self, frame: Vec<u8>) -> impl Future<Output = ModbusResult<()>> + Send;

    /// Close the link gracefully
    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;
}

/// Inbound half of a gateway link
pub trait FrameReceiver: Send + 'static {
    /// Next inbound frame.
    ///
    /// `None` means the link closed; `Some(Err(_))` is a receive failure,
    /// after which the link is treated as closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<ModbusResult<Vec<u8>>>> + Send;
}

/// Opens gateway links
pub trait Connector: Send + Sync + 'static {
    type Sender: FrameSender;
    type Receiver: FrameReceiver;

    /// Open a new link to `endpoint`.
    ///
    /// Refusals and handshake failures are reported as
    /// [`ModbusError::Connect`](crate::ModbusError::Connect).
    fn connect(
        &self,
        endpoint: &GatewayEndpoint,
    ) -> impl Future<Output = ModbusResult<(Self::Sender, Self::Receiver)>> + Send;
}

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnector, WsFrameReceiver, WsFrameSender};

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::stream::{SplitSink, SplitStream};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use tracing::{debug, info, warn};

    use super::{Connector, FrameReceiver, FrameSender, GatewayEndpoint};
    use crate::error::{ModbusError, ModbusResult};

    type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

    /// Connector for gateways exposing Modbus TCP over binary WebSocket messages
    #[derive(Debug, Clone, Copy, Default)]
    pub struct WebSocketConnector;

    impl WebSocketConnector {
        pub fn new() -> Self {
            Self
        }
    }

    impl Connector for WebSocketConnector {
        type Sender = WsFrameSender;
        type Receiver = WsFrameReceiver;

        async fn connect(
            &self,
            endpoint: &GatewayEndpoint,
        ) -> ModbusResult<(WsFrameSender, WsFrameReceiver)> {
            let url = endpoint.url();
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| ModbusError::connect(format!("Failed to connect to {}: {}", url, e)))?;
            info!("WebSocket connected to {}", url);

            let (sink, stream) = stream.split();
            Ok((WsFrameSender { sink }, WsFrameReceiver { stream }))
        }
    }

    /// Write half of a gateway WebSocket
    pub struct WsFrameSender {
        sink: SplitSink<WsStream, Message>,
    }

    impl FrameSender for WsFrameSender {
        async fn send_frame(&mut self, frame: Vec<u8>) -> ModbusResult<()> {
            self.sink
                .send(Message::Binary(frame))
                .await
                .map_err(|e| ModbusError::transport(format!("WebSocket send failed: {}", e)))
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.sink
                .close()
                .await
                .map_err(|e| ModbusError::transport(format!("WebSocket close failed: {}", e)))
        }
    }

    /// Read half of a gateway WebSocket
    pub struct WsFrameReceiver {
        stream: SplitStream<WsStream>,
    }

    impl FrameReceiver for WsFrameReceiver {
        async fn next_frame(&mut self) -> Option<ModbusResult<Vec<u8>>> {
            loop {
                match self.stream.next().await? {
                    Ok(Message::Binary(data)) => return Some(Ok(data)),
                    Ok(Message::Close(frame)) => {
                        debug!("WebSocket close frame: {:?}", frame);
                        return None;
                    }
                    Ok(Message::Text(text)) => {
                        warn!("Ignoring text message from gateway: {}", text);
                    }
                    // Ping/pong are answered by tungstenite itself
                    Ok(_) => {}
                    Err(e) => {
                        return Some(Err(ModbusError::transport(format!(
                            "WebSocket receive failed: {}",
                            e
                        ))))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Channel-backed gateway link for tests.
    //!
    //! The test drives the gateway side through [`MockGateway`]: every
    //! successful connect hands it a [`MockLink`] carrying the request frames
    //! the session sent and a sender for response frames. Dropping the link's
    //! `responses` sender closes the connection from the gateway side.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;

    use super::{Connector, FrameReceiver, FrameSender, GatewayEndpoint};
    use crate::codec;
    use crate::error::{ModbusError, ModbusResult};

    struct MockState {
        attempts: AtomicUsize,
        /// Scripted connect outcomes; `true` fails the attempt
        failures: Mutex<VecDeque<bool>>,
        fail_writes: Arc<AtomicBool>,
        links: mpsc::UnboundedSender<MockLink>,
    }

    pub(crate) struct MockConnector {
        state: Arc<MockState>,
    }

    pub(crate) struct MockGateway {
        state: Arc<MockState>,
        links: mpsc::UnboundedReceiver<MockLink>,
    }

    pub(crate) struct MockLink {
        pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
        pub responses: mpsc::UnboundedSender<ModbusResult<Vec<u8>>>,
    }

    impl MockConnector {
        pub(crate) fn new() -> (Self, MockGateway) {
            let (links_tx, links_rx) = mpsc::unbounded_channel();
            let state = Arc::new(MockState {
                attempts: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
                fail_writes: Arc::new(AtomicBool::new(false)),
                links: links_tx,
            });
            (
                Self {
                    state: state.clone(),
                },
                MockGateway {
                    state,
                    links: links_rx,
                },
            )
        }
    }

    impl MockGateway {
        /// Fail the next `count` connect attempts
        pub(crate) fn fail_next_connects(&self, count: usize) {
            let mut failures = self.state.failures.lock().unwrap();
            failures.extend(std::iter::repeat(true).take(count));
        }

        /// Make every subsequent write fail
        pub(crate) fn fail_writes(&self, fail: bool) {
            self.state.fail_writes.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn connect_attempts(&self) -> usize {
            self.state.attempts.load(Ordering::SeqCst)
        }

        pub(crate) async fn next_link(&mut self) -> MockLink {
            self.links.recv().await.expect("connector dropped")
        }
    }

    impl MockLink {
        /// Answer the next request with `data` as register bytes.
        pub(crate) async fn answer_next(&mut self, data: &[u8]) -> Vec<u8> {
            let request = self.requests.recv().await.expect("session dropped");
            let tid = codec::transaction_id_of(&request).unwrap();
            let _ = self
                .responses
                .send(Ok(codec::encode_read_response(tid, request[6], data)));
            request
        }

        /// Spawn a gateway that answers every request through `reply`.
        ///
        /// `reply` gets the request frame and returns the response frame, or
        /// `None` to stay silent.
        pub(crate) fn serve<F>(mut self, mut reply: F) -> tokio::task::JoinHandle<()>
        where
            F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
        {
            tokio::spawn(async move {
                while let Some(request) = self.requests.recv().await {
                    if let Some(response) = reply(&request) {
                        if self.responses.send(Ok(response)).is_err() {
                            break;
                        }
                    }
                }
            })
        }
    }

    impl Connector for MockConnector {
        type Sender = MockSender;
        type Receiver = MockReceiver;

        async fn connect(
            &self,
            _endpoint: &GatewayEndpoint,
        ) -> ModbusResult<(MockSender, MockReceiver)> {
            self.state.attempts.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .state
                .failures
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(false);
            if fail {
                return Err(ModbusError::connect("connection refused"));
            }

            let (request_tx, request_rx) = mpsc::unbounded_channel();
            let (response_tx, response_rx) = mpsc::unbounded_channel();
            let _ = self.state.links.send(MockLink {
                requests: request_rx,
                responses: response_tx,
            });
            Ok((
                MockSender {
                    requests: request_tx,
                    fail_writes: self.state.fail_writes.clone(),
                },
                MockReceiver {
                    responses: response_rx,
                },
            ))
        }
    }

    pub(crate) struct MockSender {
        requests: mpsc::UnboundedSender<Vec<u8>>,
        fail_writes: Arc<AtomicBool>,
    }

    impl FrameSender for MockSender {
        async fn send_frame(&mut self, frame: Vec<u8>) -> ModbusResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ModbusError::transport("write failed"));
            }
            self.requests
                .send(frame)
                .map_err(|_| ModbusError::transport("gateway gone"))
        }

        async fn close(&mut self) -> ModbusResult<()> {
            Ok(())
        }
    }

    pub(crate) struct MockReceiver {
        responses: mpsc::UnboundedReceiver<ModbusResult<Vec<u8>>>,
    }

    impl FrameReceiver for MockReceiver {
        async fn next_frame(&mut self) -> Option<ModbusResult<Vec<u8>>> {
            self.responses.recv().await
        }
    }
}
