// In-memory transport driven by the test, standing in for the session server.

use crate::domain::{Connector, Transport, TransportError};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

enum ServerEvent {
    Frame(String),
    Fail(TransportError),
}

pub(crate) struct ScriptedConnector {
    transport: Mutex<Option<ScriptedTransport>>,
    gate: Option<Arc<Notify>>,
    refuse: Option<TransportError>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub(crate) fn pair() -> (Self, ServerScript) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicUsize::new(0));

        let connector = Self {
            transport: Mutex::new(Some(ScriptedTransport {
                inbound: inbound_rx,
                outbound: outbound_tx,
                closed: closed.clone(),
            })),
            gate: None,
            refuse: None,
            attempts: attempts.clone(),
        };
        let script = ServerScript {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            closed,
            attempts,
        };
        (connector, script)
    }

    /// Connect attempts park until the returned `Notify` fires.
    pub(crate) fn gated() -> (Self, Arc<Notify>, ServerScript) {
        let (mut connector, script) = Self::pair();
        let gate = Arc::new(Notify::new());
        connector.gate = Some(gate.clone());
        (connector, gate, script)
    }

    pub(crate) fn refusing(err: TransportError) -> Self {
        let (mut connector, _script) = Self::pair();
        connector.refuse = Some(err);
        connector
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(&self, _url: &str) -> Result<ScriptedTransport, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(err) = &self.refuse {
            return Err(err.clone());
        }
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| TransportError::Connect("script already used".into()))
    }
}

pub(crate) struct ScriptedTransport {
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        match self.inbound.recv().await? {
            ServerEvent::Frame(text) => Some(Ok(text)),
            ServerEvent::Fail(err) => Some(Err(err)),
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct ServerScript {
    inbound: Option<mpsc::UnboundedSender<ServerEvent>>,
    outbound: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl ServerScript {
    pub(crate) fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub(crate) fn push_raw(&self, text: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(ServerEvent::Frame(text.to_owned()));
        }
    }

    pub(crate) fn fail(&self, err: TransportError) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(ServerEvent::Fail(err));
        }
    }

    /// Server side hangs up; the client sees end of stream.
    pub(crate) fn close(&mut self) {
        self.inbound = None;
    }

    pub(crate) async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("client should send a frame")
            .expect("client transport should still exist");
        serde_json::from_str(&text).expect("client frames should be json")
    }

    pub(crate) fn sent_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client frames should be json"));
        }
        frames
    }

    pub(crate) fn transport_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}
