// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP transport
//!
//! One spawned task per request streams response bytes into the request's
//! sink. Each session has at most one in-flight request; starting a new one
//! cancels the previous.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::sync::watch;
use uuid::Uuid;

use crate::chat::interfaces::{Transport, TransportSink};
use crate::error::{ApiError, Result};
use crate::llm::provider::FormattedRequest;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

type InFlight = HashMap<Uuid, (u64, watch::Sender<bool>)>;

/// Streaming transport over reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    in_flight: Arc<Mutex<InFlight>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of requests still streaming
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

fn lock(in_flight: &Mutex<InFlight>) -> MutexGuard<'_, InFlight> {
    match in_flight.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(target: "shoulders.transport", "in-flight lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: FormattedRequest, sink: TransportSink) {
        let key = sink.key();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some((generation, previous)) =
            lock(&self.in_flight).insert(key.session_id, (key.generation, cancel_tx))
        {
            tracing::debug!(
                target: "shoulders.transport",
                session_id = %key.session_id,
                generation,
                "superseded request cancelled"
            );
            let _ = previous.send(true);
        }

        let client = self.client.clone();
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            stream_request(&client, request, &sink, cancel_rx).await;
            let mut in_flight = lock(&in_flight);
            if in_flight
                .get(&key.session_id)
                .is_some_and(|(generation, _)| *generation == key.generation)
            {
                in_flight.remove(&key.session_id);
            }
        });
    }

    fn abort(&self, session_id: Uuid) {
        if let Some((generation, cancel)) = lock(&self.in_flight).remove(&session_id) {
            tracing::debug!(
                target: "shoulders.transport",
                session_id = %session_id,
                generation,
                "aborting request"
            );
            let _ = cancel.send(true);
        }
    }
}

/// Resolves once the request is cancelled; never if the sender is dropped.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn stream_request(
    client: &Client,
    request: FormattedRequest,
    sink: &TransportSink,
    mut cancel: watch::Receiver<bool>,
) {
    let mut builder = client.post(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let pending = builder.json(&request.body).send();

    let response = tokio::select! {
        _ = cancelled(&mut cancel) => {
            sink.on_done(true);
            return;
        }
        result = pending => match result {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(target: "shoulders.transport", key = %sink.key(), error = %e, "request failed");
                sink.on_error(ApiError::from_reqwest(&e));
                return;
            }
        },
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(
            target: "shoulders.transport",
            key = %sink.key(),
            status = status.as_u16(),
            "provider returned an error status"
        );
        sink.on_error(ApiError::from_status(status.as_u16(), &body));
        return;
    }

    let mut stream = response.bytes_stream();
    loop {
        tokio::select! {
            _ = cancelled(&mut cancel) => {
                sink.on_done(true);
                return;
            }
            next = stream.next() => match next {
                Some(Ok(bytes)) => sink.on_chunk(bytes.to_vec()),
                Some(Err(e)) => {
                    sink.on_error(ApiError::from_reqwest(&e));
                    return;
                }
                None => {
                    sink.on_done(false);
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::interfaces::{SessionKey, TransportEvent, TransportPayload};
    use crate::error::ErrorKind;
    use serde_json::json;
    use tokio::sync::mpsc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String) -> FormattedRequest {
        FormattedRequest {
            url,
            headers: vec![
                ("Content-Type".into(), "application/json".into()),
                ("x-api-key".into(), "k".into()),
            ],
            body: json!({"stream": true}),
        }
    }

    fn sink() -> (TransportSink, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = SessionKey {
            session_id: Uuid::new_v4(),
            generation: 1,
        };
        (TransportSink::new(key, tx), rx)
    }

    async fn collect(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> (Vec<u8>, TransportPayload) {
        let mut bytes = Vec::new();
        while let Some(event) = rx.recv().await {
            match event.payload {
                TransportPayload::Chunk(chunk) => bytes.extend(chunk),
                terminal => return (bytes, terminal),
            }
        }
        panic!("channel closed without a terminal event");
    }

    #[tokio::test]
    async fn test_streams_body_then_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "k"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: {\"type\":\"ping\"}\n\n"),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
        let (sink, mut rx) = sink();
        transport.send(request(format!("{}/v1/messages", server.uri())), sink);

        let (bytes, terminal) = collect(&mut rx).await;
        assert_eq!(bytes, b"data: {\"type\":\"ping\"}\n\n");
        assert_eq!(terminal, TransportPayload::Done { aborted: false });
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string(r#"{"error":{"message":"Too many requests"}}"#),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
        let (sink, mut rx) = sink();
        transport.send(request(server.uri()), sink);

        let (_, terminal) = collect(&mut rx).await;
        let TransportPayload::Error(error) = terminal else {
            panic!("expected an error, got {:?}", terminal);
        };
        assert_eq!(error.kind(), ErrorKind::RateLimit);
        assert_eq!(error.status(), Some(429));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let (sink, mut rx) = sink();
        transport.send(request("http://127.0.0.1:9/unreachable".into()), sink);

        let (_, terminal) = collect(&mut rx).await;
        let TransportPayload::Error(error) = terminal else {
            panic!("expected an error, got {:?}", terminal);
        };
        assert_eq!(error.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_abort_reports_aborted_done() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {}\n\n")
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let transport = HttpTransport::new(DEFAULT_TIMEOUT).unwrap();
        let (sink, mut rx) = sink();
        let session_id = sink.key().session_id;
        transport.send(request(server.uri()), sink);
        assert_eq!(transport.in_flight(), 1);

        transport.abort(session_id);
        let (_, terminal) = collect(&mut rx).await;
        assert_eq!(terminal, TransportPayload::Done { aborted: true });
        assert_eq!(transport.in_flight(), 0);
    }
}
