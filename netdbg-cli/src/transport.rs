//! JSON-lines protocol shim: one request or event envelope per line.
//!
//! This is the thin transport the binary ships; a full DAP adapter
//! with content-length framing plugs into the same [`DebugSession`]
//! surface. Requests are accepted either wrapped in a
//! [`ProtocolMessage`] envelope or as bare [`DebugRequest`] objects.

use anyhow::{Context, Result};
use netdbg_kernel::DebugSession;
use netdbg_protocol::{DebugEvent, DebugRequest, EventSink, ProtocolMessage};
use parking_lot::Mutex;
use std::io::{BufRead, Write};
use std::sync::Arc;
use tracing::{debug, error, info};

/// An [`EventSink`] writing event envelopes as JSON lines, with an
/// optional protocol-traffic log (`--engineLogging`).
pub struct JsonLinesSink {
    out: Mutex<Box<dyn Write + Send>>,
    engine_log: Option<Mutex<Box<dyn Write + Send>>>,
}

impl JsonLinesSink {
    /// Wrap a writer (stdout or a TCP stream).
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>) -> Arc<Self> {
        Arc::new(Self {
            out: Mutex::new(out),
            engine_log: None,
        })
    }

    /// Wrap a writer and mirror all protocol traffic into
    /// `engine_log`.
    #[must_use]
    pub fn with_engine_log(
        out: Box<dyn Write + Send>,
        engine_log: Box<dyn Write + Send>,
    ) -> Arc<Self> {
        Arc::new(Self {
            out: Mutex::new(out),
            engine_log: Some(Mutex::new(engine_log)),
        })
    }

    fn log_engine(&self, direction: &str, line: &str) {
        if let Some(engine) = &self.engine_log {
            let mut engine = engine.lock();
            let _ = writeln!(engine, "{direction} {line}");
            let _ = engine.flush();
        }
    }
}

impl EventSink for JsonLinesSink {
    fn emit(&self, event: DebugEvent) {
        let message = ProtocolMessage::event(&event);
        match serde_json::to_string(&message) {
            Ok(line) => {
                self.log_engine("->", &line);
                let mut out = self.out.lock();
                if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                    error!("could not write event to the front-end");
                }
            }
            Err(err) => error!(%err, "could not serialize event"),
        }
    }
}

fn parse_request(line: &str) -> Option<(String, DebugRequest)> {
    if let Ok(message) = serde_json::from_str::<ProtocolMessage>(line) {
        let msg_id = message.msg_id.clone();
        return message.as_request().map(|request| (msg_id, request));
    }
    serde_json::from_str::<DebugRequest>(line)
        .ok()
        .map(|request| (String::new(), request))
}

/// Serve requests from `input`, writing responses to `output`, until
/// the stream ends or a disconnect request completes.
///
/// # Errors
///
/// I/O failures on the transport.
pub fn serve(
    session: &Arc<DebugSession>,
    input: impl BufRead,
    output: &Arc<JsonLinesSink>,
) -> Result<()> {
    for line in input.lines() {
        let line = line.context("reading request line")?;
        if line.trim().is_empty() {
            continue;
        }
        output.log_engine("<-", &line);

        let Some((msg_id, request)) = parse_request(&line) else {
            debug!(%line, "unparseable request line");
            let reply = ProtocolMessage::error(String::new(), "unparseable request");
            write_message(output, &reply);
            continue;
        };

        let ends_session = matches!(
            request,
            DebugRequest::Disconnect { .. } | DebugRequest::Terminate
        );

        debug!(?request, "dispatching request");
        let reply = match session.handle_request(request) {
            Ok(response) => ProtocolMessage::response(msg_id, &response),
            Err(err) => ProtocolMessage::error(msg_id, err),
        };
        write_message(output, &reply);

        if ends_session {
            info!("session ended by front-end");
            break;
        }
    }
    Ok(())
}

fn write_message(output: &Arc<JsonLinesSink>, message: &ProtocolMessage) {
    match serde_json::to_string(message) {
        Ok(line) => {
            output.log_engine("->", &line);
            let mut out = output.out.lock();
            if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                error!("could not write response to the front-end");
            }
        }
        Err(err) => error!(%err, "could not serialize response"),
    }
}
