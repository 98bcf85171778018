//! Line-delimited JSON transport for the service.
//!
//! Each connection carries one request frame. `process` and `cancel` get a
//! single reply line; `watch` turns the connection into a long-lived stream
//! of batch frames. One thread per connection keeps the transport layer
//! trivially small; the interesting concurrency lives in the service.

pub mod client;

use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::service::{Service, ServiceError, WatchRequest};

/// A request frame, one JSON object per line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "camelCase")]
pub enum Frame {
    Process {
        request: crate::service::ProcessRequest,
    },
    Cancel {
        #[serde(rename = "apiVersion")]
        api_version: String,
        id: String,
    },
    Watch { request: WatchRequest },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// A reply frame: `{"ok": ...}` or `{"error": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(serde_json::Value),
    #[serde(rename = "error")]
    Error(WireError),
}

/// Accepts connections until the service closes. Dropping into shutdown
/// needs one final connection (see [`nudge`]) to unblock the accept call.
pub fn run(service: &Arc<Service>, listener: TcpListener) -> io::Result<()> {
    for stream in listener.incoming() {
        if !service.is_open() {
            break;
        }
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                warn!("accept failed: {}", e);
                continue;
            }
        };
        let service = Arc::clone(service);
        thread::spawn(move || {
            if let Err(e) = handle(&service, stream) {
                debug!("connection ended with error: {}", e);
            }
        });
    }
    Ok(())
}

/// Pokes the listener so a blocked accept wakes up and observes shutdown.
pub fn nudge(addr: &str) {
    let _ = TcpStream::connect(addr);
}

fn handle(service: &Arc<Service>, stream: TcpStream) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut out = stream;
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let frame: Frame = match serde_json::from_str(&line) {
        Ok(frame) => frame,
        Err(e) => {
            return write_error(
                &mut out,
                "InvalidArgument",
                &format!("unparseable request frame: {}", e),
            )
        }
    };

    match frame {
        Frame::Process { request } => match service.process(request) {
            Ok(response) => write_ok(&mut out, &response),
            Err(e) => write_service_error(&mut out, &e),
        },
        Frame::Cancel { api_version, id } => match service.cancel(&api_version, &id) {
            Ok(()) => write_ok(&mut out, &serde_json::json!({})),
            Err(e) => write_service_error(&mut out, &e),
        },
        Frame::Watch { request } => {
            let result = service.watch(&request, |batch| write_ok(&mut out, batch));
            if let Err(e) = result {
                write_service_error(&mut out, &e)?;
            }
            Ok(())
        }
    }
}

fn write_ok<W: Write, T: Serialize>(out: &mut W, value: &T) -> io::Result<()> {
    let value = serde_json::to_value(value).map_err(io::Error::other)?;
    let reply = serde_json::to_string(&Response::Ok(value)).map_err(io::Error::other)?;
    writeln!(out, "{}", reply)?;
    out.flush()
}

fn write_error<W: Write>(out: &mut W, code: &str, message: &str) -> io::Result<()> {
    let reply = serde_json::to_string(&Response::Error(WireError {
        code: code.to_string(),
        message: message.to_string(),
    }))
    .map_err(io::Error::other)?;
    writeln!(out, "{}", reply)?;
    out.flush()
}

fn write_service_error<W: Write>(out: &mut W, err: &ServiceError) -> io::Result<()> {
    write_error(out, err.code(), &err.to_string())
}
