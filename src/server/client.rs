//! Client side of the line-delimited JSON transport.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use anyhow::{anyhow, bail, Context, Result};

use super::{Frame, Response};
use crate::service::{ProcessRequest, ProcessResponse, WatchBatch, WatchRequest};

fn connect(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr).with_context(|| format!("could not connect to the service at {addr}"))
}

fn send_frame(stream: &mut TcpStream, frame: &Frame) -> Result<()> {
    let line = serde_json::to_string(frame)?;
    writeln!(stream, "{}", line)?;
    stream.flush()?;
    Ok(())
}

fn read_response(reader: &mut impl BufRead) -> Result<Option<Response>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&line)?))
}

/// Submits one sample and returns the service's acknowledgement.
pub fn submit(addr: &str, request: ProcessRequest) -> Result<ProcessResponse> {
    let mut stream = connect(addr)?;
    send_frame(&mut stream, &Frame::Process { request })?;
    let mut reader = BufReader::new(stream);
    match read_response(&mut reader)? {
        Some(Response::Ok(value)) => Ok(serde_json::from_value(value)?),
        Some(Response::Error(e)) => bail!("{}: {}", e.code, e.message),
        None => Err(anyhow!("service closed the connection without replying")),
    }
}

/// Asks the service to cancel a queued sample.
pub fn cancel(addr: &str, api_version: &str, id: &str) -> Result<()> {
    let mut stream = connect(addr)?;
    send_frame(
        &mut stream,
        &Frame::Cancel {
            api_version: api_version.to_string(),
            id: id.to_string(),
        },
    )?;
    let mut reader = BufReader::new(stream);
    match read_response(&mut reader)? {
        Some(Response::Ok(_)) => Ok(()),
        Some(Response::Error(e)) => bail!("{}: {}", e.code, e.message),
        None => Err(anyhow!("service closed the connection without replying")),
    }
}

/// Opens a watch stream and hands each batch to `on_batch` until the
/// service shuts down or the callback asks to stop by returning false.
pub fn watch(
    addr: &str,
    request: WatchRequest,
    mut on_batch: impl FnMut(WatchBatch) -> bool,
) -> Result<()> {
    let mut stream = connect(addr)?;
    send_frame(&mut stream, &Frame::Watch { request })?;
    let mut reader = BufReader::new(stream);
    loop {
        match read_response(&mut reader)? {
            Some(Response::Ok(value)) => {
                let batch: WatchBatch = serde_json::from_value(value)?;
                if !on_batch(batch) {
                    return Ok(());
                }
            }
            Some(Response::Error(e)) => bail!("{}: {}", e.code, e.message),
            None => return Ok(()),
        }
    }
}
