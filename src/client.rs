//! One-shot client helpers.
//!
//! Plain blocking I/O for callers and tests; none of this participates in
//! the server's event loop.

use crate::event_loop::READ_CHUNK;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::process::{Command, Stdio};

/// Connect, send one message, receive one reply, close.
///
/// The reply is bounded by the server's read chunk size; an empty string
/// means the server closed without answering.
pub fn send_request(msg: &str, host: &str, port: u16) -> io::Result<String> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.write_all(msg.as_bytes())?;

    let mut buf = [0u8; READ_CHUNK];
    let n = stream.read(&mut buf)?;
    let response = String::from_utf8_lossy(&buf[..n]).into_owned();

    let _ = stream.shutdown(Shutdown::Both);
    Ok(response)
}

/// Check host liveness with the system ping binary.
pub fn ping(host: &str, count: u32) -> bool {
    let count_flag = if cfg!(windows) { "-n" } else { "-c" };
    Command::new("ping")
        .arg(count_flag)
        .arg(count.to_string())
        .arg(host)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
