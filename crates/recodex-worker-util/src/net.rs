//! Multipart message framing used for the broker connection and the
//! in-process `jobs`/`progress` channels.
//!
//! The source talks to the broker over a ZMQ dealer socket, which frames
//! messages as a list of byte strings (a "multipart message") rather than a
//! single blob. Plain `TcpStream`s don't have that framing built in, so each
//! multipart message here is sent as a length-prefixed `bincode` encoding of
//! `Vec<Vec<u8>>`, the same length-prefix-then-bincode shape
//! `maelstrom-client-process`'s `net::write_message_to_socket` /
//! `read_message_from_socket` use for its own socket protocol.

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

/// A multipart message: an ordered list of string frames, mirroring the
/// ZMQ multipart frames the broker protocol uses (`init, hwgroup, ...`).
pub type Multipart = Vec<String>;

pub fn write_multipart(writer: &mut impl Write, frames: &Multipart) -> Result<()> {
    let bytes: Vec<Vec<u8>> = frames.iter().map(|f| f.as_bytes().to_vec()).collect();
    let encoded = bincode::serialize(&bytes).context("encoding multipart message")?;
    writer
        .write_u32::<BigEndian>(encoded.len() as u32)
        .context("writing multipart length prefix")?;
    writer
        .write_all(&encoded)
        .context("writing multipart body")?;
    writer.flush().context("flushing multipart write")?;
    Ok(())
}

pub fn read_multipart(reader: &mut impl Read) -> Result<Multipart> {
    let len = reader
        .read_u32::<BigEndian>()
        .context("reading multipart length prefix")?;
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .context("reading multipart body")?;
    let frames: Vec<Vec<u8>> = bincode::deserialize(&buf).context("decoding multipart message")?;
    frames
        .into_iter()
        .map(|f| String::from_utf8(f).context("multipart frame was not valid utf-8"))
        .collect()
}

/// Reads one multipart message from `reader`, waiting at most `timeout`.
/// Returns `Ok(None)` on timeout so callers (the broker poll loop) can
/// distinguish "nothing arrived in time" from a real error.
///
/// `reader` must be a type that supports read timeouts (a `TcpStream`
/// clone); this is implemented in terms of `set_read_timeout` rather than
/// a true `poll(2)` because the worker only ever waits on one socket at a
/// time per thread (spec.md's two-thread model keeps the broker socket,
/// the job channel, and the progress channel each on their own reader).
pub fn try_read_multipart_timeout(
    stream: &mut std::net::TcpStream,
    timeout: Duration,
) -> Result<Option<Multipart>> {
    stream
        .set_read_timeout(Some(timeout))
        .context("setting read timeout")?;
    match read_multipart(stream) {
        Ok(frames) => Ok(Some(frames)),
        Err(e) => {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                if matches!(io_err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) {
                    return Ok(None);
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_multipart_frames() {
        let frames: Multipart = vec!["init".into(), "hwgroup-a".into(), String::new()];
        let mut buf = Vec::new();
        write_multipart(&mut buf, &frames).unwrap();
        let mut cursor = Cursor::new(buf);
        let decoded = read_multipart(&mut cursor).unwrap();
        assert_eq!(decoded, frames);
    }
}
