//! Request framing for the transport layer.
//!
//! A message goes on the wire as a RESP2 array of bulk strings:
//! `*<n>\r\n` followed by `$<len>\r\n<bytes>\r\n` for the verb and each
//! argument. Integer arguments are rendered in decimal. Decoding replies is the
//! transport's job and lives outside this crate.

use bytes::{BufMut, Bytes, BytesMut};

use crate::message::Message;
use crate::Error;

/// Maximum encoded request size (512 MB), the server's own bulk-string limit.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024 * 1024;

const CRLF: &[u8] = b"\r\n";

/// Number of bytes `encode_message` will append for `message`.
pub fn encoded_len(message: &Message) -> usize {
    let parts = 1 + message.args().len();
    let mut total = header_len(parts);
    total += bulk_len(message.command().as_str().len());
    for arg in message.args() {
        total += bulk_len(arg.to_bytes().len());
    }
    total
}

/// Append the RESP encoding of `message` to `buf`.
///
/// Nothing is written when the request would exceed [`MAX_MESSAGE_SIZE`].
pub fn encode_message(message: &Message, buf: &mut BytesMut) -> Result<(), Error> {
    let total = encoded_len(message);
    if total > MAX_MESSAGE_SIZE {
        return Err(Error::Encoding(format!(
            "request size {} exceeds maximum {}",
            total, MAX_MESSAGE_SIZE
        )));
    }

    buf.reserve(total);
    write_header(buf, b'*', 1 + message.args().len());
    write_bulk(buf, message.command().as_str().as_bytes());
    for arg in message.args() {
        write_bulk(buf, &arg.to_bytes());
    }
    Ok(())
}

/// Encode `message` into a fresh buffer.
pub fn encode_to_bytes(message: &Message) -> Result<Bytes, Error> {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf)?;
    Ok(buf.freeze())
}

fn header_len(n: usize) -> usize {
    1 + decimal_len(n) + CRLF.len()
}

fn bulk_len(len: usize) -> usize {
    header_len(len) + len + CRLF.len()
}

fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn write_header(buf: &mut BytesMut, marker: u8, n: usize) {
    buf.put_u8(marker);
    buf.put_slice(n.to_string().as_bytes());
    buf.put_slice(CRLF);
}

fn write_bulk(buf: &mut BytesMut, data: &[u8]) {
    write_header(buf, b'$', data.len());
    buf.put_slice(data);
    buf.put_slice(CRLF);
}
