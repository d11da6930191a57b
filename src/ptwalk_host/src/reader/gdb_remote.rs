/*
Copyright 2025 The ptwalk Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! A minimal GDB Remote Serial Protocol client, enough to read target
//! memory with `m` packets from a gdbstub such as QEMU's `-s`.
//!
//! See <https://sourceware.org/gdb/current/onlinedocs/gdb.html/Remote-Protocol.html>

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use ptwalk_common::vmem::{MemoryReader, PageTableEntry, PhysAddr};
use tracing::{Span, instrument};

use super::{ENTRY_SIZE, entry_address, entry_from_bytes};
use crate::config::TableAddressMode;
use crate::{PtWalkError, Result};

const PACKET_START: u8 = b'$';
const PACKET_END: u8 = b'#';
const ACK: u8 = b'+';
const NACK: u8 = b'-';
const ESCAPE: u8 = b'}';
const RUN_LENGTH: u8 = b'*';
/// How often a packet is resent after the peer reports a bad checksum
const MAX_RETRANSMITS: usize = 3;

/// A reader for a live target behind a GDB remote stub.
///
/// The stub reads memory through the target's current translation
/// regime, so table addresses are normally resolved through the kernel
/// linear map (see [`TableAddressMode::LinearMap`]). A stub that
/// accepts physical addresses (e.g. QEMU after
/// `maintenance packet Qqemu.PhyMemMode:1`) can use
/// [`TableAddressMode::Physical`].
pub struct GdbRemoteReader {
    stream: RefCell<BufReader<TcpStream>>,
    mode: TableAddressMode,
}

impl GdbRemoteReader {
    #[instrument(err(Debug), skip(address), parent = Span::current(), level = "Trace")]
    pub fn connect(
        address: impl ToSocketAddrs,
        mode: TableAddressMode,
        timeout: Duration,
    ) -> Result<Self> {
        let mut last_error = None;
        for candidate in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    log::debug!("connected to gdb remote at {candidate}");
                    return Self::from_stream(stream, mode, timeout);
                }
                Err(e) => {
                    log::debug!("could not connect to {candidate}: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => e.into(),
            None => PtWalkError::GdbProtocol("address did not resolve".to_string()),
        })
    }

    /// Use an already connected stream
    pub fn from_stream(stream: TcpStream, mode: TableAddressMode, timeout: Duration) -> Result<Self> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream: RefCell::new(BufReader::new(stream)),
            mode,
        })
    }

    /// Read `len` bytes of target memory at `address`
    fn read_memory(&self, address: u64, len: u64) -> Result<Vec<u8>> {
        let mut stream = self.stream.try_borrow_mut()?;
        let reply = transact(&mut *stream, format!("m{address:x},{len:x}").as_bytes())?;

        if reply.is_empty() {
            return Err(PtWalkError::GdbProtocol(
                "target does not support memory reads".to_string(),
            ));
        }
        if reply.len() == 3 && reply[0] == b'E' {
            let code = decode_hex(&reply[1..])?;
            return Err(PtWalkError::GdbTargetError(code[0], address));
        }
        let bytes = decode_hex(&reply)?;
        if bytes.len() as u64 != len {
            return Err(PtWalkError::GdbProtocol(format!(
                "asked for {len} bytes at {address:#x}, target sent {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl MemoryReader for GdbRemoteReader {
    type Error = PtWalkError;

    #[instrument(err(Debug), skip(self), parent = Span::current(), level = "Trace")]
    fn read_u64(&self, table_base: PhysAddr, index: u16) -> Result<PageTableEntry> {
        let address = self.mode.resolve(entry_address(table_base, index)?)?;
        let bytes = self.read_memory(address, ENTRY_SIZE)?;
        // AArch64 targets are little endian
        entry_from_bytes(&bytes, true)
    }
}

/// Send one command packet and return the payload of the reply
fn transact<S: Read + Write>(stream: &mut BufReader<S>, payload: &[u8]) -> Result<Vec<u8>> {
    let packet = frame(payload);
    let mut attempts = 0;
    loop {
        stream.get_mut().write_all(&packet)?;
        stream.get_mut().flush()?;
        match read_byte(stream)? {
            ACK => break,
            NACK if attempts < MAX_RETRANSMITS => {
                attempts += 1;
                log::debug!("gdb remote asked for retransmission of packet");
            }
            other => {
                return Err(PtWalkError::GdbProtocol(format!(
                    "expected acknowledgement, got {:?}",
                    other as char
                )));
            }
        }
    }
    receive(stream)
}

/// Read one packet, acknowledge it, and return its decoded payload
fn receive<S: Read + Write>(stream: &mut BufReader<S>) -> Result<Vec<u8>> {
    let mut attempts = 0;
    loop {
        // skip stray acknowledgements before the packet
        loop {
            match read_byte(stream)? {
                PACKET_START => break,
                ACK => continue,
                other => {
                    return Err(PtWalkError::GdbProtocol(format!(
                        "expected start of packet, got {:?}",
                        other as char
                    )));
                }
            }
        }
        let mut body = Vec::new();
        stream.read_until(PACKET_END, &mut body)?;
        if body.pop() != Some(PACKET_END) {
            return Err(PtWalkError::GdbProtocol(
                "connection closed inside a packet".to_string(),
            ));
        }
        let mut sum = [0u8; 2];
        stream.read_exact(&mut sum)?;
        let expected = decode_hex(&sum)?[0];

        if checksum(&body) == expected {
            stream.get_mut().write_all(&[ACK])?;
            stream.get_mut().flush()?;
            return decode_payload(&body);
        }
        if attempts == MAX_RETRANSMITS {
            return Err(PtWalkError::GdbProtocol(format!(
                "bad checksum {expected:02x} on reply, computed {:02x}",
                checksum(&body)
            )));
        }
        attempts += 1;
        stream.get_mut().write_all(&[NACK])?;
        stream.get_mut().flush()?;
    }
}

fn read_byte<R: Read>(stream: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// The modulo 256 sum of the packet data
fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// `$payload#checksum`
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 4);
    packet.push(PACKET_START);
    packet.extend_from_slice(payload);
    packet.push(PACKET_END);
    packet.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
    packet
}

/// Undo escaping (`}` then the byte xor 0x20) and run length encoding
/// (`c*n` repeats `c` a further `n - 29` times)
fn decode_payload(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied();
    while let Some(byte) = bytes.next() {
        match byte {
            ESCAPE => {
                let escaped = bytes.next().ok_or_else(|| {
                    PtWalkError::GdbProtocol("escape at end of packet".to_string())
                })?;
                out.push(escaped ^ 0x20);
            }
            RUN_LENGTH => {
                let previous = *out.last().ok_or_else(|| {
                    PtWalkError::GdbProtocol("run length at start of packet".to_string())
                })?;
                let count = bytes
                    .next()
                    .and_then(|n| n.checked_sub(29))
                    .ok_or_else(|| PtWalkError::GdbProtocol("bad run length".to_string()))?;
                out.extend(std::iter::repeat_n(previous, count as usize));
            }
            _ => out.push(byte),
        }
    }
    Ok(out)
}

fn decode_hex(text: &[u8]) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(PtWalkError::GdbProtocol(format!(
            "odd length hex data {:?}",
            String::from_utf8_lossy(text)
        )));
    }
    text.chunks(2)
        .map(|pair| -> Result<u8> {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| PtWalkError::GdbProtocol("non-ascii hex data".to_string()))?;
            Ok(u8::from_str_radix(digits, 16)?)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// An in-memory duplex: reads come from `input`, writes go to `output`
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Duplex {
        fn new(input: &[u8]) -> BufReader<Self> {
            BufReader::new(Self {
                input: Cursor::new(input.to_vec()),
                output: Vec::new(),
            })
        }
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    // ==== framing tests ====

    #[test]
    fn frame_appends_checksum() {
        assert_eq!(frame(b"m1000,8"), b"$m1000,8#92".to_vec());
        assert_eq!(frame(b""), b"$#00".to_vec());
    }

    #[test]
    fn decode_run_length() {
        // "0* " is '0' followed by 3 more
        assert_eq!(decode_payload(b"0* ").unwrap(), b"0000".to_vec());
        assert_eq!(decode_payload(b"a}]").unwrap(), b"a}".to_vec());
        assert!(decode_payload(b"*!").is_err());
        assert!(decode_payload(b"ab}").is_err());
    }

    #[test]
    fn decode_hex_pairs() {
        assert_eq!(decode_hex(b"c300").unwrap(), vec![0xC3, 0x00]);
        assert!(matches!(decode_hex(b"c30"), Err(PtWalkError::GdbProtocol(_))));
        assert!(matches!(decode_hex(b"zz"), Err(PtWalkError::ParseIntFailure(_))));
    }

    // ==== exchange tests ====

    #[test]
    fn transact_acks_reply() {
        let reply = frame(b"0320000000000000");
        let mut input = vec![ACK];
        input.extend_from_slice(&reply);
        let mut stream = Duplex::new(&input);

        let payload = transact(&mut stream, b"m1000,8").unwrap();
        assert_eq!(payload, b"0320000000000000".to_vec());

        let mut expected = frame(b"m1000,8");
        expected.push(ACK);
        assert_eq!(stream.get_ref().output, expected);
    }

    #[test]
    fn transact_resends_on_nack() {
        let mut input = vec![NACK, ACK];
        input.extend_from_slice(&frame(b"OK"));
        let mut stream = Duplex::new(&input);

        assert_eq!(transact(&mut stream, b"g").unwrap(), b"OK".to_vec());
        let sent = &stream.get_ref().output;
        // two copies of the request and the final ack
        assert_eq!(sent.len(), frame(b"g").len() * 2 + 1);
    }

    #[test]
    fn receive_nacks_bad_checksum() {
        let mut input = b"$OK#00".to_vec();
        input.extend_from_slice(&frame(b"OK"));
        let mut stream = Duplex::new(&input);

        assert_eq!(receive(&mut stream).unwrap(), b"OK".to_vec());
        assert_eq!(stream.get_ref().output, vec![NACK, ACK]);
    }

    #[test]
    fn receive_truncated_packet() {
        let mut stream = Duplex::new(b"$0300");
        assert!(matches!(
            receive(&mut stream),
            Err(PtWalkError::GdbProtocol(_))
        ));
    }
}
