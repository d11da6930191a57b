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

//! An in-process GDB remote stub that serves `m` (read memory) packets
//! from a table fixture, standing in for e.g. QEMU's gdbstub.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};

use crate::tables::TableFixture;

/// QEMU's reply to a read of unmapped memory
pub const EFAULT: u8 = 0x14;

/// Memory served by the stub
#[derive(Clone, Debug, Default)]
pub struct StubMemory {
    start: u64,
    image: Vec<u8>,
    errors: HashMap<u64, u8>,
}

impl StubMemory {
    /// Serve `fixture`'s tables laid out from physical address
    /// `phys_base`, visible to the debugger at `phys_base + offset`
    /// (0 for a stub in physical memory mode, the linear map base
    /// otherwise).
    pub fn from_fixture(fixture: &TableFixture, phys_base: u64, offset: u64) -> Self {
        Self {
            start: phys_base.wrapping_add(offset),
            image: fixture.to_image(phys_base),
            errors: HashMap::new(),
        }
    }

    /// Reply `E{code}` to reads at `address`
    pub fn fail_at(mut self, address: u64, code: u8) -> Self {
        self.errors.insert(address, code);
        self
    }

    fn read(&self, address: u64, len: u64) -> String {
        if let Some(code) = self.errors.get(&address) {
            return format!("E{code:02x}");
        }
        let Some(offset) = address.checked_sub(self.start) else {
            return format!("E{EFAULT:02x}");
        };
        let end = offset.saturating_add(len);
        if end > self.image.len() as u64 {
            return format!("E{EFAULT:02x}");
        }
        self.image[offset as usize..end as usize]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// A stub listening on a local port, serving one connection
pub struct GdbStub {
    address: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl GdbStub {
    pub fn spawn(memory: StubMemory) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let address = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                // the client going away ends the session
                let _ = serve(stream, &memory, &seen);
            }
        });
        Ok(Self {
            address,
            requests,
            handle: Some(handle),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Every packet payload received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Wait for the client to disconnect
    pub fn join(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.requests()
    }
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

fn serve(stream: TcpStream, memory: &StubMemory, log: &Mutex<Vec<String>>) -> Result<()> {
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    loop {
        let mut byte = [0u8; 1];
        if reader.read(&mut byte)? == 0 {
            return Ok(());
        }
        if byte[0] != b'$' {
            // acknowledgements and interrupts
            continue;
        }
        let mut body = Vec::new();
        reader.read_until(b'#', &mut body)?;
        if body.pop() != Some(b'#') {
            return Err(anyhow!("connection closed inside a packet"));
        }
        let mut sum = [0u8; 2];
        reader.read_exact(&mut sum)?;
        if u8::from_str_radix(std::str::from_utf8(&sum)?, 16)? != checksum(&body) {
            writer.write_all(b"-")?;
            continue;
        }
        writer.write_all(b"+")?;

        let payload = String::from_utf8(body)?;
        let reply = match payload.strip_prefix('m') {
            Some(args) => {
                let (addr, len) = args
                    .split_once(',')
                    .ok_or_else(|| anyhow!("bad m packet {payload:?}"))?;
                memory.read(
                    u64::from_str_radix(addr, 16)?,
                    u64::from_str_radix(len, 16)?,
                )
            }
            None => String::new(),
        };
        if let Ok(mut requests) = log.lock() {
            requests.push(payload);
        }
        write!(writer, "${reply}#{:02x}", checksum(reply.as_bytes()))?;
        writer.flush()?;
    }
}
