//! TCP connections that another thread can tear down.
//!
//! # Design
//! ureq parks its calling thread inside blocking socket reads and writes, so
//! a request can only be stopped early by shutting its socket down from
//! outside. `SocketConnector` opens connections itself and files a clone of
//! every stream with a `SocketSwitch` that the request's cancel handle holds.
//! Flipping the switch shuts those streams down, which wakes the blocked
//! worker with an error and sends the peer a FIN. Connections attempted after
//! the switch is flipped fail straight away.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use ureq::unversioned::transport::{
    Buffers, ConnectionDetails, Connector, LazyBuffers, NextTimeout, Transport,
};
use ureq::{Error, Timeout};

#[derive(Debug, Default)]
struct SwitchState {
    streams: Vec<TcpStream>,
    shut_down: bool,
}

/// Shared between one request's connector and its cancel handle.
#[derive(Debug, Default)]
pub struct SocketSwitch {
    state: Mutex<SwitchState>,
}

impl SocketSwitch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Remember `stream` so `shut_down` can reach it. Fails if the switch
    /// was already flipped.
    fn track(&self, stream: &TcpStream) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.shut_down {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "request was cancelled",
            ));
        }
        state.streams.push(stream.try_clone()?);
        Ok(())
    }

    /// Shut down every tracked stream and refuse new ones.
    pub fn shut_down(&self) {
        let streams = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.shut_down = true;
            std::mem::take(&mut state.streams)
        };
        for stream in streams {
            // NotConnected just means the peer got there first.
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!(error = %err, "socket already closed");
            }
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shut_down
    }
}

/// Opens plain TCP connections and registers them with a `SocketSwitch`.
#[derive(Debug)]
pub struct SocketConnector {
    switch: Arc<SocketSwitch>,
}

impl SocketConnector {
    pub fn new(switch: Arc<SocketSwitch>) -> Self {
        Self { switch }
    }
}

impl Connector<()> for SocketConnector {
    type Out = SocketTransport;

    fn connect(
        &self,
        details: &ConnectionDetails,
        _chained: Option<()>,
    ) -> Result<Option<Self::Out>, Error> {
        let stream = connect_any(details)?;
        if details.config.no_delay() {
            stream.set_nodelay(true)?;
        }
        self.switch.track(&stream)?;
        debug!(peer = ?stream.peer_addr().ok(), "connected");

        let config = details.config;
        let buffers = LazyBuffers::new(config.input_buffer_size(), config.output_buffer_size());
        Ok(Some(SocketTransport {
            stream,
            buffers,
            switch: Arc::clone(&self.switch),
        }))
    }
}

/// Try each resolved address in turn; the last failure wins.
fn connect_any(details: &ConnectionDetails) -> Result<TcpStream, Error> {
    let timeout = details.timeout.not_zero().map(|t| *t);
    let mut last_err = None;
    for addr in &details.addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    let err = last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::ConnectionRefused, "no address to connect to")
    });
    Err(io_error(err, Timeout::Connect))
}

fn io_error(err: io::Error, reason: Timeout) -> Error {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout(reason),
        _ => Error::Io(err),
    }
}

pub struct SocketTransport {
    stream: TcpStream,
    buffers: LazyBuffers,
    switch: Arc<SocketSwitch>,
}

impl Transport for SocketTransport {
    fn buffers(&mut self) -> &mut dyn Buffers {
        &mut self.buffers
    }

    fn transmit_output(&mut self, amount: usize, timeout: NextTimeout) -> Result<(), Error> {
        self.stream.set_write_timeout(timeout.not_zero().map(|t| *t))?;
        let output = &self.buffers.output()[..amount];
        self.stream
            .write_all(output)
            .map_err(|err| io_error(err, timeout.reason))
    }

    fn await_input(&mut self, timeout: NextTimeout) -> Result<bool, Error> {
        self.stream.set_read_timeout(timeout.not_zero().map(|t| *t))?;
        let input = self.buffers.input_append_buf();
        let amount = self
            .stream
            .read(input)
            .map_err(|err| io_error(err, timeout.reason))?;
        self.buffers.input_appended(amount);
        Ok(amount > 0)
    }

    fn is_open(&mut self) -> bool {
        !self.switch.is_shut_down() && probe(&self.stream).unwrap_or(false)
    }
}

/// An idle keep-alive socket has nothing to read; anything else means the
/// peer hung up or sent garbage.
fn probe(stream: &TcpStream) -> io::Result<bool> {
    stream.set_nonblocking(true)?;
    let mut buf = [0];
    let open = matches!(
        stream.peek(&mut buf),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock
    );
    stream.set_nonblocking(false)?;
    Ok(open)
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("peer", &self.stream.peer_addr().ok())
            .finish()
    }
}
