use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    net::{SocketAddr, UdpSocket},
    path::PathBuf,
};

use tokio::sync::mpsc;
use tokio_serial::{ClearBuffer, SerialPort};
use tracing::{info, warn};

use hydro_common::{
    CommandInbox, HttpCommand, SerialConfig, SerialLink, Storage, StoreError, WirelessLink,
};

/// One JSON file per record under the data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStore {
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let path = self.path(key);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, value)?;
        fs::rename(&staging, &path)?;
        info!("saved {key} to {}", path.display());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path(key)) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Link towards the motor/light driver board.
pub enum DriverLink {
    Serial(Box<dyn SerialPort>),
    /// No port configured: records are only logged.
    Logging,
}

impl DriverLink {
    pub fn open(config: &SerialConfig) -> Result<Self, tokio_serial::Error> {
        let Some(path) = config.path.as_deref() else {
            warn!("no serial port configured, driver records will only be logged");
            return Ok(Self::Logging);
        };

        let port = tokio_serial::new(path, config.baud_rate)
            .timeout(config.response_timeout())
            .open()?;
        info!("driver link open on {path} at {} baud", config.baud_rate);
        Ok(Self::Serial(port))
    }
}

impl SerialLink for DriverLink {
    fn clear_input(&mut self) -> io::Result<()> {
        match self {
            Self::Serial(port) => port.clear(ClearBuffer::Input).map_err(io::Error::from),
            Self::Logging => Ok(()),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Self::Serial(port) => {
                port.write_all(bytes)?;
                port.flush()
            }
            Self::Logging => Ok(()),
        }
    }

    fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let Self::Serial(port) = self else {
            return Ok(Vec::new());
        };

        let available = (port.bytes_to_read()? as usize).min(max);
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0; available];
        match port.read(&mut buf) {
            Ok(read) => {
                buf.truncate(read);
                Ok(buf)
            }
            Err(err) if err.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

/// Datagram stand-in for the BLE write characteristic: every datagram is one
/// fragment, replies go back to the most recent sender.
pub struct UdpWireless {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpWireless {
    pub fn bind(addr: &str, max_chunk_bytes: usize) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            peer: None,
            buf: vec![0; max_chunk_bytes],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl WirelessLink for UdpWireless {
    fn poll_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((size, peer)) => {
                self.peer = Some(peer);
                Ok(Some(self.buf[..size].to_vec()))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        let Some(peer) = self.peer else {
            warn!("dropping wireless reply, no peer has written yet");
            return Ok(());
        };
        self.socket.send_to(payload, peer).map(|_| ())
    }
}

/// Receiving end of the queue the HTTP handlers push into.
pub struct ChannelInbox {
    rx: mpsc::UnboundedReceiver<HttpCommand>,
}

impl ChannelInbox {
    pub fn new(rx: mpsc::UnboundedReceiver<HttpCommand>) -> Self {
        Self { rx }
    }
}

impl CommandInbox for ChannelInbox {
    fn try_next(&mut self) -> Option<HttpCommand> {
        self.rx.try_recv().ok()
    }
}
