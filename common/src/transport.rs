use std::{io, thread, time::Duration};

use serde::Serialize;
use tracing::{debug, info};

use crate::{channel::Channel, state::GrowLightColor};

/// Byte-level access to the serial link towards the motor/light driver.
pub trait SerialLink {
    /// Drops any bytes still waiting in the receive buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Returns whatever has arrived, at most `max` bytes. Never blocks for
    /// longer than the link's own read timeout; no data is an empty vec.
    fn read_available(&mut self, max: usize) -> io::Result<Vec<u8>>;
}

/// One line on the driver link: `{"channel":"<name>","value":"<value>"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActuatorRecord {
    pub channel: &'static str,
    pub value: String,
}

impl ActuatorRecord {
    /// The light channel carries the grow light color scaled by `value`;
    /// every other channel carries `value` itself.
    pub fn new(channel: Channel, value: f64, color: GrowLightColor) -> Self {
        let value = match channel {
            Channel::Light => {
                let [red, green, blue] = color.scaled(value);
                format!("{red},{green},{blue}")
            }
            _ => format!("{value:?}"),
        };

        Self {
            channel: channel.as_str(),
            value,
        }
    }

    pub fn to_line(&self) -> io::Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self).map_err(io::Error::other)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Whatever the driver sent back inside the settle window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub bytes: Vec<u8>,
}

impl Response {
    pub fn is_acknowledged(&self) -> bool {
        !self.bytes.is_empty()
    }
}

pub struct TransportAdapter<L> {
    link: L,
    settle: Duration,
    read_buffer_bytes: usize,
}

impl<L: SerialLink> TransportAdapter<L> {
    pub fn new(link: L, settle: Duration, read_buffer_bytes: usize) -> Self {
        Self {
            link,
            settle,
            read_buffer_bytes,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Sends one actuation record and collects the reply, if any.
    ///
    /// Blocks for the configured settle time; a missing reply is not an error.
    pub fn transmit(
        &mut self,
        channel: Channel,
        value: f64,
        color: GrowLightColor,
    ) -> io::Result<Response> {
        let line = ActuatorRecord::new(channel, value, color).to_line()?;

        self.link.clear_input()?;
        self.link.write_all(&line)?;
        info!(
            "transmitted to driver: {}",
            String::from_utf8_lossy(&line).trim_end()
        );

        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }

        let bytes = self.link.read_available(self.read_buffer_bytes)?;
        let response = Response { bytes };
        if response.is_acknowledged() {
            info!(
                "driver replied: {}",
                String::from_utf8_lossy(&response.bytes).trim_end()
            );
        } else {
            debug!("no acknowledgment from driver for {channel}");
        }
        Ok(response)
    }
}
