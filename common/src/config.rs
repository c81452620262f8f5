use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub main_loop_delay_ms: u64,
    pub profile_check_interval_ms: u64,
    pub reassembly_timeout_ms: u64,
    pub max_message_bytes: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            main_loop_delay_ms: 10,
            profile_check_interval_ms: 10_000,
            reassembly_timeout_ms: 1_000,
            max_message_bytes: 4_096,
        }
    }
}

impl LoopConfig {
    pub fn main_loop_delay(&self) -> Duration {
        Duration::from_millis(self.main_loop_delay_ms)
    }

    pub fn profile_check_interval(&self) -> Duration {
        Duration::from_millis(self.profile_check_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }

    pub fn sanitize(&mut self) {
        self.main_loop_delay_ms = self.main_loop_delay_ms.clamp(1, 1_000);
        self.profile_check_interval_ms = self.profile_check_interval_ms.max(1_000);
        self.reassembly_timeout_ms = self.reassembly_timeout_ms.clamp(50, 60_000);
        self.max_message_bytes = self.max_message_bytes.clamp(64, 65_536);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path of the driver link; `None` logs records instead of sending.
    pub path: Option<String>,
    pub baud_rate: u32,
    pub response_timeout_ms: u64,
    pub read_buffer_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: None,
            baud_rate: 115_200,
            response_timeout_ms: 100,
            read_buffer_bytes: 100,
        }
    }
}

impl SerialConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn sanitize(&mut self) {
        if self.baud_rate == 0 {
            self.baud_rate = 115_200;
        }
        self.response_timeout_ms = self.response_timeout_ms.min(5_000);
        self.read_buffer_bytes = self.read_buffer_bytes.clamp(1, 4_096);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WirelessConfig {
    pub enabled: bool,
    pub bind_addr: String,
    pub max_chunk_bytes: usize,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:4210".to_string(),
            max_chunk_bytes: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(rename = "loop")]
    pub control: LoopConfig,
    pub serial: SerialConfig,
    pub wireless: WirelessConfig,
    pub http: HttpConfig,
    pub data_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            control: LoopConfig::default(),
            serial: SerialConfig::default(),
            wireless: WirelessConfig::default(),
            http: HttpConfig::default(),
            data_dir: "./.hydro".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.control.sanitize();
        self.serial.sanitize();
        self.wireless.max_chunk_bytes = self.wireless.max_chunk_bytes.clamp(20, 4_096);
        if self.http.port == 0 {
            self.http.port = 80;
        }
    }
}
