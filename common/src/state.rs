use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    error::CommandError,
    profile::{decode_persisted, ProfileMap},
    storage::{load_or, Storage},
};

pub const KEY_RUN_PROFILE: &str = "run_profile_bool";
pub const KEY_GROW_LIGHT_COLOR: &str = "grow_light_color";
pub const KEY_PROFILE: &str = "profile";

/// Base color of the grow light; the light channel's intensity scales it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 3]", into = "[u32; 3]")]
pub struct GrowLightColor {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl GrowLightColor {
    pub const fn new(red: u32, green: u32, blue: u32) -> Self {
        Self { red, green, blue }
    }

    /// Component-wise `color * factor`, truncated toward zero.
    pub fn scaled(self, factor: f64) -> [u32; 3] {
        [self.red, self.green, self.blue].map(|component| (f64::from(component) * factor) as u32)
    }
}

impl Default for GrowLightColor {
    fn default() -> Self {
        Self::new(225, 225, 225)
    }
}

impl From<[u32; 3]> for GrowLightColor {
    fn from([red, green, blue]: [u32; 3]) -> Self {
        Self::new(red, green, blue)
    }
}

impl From<GrowLightColor> for [u32; 3] {
    fn from(color: GrowLightColor) -> Self {
        [color.red, color.green, color.blue]
    }
}

impl FromStr for GrowLightColor {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let components = value
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| CommandError::InvalidColor(value.to_string()))?;

        match components.as_slice() {
            &[red, green, blue] => Ok(Self::new(red, green, blue)),
            _ => Err(CommandError::InvalidColor(value.to_string())),
        }
    }
}

impl fmt::Display for GrowLightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.red, self.green, self.blue)
    }
}

/// Process-wide controller state, owned by the scheduler loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub running: bool,
    pub grow_light_color: GrowLightColor,
    pub profiles: ProfileMap,
}

impl ControllerState {
    /// Restores every persisted record, defaulting the ones that are missing.
    pub fn load(storage: &dyn Storage) -> Self {
        let running = load_or(storage, KEY_RUN_PROFILE, false);
        let grow_light_color = load_or(storage, KEY_GROW_LIGHT_COLOR, GrowLightColor::default());

        let profiles = match load_or(storage, KEY_PROFILE, Value::Null) {
            Value::Null => ProfileMap::new(),
            raw => decode_persisted(raw).unwrap_or_else(|err| {
                warn!("failed to restore profile map, starting empty: {err}");
                ProfileMap::new()
            }),
        };

        Self {
            running,
            grow_light_color,
            profiles,
        }
    }
}
