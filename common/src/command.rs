use std::{fmt, str::FromStr};

use tracing::info;

use crate::{
    error::CommandError,
    profile::{decode_profile_map, encode_persisted, ProfileKind},
    state::{ControllerState, GrowLightColor, KEY_GROW_LIGHT_COLOR, KEY_PROFILE, KEY_RUN_PROFILE},
    storage::{save_json, Storage},
};

const DELIMITER: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    SetPointsProfile,
    SetFunctionProfile,
    SetGrowLightColor,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::SetPointsProfile => "POINTS_PROFILE",
            Self::SetFunctionProfile => "FUNC_PROFILE",
            Self::SetGrowLightColor => "GROW_LIGHT_COLOR",
        }
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "POINTS_PROFILE" => Ok(Self::SetPointsProfile),
            "FUNC_PROFILE" => Ok(Self::SetFunctionProfile),
            "GROW_LIGHT_COLOR" => Ok(Self::SetGrowLightColor),
            _ => Err(CommandError::InvalidCommand(value.to_string())),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `<DISCRIMINATOR>[:<PAYLOAD>]` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub payload: Option<String>,
}

impl Command {
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        let (discriminator, payload) = match input.split_once(DELIMITER) {
            Some((discriminator, payload)) => (discriminator, Some(payload.to_string())),
            None => (input, None),
        };

        Ok(Self {
            kind: discriminator.parse()?,
            payload,
        })
    }

    fn require_payload(&self) -> Result<&str, CommandError> {
        self.payload
            .as_deref()
            .filter(|payload| !payload.trim().is_empty())
            .ok_or(CommandError::MissingPayload(self.kind.as_str()))
    }

    /// Applies the command to `state` and persists the records it touched.
    ///
    /// Payloads are fully decoded before `state` is touched, so a rejected
    /// command leaves the state exactly as it was.
    pub fn apply(
        &self,
        state: &mut ControllerState,
        storage: &mut dyn Storage,
    ) -> Result<(), CommandError> {
        match self.kind {
            CommandKind::Start | CommandKind::Stop => {
                state.running = self.kind == CommandKind::Start;
                info!("profile execution {}", if state.running { "started" } else { "stopped" });
                persist(storage, KEY_RUN_PROFILE, &state.running)
            }
            CommandKind::SetPointsProfile => {
                self.replace_profiles(ProfileKind::Points, state, storage)
            }
            CommandKind::SetFunctionProfile => {
                self.replace_profiles(ProfileKind::Function, state, storage)
            }
            CommandKind::SetGrowLightColor => {
                let color = self.require_payload()?.parse::<GrowLightColor>()?;
                state.grow_light_color = color;
                info!("grow light color set to {color}");
                persist(storage, KEY_GROW_LIGHT_COLOR, &color)
            }
        }
    }

    /// The decoded payload becomes the whole schedule; channels it does not
    /// name are dropped.
    fn replace_profiles(
        &self,
        kind: ProfileKind,
        state: &mut ControllerState,
        storage: &mut dyn Storage,
    ) -> Result<(), CommandError> {
        let profiles = decode_profile_map(kind, self.require_payload()?)?;
        for channel in profiles.keys() {
            info!("channel {channel} now follows a {} profile", kind.as_str());
        }
        state.profiles = profiles;
        persist(storage, KEY_PROFILE, &encode_persisted(&state.profiles))
    }
}

fn persist<T: serde::Serialize + ?Sized>(
    storage: &mut dyn Storage,
    key: &'static str,
    value: &T,
) -> Result<(), CommandError> {
    save_json(storage, key, value).map_err(|source| CommandError::Persist { key, source })
}
