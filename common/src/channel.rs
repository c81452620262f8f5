use std::{fmt, str::FromStr};

use crate::error::CommandError;

/// One controllable actuator category on the grow cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Light,
    Aerator,
    FanOut,
    FanIn,
    Humidifier,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Self::Light,
        Self::Aerator,
        Self::FanOut,
        Self::FanIn,
        Self::Humidifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Aerator => "aerator",
            Self::FanOut => "fan_out",
            Self::FanIn => "fan_in",
            Self::Humidifier => "humidifier",
        }
    }

    /// Channels that are evaluated but have no driver output yet.
    pub fn is_transmitted(self) -> bool {
        // Humidifier is not wired to the driver board.
        self != Self::Humidifier
    }
}

impl FromStr for Channel {
    type Err = CommandError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "aerator" | "bubbler" => Ok(Self::Aerator),
            "fan_out" | "fan out" => Ok(Self::FanOut),
            "fan_in" | "fan in" => Ok(Self::FanIn),
            "humidifier" => Ok(Self::Humidifier),
            _ => Err(CommandError::InvalidChannel(value.to_string())),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("LIGHT".parse::<Channel>().unwrap(), Channel::Light);
        assert_eq!("Bubbler".parse::<Channel>().unwrap(), Channel::Aerator);
        assert_eq!("fan out".parse::<Channel>().unwrap(), Channel::FanOut);
        assert_eq!("Fan In".parse::<Channel>().unwrap(), Channel::FanIn);
        assert_eq!("fan_in".parse::<Channel>().unwrap(), Channel::FanIn);
    }

    #[test]
    fn rejects_unknown_channel() {
        let err = "sprinkler".parse::<Channel>().unwrap_err();
        assert!(matches!(err, CommandError::InvalidChannel(ref name) if name == "sprinkler"));
    }

    #[test]
    fn canonical_names_round_trip() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
    }

    #[test]
    fn only_humidifier_is_held_back() {
        let held: Vec<_> = Channel::ALL
            .into_iter()
            .filter(|channel| !channel.is_transmitted())
            .collect();
        assert_eq!(held, vec![Channel::Humidifier]);
    }
}
