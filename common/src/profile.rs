use std::{collections::BTreeMap, f64::consts::PI};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{channel::Channel, error::CommandError};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// The active schedule: one profile per channel.
pub type ProfileMap = BTreeMap<Channel, Profile>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Points,
    Function,
}

impl ProfileKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Function => "function",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Profile {
    Points(PointsProfile),
    Function(FunctionProfile),
}

impl Profile {
    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::Points(_) => ProfileKind::Points,
            Self::Function(_) => ProfileKind::Function,
        }
    }

    /// Actuation value at `t` seconds since the start of the day.
    pub fn evaluate(&self, t: f64) -> f64 {
        match self {
            Self::Points(profile) => profile.evaluate(t),
            Self::Function(profile) => profile.evaluate(t),
        }
    }

    pub fn decode(kind: ProfileKind, raw: &Value) -> Result<Self, CommandError> {
        match kind {
            ProfileKind::Points => PointsProfile::from_value(raw).map(Self::Points),
            ProfileKind::Function => FunctionProfile::from_value(raw).map(Self::Function),
        }
    }

    pub fn encode(&self) -> Value {
        match self {
            Self::Points(profile) => profile.to_value(),
            Self::Function(profile) => profile.to_value(),
        }
    }
}

/// Piecewise schedule sampled at explicit times of day.
///
/// Times and values are stored as parallel columns sorted by time so the
/// lookup can binary search the time axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsProfile {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl PointsProfile {
    pub fn new(mut points: Vec<(f64, f64)>) -> Result<Self, CommandError> {
        for &(time, value) in &points {
            if !time.is_finite() || !value.is_finite() {
                return Err(CommandError::InvalidProfile(format!(
                    "point [{time}, {value}] is not a pair of finite numbers"
                )));
            }
            if time < 0.0 || value < 0.0 {
                return Err(CommandError::InvalidProfile(format!(
                    "point [{time}, {value}] is not a pair of non-negative numbers"
                )));
            }
        }

        points.sort_by(|left, right| left.0.total_cmp(&right.0));
        let (times, values) = points.into_iter().unzip();
        Ok(Self { times, values })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.times.iter().copied().zip(self.values.iter().copied())
    }

    /// Value of the point nearest to `t`, or 0.0 for an empty profile.
    ///
    /// The time axis is linear seconds-of-day; there is no wraparound
    /// between the last point of the day and the first.
    pub fn evaluate(&self, t: f64) -> f64 {
        nearest_index(&self.times, t)
            .map(|index| self.values[index])
            .unwrap_or(0.0)
    }

    /// Decodes `[[time, value], ...]`.
    pub fn from_value(raw: &Value) -> Result<Self, CommandError> {
        let Value::Array(items) = raw else {
            return Err(CommandError::InvalidProfile(format!(
                "points profile must be a list of [time, value] pairs, got {raw}"
            )));
        };

        let mut points = Vec::with_capacity(items.len());
        for item in items {
            let pair = match item {
                Value::Array(pair) if pair.len() == 2 => pair,
                _ => {
                    return Err(CommandError::InvalidProfile(format!(
                        "profile item {item} is not a pair"
                    )))
                }
            };
            let (Some(time), Some(value)) = (pair[0].as_f64(), pair[1].as_f64()) else {
                return Err(CommandError::InvalidProfile(format!(
                    "profile item {item} is not a pair of numbers"
                )));
            };
            points.push((time, value));
        }

        Self::new(points)
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.points()
                .map(|(time, value)| json!([time, value]))
                .collect(),
        )
    }
}

/// Index of the element of `sorted` closest to `x`; ties go to the lower index.
pub fn nearest_index(sorted: &[f64], x: f64) -> Option<usize> {
    if sorted.is_empty() {
        return None;
    }

    let pos = sorted.partition_point(|&time| time < x);
    let candidate = if pos == 0 {
        0
    } else if pos == sorted.len() {
        sorted.len() - 1
    } else {
        let before = (sorted[pos - 1] - x).abs();
        let after = (sorted[pos] - x).abs();
        if before <= after {
            pos - 1
        } else {
            pos
        }
    };

    // Duplicate times: the first of the run wins.
    let time = sorted[candidate];
    Some(sorted.partition_point(|&other| other < time))
}

/// Parametric day curve with `n` bell-shaped peaks per 24 hours.
///
/// `a` scales the peak height, `b` the peak width, `c` shifts the curve in
/// hours and `k` sharpens the flanks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionProfile {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub k: f64,
    pub n: u32,
}

impl FunctionProfile {
    pub fn new(a: f64, b: f64, c: f64, k: f64, n: u32) -> Result<Self, CommandError> {
        for (name, param) in [("a", a), ("b", b), ("c", c), ("k", k)] {
            if !param.is_finite() {
                return Err(CommandError::InvalidProfile(format!(
                    "parameter {name} must be finite, got {param}"
                )));
            }
        }
        if b == 0.0 {
            return Err(CommandError::InvalidProfile(
                "parameter b must be non-zero".to_string(),
            ));
        }
        Ok(Self { a, b, c, k, n })
    }

    pub fn evaluate(&self, t: f64) -> f64 {
        // Seconds of day onto [-12, 12] hours.
        let x = t / SECONDS_PER_DAY * 24.0 - 12.0;
        let frequency = f64::from(self.n) / 48.0;
        let theta = 2.0 * PI * frequency * (x - self.c);
        let term = theta.sin() / self.b;
        let envelope = (-term.abs().powf(self.k)).exp();
        (self.a * envelope).max(0.0)
    }

    /// Decodes `{"a": "..", "b": "..", "c": "..", "k": "..", "n": ".."}`.
    ///
    /// Fields may be numeric strings or plain JSON numbers.
    pub fn from_value(raw: &Value) -> Result<Self, CommandError> {
        let Value::Object(fields) = raw else {
            return Err(CommandError::InvalidProfile(format!(
                "function profile must be an object with fields a, b, c, k, n, got {raw}"
            )));
        };

        Self::new(
            real_field(fields, "a")?,
            real_field(fields, "b")?,
            real_field(fields, "c")?,
            real_field(fields, "k")?,
            count_field(fields, "n")?,
        )
    }

    pub fn to_value(&self) -> Value {
        json!({
            "a": self.a.to_string(),
            "b": self.b.to_string(),
            "c": self.c.to_string(),
            "k": self.k.to_string(),
            "n": self.n.to_string(),
        })
    }
}

fn real_field(fields: &Map<String, Value>, name: &str) -> Result<f64, CommandError> {
    let parsed = match fields.get(name) {
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        Some(Value::Number(number)) => number.as_f64(),
        Some(_) => None,
        None => {
            return Err(CommandError::InvalidProfile(format!(
                "function profile is missing field {name}"
            )))
        }
    };
    parsed.ok_or_else(|| {
        CommandError::InvalidProfile(format!("field {name} is not a real number"))
    })
}

fn count_field(fields: &Map<String, Value>, name: &str) -> Result<u32, CommandError> {
    let parsed = match fields.get(name) {
        Some(Value::String(text)) => text.trim().parse::<u32>().ok(),
        Some(Value::Number(number)) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(_) => None,
        None => {
            return Err(CommandError::InvalidProfile(format!(
                "function profile is missing field {name}"
            )))
        }
    };
    parsed.ok_or_else(|| {
        CommandError::InvalidProfile(format!("field {name} is not a non-negative integer"))
    })
}

/// Decodes a command payload keyed by channel name.
///
/// Every entry is decoded before anything is returned, so one bad entry
/// rejects the whole payload.
pub fn decode_profile_map(kind: ProfileKind, payload: &str) -> Result<ProfileMap, CommandError> {
    let raw: Value = serde_json::from_str(payload)
        .map_err(|err| CommandError::InvalidProfile(format!("payload is not JSON: {err}")))?;
    let Value::Object(entries) = raw else {
        return Err(CommandError::InvalidProfile(
            "payload must be an object keyed by channel".to_string(),
        ));
    };

    let mut profiles = ProfileMap::new();
    for (name, entry) in &entries {
        let channel = name.parse::<Channel>()?;
        profiles.insert(channel, Profile::decode(kind, entry)?);
    }
    Ok(profiles)
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedProfile {
    kind: ProfileKind,
    data: Value,
}

/// Storage form of a profile map, each entry tagged with its kind.
pub fn encode_persisted(profiles: &ProfileMap) -> Value {
    let entries: BTreeMap<&str, PersistedProfile> = profiles
        .iter()
        .map(|(channel, profile)| {
            (
                channel.as_str(),
                PersistedProfile {
                    kind: profile.kind(),
                    data: profile.encode(),
                },
            )
        })
        .collect();
    json!(entries)
}

pub fn decode_persisted(raw: Value) -> Result<ProfileMap, CommandError> {
    let entries: BTreeMap<String, PersistedProfile> = serde_json::from_value(raw)
        .map_err(|err| CommandError::InvalidProfile(format!("stored profile map: {err}")))?;

    let mut profiles = ProfileMap::new();
    for (name, entry) in entries {
        let channel = name.parse::<Channel>()?;
        profiles.insert(channel, Profile::decode(entry.kind, &entry.data)?);
    }
    Ok(profiles)
}
