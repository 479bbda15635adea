//! Types shared between the engine, the coprocessor interfaces and the service layer.

use crate::error::FheError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// Decode a `0x`-prefixed (or bare) hex string into exactly `N` bytes.
fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], FheError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| FheError::Encoding(format!("invalid hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| FheError::Encoding(format!("expected {N} bytes, got {}", b.len())))
}

/// Implements `Display`/`FromStr` as `0x` hex and serde as that same string,
/// so the type can be used as a JSON map key.
macro_rules! hex_newtype {
    ($name:ident, $len:expr) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({self})", stringify!($name))
            }
        }

        impl FromStr for $name {
            type Err = FheError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_fixed::<$len>(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A 20-byte account address (user, engine or any other principal).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

hex_newtype!(Address, 20);

/// An opaque 32-byte reference to a ciphertext held by the coprocessor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(pub [u8; 32]);

hex_newtype!(Handle, 32);

impl Handle {
    /// The "never written" sentinel. Distinct from any encryption of zero.
    pub const UNSET: Handle = Handle([0u8; 32]);

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

/// Encrypted 32-bit unsigned integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Euint32(pub Handle);

/// Encrypted boolean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ebool(pub Handle);

impl Euint32 {
    pub fn handle(&self) -> Handle {
        self.0
    }
}

impl Ebool {
    pub fn handle(&self) -> Handle {
        self.0
    }
}

/// Handle of a possibly-unset encrypted value, mapping "never written" to the sentinel.
pub fn handle_or_unset(value: Option<Euint32>) -> Handle {
    value.map(|v| v.0).unwrap_or(Handle::UNSET)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Steps,
    Minutes,
    Calories,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::Steps, Metric::Minutes, Metric::Calories];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Steps => "steps",
            Metric::Minutes => "minutes",
            Metric::Calories => "calories",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = FheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "steps" => Ok(Metric::Steps),
            "minutes" => Ok(Metric::Minutes),
            "calories" => Ok(Metric::Calories),
            other => Err(FheError::Encoding(format!("unknown metric '{other}'"))),
        }
    }
}

/// One value per tracked metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTriple<T> {
    pub steps: T,
    pub minutes: T,
    pub calories: T,
}

impl<T> MetricTriple<T> {
    pub fn new(steps: T, minutes: T, calories: T) -> Self {
        Self { steps, minutes, calories }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> MetricTriple<U> {
        MetricTriple {
            steps: f(self.steps),
            minutes: f(self.minutes),
            calories: f(self.calories),
        }
    }

    /// Like `map`, but the closure also receives the metric and may fail.
    pub fn try_map_with<U, E>(self, mut f: impl FnMut(Metric, T) -> Result<U, E>) -> Result<MetricTriple<U>, E> {
        Ok(MetricTriple {
            steps: f(Metric::Steps, self.steps)?,
            minutes: f(Metric::Minutes, self.minutes)?,
            calories: f(Metric::Calories, self.calories)?,
        })
    }

    pub fn to_array(self) -> [T; 3] {
        [self.steps, self.minutes, self.calories]
    }

    pub fn as_ref(&self) -> MetricTriple<&T> {
        MetricTriple {
            steps: &self.steps,
            minutes: &self.minutes,
            calories: &self.calories,
        }
    }
}

impl<T> Index<Metric> for MetricTriple<T> {
    type Output = T;

    fn index(&self, metric: Metric) -> &T {
        match metric {
            Metric::Steps => &self.steps,
            Metric::Minutes => &self.minutes,
            Metric::Calories => &self.calories,
        }
    }
}

impl<T> IndexMut<Metric> for MetricTriple<T> {
    fn index_mut(&mut self, metric: Metric) -> &mut T {
        match metric {
            Metric::Steps => &mut self.steps,
            Metric::Minutes => &mut self.minutes,
            Metric::Calories => &mut self.calories,
        }
    }
}

/// A client-encrypted value together with its validity proof.
///
/// The proof is opaque to the engine; only the coprocessor interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedInput {
    pub handle: Handle,
    pub proof: Vec<u8>,
}

/// The three encrypted metrics of one activity submission.
pub type ActivitySubmission = MetricTriple<EncryptedInput>;
