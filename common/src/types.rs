use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::rgb(0, 0, 0);
    pub const GREEN: Self = Self::rgb(0, 255, 0);
    pub const YELLOW: Self = Self::rgb(255, 160, 0);
    pub const RED: Self = Self::rgb(255, 0, 0);
    pub const MAGENTA: Self = Self::rgb(255, 0, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(self) -> bool {
        self == Self::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// The attendee response recorded on a calendar event. Events the user
/// organizes carry no response and count as accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStatus {
    #[default]
    Accepted,
    Tentative,
    NeedsAction,
    Declined,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Tentative => "tentative",
            Self::NeedsAction => "needsAction",
            Self::Declined => "declined",
        }
    }
}

/// Which events count toward the indicator, based on the user's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseState {
    All,
    Accepted,
    #[default]
    NotRejected,
}

impl ResponseState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Accepted => "accepted",
            Self::NotRejected => "notRejected",
        }
    }

    pub fn matches(self, status: ResponseStatus) -> bool {
        match self {
            Self::All => true,
            Self::Accepted => status == ResponseStatus::Accepted,
            Self::NotRejected => status != ResponseStatus::Declined,
        }
    }
}

impl FromStr for ResponseState {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "all" => Ok(Self::All),
            "accepted" => Ok(Self::Accepted),
            "notRejected" => Ok(Self::NotRejected),
            other => Err(ConfigError::InvalidResponseState(other.to_string())),
        }
    }
}

/// Which of two disagreeing events leads a combined flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashSide {
    #[default]
    First,
    Second,
}

impl FlashSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }
}
