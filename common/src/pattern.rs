//! What the light should be doing.
//!
//! A [`Pattern`] is plain data. Executing it only records it as the desired
//! state of a [`BlinkerState`]; the pattern runner turns it into device writes.

use std::borrow::Cow;

use crate::{
    blinker::{BlinkerState, Light},
    types::Color,
};

pub const FLASH_STEP_MS: u64 = 500;
pub const COMBINED_STEP_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Solid(Color),
    Flash {
        colors: Cow<'static, [Color]>,
        step_ms: u64,
    },
}

impl Pattern {
    pub const BLACK: Self = Self::Solid(Color::BLACK);
    pub const FREE: Self = Self::Solid(Color::GREEN);
    pub const SOON: Self = Self::Solid(Color::YELLOW);
    pub const BUSY: Self = Self::Solid(Color::RED);
    pub const IMMINENT: Self = Self::Flash {
        colors: Cow::Borrowed(&[Color::YELLOW, Color::BLACK]),
        step_ms: FLASH_STEP_MS,
    };
    pub const ERROR: Self = Self::Flash {
        colors: Cow::Borrowed(&[Color::MAGENTA, Color::BLACK]),
        step_ms: FLASH_STEP_MS,
    };

    pub fn flash(colors: Vec<Color>, step_ms: u64) -> Self {
        Self::Flash {
            colors: Cow::Owned(colors),
            step_ms,
        }
    }

    /// Hands this pattern to `target` as its desired state. No device I/O
    /// happens here.
    pub fn execute<L: Light>(self, target: &mut BlinkerState<L>) {
        target.set_pattern(self);
    }

    /// Color to show `elapsed_ms` after the pattern became active.
    pub fn color_at(&self, elapsed_ms: u64) -> Color {
        match self {
            Self::Solid(color) => *color,
            Self::Flash { colors, step_ms } => {
                if colors.is_empty() {
                    return Color::BLACK;
                }
                let step = elapsed_ms / (*step_ms).max(1);
                colors[(step % colors.len() as u64) as usize]
            }
        }
    }

    /// The first color the pattern shows.
    pub fn lead_color(&self) -> Color {
        self.color_at(0)
    }
}
