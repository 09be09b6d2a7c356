use crate::{
    error::{BlinkerError, DeviceError},
    pattern::Pattern,
    types::Color,
};

/// The physical indicator. Implementations must tolerate being closed and
/// reopened any number of times.
pub trait Light: Send {
    fn open(&mut self) -> Result<(), DeviceError>;
    fn set_color(&mut self, color: Color) -> Result<(), DeviceError>;
    fn close(&mut self);
}

#[derive(Debug, PartialEq)]
pub enum RenderOutcome {
    Unchanged,
    Written(Color),
    Failed { error: DeviceError, remaining: u32 },
}

/// Sole owner of the light. Every device write goes through
/// [`BlinkerState::render_once`].
#[derive(Debug)]
pub struct BlinkerState<L> {
    light: L,
    pattern: Pattern,
    phase_start_ms: Option<u64>,
    shown: Option<Color>,
    retries: u32,
    remaining: u32,
    needs_open: bool,
}

impl<L: Light> BlinkerState<L> {
    /// The light is opened lazily on the first render, so an initial open
    /// failure is charged to the same budget as a failed write.
    pub fn new(light: L, retries: u32) -> Self {
        Self {
            light,
            pattern: Pattern::BLACK,
            phase_start_ms: None,
            shown: None,
            retries,
            remaining: retries,
            needs_open: true,
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn shown(&self) -> Option<Color> {
        self.shown
    }

    pub fn remaining_retries(&self) -> u32 {
        self.remaining
    }

    pub fn light(&self) -> &L {
        &self.light
    }

    pub fn set_pattern(&mut self, pattern: Pattern) -> bool {
        if self.pattern == pattern {
            return false;
        }
        self.pattern = pattern;
        self.phase_start_ms = None;
        true
    }

    pub fn turn_off(&mut self) -> bool {
        self.set_pattern(Pattern::BLACK)
    }

    pub fn render_once(&mut self, now_ms: u64) -> Result<RenderOutcome, BlinkerError> {
        let start = *self.phase_start_ms.get_or_insert(now_ms);
        let color = self.pattern.color_at(now_ms.saturating_sub(start));

        if self.shown == Some(color) {
            return Ok(RenderOutcome::Unchanged);
        }

        match self.write(color) {
            Ok(()) => {
                self.shown = Some(color);
                self.remaining = self.retries;
                Ok(RenderOutcome::Written(color))
            }
            Err(error) => {
                self.shown = None;
                self.remaining = self.remaining.saturating_sub(1);
                if self.remaining == 0 {
                    return Err(BlinkerError::RetriesExhausted {
                        retries: self.retries,
                        source: error,
                    });
                }
                if !self.needs_open {
                    self.light.close();
                    self.needs_open = true;
                }
                Ok(RenderOutcome::Failed {
                    error,
                    remaining: self.remaining,
                })
            }
        }
    }

    /// Switches to black and writes it before returning. Failed writes are
    /// retried until black is shown or the budget runs out.
    pub fn turn_off_now(&mut self, now_ms: u64) -> Result<RenderOutcome, BlinkerError> {
        self.turn_off();
        loop {
            match self.render_once(now_ms)? {
                RenderOutcome::Failed { .. } => continue,
                done => return Ok(done),
            }
        }
    }

    pub fn close(&mut self) {
        if !self.needs_open {
            self.light.close();
            self.needs_open = true;
        }
        self.shown = None;
    }

    fn write(&mut self, color: Color) -> Result<(), DeviceError> {
        if self.needs_open {
            self.light.open()?;
            self.needs_open = false;
        }
        self.light.set_color(color)
    }
}
