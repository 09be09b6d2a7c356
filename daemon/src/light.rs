use tracing::{debug, info};

use calblink_common::{Color, DeviceError, Light};

/// Stand-in for the USB light: reports every color change through tracing.
/// A hardware driver plugs in by implementing [`Light`] the same way.
#[derive(Debug, Default)]
pub struct TraceLight {
    opened: bool,
    last: Option<Color>,
    writes: u64,
}

impl TraceLight {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Light for TraceLight {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.opened = true;
        debug!("light opened");
        Ok(())
    }

    fn set_color(&mut self, color: Color) -> Result<(), DeviceError> {
        if !self.opened {
            return Err(DeviceError("light is not open".to_string()));
        }
        self.writes += 1;
        self.last = Some(color);
        if color.is_off() {
            info!(writes = self.writes, "light off");
        } else {
            info!(%color, writes = self.writes, "light color");
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.opened {
            debug!(last = ?self.last.map(|color| color.to_string()), "light closed");
        }
        self.opened = false;
    }
}
