use serde::Serialize;
use tracing::{debug, info, warn};

use marble_common::{LedLayout, MachineAction, MotorDirection, Rgb};

/// Simulated LED ring. Pixel writes go to a back buffer that becomes
/// visible on `show`, like a NeoPixel strip.
#[derive(Debug, Clone)]
pub struct LedRing {
    buffer: Vec<Rgb>,
    shown: Vec<Rgb>,
    brightness: u8,
    frames: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedFrame {
    pub brightness: u8,
    pub frames: u64,
    pub pixels: Vec<Rgb>,
}

impl LedRing {
    pub fn new(layout: &LedLayout) -> Self {
        Self {
            buffer: vec![Rgb::OFF; layout.pixel_count],
            shown: vec![Rgb::OFF; layout.pixel_count],
            brightness: layout.brightness,
            frames: 0,
        }
    }

    pub fn set_pixel(&mut self, index: usize, color: Rgb) {
        match self.buffer.get_mut(index) {
            Some(pixel) => *pixel = color,
            None => warn!("pixel {index} outside ring of {}", self.buffer.len()),
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(Rgb::OFF);
    }

    pub fn show(&mut self) {
        self.shown.clone_from(&self.buffer);
        self.frames = self.frames.wrapping_add(1);
    }

    pub fn frame(&self) -> LedFrame {
        LedFrame {
            brightness: self.brightness,
            frames: self.frames,
            pixels: self.shown.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotorState {
    pub direction: MotorDirection,
    pub speed: u8,
}

/// Simulated DC motor on a motor shield channel.
#[derive(Debug, Clone)]
pub struct Motor {
    state: MotorState,
}

impl Motor {
    /// Fails when no shield answers; the machine must not run uncalibrated.
    pub fn probe(shield_present: bool) -> anyhow::Result<Self> {
        if !shield_present {
            anyhow::bail!("could not find motor shield, check wiring");
        }
        info!("motor shield found");
        Ok(Self {
            state: MotorState {
                direction: MotorDirection::Release,
                speed: 0,
            },
        })
    }

    pub fn run(&mut self, direction: MotorDirection) {
        if self.state.direction != direction {
            info!("motor {}", direction.as_str());
        }
        self.state.direction = direction;
    }

    pub fn set_speed(&mut self, speed: u8) {
        debug!("motor speed {speed}");
        self.state.speed = speed;
    }

    pub fn state(&self) -> MotorState {
        self.state
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    pub ring: LedRing,
    pub motor: Motor,
}

impl SimulatedHardware {
    pub fn probe(layout: &LedLayout, shield_present: bool) -> anyhow::Result<Self> {
        Ok(Self {
            ring: LedRing::new(layout),
            motor: Motor::probe(shield_present)?,
        })
    }

    pub fn apply(&mut self, actions: &[MachineAction]) {
        for action in actions {
            match *action {
                MachineAction::SetPixel { index, color } => self.ring.set_pixel(index, color),
                MachineAction::ClearPixels => self.ring.clear(),
                MachineAction::ShowPixels => self.ring.show(),
                MachineAction::MotorRun(direction) => self.motor.run(direction),
                MachineAction::MotorSpeed(speed) => self.motor.set_speed(speed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hardware() -> SimulatedHardware {
        SimulatedHardware::probe(&LedLayout::default(), true).unwrap()
    }

    #[test]
    fn missing_shield_fails_probe() {
        assert!(SimulatedHardware::probe(&LedLayout::default(), false).is_err());
    }

    #[test]
    fn pixels_become_visible_on_show() {
        let mut hw = hardware();
        let red = Rgb::new(255, 0, 0);
        hw.apply(&[MachineAction::SetPixel { index: 19, color: red }]);
        assert_eq!(hw.ring.frame().pixels[19], Rgb::OFF);

        hw.apply(&[MachineAction::ShowPixels]);
        let frame = hw.ring.frame();
        assert_eq!(frame.pixels[19], red);
        assert_eq!(frame.frames, 1);

        hw.apply(&[MachineAction::ClearPixels, MachineAction::ShowPixels]);
        assert!(hw.ring.frame().pixels.iter().all(|pixel| *pixel == Rgb::OFF));
    }

    #[test]
    fn out_of_range_pixel_is_ignored() {
        let mut hw = hardware();
        hw.apply(&[
            MachineAction::SetPixel {
                index: 400,
                color: Rgb::new(1, 2, 3),
            },
            MachineAction::ShowPixels,
        ]);
        assert_eq!(hw.ring.frame().pixels.len(), 40);
    }

    #[test]
    fn motor_follows_commands() {
        let mut hw = hardware();
        hw.apply(&[
            MachineAction::MotorRun(MotorDirection::Backward),
            MachineAction::MotorSpeed(30),
        ]);
        assert_eq!(
            hw.motor.state(),
            MotorState {
                direction: MotorDirection::Backward,
                speed: 30
            }
        );
    }
}
