use gilrs::{Axis, Button, GamepadId, Gilrs};
use rppal::i2c::I2c;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use crate::controller::direction::RawSample;

// Unit Joystick2 register map
const BUTTON_REG: u8 = 0x20;
const RGB_LED_REG: u8 = 0x30;
const OFFSET_12BITS_REG: u8 = 0x50;
const BOOTLOADER_VERSION_REG: u8 = 0xFC;
const FIRMWARE_VERSION_REG: u8 = 0xFE;

// Full scale of a centred 12-bit reading
const OFFSET_SCALE: f32 = 2048.0;

// Indicator LED colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorColor {
    Off,
    Red,
    Green,
    Blue,
}

impl IndicatorColor {
    pub fn rgb(self) -> u32 {
        match self {
            IndicatorColor::Off => 0x000000,
            IndicatorColor::Red => 0xFF0000,
            IndicatorColor::Green => 0x00FF00,
            IndicatorColor::Blue => 0x0000FF,
        }
    }
}

// Sensor errors
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Failed to initialize sensor: {0}")]
    Initialization(String),
}

impl From<rppal::i2c::Error> for SensorError {
    fn from(e: rppal::i2c::Error) -> Self {
        SensorError::Bus(e.to_string())
    }
}

/// Narrow interface to the joystick hardware.
///
/// Offsets are centred on zero with negative y meaning up. `read_button`
/// returns `true` while the button is held, whatever the electrical level.
pub trait JoystickSensor: fmt::Debug {
    fn name(&self) -> String;

    fn read_button(&mut self) -> Result<bool, SensorError>;

    fn read_axis_offsets(&mut self) -> Result<(i16, i16), SensorError>;

    fn set_indicator(&mut self, color: IndicatorColor) -> Result<(), SensorError>;

    fn firmware_version(&mut self) -> Result<Option<u8>, SensorError> {
        Ok(None)
    }

    fn bootloader_version(&mut self) -> Result<Option<u8>, SensorError> {
        Ok(None)
    }

    // Button first so a press is never missed behind a slow axis read
    fn sample(&mut self) -> Result<RawSample, SensorError> {
        let button_pressed = self.read_button()?;
        let (offset_x, offset_y) = self.read_axis_offsets()?;
        Ok(RawSample {
            offset_x,
            offset_y,
            button_pressed,
        })
    }
}

// I2C joystick unit with RGB LED, read through Linux i2c-dev
pub struct UnitJoystick {
    i2c: I2c,
    bus: u8,
    address: u16,
}

impl UnitJoystick {
    pub fn open(bus: u8, address: u16) -> Result<Self, SensorError> {
        info!("Opening I2C joystick on bus {} at address {:#04x}", bus, address);

        let mut i2c = I2c::with_bus(bus)
            .map_err(|e| SensorError::Initialization(format!("I2C bus {}: {}", bus, e)))?;
        i2c.set_slave_address(address)
            .map_err(|e| SensorError::Initialization(format!("address {:#04x}: {}", address, e)))?;

        let mut joystick = Self { i2c, bus, address };

        // Probe once so a missing device fails here instead of in the loop
        joystick.read_register(FIRMWARE_VERSION_REG).map_err(|e| {
            SensorError::NotFound(format!(
                "no joystick answering at {:#04x} on bus {}: {}",
                address, bus, e
            ))
        })?;

        debug!("I2C joystick responded on bus {}", bus);
        Ok(joystick)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.i2c.write_read(&[register], &mut buf)?;
        Ok(buf[0])
    }
}

impl fmt::Debug for UnitJoystick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitJoystick")
            .field("bus", &self.bus)
            .field("address", &format_args!("{:#04x}", self.address))
            .finish()
    }
}

impl JoystickSensor for UnitJoystick {
    fn name(&self) -> String {
        format!("I2C joystick {:#04x}@i2c-{}", self.address, self.bus)
    }

    fn read_button(&mut self) -> Result<bool, SensorError> {
        // Active low: 0 while pressed
        Ok(self.read_register(BUTTON_REG)? == 0)
    }

    fn read_axis_offsets(&mut self) -> Result<(i16, i16), SensorError> {
        let mut buf = [0u8; 4];
        self.i2c.write_read(&[OFFSET_12BITS_REG], &mut buf)?;
        Ok(decode_offsets(buf))
    }

    fn set_indicator(&mut self, color: IndicatorColor) -> Result<(), SensorError> {
        self.i2c.write(&encode_rgb(color))?;
        Ok(())
    }

    fn firmware_version(&mut self) -> Result<Option<u8>, SensorError> {
        self.read_register(FIRMWARE_VERSION_REG).map(Some)
    }

    fn bootloader_version(&mut self) -> Result<Option<u8>, SensorError> {
        self.read_register(BOOTLOADER_VERSION_REG).map(Some)
    }
}

// x then y, both little-endian i16
fn decode_offsets(buf: [u8; 4]) -> (i16, i16) {
    (
        i16::from_le_bytes([buf[0], buf[1]]),
        i16::from_le_bytes([buf[2], buf[3]]),
    )
}

// Register byte followed by the colour as a little-endian u32
fn encode_rgb(color: IndicatorColor) -> [u8; 5] {
    let bytes = color.rgb().to_le_bytes();
    [RGB_LED_REG, bytes[0], bytes[1], bytes[2], bytes[3]]
}

// Desktop stand-in: left stick and south button of a gamepad
pub struct GamepadJoystick {
    gilrs: Gilrs,
    gamepad: GamepadId,
    gamepad_name: String,
}

impl GamepadJoystick {
    pub fn open() -> Result<Self, SensorError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| SensorError::Initialization(e.to_string()))?;

        let (gamepad, gamepad_name) = match gilrs.gamepads().next() {
            Some((id, gamepad)) => (id, gamepad.name().to_string()),
            None => {
                return Err(SensorError::NotFound("no gamepad connected".to_string()));
            }
        };
        info!("Selected gamepad: {} ({})", gamepad_name, gamepad);

        Ok(Self {
            gilrs,
            gamepad,
            gamepad_name,
        })
    }

    // Pending events have to be consumed before the cached state moves
    fn drain_events(&mut self) {
        while let Some(event) = self.gilrs.next_event() {
            if event.id != self.gamepad {
                debug!("Skipping event from non-active gamepad: {:?}", event.id);
            }
        }
    }
}

impl fmt::Debug for GamepadJoystick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GamepadJoystick")
            .field("gamepad", &self.gamepad)
            .field("name", &self.gamepad_name)
            .finish()
    }
}

impl JoystickSensor for GamepadJoystick {
    fn name(&self) -> String {
        format!("gamepad {}", self.gamepad_name)
    }

    fn read_button(&mut self) -> Result<bool, SensorError> {
        self.drain_events();
        let gamepad = self
            .gilrs
            .connected_gamepad(self.gamepad)
            .ok_or_else(|| SensorError::NotFound(format!("{} disconnected", self.gamepad_name)))?;
        Ok(gamepad.is_pressed(Button::South))
    }

    fn read_axis_offsets(&mut self) -> Result<(i16, i16), SensorError> {
        self.drain_events();
        let gamepad = self
            .gilrs
            .connected_gamepad(self.gamepad)
            .ok_or_else(|| SensorError::NotFound(format!("{} disconnected", self.gamepad_name)))?;

        let x = gamepad.value(Axis::LeftStickX);
        let y = gamepad.value(Axis::LeftStickY);
        // gilrs reports up as positive, the unit as negative
        Ok((scale_axis(x), scale_axis(-y)))
    }

    fn set_indicator(&mut self, color: IndicatorColor) -> Result<(), SensorError> {
        debug!("Gamepad has no indicator LED, ignoring {:?}", color);
        Ok(())
    }
}

fn scale_axis(value: f32) -> i16 {
    if !value.is_finite() {
        warn!("Discarding non-finite axis value {}", value);
        return 0;
    }
    (value.clamp(-1.0, 1.0) * OFFSET_SCALE).round().clamp(-OFFSET_SCALE, OFFSET_SCALE - 1.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_decode_as_little_endian_pairs() {
        assert_eq!(decode_offsets([0x00, 0x00, 0x00, 0x00]), (0, 0));
        assert_eq!(decode_offsets([0xFF, 0x07, 0x00, 0xF8]), (2047, -2048));
        assert_eq!(decode_offsets([0x2C, 0xFA, 0xD4, 0x05]), (-1492, 1492));
    }

    #[test]
    fn rgb_frame_starts_with_led_register() {
        assert_eq!(encode_rgb(IndicatorColor::Blue), [0x30, 0xFF, 0x00, 0x00, 0x00]);
        assert_eq!(encode_rgb(IndicatorColor::Red), [0x30, 0x00, 0x00, 0xFF, 0x00]);
        assert_eq!(encode_rgb(IndicatorColor::Off), [0x30, 0, 0, 0, 0]);
    }

    #[test]
    fn gamepad_axis_maps_onto_offset_range() {
        assert_eq!(scale_axis(0.0), 0);
        assert_eq!(scale_axis(1.0), 2047);
        assert_eq!(scale_axis(-1.0), -2048);
        assert_eq!(scale_axis(0.5), 1024);
        assert_eq!(scale_axis(3.0), 2047);
        assert_eq!(scale_axis(f32::NAN), 0);
    }
}
