//! Controller packets sent to the peripheral.
//!
//! Button packets are plain text: `B`, the button's ASCII digit code, then
//! `49` for pressed or `48` for released. Button 1 pressed is `B4949`.

use crate::error::{Error, Result};

/// Accelerometer packet length.
pub const PACKET_ACC_LEN: usize = 15;
/// Gyroscope packet length.
pub const PACKET_GYRO_LEN: usize = 15;
/// Magnetometer packet length.
pub const PACKET_MAG_LEN: usize = 15;
/// Quaternion packet length.
pub const PACKET_QUAT_LEN: usize = 19;
/// Button packet length.
pub const PACKET_BUTTON_LEN: usize = 5;
/// Color packet length.
pub const PACKET_COLOR_LEN: usize = 6;
/// Location packet length.
pub const PACKET_LOCATION_LEN: usize = 15;

/// Highest button number on the controller.
pub const MAX_BUTTON: u8 = 4;

/// ASCII code of `'0'`, the base for button digits.
const ASCII_ZERO: u8 = 48;

/// A button press or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ButtonPacket {
    button: u8,
    pressed: bool,
}

impl ButtonPacket {
    /// Create a packet for button 1 to 4.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for any other button number.
    pub fn new(button: u8, pressed: bool) -> Result<Self> {
        if !(1..=MAX_BUTTON).contains(&button) {
            return Err(Error::InvalidParameter {
                name: "button".to_string(),
                value: button.to_string(),
            });
        }
        Ok(Self { button, pressed })
    }

    /// Packet for pressing a button.
    pub fn pressed(button: u8) -> Result<Self> {
        Self::new(button, true)
    }

    /// Packet for releasing a button.
    pub fn released(button: u8) -> Result<Self> {
        Self::new(button, false)
    }

    /// The button number.
    pub fn button(&self) -> u8 {
        self.button
    }

    /// Whether this is a press.
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Text sent to the peripheral.
    pub fn encode(&self) -> String {
        let state = if self.pressed { ASCII_ZERO + 1 } else { ASCII_ZERO };
        format!("B{}{}", ASCII_ZERO + self.button, state)
    }
}

impl std::fmt::Display for ButtonPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}
