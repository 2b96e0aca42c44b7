use std::fmt;

// Discrete joystick direction, Center doubles as "no operation"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DirectionCode {
    #[default]
    Center,
    Up,
    Down,
    Left,
    Right,
    Mid,
}

impl DirectionCode {
    pub fn is_center(self) -> bool {
        self == DirectionCode::Center
    }

    // Text used by the line reporter
    pub fn as_str(self) -> &'static str {
        match self {
            DirectionCode::Center => "center",
            DirectionCode::Up => "up",
            DirectionCode::Down => "down",
            DirectionCode::Left => "left",
            DirectionCode::Right => "right",
            DirectionCode::Mid => "mid",
        }
    }
}

impl fmt::Display for DirectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// One poll cycle worth of sensor data, never retained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub offset_x: i16,
    pub offset_y: i16,
    pub button_pressed: bool,
}

impl RawSample {
    pub fn new(offset_x: i16, offset_y: i16, button_pressed: bool) -> Self {
        Self {
            offset_x,
            offset_y,
            button_pressed,
        }
    }
}

/// Classifies one raw sample into a [`DirectionCode`].
///
/// The button wins over any stick deflection. Below the deadzone on both axes
/// the stick is at rest. Otherwise one axis has to exceed the other by
/// `direction_ratio` to count, so diagonals fall back to `Center`.
/// Negative y is up.
pub fn classify_raw(
    offset_x: i16,
    offset_y: i16,
    button_pressed: bool,
    deadzone: u16,
    direction_ratio: f32,
) -> DirectionCode {
    if button_pressed {
        return DirectionCode::Mid;
    }

    let abs_x = offset_x.unsigned_abs();
    let abs_y = offset_y.unsigned_abs();

    if abs_x < deadzone && abs_y < deadzone {
        return DirectionCode::Center;
    }

    if f32::from(abs_y) > f32::from(abs_x) * direction_ratio {
        if offset_y < 0 {
            DirectionCode::Up
        } else {
            DirectionCode::Down
        }
    } else if f32::from(abs_x) > f32::from(abs_y) * direction_ratio {
        if offset_x < 0 {
            DirectionCode::Left
        } else {
            DirectionCode::Right
        }
    } else {
        DirectionCode::Center
    }
}
