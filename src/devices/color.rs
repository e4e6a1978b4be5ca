// devices/color.rs

/// Converts an HSV triple into the colour encoding a bulb expects.
pub type ColorEncoder = fn(i32, i32, i32) -> String;

/// Encodes HSV as twelve hex digits `HHHHSSSSVVVV`.
///
/// Hue is clamped to `0..=360`, saturation and value to `0..=1000`.
pub fn hsv_to_tuya_hex(h: i32, s: i32, v: i32) -> String {
    let h = h.clamp(0, 360);
    let s = s.clamp(0, 1000);
    let v = v.clamp(0, 1000);
    format!("{h:04x}{s:04x}{v:04x}")
}
