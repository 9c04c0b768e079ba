// Blink duration sentinel: keep blinking until stopped [ms]
pub const FOREVER: u32 = u32::MAX;
// Upper bound for GPIO numbers, covers every ESP32 variant
pub const MAX_OUTPUTS: u8 = 64;
