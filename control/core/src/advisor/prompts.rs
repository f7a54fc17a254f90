//! Prompt templates for the advisory calls
//!
//! Each prompt states the role, the data, the target ranges and the exact JSON
//! shape expected back. The ranges are advisory context for the model; the
//! mapping from reading to target is the model's call.

use crate::session::SensorReading;

/// Role for fan advice
pub const FAN_SYSTEM: &str =
    "You are an assistant that helps farm managers keep environmental conditions healthy for poultry.";

/// Role for light advice
pub const LIGHT_SYSTEM: &str =
    "You are an assistant that helps farm managers tune lighting for plant health.";

/// Role for free-form questions
pub const QUESTION_SYSTEM: &str =
    "You are a helpful assistant that answers questions about a poultry farm.";

/// Fan speed prompt for one reading
#[must_use]
pub fn fan_prompt(reading: &SensorReading) -> String {
    format!(
        "Recommend a fan speed, as a percentage from 0 to 100, that keeps the birds comfortable, \
and briefly explain why.

Sensor data:
- Temperature: {temperature:.1} Celsius
- Humidity: {humidity:.1}%
- Oxygen: {oxygen:.1}%

Ideal ranges for poultry:
- Temperature: 18-24 Celsius
- Humidity: 50-70%
- Oxygen: above 90%

Answer with JSON only, in exactly this shape:
{{\"recommendedFanSpeed\": number, \"explanation\": string}}",
        temperature = reading.temperature_celsius,
        humidity = reading.humidity_pct,
        oxygen = reading.oxygen_pct,
    )
}

/// Light status prompt for one light level
#[must_use]
pub fn light_prompt(lux: f64) -> String {
    format!(
        "Recommend whether the grow lights should be on or off, and briefly explain why.

Light data:
- Light intensity: {lux:.0} Lux

Most plants need between 2,000 and 10,000 Lux depending on species and growth stage; \
seedlings usually need less.

Answer with JSON only, in exactly this shape:
{{\"recommendedLightStatus\": boolean, \"explanation\": string}}"
    )
}

/// Free-form question prompt
#[must_use]
pub fn question_prompt(question: &str) -> String {
    format!(
        "Question: {question}

Answer with JSON only, in exactly this shape:
{{\"answer\": string}}"
    )
}
