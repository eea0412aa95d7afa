use serde::{Deserialize, Deserializer};

/// Inbound location-protocol message pushed by a tracker.
#[derive(Debug, Deserialize)]
pub struct LocationMessage {
    pub tracker_id: String,
    #[serde(deserialize_with = "parse_f64")]
    pub latitude: f64,
    #[serde(deserialize_with = "parse_f64")]
    pub longitude: f64,
    /// Device clock, seconds since the epoch.
    #[serde(deserialize_with = "parse_i64")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub bearing: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub altitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub horizontal_accuracy: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub vertical_accuracy: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub battery_level: Option<f64>,
    pub battery_status: Option<i32>,
    #[serde(default, alias = "_type")]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Location,
    Transition,
    Waypoint,
    #[default]
    #[serde(other)]
    Unknown,
}

impl LocationMessage {
    pub fn battery_percent(&self) -> Option<i32> {
        self.battery_level
            .filter(|b| b.is_finite())
            .map(|b| b.round().clamp(0.0, 100.0) as i32)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrFloat {
    String(String),
    Float(f64),
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    parse_f64_option(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing number"))
}

fn parse_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    match StringOrInt::deserialize(deserializer)? {
        StringOrInt::Int(i) => Ok(i),
        StringOrInt::String(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom),
    }
}
