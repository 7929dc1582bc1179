use serde::{Deserialize, Deserializer};

/// A device observed through the Avelon cloud, addressed by its activation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    activation_code: String,
}

impl Device {
    pub fn new(activation_code: impl Into<String>) -> Self {
        Self {
            activation_code: activation_code.into(),
        }
    }

    pub fn activation_code(&self) -> &str {
        &self.activation_code
    }
}

/// Response of `GET <base>/<activationCode>`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "serialnumber", deserialize_with = "null_as_default")]
    pub serial_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub connection_state: String,
    #[serde(deserialize_with = "null_as_default")]
    pub registration_date: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub last_connection: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub battery_level: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub altitude: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub altitude_mode: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub signal_strength: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub client_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub device_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub activated: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub activation_code: String,
    #[serde(deserialize_with = "null_as_default")]
    pub data_points: Vec<DatapointDescriptor>,
    #[serde(deserialize_with = "null_as_default")]
    pub self_managed: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatapointDescriptor {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub decimals: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub unit: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub iot_type: String,
}

/// One entry of `GET <base>/<activationCode>/records`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordSeries {
    #[serde(deserialize_with = "null_as_default")]
    pub data_point_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub values: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Sample {
    /// Unix seconds.
    #[serde(deserialize_with = "null_as_default")]
    pub t: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub v: f64,
}

/// Treats an explicit JSON `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
