use anyhow::{Context, Result};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;

use crate::model::Device;

const ACTIVATION_CODE_LABEL: &str = "activationcode";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    SignalStrength,
    BatteryLevel,
    Altitude,
    Temperature,
    Humidity,
    Pressure,
}

struct MetricDescriptor {
    kind: MetricKind,
    name: &'static str,
    help: &'static str,
}

const METRIC_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        kind: MetricKind::SignalStrength,
        name: "avelon_device_signal_strength",
        help: "Current device signal strength",
    },
    MetricDescriptor {
        kind: MetricKind::BatteryLevel,
        name: "avelon_device_battery_level_percent",
        help: "Current device battery level",
    },
    MetricDescriptor {
        kind: MetricKind::Altitude,
        name: "avelon_device_altitude_msl",
        help: "Current device altitude",
    },
    MetricDescriptor {
        kind: MetricKind::Temperature,
        name: "avelon_record_last_temperature_celsius",
        help: "Latest temperature measurement",
    },
    MetricDescriptor {
        kind: MetricKind::Humidity,
        name: "avelon_record_last_humidity_percent",
        help: "Latest air humidity measurement",
    },
    MetricDescriptor {
        kind: MetricKind::Pressure,
        name: "avelon_record_last_pressure_hpa",
        help: "Latest air pressure measurement",
    },
];

impl MetricKind {
    /// Kinds derived from the records endpoint, in the order they are published.
    pub const RECORD_KINDS: [MetricKind; 3] = [
        MetricKind::Temperature,
        MetricKind::Humidity,
        MetricKind::Pressure,
    ];

    /// Vendor `iotType` label backing a record-derived kind.
    pub fn semantic_type(self) -> Option<&'static str> {
        match self {
            MetricKind::Temperature => Some("TEMPERATURE"),
            MetricKind::Humidity => Some("HUMIDITY"),
            MetricKind::Pressure => Some("ATMOSPHERIC_PRESSURE_AVERAGE"),
            MetricKind::SignalStrength | MetricKind::BatteryLevel | MetricKind::Altitude => None,
        }
    }
}

/// Gauges published for one device. Labels are fixed at construction.
pub struct DeviceGauges {
    device: Device,
    gauges: BTreeMap<MetricKind, Gauge>,
}

impl DeviceGauges {
    fn new(device: Device) -> Result<Self> {
        let mut gauges = BTreeMap::new();
        for descriptor in METRIC_DESCRIPTORS {
            let opts = Opts::new(descriptor.name, descriptor.help)
                .const_label(ACTIVATION_CODE_LABEL, device.activation_code());
            let gauge = Gauge::with_opts(opts).with_context(|| {
                format!(
                    "failed to create gauge {} for device {}",
                    descriptor.name,
                    device.activation_code()
                )
            })?;
            gauges.insert(descriptor.kind, gauge);
        }
        Ok(Self { device, gauges })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn set(&self, kind: MetricKind, value: f64) {
        if let Some(gauge) = self.gauges.get(&kind) {
            gauge.set(value);
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, kind: MetricKind) -> f64 {
        self.gauges.get(&kind).map(Gauge::get).unwrap_or_default()
    }
}

/// Every device's gauges plus the registry they are exposed through.
///
/// Built once at startup; the device set never changes afterwards, only gauge values.
pub struct MetricsRegistry {
    registry: Registry,
    devices: Vec<DeviceGauges>,
}

impl MetricsRegistry {
    pub fn new(devices: &[Device]) -> Result<Self> {
        let registry = Registry::new();
        let mut entries = Vec::with_capacity(devices.len());
        for device in devices {
            let gauges = DeviceGauges::new(device.clone())?;
            for gauge in gauges.gauges.values() {
                registry
                    .register(Box::new(gauge.clone()))
                    .with_context(|| {
                        format!(
                            "failed to register gauges for device {}",
                            device.activation_code()
                        )
                    })?;
            }
            entries.push(gauges);
        }
        Ok(Self {
            registry,
            devices: entries,
        })
    }

    pub fn devices(&self) -> &[DeviceGauges] {
        &self.devices
    }

    pub fn device(&self, activation_code: &str) -> Option<&DeviceGauges> {
        self.devices
            .iter()
            .find(|entry| entry.device.activation_code() == activation_code)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    pub fn encode_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("failed to encode metrics")?;
        String::from_utf8(buf).context("metrics output was not utf-8")
    }
}
