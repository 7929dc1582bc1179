use crate::model::{DeviceInfo, RecordSeries, Sample};

/// Datapoint ID whose `iotType` equals `semantic_type`.
///
/// When several descriptors carry the same type the last one in the list wins. The
/// vendor does not document whether duplicates are possible, so this only keeps the
/// choice deterministic.
pub fn datapoint_id_for(info: &DeviceInfo, semantic_type: &str) -> Option<i64> {
    info.data_points
        .iter()
        .rev()
        .find(|descriptor| descriptor.iot_type == semantic_type)
        .map(|descriptor| descriptor.id)
}

/// Sample with the greatest timestamp across every series for `datapoint_id`.
/// Ties keep the first one seen.
pub fn latest_sample(records: &[RecordSeries], datapoint_id: i64) -> Option<Sample> {
    let mut latest: Option<Sample> = None;
    for sample in records
        .iter()
        .filter(|series| series.data_point_id == datapoint_id)
        .flat_map(|series| series.values.iter())
    {
        match latest {
            Some(current) if sample.t <= current.t => {}
            _ => latest = Some(*sample),
        }
    }
    latest
}

/// Latest value reported for `semantic_type`, or `0.0` when the device has no such
/// datapoint or the datapoint has no samples.
pub fn resolve_latest(records: &[RecordSeries], info: &DeviceInfo, semantic_type: &str) -> f64 {
    let Some(datapoint_id) = datapoint_id_for(info, semantic_type) else {
        tracing::warn!(
            semantic_type,
            device = %info.activation_code,
            "datapoint id not found; reporting 0"
        );
        return 0.0;
    };

    match latest_sample(records, datapoint_id) {
        Some(sample) => sample.v,
        None => {
            tracing::debug!(
                semantic_type,
                datapoint_id,
                device = %info.activation_code,
                "no samples for datapoint; reporting 0"
            );
            0.0
        }
    }
}
