use hashbrown::HashMap;

use crate::device::DeviceId;
use crate::sensor::SensorType;

/// Buffers numeric sensor samples between two publications.
///
/// Samples keep their full precision. Rounding is applied only when a value
/// is published. An empty buffer means no data in the current window, which
/// is different from a zero value.
#[derive(Debug, Default)]
pub struct SensorAggregator {
    buffers: HashMap<DeviceId, HashMap<SensorType, Vec<f64>>>,
}

impl SensorAggregator {
    /// Creates an empty [`SensorAggregator`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample to the buffer of a device sensor.
    pub fn record(&mut self, device: &str, sensor: SensorType, value: f64) {
        self.buffers
            .entry_ref(device)
            .or_default()
            .entry(sensor)
            .or_default()
            .push(value);
    }

    /// Returns the arithmetic mean of the buffered samples.
    ///
    /// Returns [`None`] when the buffer is empty or the device is unknown.
    #[must_use]
    pub fn average(&self, device: &str, sensor: SensorType) -> Option<f64> {
        let values = self.buffers.get(device)?.get(&sensor)?;
        if values.is_empty() {
            return None;
        }

        #[allow(clippy::cast_precision_loss)]
        let count = values.len() as f64;
        Some(values.iter().sum::<f64>() / count)
    }

    /// Empties the buffer of a device sensor.
    pub fn clear(&mut self, device: &str, sensor: SensorType) {
        if let Some(values) = self
            .buffers
            .get_mut(device)
            .and_then(|sensors| sensors.get_mut(&sensor))
        {
            values.clear();
        }
    }

    /// Returns the average of a device sensor and empties its buffer.
    pub fn take_average(&mut self, device: &str, sensor: SensorType) -> Option<f64> {
        let average = self.average(device, sensor);
        self.clear(device, sensor);
        average
    }

    /// Returns the number of buffered samples of a device sensor.
    #[must_use]
    pub fn len(&self, device: &str, sensor: SensorType) -> usize {
        self.buffers
            .get(device)
            .and_then(|sensors| sensors.get(&sensor))
            .map_or(0, Vec::len)
    }
}
