//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about one audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the host's default device for its direction.
    pub is_default: bool,
}

/// Which side of the host a device lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Order devices for display: default first, then by name.
pub fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

#[cfg(feature = "audio-cpal")]
mod host {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::{info, warn};

    use super::{sort_devices, DeviceInfo, Direction};
    use crate::error::{ParleyError, Result};

    fn devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
        let listed = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        };
        listed.map_err(|e| ParleyError::AudioDevice(e.to_string()))
    }

    fn default_device(host: &cpal::Host, direction: Direction) -> Option<cpal::Device> {
        match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
    }

    /// All devices for `direction`; empty when the host cannot list them.
    pub fn list_devices(direction: Direction) -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let default_name = default_device(&host, direction).and_then(|d| d.name().ok());

        let found = match devices(&host, direction) {
            Ok(found) => found,
            Err(e) => {
                warn!("failed to list {direction:?} devices: {e}");
                return Vec::new();
            }
        };

        let mut list: Vec<DeviceInfo> = found
            .iter()
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("{direction:?} Device {}", idx + 1));
                let is_default = default_name.as_deref() == Some(name.as_str());
                DeviceInfo { name, is_default }
            })
            .collect();
        sort_devices(&mut list);
        list
    }

    /// Resolve a device: the preferred name if present, else the host
    /// default, else the first one listed.
    pub fn select_device(direction: Direction, preferred: Option<&str>) -> Result<cpal::Device> {
        let host = cpal::default_host();

        if let Some(preferred) = preferred {
            match devices(&host, direction) {
                Ok(found) => {
                    let matched = found
                        .into_iter()
                        .find(|d| d.name().map(|n| n == preferred).unwrap_or(false));
                    if let Some(device) = matched {
                        return Ok(device);
                    }
                    warn!("preferred {direction:?} device '{preferred}' not found, falling back");
                }
                Err(e) => warn!("failed to list devices while resolving preference: {e}"),
            }
        }

        if let Some(device) = default_device(&host, direction) {
            return Ok(device);
        }

        let first = devices(&host, direction)?.into_iter().next();
        match (first, direction) {
            (Some(device), _) => {
                info!("no default {direction:?} device, using first available");
                Ok(device)
            }
            (None, Direction::Input) => Err(ParleyError::NoDefaultInputDevice),
            (None, Direction::Output) => Err(ParleyError::NoDefaultOutputDevice),
        }
    }
}

#[cfg(feature = "audio-cpal")]
pub use host::{list_devices, select_device};

/// Without `audio-cpal` there are no devices to list.
#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices(_direction: Direction) -> Vec<DeviceInfo> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_sorts_first() {
        let mut list = vec![
            DeviceInfo {
                name: "zeta".into(),
                is_default: false,
            },
            DeviceInfo {
                name: "Speakers".into(),
                is_default: true,
            },
            DeviceInfo {
                name: "alpha".into(),
                is_default: false,
            },
        ];
        sort_devices(&mut list);
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Speakers", "alpha", "zeta"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(DeviceInfo {
            name: "Mic".into(),
            is_default: true,
        })
        .unwrap();
        assert_eq!(json["isDefault"], true);
    }
}
