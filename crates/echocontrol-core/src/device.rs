//! Echo device entries as reported by the device list endpoint.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::http::{HttpPipeline, RequestOptions};

/// Path of the device list below the Alexa server.
pub const DEVICE_LIST_PATH: &str = "/api/devices-v2/device?cached=false";

/// `accountName` of the entry that represents this client itself.
pub const THIS_DEVICE_ACCOUNT_NAME: &str = "This Device";

/// One device of the account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    pub serial_number: Option<String>,
    pub device_type: Option<String>,
    pub device_family: Option<String>,
    pub device_owner_customer_id: Option<String>,
    pub device_account_id: Option<String>,
    pub account_name: Option<String>,
    pub software_version: Option<String>,
    pub online: bool,
    pub capabilities: Option<Vec<String>>,
}

impl Device {
    /// Serial number, empty when the vendor omitted it.
    pub fn serial(&self) -> &str {
        self.serial_number.as_deref().unwrap_or_default()
    }

    /// Device type id, empty when the vendor omitted it.
    pub fn type_id(&self) -> &str {
        self.device_type.as_deref().unwrap_or_default()
    }

    pub fn software_version(&self) -> &str {
        self.software_version.as_deref().unwrap_or_default()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities
            .as_ref()
            .map(|caps| caps.iter().any(|c| c == capability))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeviceList {
    devices: Option<Vec<Device>>,
}

/// Fetch the raw device list JSON from `alexa_server`.
pub async fn fetch_device_list_json(pipeline: &HttpPipeline, alexa_server: &str) -> Result<String> {
    pipeline
        .execute_text(RequestOptions::get(format!("{}{}", alexa_server, DEVICE_LIST_PATH)))
        .await
}

/// Parse a device list body. A body without a `devices` array is an empty list.
pub fn parse_device_list(json: &str) -> Result<Vec<Device>> {
    let list: DeviceList = serde_json::from_str(json)?;
    Ok(list.devices.unwrap_or_default())
}

/// Customer id fallback from the device list.
///
/// Prefers the device whose serial equals `serial`. Otherwise takes the
/// "This Device" entry, whose serial the caller should adopt; that serial is
/// the second element.
pub fn customer_from_devices(devices: &[Device], serial: &str) -> Option<(String, Option<String>)> {
    let own = devices
        .iter()
        .find(|d| d.serial_number.as_deref() == Some(serial))
        .and_then(|d| d.device_owner_customer_id.clone())
        .filter(|id| !id.is_empty());
    if let Some(customer_id) = own {
        return Some((customer_id, None));
    }

    devices
        .iter()
        .find(|d| d.account_name.as_deref() == Some(THIS_DEVICE_ACCOUNT_NAME))
        .and_then(|d| {
            d.device_owner_customer_id
                .clone()
                .filter(|id| !id.is_empty())
                .map(|id| (id, d.serial_number.clone()))
        })
}
