//! Smart-home discovery and control bodies.
//!
//! The phoenix endpoint returns its network detail as a JSON document
//! encoded in a string. Devices and groups sit at varying depths, so the
//! document is walked recursively and each match is parsed into a typed item.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;

/// An appliance that can be controlled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartHomeDevice {
    pub entity_id: Option<String>,
    pub appliance_id: Option<String>,
    pub friendly_name: Option<String>,
    pub friendly_description: Option<String>,
    pub manufacturer_name: Option<String>,
    pub model_name: Option<String>,
    pub reachability: Option<String>,
    pub actions: Option<Vec<String>>,
    pub appliance_types: Option<Vec<String>>,
    pub capabilities: Option<Vec<Value>>,
}

/// A room or group of appliances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartHomeGroup {
    pub appliance_group_name: Option<String>,
    pub appliance_group_identifier: Option<GroupIdentifier>,
    pub is_space: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupIdentifier {
    pub value: Option<String>,
}

/// A discovered smart-home entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SmartHomeItem {
    Device(SmartHomeDevice),
    Group(SmartHomeGroup),
}

impl SmartHomeItem {
    pub fn name(&self) -> Option<&str> {
        match self {
            SmartHomeItem::Device(d) => d.friendly_name.as_deref(),
            SmartHomeItem::Group(g) => g.appliance_group_name.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct NetworkDetails {
    pub network_detail: Option<String>,
}

/// Collect every device and group in `node`, at any depth.
///
/// An object with `entityId`, `friendlyName` and `actions` is a device; an
/// object with `applianceGroupName` is a group. Neither is descended into.
pub fn collect_smart_home_items(node: &Value) -> Result<Vec<SmartHomeItem>> {
    let mut items = Vec::new();
    visit(node, &mut items)?;
    Ok(items)
}

fn visit(node: &Value, items: &mut Vec<SmartHomeItem>) -> Result<()> {
    match node {
        Value::Object(map) => {
            if is_device(map) {
                items.push(SmartHomeItem::Device(serde_json::from_value(node.clone())?));
            } else if map.contains_key("applianceGroupName") {
                items.push(SmartHomeItem::Group(serde_json::from_value(node.clone())?));
            } else {
                for value in map.values() {
                    visit(value, items)?;
                }
            }
        }
        Value::Array(values) => {
            for value in values {
                visit(value, items)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn is_device(map: &Map<String, Value>) -> bool {
    map.contains_key("entityId") && map.contains_key("friendlyName") && map.contains_key("actions")
}

/// Body of a state query for `entity_ids`.
pub fn state_request(entity_ids: &[&str]) -> Value {
    let requests: Vec<Value> = entity_ids
        .iter()
        .map(|id| json!({ "entityId": id, "entityType": "APPLIANCE" }))
        .collect();
    json!({ "stateRequests": requests })
}

/// Capability states per entity id from a state query answer.
pub fn parse_device_states(body: &Value) -> HashMap<String, Vec<Value>> {
    let mut states = HashMap::new();
    let Some(entries) = body.get("deviceStates").and_then(Value::as_array) else {
        return states;
    };
    for entry in entries {
        let Some(entity_id) = entry
            .get("entity")
            .and_then(|e| e.get("entityId"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if let Some(capabilities) = entry.get("capabilityStates").and_then(Value::as_array) {
            states.insert(entity_id.to_string(), capabilities.clone());
        }
    }
    states
}

/// Body of a control request. `property` is only set when `value` is given.
pub fn control_request(entity_id: &str, action: &str, property: Option<&str>, value: Option<Value>) -> Value {
    let mut parameters = Map::new();
    parameters.insert("action".into(), json!(action));
    if let (Some(property), Some(value)) = (property, value) {
        parameters.insert(property.to_string(), value);
    }
    json!({
        "controlRequests": [{
            "entityId": entity_id,
            "entityType": "APPLIANCE",
            "parameters": parameters,
        }]
    })
}

/// Non-empty `errors` array of a control answer.
pub fn vendor_errors(body: &Value) -> Option<Vec<Value>> {
    body.get("errors")
        .and_then(Value::as_array)
        .filter(|errors| !errors.is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devices_and_groups_found_at_any_depth() {
        let detail = json!({
            "locationDetails": {
                "Default_Location": {
                    "amazonBridgeDetails": {
                        "amazonBridgeDetails": {
                            "LambdaBridge_AAA": {
                                "applianceDetails": {
                                    "applianceDetails": {
                                        "lamp": {
                                            "entityId": "e1",
                                            "friendlyName": "Desk Lamp",
                                            "actions": ["turnOn", "turnOff"]
                                        }
                                    }
                                }
                            }
                        }
                    },
                    "applianceGroups": {
                        "applianceGroups": [
                            { "applianceGroupName": "Office", "isSpace": true },
                            { "nested": [ { "entityId": "e2", "friendlyName": "Fan", "actions": [] } ] }
                        ]
                    }
                }
            }
        });

        let items = collect_smart_home_items(&detail).unwrap();
        let names: Vec<&str> = items.iter().filter_map(|i| i.name()).collect();
        assert_eq!(items.len(), 3);
        assert!(names.contains(&"Desk Lamp"));
        assert!(names.contains(&"Office"));
        assert!(names.contains(&"Fan"));
    }

    #[test]
    fn test_device_needs_all_three_keys() {
        let detail = json!([{ "entityId": "e1", "friendlyName": "Partial" }]);
        assert!(collect_smart_home_items(&detail).unwrap().is_empty());
    }

    #[test]
    fn test_device_is_not_descended() {
        let detail = json!({
            "entityId": "e1",
            "friendlyName": "Hub",
            "actions": [],
            "children": { "applianceGroupName": "Hidden" }
        });
        let items = collect_smart_home_items(&detail).unwrap();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], SmartHomeItem::Device(_)));
    }

    #[test]
    fn test_control_request_shape() {
        let body = control_request("e1", "setPercentage", Some("percentage"), Some(json!(40)));
        let request = &body["controlRequests"][0];
        assert_eq!(request["entityType"], "APPLIANCE");
        assert_eq!(request["parameters"]["action"], "setPercentage");
        assert_eq!(request["parameters"]["percentage"], 40);

        let bare = control_request("e1", "turnOn", Some("ignored"), None);
        assert!(bare["controlRequests"][0]["parameters"].get("ignored").is_none());
    }

    #[test]
    fn test_device_states_by_entity() {
        let body = json!({"deviceStates":[
            {"entity":{"entityId":"e1"},"capabilityStates":["{\"name\":\"powerState\",\"value\":\"ON\"}"]},
            {"entity":{"entityId":"e2"},"capabilityStates":null}
        ]});
        let states = parse_device_states(&body);
        assert_eq!(states.len(), 1);
        assert_eq!(states["e1"].len(), 1);
        assert!(parse_device_states(&json!({})).is_empty());
    }

    #[test]
    fn test_vendor_errors_only_when_non_empty() {
        assert!(vendor_errors(&json!({"errors":[]})).is_none());
        assert!(vendor_errors(&json!({})).is_none());
        assert_eq!(vendor_errors(&json!({"errors":[{"code":"x"}]})).unwrap().len(), 1);
    }
}
