//! Behavior sequences: operation nodes, serial wrappers and routine templates.

use serde_json::{json, Map, Value};

use echocontrol_core::Device;

const SEQUENCE_TYPE: &str = "com.amazon.alexa.behaviors.model.Sequence";
const SERIAL_NODE_TYPE: &str = "com.amazon.alexa.behaviors.model.SerialNode";
const OPERATION_NODE_TYPE: &str = "com.amazon.alexa.behaviors.model.OpaquePayloadOperationNode";

/// Volume command used around spoken output.
pub const VOLUME_COMMAND: &str = "Alexa.DeviceControls.Volume";

/// Title shown on displays and in the mobile app when none is given.
pub const DEFAULT_TITLE: &str = "openHAB";

/// Device fields stamped into an operation payload.
#[derive(Debug, Clone, Copy)]
pub struct NodeTarget<'a> {
    pub device: &'a Device,
    pub customer_id: &'a str,
}

/// Build an `OpaquePayloadOperationNode` for `command`.
pub fn operation_node(
    target: Option<NodeTarget<'_>>,
    command: &str,
    parameters: Map<String, Value>,
) -> Value {
    let mut payload = Map::new();
    if let Some(target) = target {
        payload.insert("deviceType".into(), json!(target.device.type_id()));
        payload.insert("deviceSerialNumber".into(), json!(target.device.serial()));
        payload.insert("locale".into(), json!(""));
        payload.insert("customerId".into(), json!(target.customer_id));
    }
    payload.extend(parameters);

    json!({
        "@type": OPERATION_NODE_TYPE,
        "type": command,
        "operationPayload": Value::Object(payload),
    })
}

/// Wrap nodes so they run one after another.
pub fn serial_node(nodes: Vec<Value>) -> Value {
    json!({
        "@type": SERIAL_NODE_TYPE,
        "nodesToExecute": nodes,
    })
}

/// Wrap a start node into a sequence document.
pub fn sequence(start_node: Value) -> Value {
    json!({
        "@type": SEQUENCE_TYPE,
        "startNode": start_node,
    })
}

/// Run `command` at `tts_volume`, then go back to `standard_volume`.
///
/// Without a tts volume the command node is returned unchanged.
pub fn with_volume(
    target: NodeTarget<'_>,
    command: &str,
    parameters: Map<String, Value>,
    tts_volume: Option<i32>,
    standard_volume: i32,
) -> Value {
    let Some(tts_volume) = tts_volume else {
        return operation_node(Some(target), command, parameters);
    };
    serial_node(vec![
        operation_node(Some(target), VOLUME_COMMAND, volume_parameters(tts_volume)),
        operation_node(Some(target), command, parameters),
        operation_node(Some(target), VOLUME_COMMAND, volume_parameters(standard_volume)),
    ])
}

fn volume_parameters(value: i32) -> Map<String, Value> {
    let mut parameters = Map::new();
    parameters.insert("value".into(), json!(value));
    parameters
}

/// Parameters of an `AlexaAnnouncement` node.
///
/// Text wrapped in `<speak>…</speak>` is sent as SSML.
pub fn announcement_parameters(
    device: &Device,
    speak: &str,
    body: &str,
    title: Option<&str>,
    customer_id: &str,
) -> Map<String, Value> {
    let title = title.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TITLE);
    let speak_type = if speak.starts_with("<speak>") && speak.ends_with("</speak>") {
        "ssml"
    } else {
        "text"
    };

    let mut parameters = Map::new();
    parameters.insert("expireAfter".into(), json!("PT5S"));
    parameters.insert(
        "content".into(),
        json!([{
            "locale": "",
            "display": { "title": title, "body": body },
            "speak": { "type": speak_type, "value": speak },
        }]),
    );
    parameters.insert(
        "target".into(),
        json!({
            "customerId": device.device_owner_customer_id,
            "devices": [{
                "deviceSerialNumber": device.serial(),
                "deviceTypeId": device.type_id(),
            }],
        }),
    );
    parameters.insert("customerId".into(), json!(customer_id));
    parameters
}

/// Parameters of an `Alexa.Notifications.SendMobilePush` node.
pub fn mobile_push_parameters(customer_id: &str, text: &str, title: Option<&str>) -> Map<String, Value> {
    let title = title.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TITLE);
    let mut parameters = Map::new();
    parameters.insert("notificationMessage".into(), json!(text));
    parameters.insert("alexaUrl".into(), json!("#v2/behaviors"));
    parameters.insert("title".into(), json!(title));
    parameters.insert("customerId".into(), json!(customer_id));
    parameters
}

/// Replace the placeholder tokens of a serialized routine sequence.
///
/// Matching is on the exact compact `"key":"TOKEN"` text. An empty or absent
/// locale becomes JSON `null`.
pub fn substitute_routine_tokens(
    sequence_json: &str,
    device_type: &str,
    serial: &str,
    customer_id: &str,
    locale: Option<&str>,
) -> String {
    let locale = match locale.filter(|l| !l.is_empty()) {
        Some(locale) => format!(r#""locale":"{}""#, locale),
        None => r#""locale":null"#.to_string(),
    };
    sequence_json
        .replace(
            r#""deviceType":"ALEXA_CURRENT_DEVICE_TYPE""#,
            &format!(r#""deviceType":"{}""#, device_type),
        )
        .replace(
            r#""deviceSerialNumber":"ALEXA_CURRENT_DSN""#,
            &format!(r#""deviceSerialNumber":"{}""#, serial),
        )
        .replace(
            r#""customerId":"ALEXA_CUSTOMER_ID""#,
            &format!(r#""customerId":"{}""#, customer_id),
        )
        .replace(r#""locale":"ALEXA_CURRENT_LOCALE""#, &locale)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Device {
        Device {
            serial_number: Some("G090L".to_string()),
            device_type: Some("A3S5BH2HU6VAYF".to_string()),
            device_owner_customer_id: Some("A1OWNER".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_routine_tokens_replaced() {
        let template = r#"{"startNode":{"operationPayload":{"deviceType":"ALEXA_CURRENT_DEVICE_TYPE","deviceSerialNumber":"ALEXA_CURRENT_DSN","customerId":"ALEXA_CUSTOMER_ID","locale":"ALEXA_CURRENT_LOCALE"}}}"#;
        let result = substitute_routine_tokens(template, "X", "Y", "Z", Some(""));
        assert_eq!(
            result,
            r#"{"startNode":{"operationPayload":{"deviceType":"X","deviceSerialNumber":"Y","customerId":"Z","locale":null}}}"#
        );

        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert!(parsed["startNode"]["operationPayload"]["locale"].is_null());
    }

    #[test]
    fn test_routine_locale_kept_when_known() {
        let result = substitute_routine_tokens(
            r#"{"locale":"ALEXA_CURRENT_LOCALE"}"#,
            "X",
            "Y",
            "Z",
            Some("de-DE"),
        );
        assert_eq!(result, r#"{"locale":"de-DE"}"#);
    }

    #[test]
    fn test_spaced_tokens_are_not_touched() {
        let template = r#"{"deviceType": "ALEXA_CURRENT_DEVICE_TYPE"}"#;
        assert_eq!(substitute_routine_tokens(template, "X", "Y", "Z", None), template);
    }

    #[test]
    fn test_operation_node_with_device() {
        let device = echo();
        let mut parameters = Map::new();
        parameters.insert("textToSpeak".into(), json!("hello"));
        let node = operation_node(
            Some(NodeTarget {
                device: &device,
                customer_id: "A1ACCOUNT",
            }),
            "Alexa.Speak",
            parameters,
        );

        assert_eq!(node["@type"], OPERATION_NODE_TYPE);
        assert_eq!(node["type"], "Alexa.Speak");
        let payload = &node["operationPayload"];
        assert_eq!(payload["deviceSerialNumber"], "G090L");
        assert_eq!(payload["locale"], "");
        assert_eq!(payload["customerId"], "A1ACCOUNT");
        assert_eq!(payload["textToSpeak"], "hello");
    }

    #[test]
    fn test_with_volume_wraps_in_serial_node() {
        let device = echo();
        let target = NodeTarget {
            device: &device,
            customer_id: "A1",
        };
        let node = with_volume(target, "Alexa.Speak", Map::new(), Some(40), 20);

        assert_eq!(node["@type"], SERIAL_NODE_TYPE);
        let nodes = node["nodesToExecute"].as_array().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0]["operationPayload"]["value"], 40);
        assert_eq!(nodes[1]["type"], "Alexa.Speak");
        assert_eq!(nodes[2]["operationPayload"]["value"], 20);

        let plain = with_volume(target, "Alexa.Speak", Map::new(), None, 20);
        assert_eq!(plain["@type"], OPERATION_NODE_TYPE);
    }

    #[test]
    fn test_announcement_detects_ssml() {
        let device = echo();
        let ssml = announcement_parameters(&device, "<speak>Hi</speak>", "Hi", None, "A1");
        assert_eq!(ssml["content"][0]["speak"]["type"], "ssml");
        assert_eq!(ssml["content"][0]["display"]["title"], DEFAULT_TITLE);
        assert_eq!(ssml["expireAfter"], "PT5S");
        assert_eq!(ssml["target"]["customerId"], "A1OWNER");
        assert_eq!(ssml["target"]["devices"][0]["deviceTypeId"], "A3S5BH2HU6VAYF");

        let text = announcement_parameters(&device, "Hi", "Hi", Some("Door"), "A1");
        assert_eq!(text["content"][0]["speak"]["type"], "text");
        assert_eq!(text["content"][0]["display"]["title"], "Door");
    }
}
