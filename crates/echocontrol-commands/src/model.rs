//! Typed bodies of the Alexa web API.
//!
//! Fields mirror the vendor's camelCase names. Everything is optional since
//! the vendor drops fields between firmware and app releases.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use echocontrol_core::Device;

// ---- player and media ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerState {
    pub player_info: Option<PlayerInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerInfo {
    pub state: Option<String>,
    pub main_art: Option<Art>,
    pub info_text: Option<InfoText>,
    pub progress: Option<Progress>,
    pub volume: Option<PlayerVolume>,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Art {
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InfoText {
    pub title: Option<String>,
    pub sub_text1: Option<String>,
    pub sub_text2: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Progress {
    pub allow_scrubbing: bool,
    pub media_length: Option<i64>,
    pub media_progress: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlayerVolume {
    pub muted: bool,
    pub volume: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Provider {
    pub provider_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaState {
    pub client_id: Option<String>,
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    pub current_state: Option<String>,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
    pub is_disliked: bool,
    pub is_liked: bool,
    pub looping: bool,
    pub media_owner_customer_id: Option<String>,
    pub muted: bool,
    pub progress_seconds: i64,
    pub provider_id: Option<String>,
    pub queue_id: Option<String>,
    pub queue_size: i32,
    pub radio_station_id: Option<String>,
    pub shuffling: bool,
    pub volume: i32,
}

// ---- activities ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Activities {
    pub activities: Option<Vec<Activity>>,
}

/// One entry of the voice history.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Activity {
    pub id: Option<String>,
    pub activity_status: Option<String>,
    pub creation_timestamp: Option<i64>,
    /// JSON encoded as a string; see [`Activity::summary`].
    pub description: Option<String>,
    pub source_device_ids: Option<Vec<SourceDeviceId>>,
    pub utterance_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceDeviceId {
    pub device_type: Option<String>,
    pub serial_number: Option<String>,
}

impl Activity {
    /// The recognized utterance from the embedded description document.
    pub fn summary(&self) -> Option<String> {
        let description = self.description.as_deref()?;
        let parsed: Value = serde_json::from_str(description).ok()?;
        parsed
            .get("summary")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
    }
}

// ---- bluetooth ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BluetoothStates {
    pub bluetooth_states: Option<Vec<BluetoothState>>,
}

impl BluetoothStates {
    /// State entry of the device with `serial`.
    pub fn find(&self, serial: &str) -> Option<&BluetoothState> {
        self.bluetooth_states
            .as_ref()?
            .iter()
            .find(|s| s.device_serial_number.as_deref() == Some(serial))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BluetoothState {
    pub device_serial_number: Option<String>,
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub online: bool,
    pub paired_device_list: Option<Vec<PairedDevice>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PairedDevice {
    pub address: Option<String>,
    pub connected: bool,
    pub device_class: Option<String>,
    pub friendly_name: Option<String>,
    pub profiles: Option<Vec<String>>,
}

// ---- playlists ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Playlists {
    pub playlists: Option<HashMap<String, Vec<PlaylistInfo>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaylistInfo {
    pub title: Option<String>,
    pub playlist_id: Option<String>,
    pub entry_count: Option<i32>,
}

// ---- device settings ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct DeviceNotificationStates {
    pub device_notification_states: Option<Vec<DeviceNotificationState>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceNotificationState {
    pub device_serial_number: Option<String>,
    pub device_type: Option<String>,
    pub software_version: Option<String>,
    pub volume_level: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct AscendingAlarms {
    pub ascending_alarm_model_list: Option<Vec<AscendingAlarm>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AscendingAlarm {
    pub ascending_alarm_enabled: bool,
    pub device_serial_number: Option<String>,
    pub device_type: Option<String>,
    pub device_account_id: Option<String>,
}

/// Equalizer gains, each in -6..=6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Equalizer {
    pub bass: i32,
    pub mid: i32,
    pub treble: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct WakeWords {
    pub wake_words: Option<Vec<WakeWord>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WakeWord {
    pub active: bool,
    pub device_serial_number: Option<String>,
    pub device_type: Option<String>,
    pub mid_field_state: Option<String>,
    pub wake_word: Option<String>,
}

// ---- routines ----

/// A routine as returned by the automations endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Routine {
    pub automation_id: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
    pub triggers: Option<Vec<Option<RoutineTrigger>>>,
    /// Sequence template, resubmitted after token substitution.
    pub sequence: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutineTrigger {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub payload: Option<TriggerPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerPayload {
    pub utterance: Option<String>,
    pub locale: Option<String>,
    pub customer_id: Option<String>,
}

/// Body of `/api/behaviors/preview`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartRoutineRequest {
    pub behavior_id: String,
    pub sequence_json: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

impl StartRoutineRequest {
    pub fn preview(sequence_json: String) -> Self {
        Self {
            behavior_id: "PREVIEW".to_string(),
            sequence_json,
            status: Some("ENABLED"),
        }
    }
}

// ---- flash briefings and music ----

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct EnabledFeeds {
    pub enabled_feeds: Option<Vec<Feed>>,
}

/// Flash briefing feed. Unset fields are sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Feed {
    pub feed_id: Option<String>,
    pub name: Option<String>,
    pub skill_id: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MusicProvider {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub availability: Option<String>,
    pub icon: Option<String>,
    pub supported_properties: Option<Vec<String>>,
    pub supported_operations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct SearchPhrasePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_phrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_search_phrase: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ValidationResult {
    pub operation_payload: Option<SearchPhrasePayload>,
}

// ---- notifications ----

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Notifications {
    pub notifications: Option<Vec<Notification>>,
}

/// A reminder, alarm or timer as stored by the vendor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub alarm_time: Option<i64>,
    pub created_date: Option<i64>,
    pub device_serial_number: Option<String>,
    pub device_type: Option<String>,
    pub original_date: Option<String>,
    pub original_time: Option<String>,
    pub recurring_pattern: Option<String>,
    pub reminder_label: Option<String>,
    pub remaining_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationSound {
    pub display_name: Option<String>,
    pub folder: Option<String>,
    pub id: Option<String>,
    pub provider_id: Option<String>,
    pub sample_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct NotificationSounds {
    pub notification_sounds: Option<Vec<NotificationSound>>,
}

/// Body of `/api/notifications/createReminder`. Unset fields are sent as `null`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub alarm_time: i64,
    pub original_time: String,
    pub original_date: String,
    pub time_zone_id: Option<String>,
    pub reminder_index: Option<String>,
    pub sound: Option<NotificationSound>,
    pub device_serial_number: String,
    pub device_type: String,
    pub recurring_pattern: Option<String>,
    pub reminder_label: Option<String>,
    pub is_save_in_flight: bool,
    pub id: String,
    pub is_recurring: bool,
    pub created_date: i64,
}

impl NotificationRequest {
    /// Lead time added to "now"; the vendor rejects alarm times in its past.
    pub const LEAD_TIME_MS: i64 = 5_000;

    /// A one-shot notification of `kind` (`Reminder`, `Alarm`, `Timer`)
    /// that fires shortly after `now`.
    pub fn new(
        device: &Device,
        kind: &str,
        label: Option<&str>,
        sound: Option<NotificationSound>,
        now: DateTime<Local>,
    ) -> Self {
        let alarm = now + chrono::Duration::milliseconds(Self::LEAD_TIME_MS);
        Self {
            kind: kind.to_string(),
            status: "ON".to_string(),
            alarm_time: alarm.timestamp_millis(),
            original_time: format!(
                "{}.{:04}",
                alarm.format("%H:%M:%S"),
                alarm.timestamp_subsec_millis()
            ),
            original_date: alarm.format("%Y-%m-%d").to_string(),
            time_zone_id: None,
            reminder_index: None,
            sound,
            device_serial_number: device.serial().to_string(),
            device_type: device.type_id().to_string(),
            recurring_pattern: None,
            reminder_label: label.map(|l| l.to_string()),
            is_save_in_flight: true,
            id: format!("create{}", kind),
            is_recurring: false,
            created_date: now.timestamp_millis(),
        }
    }
}
