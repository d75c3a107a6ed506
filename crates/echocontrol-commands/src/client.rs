//! Vendor operations on top of an authenticated pipeline.

use std::collections::HashMap;

use chrono::Local;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use echocontrol_core::config::defaults;
use echocontrol_core::device;
use echocontrol_core::http::{HttpPipeline, RequestOptions};
use echocontrol_core::{AuthSession, Device};

use crate::error::{CommandError, Result};
use crate::model::{
    Activities, Activity, AscendingAlarm, AscendingAlarms, BluetoothStates, DeviceNotificationState,
    DeviceNotificationStates, EnabledFeeds, Equalizer, Feed, MediaState, MusicProvider, Notification,
    NotificationRequest, NotificationSound, NotificationSounds, Notifications, PlayerState, Playlists,
    Routine, SearchPhrasePayload, StartRoutineRequest, ValidationResult, WakeWord, WakeWords,
};
use crate::sequence::{self, NodeTarget};
use crate::smarthome::{self, NetworkDetails, SmartHomeItem};

const PAUSE_COMMAND: &str = r#"{"type":"PauseCommand"}"#;
const ROUTINES_VERSION: &str = "1.1.218665";
const MUSIC_SKILL_ID: &str = "amzn1.ask.1p.music";
const PLAY_SEARCH_PHRASE: &str = "Alexa.Music.PlaySearchPhrase";

/// Account values the commands need, captured from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    /// `https://alexa.<site>`
    pub alexa_server: String,
    pub customer_id: Option<String>,
}

impl AccountContext {
    pub fn new(alexa_server: impl Into<String>, customer_id: Option<String>) -> Self {
        Self {
            alexa_server: alexa_server.into(),
            customer_id,
        }
    }

    pub fn from_session(session: &AuthSession) -> Self {
        Self::new(
            session.alexa_server(),
            session.customer_id().map(|id| id.to_string()),
        )
    }

    /// The account customer id, or the device owner's when unknown.
    pub fn customer_id_for<'a>(&'a self, device: &'a Device) -> &'a str {
        self.customer_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or(device.device_owner_customer_id.as_deref())
            .unwrap_or_default()
    }
}

/// Alexa web API operations for one account.
///
/// Holds a pipeline clone, so the cookie jar stays shared with the session.
/// Build a new instance after the session switched sites or logged in again.
#[derive(Clone)]
pub struct EchoCommands {
    pipeline: HttpPipeline,
    context: AccountContext,
}

impl EchoCommands {
    pub fn new(pipeline: HttpPipeline, context: AccountContext) -> Self {
        Self { pipeline, context }
    }

    pub fn for_session(session: &AuthSession) -> Self {
        Self::new(session.pipeline().clone(), AccountContext::from_session(session))
    }

    pub fn context(&self) -> &AccountContext {
        &self.context
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.context.alexa_server, path)
    }

    async fn get_text(&self, path: &str) -> Result<String> {
        Ok(self.pipeline.execute_text(RequestOptions::get(self.url(path))).await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let text = self.get_text(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_json(&self, options: RequestOptions) -> Result<String> {
        Ok(self.pipeline.execute_text(options).await?)
    }

    // ---- devices and players ----

    pub async fn device_list(&self) -> Result<Vec<Device>> {
        let json = self.device_list_json().await?;
        Ok(device::parse_device_list(&json)?)
    }

    pub async fn device_list_json(&self) -> Result<String> {
        Ok(device::fetch_device_list_json(&self.pipeline, &self.context.alexa_server).await?)
    }

    pub async fn player_state(&self, device: &Device) -> Result<PlayerState> {
        self.get_json(&format!(
            "/api/np/player?deviceSerialNumber={}&deviceType={}&screenWidth=1440",
            device.serial(),
            device.type_id()
        ))
        .await
    }

    pub async fn media_state(&self, device: &Device) -> Result<MediaState> {
        self.get_json(&format!(
            "/api/media/state?deviceSerialNumber={}&deviceType={}",
            device.serial(),
            device.type_id()
        ))
        .await
    }

    /// Send a raw player command such as `{"type":"PlayCommand"}`.
    pub async fn send_command(&self, device: &Device, command: &str) -> Result<()> {
        let url = self.url(&format!(
            "/api/np/command?deviceSerialNumber={}&deviceType={}",
            device.serial(),
            device.type_id()
        ));
        self.send_json(RequestOptions::post(url).json_body(command)).await?;
        Ok(())
    }

    pub async fn pause(&self, device: &Device) -> Result<()> {
        self.send_command(device, PAUSE_COMMAND).await
    }

    /// Tune in a station. No station pauses playback instead.
    pub async fn play_radio(&self, device: &Device, station_id: Option<&str>) -> Result<()> {
        let Some(station_id) = station_id.filter(|s| !s.is_empty()) else {
            return self.pause(device).await;
        };
        let url = self.url(&format!(
            "/api/tunein/queue-and-play?deviceSerialNumber={}&deviceType={}&guideId={}\
             &contentType=station&callSign=&mediaOwnerCustomerId={}",
            device.serial(),
            device.type_id(),
            urlencoding::encode(station_id),
            self.context.customer_id_for(device)
        ));
        self.send_json(RequestOptions::post(url).json_body("")).await?;
        Ok(())
    }

    /// Queue and play a track. No track pauses playback instead.
    pub async fn play_amazon_music_track(&self, device: &Device, track_id: Option<&str>) -> Result<()> {
        match track_id.filter(|t| !t.is_empty()) {
            Some(track_id) => {
                self.queue_and_play(device, json!({ "trackId": track_id, "playQueuePrime": true }))
                    .await
            }
            None => self.pause(device).await,
        }
    }

    /// Queue and play a playlist. No playlist pauses playback instead.
    pub async fn play_amazon_music_playlist(
        &self,
        device: &Device,
        playlist_id: Option<&str>,
    ) -> Result<()> {
        match playlist_id.filter(|p| !p.is_empty()) {
            Some(playlist_id) => {
                self.queue_and_play(
                    device,
                    json!({ "playlistId": playlist_id, "playQueuePrime": true }),
                )
                .await
            }
            None => self.pause(device).await,
        }
    }

    async fn queue_and_play(&self, device: &Device, body: Value) -> Result<()> {
        let url = self.url(&format!(
            "/api/cloudplayer/queue-and-play?deviceSerialNumber={}&deviceType={}\
             &mediaOwnerCustomerId={}&shuffle=false",
            device.serial(),
            device.type_id(),
            self.context.customer_id_for(device)
        ));
        self.send_json(RequestOptions::post(url).json_body(body.to_string()))
            .await?;
        Ok(())
    }

    pub async fn playlists(&self, device: &Device) -> Result<Playlists> {
        self.get_json(&format!(
            "/api/cloudplayer/playlists?deviceSerialNumber={}&deviceType={}&mediaOwnerCustomerId={}",
            device.serial(),
            device.type_id(),
            self.context.customer_id_for(device)
        ))
        .await
    }

    // ---- bluetooth ----

    /// Pair with `address`, or disconnect the current sink when there is none.
    pub async fn bluetooth(&self, device: &Device, address: Option<&str>) -> Result<()> {
        let options = match address.filter(|a| !a.is_empty()) {
            Some(address) => RequestOptions::post(self.url(&format!(
                "/api/bluetooth/pair-sink/{}/{}",
                device.type_id(),
                device.serial()
            )))
            .json_body(json!({ "bluetoothDeviceAddress": address }).to_string()),
            None => RequestOptions::post(self.url(&format!(
                "/api/bluetooth/disconnect-sink/{}/{}",
                device.type_id(),
                device.serial()
            )))
            .json_body(""),
        };
        self.send_json(options).await?;
        Ok(())
    }

    pub async fn bluetooth_states(&self) -> Result<BluetoothStates> {
        self.get_json("/api/bluetooth?cached=true").await
    }

    // ---- device settings ----

    pub async fn notification_volume(&self, device: &Device, volume: i32) -> Result<()> {
        let url = self.url(&format!(
            "/api/device-notification-state/{}/{}/{}",
            device.type_id(),
            device.software_version(),
            device.serial()
        ));
        let body = json!({
            "deviceSerialNumber": device.serial(),
            "deviceType": device.type_id(),
            "softwareVersion": device.software_version(),
            "volumeLevel": volume,
        });
        self.send_json(RequestOptions::put(url).json_body(body.to_string()))
            .await?;
        Ok(())
    }

    pub async fn ascending_alarm(&self, device: &Device, enabled: bool) -> Result<()> {
        let url = self.url(&format!("/api/ascending-alarm/{}", device.serial()));
        let body = json!({
            "ascendingAlarmEnabled": enabled,
            "deviceSerialNumber": device.serial(),
            "deviceType": device.type_id(),
            "deviceAccountId": null,
        });
        self.send_json(RequestOptions::put(url).json_body(body.to_string()))
            .await?;
        Ok(())
    }

    pub async fn device_notification_states(&self) -> Result<Vec<DeviceNotificationState>> {
        let states: DeviceNotificationStates =
            self.get_json("/api/device-notification-state").await?;
        Ok(states.device_notification_states.unwrap_or_default())
    }

    pub async fn ascending_alarms(&self) -> Result<Vec<AscendingAlarm>> {
        let alarms: AscendingAlarms = self.get_json("/api/ascending-alarm").await?;
        Ok(alarms.ascending_alarm_model_list.unwrap_or_default())
    }

    pub async fn equalizer(&self, device: &Device) -> Result<Equalizer> {
        self.get_json(&format!(
            "/api/equalizer/{}/{}",
            device.serial(),
            device.type_id()
        ))
        .await
    }

    pub async fn set_equalizer(&self, device: &Device, settings: &Equalizer) -> Result<()> {
        let url = self.url(&format!(
            "/api/equalizer/{}/{}",
            device.serial(),
            device.type_id()
        ));
        self.send_json(RequestOptions::post(url).json_body(serde_json::to_string(settings)?))
            .await?;
        Ok(())
    }

    pub async fn wake_words(&self) -> Result<Vec<WakeWord>> {
        let words: WakeWords = self.get_json("/api/wake-word?cached=true").await?;
        Ok(words.wake_words.unwrap_or_default())
    }

    /// Voice history, newest first. `start_time` is epoch milliseconds.
    pub async fn activities(&self, count: u32, start_time: Option<i64>) -> Result<Vec<Activity>> {
        let start = start_time.map(|t| t.to_string()).unwrap_or_default();
        let activities: Activities = self
            .get_json(&format!(
                "/api/activities?startTime={}&size={}&offset=1",
                start, count
            ))
            .await?;
        Ok(activities.activities.unwrap_or_default())
    }

    // ---- sequences ----

    /// Run a single behavior command, e.g. `Alexa.Weather.Play`.
    pub async fn execute_sequence_command(
        &self,
        device: Option<&Device>,
        command: &str,
        parameters: Map<String, Value>,
    ) -> Result<()> {
        let target = device.map(|device| NodeTarget {
            device,
            customer_id: self.context.customer_id_for(device),
        });
        self.execute_sequence_node(sequence::operation_node(target, command, parameters))
            .await
    }

    async fn execute_sequence_node(&self, node: Value) -> Result<()> {
        let request = StartRoutineRequest::preview(sequence::sequence(node).to_string());
        self.preview(&request).await
    }

    async fn preview(&self, request: &StartRoutineRequest) -> Result<()> {
        let options = RequestOptions::post(self.url("/api/behaviors/preview"))
            .json_body(serde_json::to_string(request)?)
            .bad_request_retries(defaults::SEQUENCE_RETRIES);
        // A scheduled retry keeps running after the response is dropped.
        self.pipeline.execute(options).await?;
        Ok(())
    }

    pub async fn text_to_speech(
        &self,
        device: &Device,
        text: &str,
        tts_volume: Option<i32>,
        standard_volume: i32,
    ) -> Result<()> {
        let mut parameters = Map::new();
        parameters.insert("textToSpeak".into(), json!(text));
        let target = self.target(device);
        self.execute_sequence_node(sequence::with_volume(
            target,
            "Alexa.Speak",
            parameters,
            tts_volume,
            standard_volume,
        ))
        .await
    }

    pub async fn announce(
        &self,
        device: &Device,
        speak: &str,
        body: &str,
        title: Option<&str>,
        tts_volume: Option<i32>,
        standard_volume: i32,
    ) -> Result<()> {
        let target = self.target(device);
        let parameters =
            sequence::announcement_parameters(device, speak, body, title, target.customer_id);
        self.execute_sequence_node(sequence::with_volume(
            target,
            "AlexaAnnouncement",
            parameters,
            tts_volume,
            standard_volume,
        ))
        .await
    }

    /// Push a notification to the Alexa mobile app of `customer_id`.
    pub async fn send_mobile_push(&self, customer_id: &str, text: &str, title: Option<&str>) -> Result<()> {
        self.execute_sequence_command(
            None,
            "Alexa.Notifications.SendMobilePush",
            sequence::mobile_push_parameters(customer_id, text, title),
        )
        .await
    }

    fn target<'a>(&'a self, device: &'a Device) -> NodeTarget<'a> {
        NodeTarget {
            device,
            customer_id: self.context.customer_id_for(device),
        }
    }

    // ---- routines ----

    pub async fn routines(&self) -> Result<Vec<Routine>> {
        let routines: Option<Vec<Option<Routine>>> =
            self.get_json("/api/behaviors/automations?limit=2000").await?;
        Ok(routines.unwrap_or_default().into_iter().flatten().collect())
    }

    /// Start the routine whose trigger utterance matches, ignoring case.
    pub async fn start_routine(&self, device: &Device, utterance: &str) -> Result<()> {
        let routines = self.routines().await?;
        let Some((routine, locale)) = find_routine(&routines, utterance) else {
            tracing::warn!(utterance, "Routine not found");
            return Err(CommandError::RoutineNotFound(utterance.to_string()));
        };

        let template = match &routine.sequence {
            Some(sequence) => serde_json::to_string(sequence)?,
            None => "null".to_string(),
        };
        let sequence_json = sequence::substitute_routine_tokens(
            &template,
            device.type_id(),
            device.serial(),
            self.context.customer_id_for(device),
            locale,
        );
        let request = StartRoutineRequest {
            behavior_id: routine.automation_id.clone().unwrap_or_default(),
            sequence_json,
            status: Some("ENABLED"),
        };
        self.preview(&request).await
    }

    // ---- smart home ----

    pub async fn smart_home_devices(&self) -> Result<Vec<SmartHomeItem>> {
        let details: NetworkDetails = self.get_json("/api/phoenix").await?;
        let Some(detail) = details.network_detail else {
            tracing::warn!("Smart home network detail missing");
            return Ok(Vec::new());
        };
        let tree: Value = serde_json::from_str(&detail)?;
        let items = smarthome::collect_smart_home_items(&tree)?;
        tracing::debug!(count = items.len(), "Smart home devices found");
        Ok(items)
    }

    /// Capability states of `entity_ids`, keyed by entity id.
    pub async fn smart_home_device_states(&self, entity_ids: &[&str]) -> Result<HashMap<String, Vec<Value>>> {
        let body = smarthome::state_request(entity_ids).to_string();
        let text = self
            .send_json(RequestOptions::post(self.url("/api/phoenix/state")).json_body(body))
            .await?;
        let answer: Value = serde_json::from_str(&text)?;
        Ok(smarthome::parse_device_states(&answer))
    }

    pub async fn smart_home_command(
        &self,
        entity_id: &str,
        action: &str,
        property: Option<&str>,
        value: Option<Value>,
    ) -> Result<()> {
        let body = smarthome::control_request(entity_id, action, property, value).to_string();
        let text = self
            .send_json(RequestOptions::put(self.url("/api/phoenix/state")).json_body(body.clone()))
            .await?;
        let answer: Value = serde_json::from_str(&text)?;
        if let Some(errors) = smarthome::vendor_errors(&answer) {
            tracing::info!(request = %body, errors = errors.len(), "Smart home device command failed");
            return Err(CommandError::VendorErrors(errors));
        }
        Ok(())
    }

    // ---- notifications ----

    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let notifications: Notifications = self.get_json("/api/notifications").await?;
        Ok(notifications.notifications.unwrap_or_default())
    }

    /// Create a one-shot `Reminder`, `Alarm` or `Timer` a few seconds from now.
    pub async fn create_notification(
        &self,
        device: &Device,
        kind: &str,
        label: Option<&str>,
        sound: Option<NotificationSound>,
    ) -> Result<Notification> {
        let request = NotificationRequest::new(device, kind, label, sound, Local::now());
        let text = self
            .send_json(
                RequestOptions::put(self.url("/api/notifications/createReminder"))
                    .json_body(serde_json::to_string(&request)?),
            )
            .await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn stop_notification(&self, id: &str) -> Result<()> {
        self.send_json(RequestOptions::delete(self.url(&format!("/api/notifications/{}", id))))
            .await?;
        Ok(())
    }

    pub async fn notification_state(&self, id: &str) -> Result<Notification> {
        self.get_json(&format!("/api/notifications/{}", id)).await
    }

    pub async fn notification_sounds(&self, device: &Device) -> Result<Vec<NotificationSound>> {
        let sounds: NotificationSounds = self
            .get_json(&format!(
                "/api/notification/sounds?deviceSerialNumber={}&deviceType={}&softwareVersion={}",
                device.serial(),
                device.type_id(),
                device.software_version()
            ))
            .await?;
        Ok(sounds.notification_sounds.unwrap_or_default())
    }

    // ---- content ----

    pub async fn enabled_flash_briefings(&self) -> Result<Vec<Feed>> {
        let feeds: EnabledFeeds = self.get_json("/api/content-skills/enabled-feeds").await?;
        Ok(feeds.enabled_feeds.unwrap_or_default())
    }

    pub async fn set_enabled_flash_briefings(&self, feeds: &[Feed]) -> Result<()> {
        let body = serde_json::to_string(&EnabledFeeds {
            enabled_feeds: Some(feeds.to_vec()),
        })?;
        self.send_json(
            RequestOptions::post(self.url("/api/content-skills/enabled-feeds")).json_body(body),
        )
        .await?;
        Ok(())
    }

    pub async fn music_providers(&self) -> Result<Vec<MusicProvider>> {
        let text = self
            .pipeline
            .execute_text(
                RequestOptions::get(self.url(&format!(
                    "/api/behaviors/entities?skillId={}",
                    MUSIC_SKILL_ID
                )))
                .header("Routines-Version", ROUTINES_VERSION),
            )
            .await?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Play what `phrase` finds at `provider_id`, as if spoken to the device.
    pub async fn play_music_voice_command(
        &self,
        device: &Device,
        provider_id: &str,
        phrase: &str,
    ) -> Result<()> {
        let mut payload = SearchPhrasePayload {
            customer_id: Some(self.context.customer_id_for(device).to_string()),
            locale: Some("ALEXA_CURRENT_LOCALE".to_string()),
            music_provider_id: Some(provider_id.to_string()),
            search_phrase: Some(phrase.to_string()),
            ..Default::default()
        };

        let validate = json!({
            "type": PLAY_SEARCH_PHRASE,
            "operationPayload": serde_json::to_string(&payload)?,
        });
        let answer = self
            .send_json(
                RequestOptions::post(self.url("/api/behaviors/operation/validate"))
                    .json_body(validate.to_string()),
            )
            .await?;
        if !answer.is_empty() {
            let validated: ValidationResult = serde_json::from_str(&answer)?;
            if let Some(validated) = validated.operation_payload {
                payload.sanitized_search_phrase = validated.sanitized_search_phrase;
                payload.search_phrase = validated.search_phrase;
            }
        }

        payload.locale = None;
        payload.device_serial_number = Some(device.serial().to_string());
        payload.device_type = Some(device.type_id().to_string());

        let node = json!({
            "@type": "com.amazon.alexa.behaviors.model.OpaquePayloadOperationNode",
            "type": PLAY_SEARCH_PHRASE,
            "operationPayload": serde_json::to_value(&payload)?,
        });
        let request = StartRoutineRequest {
            behavior_id: "PREVIEW".to_string(),
            sequence_json: sequence::sequence(node).to_string(),
            status: None,
        };
        self.preview(&request).await
    }
}

/// Routine with a trigger whose utterance matches, and that trigger's locale.
///
/// Within a routine the first matching trigger counts; across routines the
/// last match wins.
fn find_routine<'a>(routines: &'a [Routine], utterance: &str) -> Option<(&'a Routine, Option<&'a str>)> {
    routines
        .iter()
        .filter(|routine| routine.sequence.is_some())
        .filter_map(|routine| {
            routine
                .triggers
                .iter()
                .flatten()
                .flatten()
                .filter_map(|trigger| trigger.payload.as_ref())
                .find(|payload| {
                    payload
                        .utterance
                        .as_deref()
                        .map(|u| u.eq_ignore_ascii_case(utterance))
                        .unwrap_or(false)
                })
                .map(|payload| (routine, payload.locale.as_deref()))
        })
        .last()
}
