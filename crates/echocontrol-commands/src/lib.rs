//! Alexa web API commands for an authenticated account.
//!
//! Provides:
//! - Player, media and bluetooth control
//! - Behavior sequences (speech, announcements, routines)
//! - Smart-home discovery and control
//! - Notifications, flash briefings and music providers

pub mod client;
pub mod error;
pub mod model;
pub mod sequence;
pub mod smarthome;

pub use client::{AccountContext, EchoCommands};
pub use error::{CommandError, Result};
pub use model::{
    Activity, AscendingAlarm, BluetoothStates, DeviceNotificationState, Equalizer, Feed, MediaState,
    MusicProvider, Notification, NotificationRequest, NotificationSound, PlayerState, Playlists,
    Routine, WakeWord,
};
pub use sequence::substitute_routine_tokens;
pub use smarthome::{SmartHomeDevice, SmartHomeGroup, SmartHomeItem};
