//! Configuration types for the loopback adapter.
//!
//! Read from the `settings` table of the platform:
//!
//! ```toml
//! [platforms.loopback]
//! settings = { self_id = "echo-bot", latency_ms = 20 }
//!
//! # Turn individual capabilities off (or on) on top of the defaults.
//! [platforms.loopback.settings.capabilities]
//! conversation = { edit = false }
//! ```

use chorus_core::{Capabilities, Capability};
use serde::{Deserialize, Serialize};

/// Loopback adapter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackSettings {
    /// Participant id used for outbound messages.
    pub self_id: String,

    /// Flags overlaid on [`default_capabilities`]. Applied when the adapter
    /// is constructed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,

    /// Simulated backend latency per call, in milliseconds.
    pub latency_ms: u64,

    /// Messages kept per chat. Older ones are dropped first.
    pub history_limit: usize,
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            self_id: "loopback-bot".to_string(),
            capabilities: None,
            latency_ms: 0,
            history_limit: 1000,
        }
    }
}

impl LoopbackSettings {
    /// Default capabilities with the configured overrides applied.
    pub fn resolved_capabilities(&self) -> Capabilities {
        let defaults = default_capabilities();
        match &self.capabilities {
            Some(overrides) => Capabilities::merge([&defaults, overrides]),
            None => defaults,
        }
    }
}

/// Everything the in-memory backend actually implements.
pub fn default_capabilities() -> Capabilities {
    use Capability::*;
    Capabilities::from_enabled([
        SendText,
        SendMedia,
        Receive,
        Reply,
        Edit,
        Delete,
        Threads,
        Quote,
        Buttons,
        Polls,
        Reactions,
        Stickers,
        History,
        Search,
        Pins,
        MemberInfo,
        ChannelInfo,
        Kick,
        Ban,
        Timeout,
        CreateInvite,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_overrides() {
        let settings: LoopbackSettings = serde_json::from_value(json!({
            "capabilities": {
                "conversation": { "edit": false },
                "advanced": { "payments": true, "teleport": true }
            }
        }))
        .unwrap();

        let caps = settings.resolved_capabilities();
        assert!(!caps.has(Capability::Edit));
        assert!(caps.has(Capability::Reply));
        assert!(caps.has(Capability::Payments));
        assert_eq!(settings.self_id, "loopback-bot");
    }

    #[test]
    fn test_defaults_leave_unbacked_capabilities_off() {
        let caps = LoopbackSettings::default().resolved_capabilities();
        assert!(caps.has(Capability::CreateInvite));
        assert!(!caps.has(Capability::Effects));
        assert!(!caps.has(Capability::ChannelCreate));
    }
}
