//! Capability model.
//!
//! Every adapter declares, once, which features its platform supports. The
//! declaration is a fixed two-level taxonomy: six [`Category`] values, each
//! owning a closed set of [`Capability`] keys. A key that is not declared is
//! `false`.
//!
//! The wire form is a nested map, as adapters and configuration files write
//! it:
//!
//! ```json
//! { "base": { "sendText": true, "sendMedia": true }, "conversation": { "edit": false } }
//! ```
//!
//! String lookups never fail: unknown categories or keys simply answer `false`.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

// =============================================================================
// Category
// =============================================================================

/// Top-level capability group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Base,
    Conversation,
    Interaction,
    Discovery,
    Management,
    Advanced,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Category; 6] = [
        Category::Base,
        Category::Conversation,
        Category::Interaction,
        Category::Discovery,
        Category::Management,
        Category::Advanced,
    ];

    /// Wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Conversation => "conversation",
            Self::Interaction => "interaction",
            Self::Discovery => "discovery",
            Self::Management => "management",
            Self::Advanced => "advanced",
        }
    }

    /// Parses a wire name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// The capabilities belonging to this category.
    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL
            .iter()
            .copied()
            .filter(move |cap| cap.category() == *self)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Capability
// =============================================================================

macro_rules! define_capabilities {
    ($($category:ident { $($variant:ident => $key:literal),* $(,)? })*) => {
        /// A single feature an adapter may support.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Capability {
            $($($variant,)*)*
        }

        impl Capability {
            /// Every known capability, grouped by category.
            pub const ALL: &'static [Capability] = &[$($(Capability::$variant,)*)*];

            /// The category this capability belongs to.
            pub fn category(&self) -> Category {
                match self {
                    $($(Self::$variant => Category::$category,)*)*
                }
            }

            /// Wire key within the category, e.g. `"sendText"`.
            pub fn key(&self) -> &'static str {
                match self {
                    $($(Self::$variant => $key,)*)*
                }
            }
        }
    };
}

define_capabilities! {
    Base {
        SendText => "sendText",
        SendMedia => "sendMedia",
        Receive => "receive",
    }
    Conversation {
        Reply => "reply",
        Edit => "edit",
        Delete => "delete",
        Threads => "threads",
        Quote => "quote",
    }
    Interaction {
        Buttons => "buttons",
        Polls => "polls",
        Reactions => "reactions",
        Stickers => "stickers",
        Effects => "effects",
    }
    Discovery {
        History => "history",
        Search => "search",
        Pins => "pins",
        MemberInfo => "memberInfo",
        ChannelInfo => "channelInfo",
    }
    Management {
        Kick => "kick",
        Ban => "ban",
        Timeout => "timeout",
        ChannelCreate => "channelCreate",
        ChannelEdit => "channelEdit",
        ChannelDelete => "channelDelete",
        Permissions => "permissions",
    }
    Advanced {
        Inline => "inline",
        DeepLinks => "deepLinks",
        CreateInvite => "createInvite",
        Topics => "topics",
        Batch => "batch",
        Payments => "payments",
    }
}

impl Capability {
    /// Looks up a capability by its category and key names.
    pub fn parse(category: &str, key: &str) -> Option<Self> {
        let category = Category::parse(category)?;
        category.capabilities().find(|cap| cap.key() == key)
    }
}

impl fmt::Display for Capability {
    /// Formats as `category.key`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category(), self.key())
    }
}

// =============================================================================
// Capabilities
// =============================================================================

/// The full capability declaration of one adapter.
///
/// Absent entries read as `false`. Built once at adapter construction and not
/// mutated after it is exposed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    flags: BTreeMap<Capability, bool>,
}

impl Capabilities {
    /// Nothing supported.
    pub fn none() -> Self {
        Self::default()
    }

    /// Everything supported.
    pub fn all() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    /// Builds from a list of enabled capabilities.
    pub fn from_enabled(caps: impl IntoIterator<Item = Capability>) -> Self {
        caps.into_iter().collect()
    }

    /// Sets an explicit flag.
    pub fn with(mut self, capability: Capability, supported: bool) -> Self {
        self.flags.insert(capability, supported);
        self
    }

    /// Marks a capability as supported.
    pub fn enable(self, capability: Capability) -> Self {
        self.with(capability, true)
    }

    /// Whether `capability` is declared `true`.
    pub fn has(&self, capability: Capability) -> bool {
        self.flags.get(&capability).copied().unwrap_or(false)
    }

    /// String form of [`has`](Self::has). Unknown names return `false`.
    pub fn has_key(&self, category: &str, key: &str) -> bool {
        Capability::parse(category, key).is_some_and(|cap| self.has(cap))
    }

    /// Iterates over supported capabilities.
    pub fn enabled(&self) -> impl Iterator<Item = Capability> + '_ {
        self.flags
            .iter()
            .filter_map(|(cap, on)| on.then_some(*cap))
    }

    /// Combines partial declarations. For each key the right-most partial that
    /// mentions it wins; keys no partial mentions are `false`. Inputs are left
    /// untouched.
    pub fn merge<'a>(partials: impl IntoIterator<Item = &'a Capabilities>) -> Capabilities {
        let mut merged = Capabilities::default();
        for partial in partials {
            merged
                .flags
                .extend(partial.flags.iter().map(|(cap, on)| (*cap, *on)));
        }
        merged
    }

    /// Declared flags of one category, including explicit `false` entries.
    pub fn category(&self, category: Category) -> BTreeMap<Capability, bool> {
        self.flags
            .iter()
            .filter(|(cap, _)| cap.category() == category)
            .map(|(cap, on)| (*cap, *on))
            .collect()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().map(|cap| (cap, true)).collect(),
        }
    }
}

impl Serialize for Capabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut nested: BTreeMap<Category, BTreeMap<&'static str, bool>> = BTreeMap::new();
        for (cap, on) in &self.flags {
            nested
                .entry(cap.category())
                .or_default()
                .insert(cap.key(), *on);
        }

        let mut map = serializer.serialize_map(Some(nested.len()))?;
        for (category, flags) in &nested {
            map.serialize_entry(category.as_str(), flags)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let nested = BTreeMap::<String, BTreeMap<String, bool>>::deserialize(deserializer)?;
        let flags = nested
            .iter()
            .flat_map(|(category, keys)| {
                keys.iter().filter_map(move |(key, on)| {
                    Capability::parse(category, key).map(|cap| (cap, *on))
                })
            })
            .collect();
        Ok(Self { flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_right_most_wins_and_inputs_untouched() {
        let a = Capabilities::none()
            .enable(Capability::SendText)
            .with(Capability::Edit, false);
        let b = Capabilities::none().enable(Capability::Edit);
        let a_before = a.clone();
        let b_before = b.clone();

        let merged = Capabilities::merge([&a, &b]);

        assert!(merged.has(Capability::SendText));
        assert!(merged.has(Capability::Edit));
        assert!(!merged.has(Capability::Delete));
        assert_eq!(a, a_before);
        assert_eq!(b, b_before);

        let reversed = Capabilities::merge([&b, &a]);
        assert!(!reversed.has(Capability::Edit));
    }

    #[test]
    fn test_has_key_unknowns_are_false() {
        let caps = Capabilities::all();
        assert!(caps.has_key("base", "sendText"));
        assert!(caps.has_key("discovery", "memberInfo"));
        assert!(!caps.has_key("base", "teleport"));
        assert!(!caps.has_key("nonsense", "sendText"));
        assert!(!caps.has_key("conversation", "sendText"));
        assert!(!Capabilities::none().has_key("base", "sendText"));
    }

    #[test]
    fn test_every_capability_round_trips_through_its_names() {
        for cap in Capability::ALL {
            let category = cap.category().as_str();
            assert_eq!(Capability::parse(category, cap.key()), Some(*cap));
        }
        assert_eq!(Capability::ALL.len(), 31);
        assert_eq!(Category::Management.capabilities().count(), 7);
    }

    #[test]
    fn test_nested_wire_format() {
        let caps = Capabilities::none()
            .enable(Capability::SendText)
            .with(Capability::Edit, false)
            .enable(Capability::CreateInvite);

        let json = serde_json::to_value(&caps).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "base": { "sendText": true },
                "conversation": { "edit": false },
                "advanced": { "createInvite": true },
            })
        );
    }

    #[test]
    fn test_deserialize_ignores_unknown_entries() {
        let caps: Capabilities = serde_json::from_value(serde_json::json!({
            "base": { "sendText": true, "hologram": true },
            "telepathy": { "read": true },
            "interaction": { "polls": true },
        }))
        .unwrap();

        assert_eq!(
            caps.enabled().collect::<Vec<_>>(),
            vec![Capability::SendText, Capability::Polls]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Capability::MemberInfo.to_string(), "discovery.memberInfo");
    }
}
