use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a terminal profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalSource {
    /// Explicit flag or bundle override
    Override,
    /// Detected from terminal environment variables
    Environment,
    /// Static fallback
    Default,
}

/// Terminal application to bring forward after focusing the pane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TerminalProfile {
    pub key: String,
    pub name: String,
    pub bundle_id: String,
    pub source: TerminalSource,
}

struct CatalogEntry {
    key: &'static str,
    name: &'static str,
    bundle_id: &'static str,
    aliases: &'static [&'static str],
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        key: "terminal",
        name: "Terminal.app",
        bundle_id: "com.apple.Terminal",
        aliases: &["terminal", "apple-terminal", "mac-terminal", "apple_terminal"],
    },
    CatalogEntry {
        key: "iterm",
        name: "iTerm2",
        bundle_id: "com.googlecode.iterm2",
        aliases: &["iterm", "iterm2", "iterm.app"],
    },
    CatalogEntry {
        key: "alacritty",
        name: "Alacritty",
        bundle_id: "org.alacritty",
        aliases: &["alacritty"],
    },
    CatalogEntry {
        key: "kitty",
        name: "kitty",
        bundle_id: "net.kovidgoyal.kitty",
        aliases: &["kitty", "xterm-kitty"],
    },
    CatalogEntry {
        key: "wezterm",
        name: "WezTerm",
        bundle_id: "com.github.wez.wezterm",
        aliases: &["wezterm"],
    },
    CatalogEntry {
        key: "hyper",
        name: "Hyper",
        bundle_id: "co.zeit.hyper",
        aliases: &["hyper"],
    },
    CatalogEntry {
        key: "ghostty",
        name: "Ghostty",
        bundle_id: "com.mitchellh.ghostty",
        aliases: &["ghostty", "xterm-ghostty"],
    },
];

const DEFAULT_KEY: &str = "terminal";

/// Environment variables consulted for detection, in priority order
const ENV_CANDIDATES: [&str; 3] = ["CA_TERM", "TERM_PROGRAM", "TERM"];

fn find_by_alias(value: &str) -> Option<&'static CatalogEntry> {
    let normalized = value.trim().to_lowercase();
    CATALOG
        .iter()
        .find(|entry| entry.aliases.iter().any(|alias| *alias == normalized))
}

fn find_by_bundle_id(bundle_id: &str) -> Option<&'static CatalogEntry> {
    let normalized = bundle_id.trim().to_lowercase();
    CATALOG
        .iter()
        .find(|entry| entry.bundle_id.to_lowercase() == normalized)
}

fn build_profile(entry: &CatalogEntry, source: TerminalSource) -> TerminalProfile {
    TerminalProfile {
        key: entry.key.to_string(),
        name: entry.name.to_string(),
        bundle_id: entry.bundle_id.to_string(),
        source,
    }
}

fn custom_profile(value: &str) -> TerminalProfile {
    TerminalProfile {
        key: "custom".to_string(),
        name: value.to_string(),
        bundle_id: value.to_string(),
        source: TerminalSource::Override,
    }
}

/// Inputs for [`resolve_terminal_profile`]
#[derive(Debug, Default)]
pub struct ResolveInput<'a> {
    /// `--terminal` flag or `PANE_NOTIFIER_TERMINAL`
    pub explicit_key: Option<&'a str>,
    /// `--term-bundle-id` flag
    pub bundle_override: Option<&'a str>,
    /// Environment snapshot used for detection
    pub env: Option<&'a HashMap<String, String>>,
}

/// Resolve the terminal profile: bundle override, explicit key, environment, default
pub fn resolve_terminal_profile(input: &ResolveInput<'_>) -> TerminalProfile {
    if let Some(bundle) = input.bundle_override.filter(|b| !b.is_empty()) {
        return match find_by_bundle_id(bundle) {
            Some(entry) => build_profile(entry, TerminalSource::Override),
            None => custom_profile(bundle),
        };
    }

    if let Some(key) = input.explicit_key.filter(|k| !k.is_empty()) {
        return match find_by_alias(key).or_else(|| find_by_bundle_id(key)) {
            Some(entry) => build_profile(entry, TerminalSource::Override),
            None => custom_profile(key),
        };
    }

    if let Some(env) = input.env {
        let detected = ENV_CANDIDATES
            .iter()
            .filter_map(|name| env.get(*name))
            .filter(|value| !value.is_empty())
            .find_map(|value| find_by_alias(value));
        if let Some(entry) = detected {
            return build_profile(entry, TerminalSource::Environment);
        }
    }

    let fallback = CATALOG
        .iter()
        .find(|entry| entry.key == DEFAULT_KEY)
        .unwrap_or(&CATALOG[0]);
    build_profile(fallback, TerminalSource::Default)
}
