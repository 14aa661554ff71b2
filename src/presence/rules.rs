//! Static matching rules for meeting detection.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::inspector::{AppIdentity, Browser};

/// Bundle ids of dedicated meeting applications.
const MEETING_BUNDLES: &[&str] = &[
    "us.zoom.xos",              // Zoom
    "com.microsoft.teams",      // Microsoft Teams
    "com.cisco.webex.meetings", // Webex
    "com.tinyspeck.slackmacgap", // Slack
];

/// URL patterns that identify a meeting tab in a browser.
const MEETING_URL_PATTERNS: &[&str] = &[
    r"(?i)meet\.google\.com",
    r"(?i)zoom\.us/j/",
    r"(?i)teams\.microsoft\.com/.*",
    r"(?i)webex\.com/meet",
];

const CHROME_BUNDLE: &str = "com.google.Chrome";
const SAFARI_BUNDLE: &str = "com.apple.Safari";

/// Compiled matching rules: meeting app bundle ids, meeting URL regexes
/// and the browser → tab-query mapping. Built once at detector creation.
pub struct MeetingRules {
    meeting_bundles: HashSet<String>,
    url_patterns: Vec<Regex>,
    browsers: HashMap<String, Browser>,
}

impl MeetingRules {
    /// Built-in rules only.
    pub fn builtin() -> Self {
        // The built-in patterns are static and known-valid.
        Self::with_extras(&[], &[]).expect("built-in rules must compile")
    }

    /// Built-in rules extended with config-supplied bundle ids and URL
    /// patterns. An invalid extra pattern is a config error.
    pub fn with_extras(extra_bundles: &[String], extra_patterns: &[String]) -> Result<Self> {
        let mut meeting_bundles: HashSet<String> =
            MEETING_BUNDLES.iter().map(|s| s.to_string()).collect();
        meeting_bundles.extend(extra_bundles.iter().cloned());

        let mut url_patterns = Vec::with_capacity(MEETING_URL_PATTERNS.len() + extra_patterns.len());
        for pattern in MEETING_URL_PATTERNS {
            url_patterns.push(Regex::new(pattern).expect("built-in pattern must compile"));
        }
        for pattern in extra_patterns {
            let compiled = Regex::new(pattern)
                .with_context(|| format!("Invalid meeting URL pattern: {}", pattern))?;
            url_patterns.push(compiled);
        }

        let browsers = HashMap::from([
            (CHROME_BUNDLE.to_string(), Browser::Chrome),
            (SAFARI_BUNDLE.to_string(), Browser::Safari),
        ]);

        Ok(Self {
            meeting_bundles,
            url_patterns,
            browsers,
        })
    }

    /// Does any running app match a known meeting application?
    pub fn any_meeting_process(&self, apps: &[AppIdentity]) -> bool {
        apps.iter()
            .any(|app| self.meeting_bundles.contains(&app.bundle_id))
    }

    /// Does this URL look like an active meeting?
    pub fn is_meeting_url(&self, url: &str) -> bool {
        self.url_patterns.iter().any(|pattern| pattern.is_match(url))
    }

    /// Which browser's tab to query for this foreground app, if any.
    pub fn browser_for(&self, bundle_id: &str) -> Option<Browser> {
        self.browsers.get(bundle_id).copied()
    }
}
