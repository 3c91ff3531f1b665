//! Per-platform command table.
//!
//! Configuration itself is opaque text; the platform only decides how to
//! read it, how to wrap a push in configuration mode, and how to persist it.

/// Command set for one device type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Canonical tag
    pub name: &'static str,
    /// Command returning the running configuration
    pub show_running: &'static str,
    /// Command entering configuration mode, if any
    pub config_enter: Option<&'static str>,
    /// Command leaving configuration mode (and committing, where needed)
    pub config_exit: Option<&'static str>,
    /// Command persisting the running configuration, if any
    pub save: Option<&'static str>,
}

const CISCO_IOS: Platform = Platform {
    name: "cisco_ios",
    show_running: "show running-config",
    config_enter: Some("configure terminal"),
    config_exit: Some("end"),
    save: Some("write memory"),
};

const JUNIPER: Platform = Platform {
    name: "juniper",
    show_running: "show configuration | display set",
    config_enter: Some("configure"),
    config_exit: Some("commit and-quit"),
    save: None,
};

const LOCAL: Platform = Platform {
    name: "local",
    show_running: "show running-config",
    config_enter: None,
    config_exit: None,
    save: None,
};

/// Markers a device prints when it rejects a configuration line.
const ERROR_MARKERS: &[&str] = &[
    "% invalid",
    "% incomplete",
    "% ambiguous",
    "syntax error",
    "error:",
];

impl Platform {
    /// Resolve a device-type tag. Unknown tags fall back to the IOS command set.
    pub fn for_device_type(device_type: &str) -> Self {
        match device_type.to_ascii_lowercase().as_str() {
            "juniper" | "juniper_junos" | "junos" => JUNIPER,
            "local" => LOCAL,
            "cisco_ios" | "cisco_xe" | "ios" => CISCO_IOS,
            other => {
                log::debug!("Unknown device type '{}', using cisco_ios commands", other);
                CISCO_IOS
            }
        }
    }

    /// Wrap configuration lines in this platform's configuration mode.
    pub fn push_batch(&self, lines: &[String]) -> Vec<String> {
        let mut batch = Vec::with_capacity(lines.len() + 2);
        if let Some(enter) = self.config_enter {
            batch.push(enter.to_string());
        }
        batch.extend(lines.iter().cloned());
        if let Some(exit) = self.config_exit {
            batch.push(exit.to_string());
        }
        batch
    }

    /// First line of push output that signals a rejected command.
    pub fn rejected_line<'a>(&self, output: &'a str) -> Option<&'a str> {
        output.lines().find(|line| {
            let lower = line.trim().to_ascii_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.starts_with(m))
        })
    }
}
