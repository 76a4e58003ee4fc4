//! Output formatting and platform quirks.

use chrono::Local;

use crate::constants::OUTPUT_TIMESTAMP_FORMAT;

/// Host platforms with behavior differences that matter to supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Windows,
    Other,
}

impl Platform {
    /// The platform this binary was built for.
    pub const fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }

    /// Windows server builds print console lines without a timestamp.
    pub const fn omits_output_timestamps(self) -> bool {
        matches!(self, Self::Windows)
    }
}

/// Rewrites each console line before it reaches the output sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFormatter {
    inject_timestamps: bool,
}

impl OutputFormatter {
    /// Formatter matching the current platform's output conventions.
    pub const fn for_platform(platform: Platform) -> Self {
        Self {
            inject_timestamps: platform.omits_output_timestamps(),
        }
    }

    /// Formatter that always prefixes a timestamp.
    pub const fn timestamped() -> Self {
        Self {
            inject_timestamps: true,
        }
    }

    pub const fn injects_timestamps(&self) -> bool {
        self.inject_timestamps
    }

    pub fn format(&self, line: &str) -> String {
        let line = line.trim_end_matches(['\r', '\n']);
        if self.inject_timestamps {
            format!("{}{line}", Local::now().format(OUTPUT_TIMESTAMP_FORMAT))
        } else {
            line.to_string()
        }
    }
}
