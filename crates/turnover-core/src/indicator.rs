use serde::{Deserialize, Serialize};

use crate::config::Config;

pub const DEFAULT_TODAY_COLOR: &str = "#FF6B35";
pub const DEFAULT_MULTI_TASK_COLOR: &str = "#2196F3";
pub const DEFAULT_SINGLE_TASK_COLOR: &str = "#4CAF50";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DotSize {
    Small,
    Large,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorPriority {
    Normal,
    Medium,
    High,
}

/// How a calendar day renders its task marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DotConfig {
    pub show_dot: bool,
    pub show_count: bool,
    pub dot_size: DotSize,
    pub dot_color: String,
    pub display_count: String,
    pub priority: IndicatorPriority,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorPalette {
    pub today: String,
    pub multi_task: String,
    pub single_task: String,
}

impl Default for IndicatorPalette {
    fn default() -> Self {
        Self {
            today: DEFAULT_TODAY_COLOR.to_string(),
            multi_task: DEFAULT_MULTI_TASK_COLOR.to_string(),
            single_task: DEFAULT_SINGLE_TASK_COLOR.to_string(),
        }
    }
}

impl IndicatorPalette {
    /// Reads `indicator.color.{today,multi,single}`, keeping defaults for
    /// anything unset or not shaped like a hex color.
    pub fn from_config(cfg: &Config) -> Self {
        let mut palette = Self::default();
        for (key, slot) in [
            ("indicator.color.today", &mut palette.today),
            ("indicator.color.multi", &mut palette.multi_task),
            ("indicator.color.single", &mut palette.single_task),
        ] {
            let Some(raw) = cfg.get(key) else {
                continue;
            };
            let value = raw.trim();
            if is_hex_color(value) {
                *slot = value.to_string();
            } else {
                tracing::warn!(key, value, "ignoring invalid indicator color");
            }
        }
        palette
    }

    pub fn classify(&self, task_count: usize, is_today: bool) -> DotConfig {
        let dot_color = if is_today {
            &self.today
        } else if task_count >= 2 {
            &self.multi_task
        } else {
            &self.single_task
        };

        let priority = if is_today {
            IndicatorPriority::High
        } else if task_count >= 2 {
            IndicatorPriority::Medium
        } else {
            IndicatorPriority::Normal
        };

        DotConfig {
            show_dot: task_count > 0,
            show_count: task_count >= 3,
            dot_size: if task_count >= 2 {
                DotSize::Large
            } else {
                DotSize::Small
            },
            dot_color: dot_color.clone(),
            display_count: if task_count > 9 {
                "9+".to_string()
            } else {
                task_count.to_string()
            },
            priority,
        }
    }
}

pub fn classify(task_count: usize, is_today: bool) -> DotConfig {
    IndicatorPalette::default().classify(task_count, is_today)
}

fn is_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit())
}
