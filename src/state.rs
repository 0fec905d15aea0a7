use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of decision context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sliding window over the conversation; the oldest entries fall off first.
#[derive(Debug, Clone)]
pub struct History {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn note(&mut self, content: impl Into<String>) {
        self.push(Turn::user(content));
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }
}

/// Loop-owned state for one application run. Never shared, never persisted.
#[derive(Debug)]
pub struct AgentState {
    pub current_url: String,
    pub title: String,
    /// Base64 PNG of the latest observation.
    pub last_screenshot: Option<String>,
    pub step: u32,
    pub history: History,
    screenshots: VecDeque<String>,
    screenshot_window: usize,
}

impl AgentState {
    pub fn new(start_url: impl Into<String>, history_window: usize, screenshot_window: usize) -> Self {
        Self {
            current_url: start_url.into(),
            title: String::new(),
            last_screenshot: None,
            step: 0,
            history: History::new(history_window),
            screenshots: VecDeque::with_capacity(screenshot_window),
            screenshot_window,
        }
    }

    pub fn record_screenshot(&mut self, encoded: String) {
        if self.screenshot_window > 0 {
            while self.screenshots.len() >= self.screenshot_window {
                self.screenshots.pop_front();
            }
            self.screenshots.push_back(encoded.clone());
        }
        self.last_screenshot = Some(encoded);
    }

    /// The trailing screenshot window, oldest first.
    pub fn screenshots(&self) -> Vec<String> {
        self.screenshots.iter().cloned().collect()
    }
}
