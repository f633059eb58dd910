//! Classification of server log lines into console messages.

use chrono::{Local, NaiveDateTime};
use regex::Regex;

use super::message::{ConsoleMessage, MessageType, Source};
use crate::error::Result;

pub struct LogParser {
    noise: Vec<Regex>,
    error: Regex,
    warn: Regex,
    info: Regex,
    player_join: Regex,
    player_leave: Regex,
    timestamp: Regex,
}

impl LogParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            noise: vec![
                Regex::new(r"Thread RCON Client .* (started|shutting down)")?,
                Regex::new(r"RCON running on.*")?,
                Regex::new(r"UUID of player .* is .*")?,
            ],
            error: Regex::new(r"\[\d{2}:\d{2}:\d{2}\] \[.*?/ERROR\]: (.+)")?,
            warn: Regex::new(r"\[\d{2}:\d{2}:\d{2}\] \[.*?/WARN\]: (.+)")?,
            info: Regex::new(r"\[\d{2}:\d{2}:\d{2}\] \[.*?/INFO\]: (.+)")?,
            player_join: Regex::new(r"(.+) joined the game")?,
            player_leave: Regex::new(r"(.+) left the game")?,
            timestamp: Regex::new(r"\[(\d{2}):(\d{2}):(\d{2})\]")?,
        })
    }

    /// Classify one line. Blank lines and known noise yield nothing.
    ///
    /// Generic INFO lines are stamped with the current time while every
    /// other kind carries the time printed on the line.
    pub fn parse_line(&self, line: &str) -> Option<ConsoleMessage> {
        if line.trim().is_empty() {
            return None;
        }
        if self.noise.iter().any(|re| re.is_match(line)) {
            return None;
        }

        if let Some(body) = capture_body(&self.error, line) {
            return Some(ConsoleMessage::at(
                MessageType::Error,
                body,
                Source::Server,
                self.line_time(line),
            ));
        }

        if let Some(body) = capture_body(&self.warn, line) {
            return Some(ConsoleMessage::at(
                MessageType::Warning,
                body,
                Source::Server,
                self.line_time(line),
            ));
        }

        if let Some(body) = capture_body(&self.info, line) {
            if self.player_join.is_match(body) {
                return Some(ConsoleMessage::at(
                    MessageType::PlayerJoin,
                    format!("🟢 {}", body),
                    Source::Server,
                    self.line_time(line),
                ));
            }
            if self.player_leave.is_match(body) {
                return Some(ConsoleMessage::at(
                    MessageType::PlayerLeave,
                    format!("🔴 {}", body),
                    Source::Server,
                    self.line_time(line),
                ));
            }
            return Some(ConsoleMessage::new(MessageType::Info, body, Source::Server));
        }

        Some(ConsoleMessage::at(
            MessageType::Raw,
            line,
            Source::Server,
            self.line_time(line),
        ))
    }

    /// `[HH:MM:SS]` on today's date, or now when absent or invalid.
    fn line_time(&self, line: &str) -> NaiveDateTime {
        let now = Local::now().naive_local();
        let Some(caps) = self.timestamp.captures(line) else {
            return now;
        };
        let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        match (field(1), field(2), field(3)) {
            (Some(h), Some(m), Some(s)) => now.date().and_hms_opt(h, m, s).unwrap_or(now),
            _ => now,
        }
    }
}

fn capture_body<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use chrono::Timelike as _;

    use super::*;

    fn parser() -> LogParser {
        LogParser::new().unwrap()
    }

    #[test]
    fn player_join_keeps_line_time() {
        let msg = parser()
            .parse_line("[12:34:56] [Server thread/INFO]: Steve joined the game")
            .unwrap();
        assert_eq!(msg.kind, MessageType::PlayerJoin);
        assert!(msg.message.contains("Steve joined the game"));
        assert_eq!(
            (msg.timestamp.hour(), msg.timestamp.minute(), msg.timestamp.second()),
            (12, 34, 56)
        );
    }

    #[test]
    fn unclassified_line_is_raw_with_line_time() {
        let line = "[23:05:09] [Worker-Main-2/DEBUG]: Reloading chunk cache";
        let msg = parser().parse_line(line).unwrap();
        assert_eq!(msg.kind, MessageType::Raw);
        assert_eq!(msg.message, line);
        assert_eq!(
            (msg.timestamp.hour(), msg.timestamp.minute(), msg.timestamp.second()),
            (23, 5, 9)
        );
    }

    #[test]
    fn player_leave_is_classified() {
        let msg = parser()
            .parse_line("[08:00:01] [Server thread/INFO]: Alex left the game")
            .unwrap();
        assert_eq!(msg.kind, MessageType::PlayerLeave);
        assert_eq!(msg.message, "🔴 Alex left the game");
    }

    #[test]
    fn warning_body_is_extracted() {
        let msg = parser()
            .parse_line("[12:34:56] [Server thread/WARN]: Can't keep up!")
            .unwrap();
        assert_eq!(msg.kind, MessageType::Warning);
        assert_eq!(msg.message, "Can't keep up!");
    }

    #[test]
    fn error_wins_over_info() {
        let msg = parser()
            .parse_line("[01:02:03] [Worker-Main-1/ERROR]: Failed to load chunk")
            .unwrap();
        assert_eq!(msg.kind, MessageType::Error);
        assert_eq!(msg.timestamp.hour(), 1);
    }

    #[test]
    fn noise_and_blank_lines_are_dropped() {
        let p = parser();
        assert!(p
            .parse_line("[12:00:00] [RCON Listener #1/INFO]: Thread RCON Client /127.0.0.1 started")
            .is_none());
        assert!(p
            .parse_line("[12:00:00] [RCON Listener #1/INFO]: Thread RCON Client /127.0.0.1 shutting down")
            .is_none());
        assert!(p
            .parse_line("[12:00:00] [Server thread/INFO]: RCON running on 0.0.0.0:25575")
            .is_none());
        assert!(p
            .parse_line("[12:00:00] [User Authenticator #1/INFO]: UUID of player Steve is 0000")
            .is_none());
        assert!(p.parse_line("   ").is_none());
    }

    #[test]
    fn plain_info_and_raw_lines() {
        let p = parser();
        let info = p
            .parse_line("[12:00:00] [Server thread/INFO]: Preparing spawn area: 42%")
            .unwrap();
        assert_eq!(info.kind, MessageType::Info);
        assert_eq!(info.message, "Preparing spawn area: 42%");
        assert_eq!(info.source, Source::Server);

        let raw = p.parse_line("\tat net.minecraft.Main.main(Main.java:1)").unwrap();
        assert_eq!(raw.kind, MessageType::Raw);
        assert_eq!(raw.message, "\tat net.minecraft.Main.main(Main.java:1)");
    }
}
