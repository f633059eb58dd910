//! Parsers for the text the server returns to RCON queries.

use regex::Regex;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerList {
    pub online: u32,
    pub max: u32,
    pub players: Vec<String>,
}

pub struct ResponseParser {
    list: Regex,
    seed: Regex,
    version: Regex,
    tps: Regex,
    color: Regex,
}

impl ResponseParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            list: Regex::new(r"There are (\d+) of a max of (\d+) players online:?\s*(.*)")?,
            seed: Regex::new(r"Seed: \[(-?\d+)\]")?,
            version: Regex::new(r"(Paper|Spigot|CraftBukkit|Forge|Fabric|Vanilla) version ([\d.]+)-")?,
            tps: Regex::new(r"TPS from last 1m, 5m, 15m: \*?(\d+\.\d+),")?,
            color: Regex::new(r"§[0-9a-fk-or]")?,
        })
    }

    pub fn strip_colors(&self, text: &str) -> String {
        self.color.replace_all(text, "").into_owned()
    }

    pub fn player_list(&self, response: &str) -> Option<PlayerList> {
        let text = self.strip_colors(response);
        let caps = self.list.captures(&text)?;
        let online: u32 = caps.get(1)?.as_str().parse().ok()?;
        let max: u32 = caps.get(2)?.as_str().parse().ok()?;
        let players = match caps.get(3) {
            Some(names) if online > 0 => names
                .as_str()
                .split(", ")
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Some(PlayerList {
            online,
            max,
            players,
        })
    }

    pub fn seed(&self, response: &str) -> Option<String> {
        self.seed
            .captures(&self.strip_colors(response))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// `"<Flavor> <version>"`, e.g. `Paper 1.20.4`.
    pub fn version(&self, response: &str) -> Option<String> {
        let text = self.strip_colors(response);
        let caps = self.version.captures(&text)?;
        Some(format!("{} {}", caps.get(1)?.as_str(), caps.get(2)?.as_str()))
    }

    /// One-minute TPS, capped at 20.
    pub fn tps(&self, response: &str) -> Option<f64> {
        let text = self.strip_colors(response);
        let value: f64 = self.tps.captures(&text)?.get(1)?.as_str().parse().ok()?;
        Some(value.min(20.0))
    }
}
