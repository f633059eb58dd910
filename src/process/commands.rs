//! In-game administration expressed as console command lines.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Survival => "survival",
            Self::Creative => "creative",
            Self::Adventure => "adventure",
            Self::Spectator => "spectator",
        }
    }
}

/// Operator actions the web layer can request. Each renders to exactly one
/// command line and goes through `send_command`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminCommand {
    Kick {
        player: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Ban {
        player: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Pardon {
        player: String,
    },
    Op {
        player: String,
    },
    Deop {
        player: String,
    },
    Teleport {
        player: String,
        x: f64,
        y: f64,
        z: f64,
    },
    Give {
        player: String,
        item: String,
        count: u32,
    },
    GameMode {
        player: String,
        mode: GameMode,
    },
    Heal {
        player: String,
    },
    Feed {
        player: String,
    },
    Say {
        message: String,
    },
    Tell {
        player: String,
        message: String,
    },
    Time {
        value: String,
    },
    Weather {
        kind: String,
        #[serde(default)]
        duration: Option<u32>,
    },
    GameRule {
        rule: String,
        value: String,
    },
    Difficulty {
        level: String,
    },
    SaveAll,
    SaveOn,
    SaveOff,
    Reload,
    WhitelistOn,
    WhitelistOff,
    WhitelistAdd {
        player: String,
    },
    WhitelistRemove {
        player: String,
    },
    WhitelistReload,
}

fn with_reason(verb: &str, player: &str, reason: Option<&str>) -> String {
    match reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("{} {} {}", verb, player, reason),
        None => format!("{} {}", verb, player),
    }
}

impl AdminCommand {
    pub fn command_line(&self) -> String {
        match self {
            Self::Kick { player, reason } => with_reason("kick", player, reason.as_deref()),
            Self::Ban { player, reason } => with_reason("ban", player, reason.as_deref()),
            Self::Pardon { player } => format!("pardon {}", player),
            Self::Op { player } => format!("op {}", player),
            Self::Deop { player } => format!("deop {}", player),
            Self::Teleport { player, x, y, z } => {
                format!("tp {} {:.2} {:.2} {:.2}", player, x, y, z)
            }
            Self::Give {
                player,
                item,
                count,
            } => format!("give {} {} {}", player, item, count),
            Self::GameMode { player, mode } => format!("gamemode {} {}", mode.as_str(), player),
            Self::Heal { player } => {
                format!("effect give {} minecraft:instant_health 1 10", player)
            }
            Self::Feed { player } => format!("effect give {} minecraft:saturation 1 10", player),
            Self::Say { message } => format!("say {}", message),
            Self::Tell { player, message } => format!("tell {} {}", player, message),
            Self::Time { value } => format!("time set {}", value),
            Self::Weather { kind, duration } => match duration {
                Some(d) => format!("weather {} {}", kind, d),
                None => format!("weather {}", kind),
            },
            Self::GameRule { rule, value } => format!("gamerule {} {}", rule, value),
            Self::Difficulty { level } => format!("difficulty {}", level),
            Self::SaveAll => "save-all".to_string(),
            Self::SaveOn => "save-on".to_string(),
            Self::SaveOff => "save-off".to_string(),
            Self::Reload => "reload".to_string(),
            Self::WhitelistOn => "whitelist on".to_string(),
            Self::WhitelistOff => "whitelist off".to_string(),
            Self::WhitelistAdd { player } => format!("whitelist add {}", player),
            Self::WhitelistRemove { player } => format!("whitelist remove {}", player),
            Self::WhitelistReload => "whitelist reload".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_player_commands() {
        let tp = AdminCommand::Teleport {
            player: "Steve".to_string(),
            x: 1.0,
            y: 64.456,
            z: -3.5,
        };
        assert_eq!(tp.command_line(), "tp Steve 1.00 64.46 -3.50");

        let kick = AdminCommand::Kick {
            player: "Steve".to_string(),
            reason: Some("  ".to_string()),
        };
        assert_eq!(kick.command_line(), "kick Steve");

        let ban = AdminCommand::Ban {
            player: "Alex".to_string(),
            reason: Some("griefing".to_string()),
        };
        assert_eq!(ban.command_line(), "ban Alex griefing");

        let heal = AdminCommand::Heal {
            player: "Alex".to_string(),
        };
        assert_eq!(
            heal.command_line(),
            "effect give Alex minecraft:instant_health 1 10"
        );
    }

    #[test]
    fn decodes_tagged_requests() {
        let cmd: AdminCommand =
            serde_json::from_str(r#"{"action":"game_mode","player":"Steve","mode":"creative"}"#)
                .unwrap();
        assert_eq!(cmd.command_line(), "gamemode creative Steve");

        let weather: AdminCommand =
            serde_json::from_str(r#"{"action":"weather","kind":"rain","duration":600}"#).unwrap();
        assert_eq!(weather.command_line(), "weather rain 600");

        let save: AdminCommand = serde_json::from_str(r#"{"action":"save_all"}"#).unwrap();
        assert_eq!(save.command_line(), "save-all");
    }
}
