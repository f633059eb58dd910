//! `server.properties` and `whitelist.json` for one instance root.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::{server_properties_path, whitelist_path};

const MOJANG_PROFILE_URL: &str = "https://api.mojang.com/users/profiles/minecraft";
pub const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Keys the server only reads at boot.
const RESTART_KEYS: &[&str] = &[
    "server-port",
    "server-ip",
    "online-mode",
    "max-players",
    "enable-rcon",
    "rcon.port",
    "rcon.password",
    "level-name",
    "level-seed",
    "level-type",
    "generator-settings",
];

const DEFAULT_PROPERTIES: &str = "#Minecraft server properties
enable-jmx-monitoring=false
rcon.port=25575
level-seed=
gamemode=survival
enable-command-block=false
enable-query=false
generator-settings={}
enforce-secure-profile=true
level-name=world
motd=A Minecraft Server
query.port=25565
pvp=true
generate-structures=true
max-chained-neighbor-updates=1000000
difficulty=easy
network-compression-threshold=256
max-tick-time=60000
require-resource-pack=false
use-native-transport=true
max-players=20
online-mode=true
enable-status=true
allow-flight=false
initial-disabled-packs=
broadcast-rcon-to-ops=true
view-distance=10
server-ip=
resource-pack-prompt=
allow-nether=true
server-port=25565
enable-rcon=false
sync-chunk-writes=true
op-permission-level=4
prevent-proxy-connections=false
hide-online-players=false
resource-pack=
entity-broadcast-range-percentage=100
simulation-distance=10
rcon.password=
player-idle-timeout=0
debug=false
force-gamemode=false
rate-limit=0
hardcore=false
white-list=false
broadcast-console-to-ops=true
spawn-npcs=true
spawn-animals=true
function-permission-level=2
initial-enabled-packs=vanilla
level-type=minecraft\\:normal
text-filtering-config=
spawn-monsters=true
enforce-whitelist=false
spawn-protection=16
resource-pack-sha1=
max-world-size=29999984
";

pub fn requires_restart(key: &str) -> bool {
    RESTART_KEYS.contains(&key)
}

/// Split a `key=value` line; comments and lines without `=` yield `None`.
fn split_property(line: &str) -> Option<(&str, &str)> {
    if line.starts_with('#') {
        return None;
    }
    line.split_once('=').map(|(k, v)| (k.trim(), v.trim()))
}

pub struct ServerProperties {
    path: PathBuf,
}

impl ServerProperties {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: server_properties_path(root),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// All keys. A missing file reads as empty.
    pub fn read(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter_map(split_property)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.read() {
            Ok(mut props) => props.remove(key),
            Err(e) => {
                log::error!("Error reading {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        let Some(value) = self.get(key) else {
            return default;
        };
        value.trim().parse().unwrap_or_else(|_| {
            log::warn!(
                "Property '{}' in {:?} has a non-integer value '{}', using {}",
                key,
                self.path,
                value,
                default
            );
            default
        })
    }

    /// Rewrite matching key lines in place and append unknown keys. Comments
    /// and other keys are preserved.
    pub fn update(&self, updates: &[(&str, String)]) -> Result<()> {
        if !self.path.exists() {
            return Err(AppError::io(format!(
                "server.properties not found at {}",
                self.path.display()
            )));
        }

        let content = fs::read_to_string(&self.path)?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        for (key, value) in updates {
            let existing = lines
                .iter()
                .position(|line| split_property(line).map(|(k, _)| k == *key).unwrap_or(false));
            let entry = format!("{}={}", key, value);
            match existing {
                Some(i) => lines[i] = entry,
                None => lines.push(entry),
            }
        }

        let mut output = lines.join("\n");
        output.push('\n');
        fs::write(&self.path, output)?;
        log::info!(
            "Updated {} propert{} in {:?}",
            updates.len(),
            if updates.len() == 1 { "y" } else { "ies" },
            self.path
        );
        Ok(())
    }

    pub fn write_defaults(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, DEFAULT_PROPERTIES)?;
        log::info!("Created default server.properties at {:?}", self.path);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub name: String,
    pub uuid: String,
}

pub struct Whitelist {
    path: PathBuf,
}

impl Whitelist {
    pub fn for_root(root: &Path) -> Self {
        Self {
            path: whitelist_path(root),
        }
    }

    pub fn list(&self) -> Result<Vec<WhitelistEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(name)))
    }

    /// Returns `false` when the player is already listed.
    pub fn add(&self, name: &str, uuid: &str) -> Result<bool> {
        let mut entries = self.list()?;
        if entries.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
            return Ok(false);
        }
        entries.push(WhitelistEntry {
            name: name.to_string(),
            uuid: uuid.to_string(),
        });
        self.write(&entries)?;
        Ok(true)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut entries = self.list()?;
        let before = entries.len();
        entries.retain(|e| !e.name.eq_ignore_ascii_case(name));
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    fn write(&self, entries: &[WhitelistEntry]) -> Result<()> {
        let content = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct Profile {
    id: String,
}

/// Resolve a player name to a dashed UUID through the Mojang profile API.
pub async fn lookup_player_uuid(client: &Client, name: &str) -> Option<String> {
    let url = format!("{}/{}", MOJANG_PROFILE_URL, name);
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => {
            log::debug!("Profile lookup for {} failed: {}", name, e);
            return None;
        }
    };
    if !response.status().is_success() {
        return None;
    }
    let profile: Profile = response.json().await.ok()?;
    format_uuid(&profile.id)
}

/// Insert dashes into a 32-digit hex UUID.
pub fn format_uuid(raw: &str) -> Option<String> {
    uuid::Uuid::try_parse(raw)
        .ok()
        .map(|u| u.hyphenated().to_string())
}
