//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration invariant violations.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("playable radius {radius} exceeds half the world size {half}")]
    PlayableRadiusTooLarge { radius: f32, half: f32 },
    #[error("tick rate must be positive")]
    ZeroTickRate,
    #[error("broadcast rate {broadcast} must be positive and at most the tick rate {tick}")]
    BroadcastRate { broadcast: u32, tick: u32 },
    #[error("{0} must be within (0, 1]")]
    OutOfUnitRange(&'static str),
    #[error("virus radius band [{min}, {max}] is empty")]
    VirusRadiusBand { min: f32, max: f32 },
    #[error("start mass must be positive")]
    StartMass,
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub coin: CoinConfig,
    #[serde(default)]
    pub virus: VirusConfig,
    #[serde(default)]
    pub elimination: EliminationConfig,
    #[serde(default)]
    pub anticheat: AntiCheatConfig,
    /// Ledger accounts and join tickets for local deployments.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&contents)?
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            default_config
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let half = self.world.size / 2.0;
        if self.world.playable_radius > half {
            return Err(ConfigError::PlayableRadiusTooLarge {
                radius: self.world.playable_radius,
                half,
            });
        }
        if self.simulation.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.simulation.broadcast_rate_hz == 0
            || self.simulation.broadcast_rate_hz > self.simulation.tick_rate_hz
        {
            return Err(ConfigError::BroadcastRate {
                broadcast: self.simulation.broadcast_rate_hz,
                tick: self.simulation.tick_rate_hz,
            });
        }
        if !(self.physics.friction > 0.0 && self.physics.friction <= 1.0) {
            return Err(ConfigError::OutOfUnitRange("physics.friction"));
        }
        if !(self.virus.damage_factor > 0.0 && self.virus.damage_factor <= 1.0) {
            return Err(ConfigError::OutOfUnitRange("virus.damage_factor"));
        }
        if !(self.split.momentum_transfer > 0.0 && self.split.momentum_transfer <= 1.0) {
            return Err(ConfigError::OutOfUnitRange("split.momentum_transfer"));
        }
        if self.virus.min_radius > self.virus.max_radius {
            return Err(ConfigError::VirusRadiusBand {
                min: self.virus.min_radius,
                max: self.virus.max_radius,
            });
        }
        if self.player.start_mass <= 0.0 {
            return Err(ConfigError::StartMass);
        }
        Ok(())
    }
}

/// Server networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Maximum number of concurrently running rooms.
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,
    /// Room used when a join names none.
    #[serde(default = "default_room")]
    pub default_room: String,
    #[serde(default = "default_max_nick_length")]
    pub max_nick_length: usize,
    /// Server name shown in logs.
    #[serde(default = "default_name")]
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            max_rooms: default_max_rooms(),
            default_room: default_room(),
            max_nick_length: default_max_nick_length(),
            name: default_name(),
        }
    }
}

fn default_port() -> u16 {
    11443
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    200
}
fn default_ip_limit() -> usize {
    8
}
fn default_max_rooms() -> usize {
    16
}
fn default_room() -> String {
    "main".to_string()
}
fn default_max_nick_length() -> usize {
    24
}
fn default_name() -> String {
    "Stake Arena".to_string()
}

/// Fixed-timestep settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Internal simulation rate.
    #[serde(default = "default_tick_rate")]
    pub tick_rate_hz: u32,
    /// Snapshot rate; must not exceed the tick rate.
    #[serde(default = "default_broadcast_rate")]
    pub broadcast_rate_hz: u32,
    /// Steps one `advance` may run before dropping backlog.
    #[serde(default = "default_max_catch_up")]
    pub max_catch_up_steps: u32,
    /// Fixed RNG seed; entropy when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
            broadcast_rate_hz: default_broadcast_rate(),
            max_catch_up_steps: default_max_catch_up(),
            seed: None,
        }
    }
}

fn default_tick_rate() -> u32 {
    60
}
fn default_broadcast_rate() -> u32 {
    20
}
fn default_max_catch_up() -> u32 {
    8
}

/// World geometry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// Side of the square world, centered on the origin.
    #[serde(default = "default_world_size")]
    pub size: f32,
    #[serde(default = "default_playable_radius")]
    pub playable_radius: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            size: default_world_size(),
            playable_radius: default_playable_radius(),
        }
    }
}

fn default_world_size() -> f32 {
    6000.0
}
fn default_playable_radius() -> f32 {
    2800.0
}

/// Player configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_start_mass")]
    pub start_mass: f32,
    /// Speed is `speed_factor / mass`, clamped to `[min_speed, max_speed]`.
    #[serde(default = "default_speed_factor")]
    pub speed_factor: f32,
    #[serde(default = "default_min_speed")]
    pub min_speed: f32,
    #[serde(default = "default_max_speed")]
    pub max_speed: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            start_mass: default_start_mass(),
            speed_factor: default_speed_factor(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
        }
    }
}

fn default_start_mass() -> f32 {
    20.0
}
fn default_speed_factor() -> f32 {
    6000.0
}
fn default_min_speed() -> f32 {
    40.0
}
fn default_max_speed() -> f32 {
    300.0
}

/// Movement integration constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhysicsConfig {
    #[serde(default = "default_movement_scale")]
    pub movement_scale: f32,
    /// Per-tick velocity retention at `friction_tuned_hz`.
    #[serde(default = "default_friction")]
    pub friction: f32,
    #[serde(default = "default_friction_tuned_hz")]
    pub friction_tuned_hz: u32,
    /// Exponential momentum drag, per second.
    #[serde(default = "default_momentum_drag")]
    pub momentum_drag: f32,
    /// Momentum below this magnitude snaps to zero.
    #[serde(default = "default_momentum_floor")]
    pub momentum_floor: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            movement_scale: default_movement_scale(),
            friction: default_friction(),
            friction_tuned_hz: default_friction_tuned_hz(),
            momentum_drag: default_momentum_drag(),
            momentum_floor: default_momentum_floor(),
        }
    }
}

fn default_movement_scale() -> f32 {
    1.0
}
fn default_friction() -> f32 {
    0.85
}
fn default_friction_tuned_hz() -> u32 {
    60
}
fn default_momentum_drag() -> f32 {
    3.0
}
fn default_momentum_floor() -> f32 {
    0.5
}

/// Split and merge rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SplitConfig {
    #[serde(default = "default_split_min_mass")]
    pub min_mass: f32,
    #[serde(default = "default_split_cooldown")]
    pub cooldown_ms: u64,
    /// Cap on controller plus pieces.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
    /// Ejection momentum given to a new piece.
    #[serde(default = "default_split_impulse")]
    pub impulse: f32,
    #[serde(default = "default_merge_delay")]
    pub merge_delay_ms: u64,
    #[serde(default = "default_attraction_rate")]
    pub attraction_rate: f32,
    /// Attraction stops at `radius * spacing_factor` from the centroid;
    /// below 1.0 so attracted pieces end up overlapping.
    #[serde(default = "default_spacing_factor")]
    pub spacing_factor: f32,
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f32,
    /// Fraction of a merged piece's momentum handed to the controller.
    #[serde(default = "default_momentum_transfer")]
    pub momentum_transfer: f32,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            min_mass: default_split_min_mass(),
            cooldown_ms: default_split_cooldown(),
            max_cells: default_max_cells(),
            impulse: default_split_impulse(),
            merge_delay_ms: default_merge_delay(),
            attraction_rate: default_attraction_rate(),
            spacing_factor: default_spacing_factor(),
            max_acceleration: default_max_acceleration(),
            momentum_transfer: default_momentum_transfer(),
        }
    }
}

fn default_split_min_mass() -> f32 {
    36.0
}
fn default_split_cooldown() -> u64 {
    500
}
fn default_max_cells() -> usize {
    16
}
fn default_split_impulse() -> f32 {
    900.0
}
fn default_merge_delay() -> u64 {
    8000
}
fn default_attraction_rate() -> f32 {
    0.01
}
fn default_spacing_factor() -> f32 {
    0.5
}
fn default_max_acceleration() -> f32 {
    600.0
}
fn default_momentum_transfer() -> f32 {
    0.5
}

/// Coin (resource) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoinConfig {
    #[serde(default = "default_coin_count")]
    pub max_count: usize,
    #[serde(default = "default_coin_value")]
    pub value: f32,
    #[serde(default = "default_coin_radius")]
    pub radius: f32,
}

impl Default for CoinConfig {
    fn default() -> Self {
        Self {
            max_count: default_coin_count(),
            value: default_coin_value(),
            radius: default_coin_radius(),
        }
    }
}

fn default_coin_count() -> usize {
    300
}
fn default_coin_value() -> f32 {
    1.0
}
fn default_coin_radius() -> f32 {
    6.0
}

/// Virus (hazard) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirusConfig {
    #[serde(default = "default_virus_count")]
    pub count: usize,
    #[serde(default = "default_virus_min_radius")]
    pub min_radius: f32,
    #[serde(default = "default_virus_max_radius")]
    pub max_radius: f32,
    /// Mass multiplier on a damaging hit.
    #[serde(default = "default_damage_factor")]
    pub damage_factor: f32,
    /// Mass and score granted for popping a virus.
    #[serde(default = "default_reward_mass")]
    pub reward_mass: f32,
    #[serde(default = "default_hit_cooldown")]
    pub hit_cooldown_ms: u64,
}

impl Default for VirusConfig {
    fn default() -> Self {
        Self {
            count: default_virus_count(),
            min_radius: default_virus_min_radius(),
            max_radius: default_virus_max_radius(),
            damage_factor: default_damage_factor(),
            reward_mass: default_reward_mass(),
            hit_cooldown_ms: default_hit_cooldown(),
        }
    }
}

fn default_virus_count() -> usize {
    20
}
fn default_virus_min_radius() -> f32 {
    30.0
}
fn default_virus_max_radius() -> f32 {
    45.0
}
fn default_damage_factor() -> f32 {
    0.8
}
fn default_reward_mass() -> f32 {
    15.0
}
fn default_hit_cooldown() -> u64 {
    1000
}

/// Player-vs-player elimination rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EliminationConfig {
    /// The winner's mass must strictly exceed the loser's by this factor.
    #[serde(default = "default_mass_ratio")]
    pub mass_ratio: f32,
    #[serde(default = "default_mass_gain")]
    pub mass_gain: f32,
    #[serde(default = "default_score_gain")]
    pub score_gain: f32,
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            mass_ratio: default_mass_ratio(),
            mass_gain: default_mass_gain(),
            score_gain: default_score_gain(),
        }
    }
}

fn default_mass_ratio() -> f32 {
    1.2
}
fn default_mass_gain() -> f32 {
    0.8
}
fn default_score_gain() -> f32 {
    0.5
}

/// Anti-cheat gate thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AntiCheatConfig {
    /// Accumulated suspicion at which a player is kicked.
    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: u32,
    /// Multiplier on the fastest legal displacement.
    #[serde(default = "default_movement_tolerance")]
    pub movement_tolerance: f32,
    #[serde(default = "default_max_mass_gain")]
    pub max_mass_gain_per_sec: f32,
    #[serde(default = "default_max_pickups")]
    pub max_pickups_per_sec: u32,
    #[serde(default = "default_max_eliminations")]
    pub max_eliminations_per_sec: u32,
    #[serde(default = "default_max_direction_changes")]
    pub max_direction_changes_per_sec: u32,
    /// Interval between position/mass samples per controller.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
    #[serde(default = "default_movement_penalty")]
    pub movement_penalty: u32,
    #[serde(default = "default_mass_penalty")]
    pub mass_penalty: u32,
    #[serde(default = "default_frequency_penalty")]
    pub frequency_penalty: u32,
}

impl Default for AntiCheatConfig {
    fn default() -> Self {
        Self {
            suspicion_threshold: default_suspicion_threshold(),
            movement_tolerance: default_movement_tolerance(),
            max_mass_gain_per_sec: default_max_mass_gain(),
            max_pickups_per_sec: default_max_pickups(),
            max_eliminations_per_sec: default_max_eliminations(),
            max_direction_changes_per_sec: default_max_direction_changes(),
            sample_interval_ms: default_sample_interval(),
            movement_penalty: default_movement_penalty(),
            mass_penalty: default_mass_penalty(),
            frequency_penalty: default_frequency_penalty(),
        }
    }
}

fn default_suspicion_threshold() -> u32 {
    10
}
fn default_movement_tolerance() -> f32 {
    1.5
}
fn default_max_mass_gain() -> f32 {
    5000.0
}
fn default_max_pickups() -> u32 {
    60
}
fn default_max_eliminations() -> u32 {
    6
}
fn default_max_direction_changes() -> u32 {
    90
}
fn default_sample_interval() -> u64 {
    1000
}
fn default_movement_penalty() -> u32 {
    4
}
fn default_mass_penalty() -> u32 {
    4
}
fn default_frequency_penalty() -> u32 {
    1
}

/// A ledger account with its join ticket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub user_id: String,
    pub ticket: String,
    #[serde(default)]
    pub balance: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [world]
            playable_radius = 1000.0

            [[accounts]]
            user_id = "alice"
            ticket = "secret"
            balance = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.world.playable_radius, 1000.0);
        assert_eq!(config.world.size, 6000.0);
        assert_eq!(config.simulation.tick_rate_hz, 60);
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].balance, 50);
    }

    #[test]
    fn test_playable_radius_bounded_by_world() {
        let mut config = Config::default();
        config.world.playable_radius = config.world.size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PlayableRadiusTooLarge { .. })
        ));
    }

    #[test]
    fn test_broadcast_rate_cannot_exceed_tick_rate() {
        let mut config = Config::default();
        config.simulation.broadcast_rate_hz = 120;
        assert!(matches!(config.validate(), Err(ConfigError::BroadcastRate { .. })));
    }
}
