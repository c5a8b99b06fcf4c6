//! Tandem configuration types and loading

use eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cplscheme::{DEFAULT_VALID_DIGITS, ImplicitCouplingScheme, MeasureKind, SchemeConfig, TimestepPolicy};
use crate::m2n::M2N;
use crate::mesh::{Mesh, MeshId};

/// Main Tandem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Participants, run bounds and window settings
    pub coupling: CouplingConfig,

    /// Coupling meshes shared by both participants
    pub meshes: Vec<MeshConfig>,

    /// Fields exchanged every window
    pub exchanges: Vec<ExchangeConfig>,

    /// Convergence measures evaluated by the second participant
    pub measures: Vec<MeasureConfig>,

    /// In-process transport settings
    pub transport: TransportConfig,

    /// Parameters of the built-in demo solvers
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coupling: CouplingConfig::default(),
            meshes: vec![MeshConfig {
                name: "Interface".to_string(),
                vertices: 4,
            }],
            exchanges: vec![
                ExchangeConfig {
                    data: "Forces".to_string(),
                    mesh: "Interface".to_string(),
                    from: "Fluid".to_string(),
                    to: "Solid".to_string(),
                    dimension: 2,
                    initialize: false,
                },
                ExchangeConfig {
                    data: "Displacements".to_string(),
                    mesh: "Interface".to_string(),
                    from: "Solid".to_string(),
                    to: "Fluid".to_string(),
                    dimension: 2,
                    initialize: false,
                },
            ],
            measures: vec![MeasureConfig {
                data: "Displacements".to_string(),
                mesh: "Interface".to_string(),
                measure: MeasureKind::Absolute { limit: 1.0e-8 },
                suffices: false,
            }],
            transport: TransportConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Checks that every exchange and measure refers to known participants,
    /// meshes and fields, and that the scheme settings are consistent.
    pub fn validate(&self) -> Result<()> {
        let c = &self.coupling;
        self.scheme_config(&c.first)
            .validate()
            .map_err(|e| eyre!("Invalid coupling section: {}", e))?;

        let mut mesh_names = HashSet::new();
        for mesh in &self.meshes {
            if !mesh_names.insert(mesh.name.as_str()) {
                bail!("Mesh '{}' is defined twice", mesh.name);
            }
        }

        let mut fields = HashSet::new();
        for exchange in &self.exchanges {
            if !mesh_names.contains(exchange.mesh.as_str()) {
                bail!("Exchange of '{}' uses unknown mesh '{}'", exchange.data, exchange.mesh);
            }
            let pair = (exchange.from.as_str(), exchange.to.as_str());
            if pair != (c.first.as_str(), c.second.as_str()) && pair != (c.second.as_str(), c.first.as_str()) {
                bail!(
                    "Exchange of '{}' must go between '{}' and '{}', got '{}' -> '{}'",
                    exchange.data,
                    c.first,
                    c.second,
                    exchange.from,
                    exchange.to
                );
            }
            if exchange.dimension == 0 {
                bail!("Exchange of '{}' has dimension 0", exchange.data);
            }
            if !fields.insert((exchange.mesh.as_str(), exchange.data.as_str())) {
                bail!("Data '{}' on mesh '{}' is exchanged twice", exchange.data, exchange.mesh);
            }
            if exchange.initialize && exchange.from != c.second {
                bail!(
                    "Only data sent by the second participant '{}' can be initialized, '{}' is sent by '{}'",
                    c.second,
                    exchange.data,
                    exchange.from
                );
            }
        }

        for measure in &self.measures {
            if !fields.contains(&(measure.mesh.as_str(), measure.data.as_str())) {
                bail!("Measure refers to data '{}' on mesh '{}' which is not exchanged", measure.data, measure.mesh);
            }
            measure
                .measure
                .validate()
                .map_err(|e| eyre!("Invalid measure for '{}': {}", measure.data, e))?;
        }

        if self.transport.channel_buffer == 0 {
            bail!("transport.channel-buffer must be at least 1");
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .tandem.yml
        let local_config = PathBuf::from(".tandem.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/tandem/tandem.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tandem").join("tandem.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Scheme parameters as seen by participant `local`
    pub fn scheme_config(&self, local: &str) -> SchemeConfig {
        let c = &self.coupling;
        SchemeConfig {
            first: c.first.clone(),
            second: c.second.clone(),
            local: local.to_string(),
            max_time: c.max_time,
            max_timesteps: c.max_timesteps,
            timestep_length: c.timestep_length,
            policy: c.timestep_policy,
            valid_digits: c.valid_digits,
            max_iterations: c.max_iterations,
            extrapolation_order: c.extrapolation_order,
        }
    }

    /// Builds one participant's copy of the coupling meshes. Mesh ids follow
    /// declaration order so both participants agree on them.
    pub fn create_meshes(&self) -> Vec<Mesh> {
        self.meshes
            .iter()
            .enumerate()
            .map(|(idx, cfg)| {
                let mut mesh = Mesh::new(MeshId(idx), cfg.name.clone(), cfg.vertices);
                for exchange in self.exchanges.iter().filter(|e| e.mesh == cfg.name) {
                    mesh.create_data(exchange.data.clone(), exchange.dimension);
                }
                mesh
            })
            .collect()
    }

    /// Creates the scheme for `local` and registers its exchanges and measures
    pub fn build_scheme(&self, local: &str, m2n: M2N, meshes: &[Mesh]) -> Result<ImplicitCouplingScheme> {
        let mut scheme = ImplicitCouplingScheme::new(self.scheme_config(local), m2n)?;

        for exchange in &self.exchanges {
            let data = lookup(meshes, &exchange.mesh, &exchange.data)?;
            if exchange.from == local {
                scheme.add_data_to_send(data, exchange.initialize)?;
            } else if exchange.to == local {
                scheme.add_data_to_receive(data, exchange.initialize)?;
            }
        }

        if local == self.coupling.second {
            for measure in &self.measures {
                let data = lookup(meshes, &measure.mesh, &measure.data)?;
                scheme.add_convergence_measure(data.id(), measure.suffices, measure.measure.build())?;
            }
        }
        Ok(scheme)
    }
}

fn lookup<'a>(meshes: &'a [Mesh], mesh: &str, data: &str) -> Result<&'a crate::mesh::MeshData> {
    meshes
        .iter()
        .find(|m| m.name() == mesh)
        .ok_or_else(|| eyre!("Unknown mesh '{}'", mesh))?
        .data_by_name(data)
        .ok_or_else(|| eyre!("Unknown data '{}' on mesh '{}'", data, mesh))
}

/// Participants, run bounds and window settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CouplingConfig {
    /// Participant that computes first in every window
    pub first: String,

    /// Participant that evaluates convergence
    pub second: String,

    #[serde(rename = "max-time")]
    pub max_time: Option<f64>,

    #[serde(rename = "max-timesteps")]
    pub max_timesteps: Option<u32>,

    /// Window length, required for the fixed policy
    #[serde(rename = "timestep-length")]
    pub timestep_length: Option<f64>,

    #[serde(rename = "timestep-policy")]
    pub timestep_policy: TimestepPolicy,

    /// Digits used for time comparisons
    #[serde(rename = "valid-digits")]
    pub valid_digits: u32,

    /// Accept a window after this many iterations
    #[serde(rename = "max-iterations")]
    pub max_iterations: Option<u32>,

    #[serde(rename = "extrapolation-order")]
    pub extrapolation_order: usize,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            first: "Fluid".to_string(),
            second: "Solid".to_string(),
            max_time: None,
            max_timesteps: Some(10),
            timestep_length: Some(0.1),
            timestep_policy: TimestepPolicy::Fixed,
            valid_digits: DEFAULT_VALID_DIGITS,
            max_iterations: None,
            extrapolation_order: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub name: String,
    pub vertices: usize,
}

/// One field sent from `from` to `to` every window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub data: String,
    pub mesh: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Exchange once before the first window
    #[serde(default)]
    pub initialize: bool,
}

fn default_dimension() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureConfig {
    pub data: String,
    pub mesh: String,
    pub measure: MeasureKind,
    /// Converging on this measure alone completes the window
    #[serde(default)]
    pub suffices: bool,
}

/// In-process transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Messages buffered per channel before senders wait
    #[serde(rename = "channel-buffer")]
    pub channel_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_buffer: crate::com::DEFAULT_CHANNEL_BUFFER,
        }
    }
}

/// Demo solvers: each writes `coupling * received + forcing * t`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub coupling: f64,
    pub forcing: f64,
    /// Sub-cycling steps per window taken by the second participant
    #[serde(rename = "second-substeps")]
    pub second_substeps: u32,
    /// Iteration cap for demo runs whose coupling section sets none
    #[serde(rename = "max-iterations")]
    pub max_iterations: Option<u32>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            coupling: 0.5,
            forcing: 1.0,
            second_substeps: 1,
            max_iterations: Some(50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.coupling.first, "Fluid");
        assert_eq!(config.coupling.max_timesteps, Some(10));
        assert_eq!(config.coupling.max_iterations, None);
        assert_eq!(config.demo.max_iterations, Some(50));
        assert_eq!(config.transport.channel_buffer, 64);
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
coupling:
  first: A
  second: B
  max-time: 1.0
  timestep-length: 0.25
  extrapolation-order: 2
  max-iterations: 20
meshes:
  - name: Surface
    vertices: 3
exchanges:
  - data: Heat
    mesh: Surface
    from: A
    to: B
  - data: Temperature
    mesh: Surface
    from: B
    to: A
    dimension: 1
    initialize: true
measures:
  - data: Temperature
    mesh: Surface
    suffices: true
    measure:
      type: relative
      limit: 1.0e-4
"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();
        config.validate().unwrap();
        assert_eq!(config.coupling.max_time, Some(1.0));
        // Defaults survive for unspecified keys
        assert_eq!(config.coupling.max_timesteps, Some(10));
        assert_eq!(config.coupling.extrapolation_order, 2);
        assert_eq!(config.exchanges[0].dimension, 1);
        assert!(config.exchanges[1].initialize);
        assert!(config.measures[0].suffices);
        assert_eq!(config.measures[0].measure, MeasureKind::Relative { limit: 1.0e-4 });
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = PathBuf::from("/nonexistent/tandem.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_references() {
        let mut config = Config::default();
        config.exchanges[0].mesh = "Nowhere".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.exchanges[0].to = "Fluid".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.measures[0].data = "Pressure".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.exchanges[0].initialize = true;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("second participant"));

        let mut config = Config::default();
        config.coupling.timestep_length = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_create_meshes_is_deterministic() {
        let config = Config::default();
        let a = config.create_meshes();
        let b = config.create_meshes();
        assert_eq!(a, b);
        assert_eq!(a[0].id(), MeshId(0));
        assert_eq!(a[0].data_by_name("Forces").map(|d| d.values().len()), Some(8));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("timestep-length"));
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.exchanges.len(), 2);
        assert_eq!(parsed.measures[0].measure, config.measures[0].measure);
    }
}
