use crate::config::Config;
use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing::info;

/// Command-line arguments for relay-rs
#[derive(Parser, Debug)]
#[command(name = "relay-rs")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,

    /// Address to bind, overriding `server.host`
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind, overriding `server.port`
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Validate the configuration, print the effective settings and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate that the config path, when present, points at a file
    pub fn validate_config_path(&self) -> Result<()> {
        let config_path = Path::new(&self.config);

        if config_path.exists() && !config_path.is_file() {
            return Err(anyhow::anyhow!(
                "Configuration path is not a file: {}",
                self.config
            ));
        }

        Ok(())
    }

    /// Load the configuration file (or defaults) and apply command-line overrides
    pub fn load_config(&self) -> Result<Config> {
        self.validate_config_path()?;

        let mut config = Config::from_file_or_default(&self.config)?;
        self.apply_overrides(&mut config);

        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }

    /// Execute the appropriate command based on parsed arguments
    /// Returns Ok(true) if a command was executed, Ok(false) if server should start
    pub fn execute_command(&self, config: &Config) -> Result<bool> {
        if self.check_config {
            let rendered = toml::to_string_pretty(config)?;
            info!("Configuration {} is valid", self.config);
            println!("{}", rendered);
            return Ok(true);
        }

        Ok(false)
    }
}
