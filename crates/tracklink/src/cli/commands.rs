//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::autopilot::ConnectionUrl;
use crate::config::Config;
use crate::decoder::TailPolicy;
use crate::error::Result;
use crate::reader::RecordFormat;

/// Listen command arguments.
#[derive(Debug, Args)]
pub struct ListenCommand {
    /// Channel path or name under /run/mpa/ (overrides pipe.path)
    #[arg(short, long, value_name = "PATH")]
    pub pipe: Option<String>,

    /// Client name announced to the server (overrides pipe.client_name)
    #[arg(long, value_name = "NAME")]
    pub client: Option<String>,

    /// Keep partial records and complete them with the next delivery
    #[arg(long)]
    pub carry_partial: bool,

    /// Print one JSON object per detection
    #[arg(short, long)]
    pub json: bool,
}

impl ListenCommand {
    /// Apply command-line overrides on top of the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid configuration.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(pipe) = &self.pipe {
            config.pipe.path.clone_from(pipe);
        }
        if let Some(client) = &self.client {
            config.pipe.client_name.clone_from(client);
        }
        if self.carry_partial {
            config.pipe.tail_policy = TailPolicy::Carry;
        }
        config.validate()
    }

    /// The requested output format.
    #[must_use]
    pub fn format(&self) -> RecordFormat {
        if self.json {
            RecordFormat::Json
        } else {
            RecordFormat::Confidence
        }
    }
}

/// Fly command arguments.
#[derive(Debug, Args)]
pub struct FlyCommand {
    /// Autopilot connection URL (tcp://, udp://, serial:// or sim://)
    pub url: String,
}

impl FlyCommand {
    /// Parse the connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidUrl`] if the URL is malformed.
    pub fn connection_url(&self) -> Result<ConnectionUrl> {
        self.url.parse()
    }
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listen() -> ListenCommand {
        ListenCommand {
            pipe: None,
            client: None,
            carry_partial: false,
            json: false,
        }
    }

    #[test]
    fn test_apply_without_overrides_keeps_config() {
        let mut config = Config::default();
        listen().apply(&mut config).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        let cmd = ListenCommand {
            pipe: Some("/tmp/det".to_string()),
            client: Some("tracker-2".to_string()),
            carry_partial: true,
            json: false,
        };
        cmd.apply(&mut config).unwrap();

        assert_eq!(config.pipe.path, "/tmp/det");
        assert_eq!(config.pipe.client_name, "tracker-2");
        assert_eq!(config.pipe.tail_policy, TailPolicy::Carry);
    }

    #[test]
    fn test_apply_rejects_bad_client() {
        let mut config = Config::default();
        let cmd = ListenCommand {
            client: Some("bad/name".to_string()),
            ..listen()
        };
        assert!(cmd.apply(&mut config).is_err());
    }

    #[test]
    fn test_format() {
        assert_eq!(listen().format(), RecordFormat::Confidence);
        let cmd = ListenCommand {
            json: true,
            ..listen()
        };
        assert_eq!(cmd.format(), RecordFormat::Json);
    }

    #[test]
    fn test_connection_url() {
        let cmd = FlyCommand {
            url: "sim://".to_string(),
        };
        assert_eq!(cmd.connection_url().unwrap().scheme(), "sim");

        let cmd = FlyCommand {
            url: "14540".to_string(),
        };
        assert!(cmd.connection_url().is_err());
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        assert!(format!("{cmd:?}").contains("Show"));
    }
}
