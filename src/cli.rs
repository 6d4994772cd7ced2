use clap::Parser;
use std::path::PathBuf;

/// dimmerd: keeps track of attached monitors and their brightness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: searched in XDG and /etc locations)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and log to syslog
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Log debug output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long = "dump-config")]
    pub dump_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["dimmerd", "-c", "/tmp/dimmerd.yml", "-d", "-v"]);

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/dimmerd.yml")));
        assert!(cli.daemonize);
        assert!(cli.verbose);
        assert!(!cli.dump_config);
    }

    #[test]
    fn defaults_to_foreground() {
        let cli = Cli::parse_from(["dimmerd", "--dump-config"]);

        assert_eq!(cli.config, None);
        assert!(!cli.daemonize);
        assert!(cli.dump_config);
    }
}
