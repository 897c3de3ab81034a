use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::error;

use pyrewall::{find_file, Config, PyreParser};

#[derive(Parser)]
#[command(name = "pyre", version, about = "Compile Pyre policy files into iptables-restore rules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a Pyre file and print the generated rule streams.
    Parse {
        /// Rule file, resolved against the configured search directories
        /// and extensions.
        file: String,

        /// Print only the IPv4 rules.
        #[arg(short = '4', long = "ipv4", conflicts_with = "ipv6")]
        ipv4: bool,

        /// Print only the IPv6 rules.
        #[arg(short = '6', long = "ipv6")]
        ipv6: bool,

        /// Treat unknown keywords and invalid ports as fatal.
        #[arg(long)]
        strict: bool,

        /// TOML configuration file layered over the built-in defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Parse {
            file,
            ipv4,
            ipv6,
            strict,
            config,
        } => {
            let mut conf = load_config(config)?;
            conf.strict = conf.strict || strict;

            let path = find_file(&file, &conf.search_dirs, &conf.search_extensions)?;
            let mut parser = PyreParser::new(conf);
            let (v4, v6) = parser
                .parse_file(&path)
                .with_context(|| format!("failed to parse {}", path.display()))?;

            let both = !ipv4 && !ipv6;
            if ipv4 || both {
                if both {
                    println!("# --- IPv4 ---");
                }
                for line in &v4 {
                    println!("{}", line);
                }
            }
            if ipv6 || both {
                if both {
                    println!("# --- IPv6 ---");
                }
                for line in &v6 {
                    println!("{}", line);
                }
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}
