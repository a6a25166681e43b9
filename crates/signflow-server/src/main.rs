use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use signflow_server::{telemetry, AppConfig, Application};
use std::path::PathBuf;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .env("SIGNFLOW_CONFIG")
        .value_parser(value_parser!(PathBuf))
        .help("Path to a TOML configuration file")
}

fn load_config(args: &clap::ArgMatches) -> anyhow::Result<AppConfig> {
    let path = args.get_one::<PathBuf>("config");
    AppConfig::load(path.map(PathBuf::as_path)).context("loading configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("signflow")
        .version(signflow_core::VERSION)
        .about("E-signature status reconciliation service")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("serve")
                .about("Run the HTTP API, webhook dispatcher and reconciliation engine")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("check-config")
                .about("Validate configuration and print the effective settings")
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("serve", args)) => {
            let config = load_config(args)?;
            telemetry::init_tracing(&config.server)?;
            Application::build(config)?
                .serve(signflow_server::ctrl_c())
                .await
        }
        Some(("check-config", args)) => {
            let mut config = load_config(args)?;
            if !config.provider.client_secret.is_empty() {
                config.provider.client_secret = "<redacted>".to_string();
            }
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
