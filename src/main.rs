use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskauth::config::Configuration;
use taskauth::{TokenType, telemetry};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, short, env = "TASKAUTH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Issue an access and refresh token pair.
    Issue {
        /// Token subject.
        subject: String,
        /// Authority granted to the access token, repeatable.
        #[arg(long = "authority", short)]
        authorities: Vec<String>,
    },
    /// Fully verify a token, revocation aside.
    Verify {
        token: String,
        /// Expect a refresh token instead of an access token.
        #[arg(long)]
        refresh: bool,
    },
    /// Print the claims of a signature-valid token, even expired.
    Inspect { token: String },
}

fn main() -> ExitCode {
    telemetry::init_tracing();
    telemetry::describe_metrics();

    let args = Args::parse();
    let config = Configuration::default().path(args.config).read();

    let state = match taskauth::initialize(config, None) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        },
    };
    let auth = &state.authenticator;

    let output = match args.cmd {
        Commands::Issue {
            subject,
            authorities,
        } => auth
            .login(&subject, &authorities)
            .map_err(|err| err.to_string())
            .and_then(|pair| to_json(&pair)),
        Commands::Verify { token, refresh } => {
            let expected = if refresh {
                TokenType::Refresh
            } else {
                TokenType::Access
            };
            auth.verifier()
                .verify(&token, expected)
                .map_err(|err| format!("unauthenticated: {err}"))
                .and_then(|claims| to_json(&claims))
        },
        Commands::Inspect { token } => auth
            .verifier()
            .inspect(&token)
            .map_err(|err| format!("unauthenticated: {err}"))
            .and_then(|claims| to_json(&claims)),
    };

    match output {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        },
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        },
    }
}

fn to_json(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|err| err.to_string())
}
