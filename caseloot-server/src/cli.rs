use argh::FromArgs;

use crate::config::Config;

/// the caseloot bot server CLI
#[derive(Debug, FromArgs)]
pub struct Args {
    #[argh(subcommand)]
    cmd: ServerCommand,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum ServerCommand {
    Run(RunArgs),
}

/// start the HTTP server and, depending on `BOT_MODE`, the long-polling
/// runner, reading configuration from the environment (and an optional
/// `.env` file).
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunArgs {
    /// path to a `.env` file to load before reading configuration.
    /// Defaults to `.env` in the current directory if present.
    #[argh(option)]
    env_file: Option<String>,
}

impl Args {
    pub fn run(self) -> anyhow::Result<()> {
        match self.cmd {
            ServerCommand::Run(args) => {
                if let Some(path) = &args.env_file {
                    dotenvy::from_filename(path).ok();
                } else {
                    dotenvy::dotenv().ok();
                }

                caseloot_logger::init();

                let config = Config::from_env()?;

                let rt = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .expect("Failed to build tokio runtime");

                rt.block_on(crate::wiring::run(config))
            }
        }
    }
}
