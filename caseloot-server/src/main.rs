mod cli;
mod config;
mod dispatch;
mod http;
mod wiring;

pub fn main() -> anyhow::Result<()> {
    let args = argh::from_env::<cli::Args>();
    args.run()
}
