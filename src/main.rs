use clap::Parser;
use env_logger::Env;

use imclip::Opts;
use imclip::cli::SubCommandExtend;
use imclip::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Thumb(config) => config.run(&opts).await,
    }
}
