use clap::Parser;
use training::util::{run_remove, RemoveArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = RemoveArgs::parse();
    run_remove(args)
}
