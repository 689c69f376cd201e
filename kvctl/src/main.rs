use anyhow::Context;
use clap::Parser;
use kvpool::command::{reply_to_string, Arg};
use kvpool::config::ConfigRegistry;
use kvpool::executor::LoggedExecutor;
use kvpool::factory::PoolFactory;
use kvpool::log::{TraceContext, TracingLogger};
use kvpool::registry::PoolRegistry;
use kvpool::selector::RandomSelector;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Parser)]
pub struct Args {
    /// Pool configuration, as TOML or JSON
    #[clap(long, short = 'c')]
    pub config: PathBuf,

    /// Name of the pool to run the command on
    #[clap(long, short = 'p', default_value = "default")]
    pub pool: String,

    /// Print command log entries and pool activity to stderr
    #[clap(long, short = 'v')]
    pub verbose: bool,

    /// Command to run, like GET or SET
    pub command: String,

    /// Arguments to the command
    pub args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    }

    let configs = ConfigRegistry::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let factory = PoolFactory::new(
        Arc::new(configs),
        Arc::new(PoolRegistry::new()),
        Arc::new(RandomSelector::new()),
    );
    let executor = LoggedExecutor::new(Arc::new(factory), Arc::new(TracingLogger));

    let command_args: Vec<Arg> = args.args.into_iter().map(Arg::from).collect();
    let reply = executor
        .execute(
            &TraceContext::generate(),
            &args.pool,
            &args.command,
            &command_args,
        )
        .await
        .with_context(|| format!("{} on pool {:?}", args.command, args.pool))?;

    println!("{}", reply_to_string(&reply));
    Ok(())
}
