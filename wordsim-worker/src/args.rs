use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Hostname of the coordinator.
    pub coordinator: String,

    /// Port of the coordinator's announcement listener.
    #[arg(long, default_value_t = 65520)]
    pub registry_port: u16,

    /// Host name this worker advertises; the coordinator must be able to
    /// dial it.
    #[arg(long, default_value = "127.0.0.1")]
    pub advertise_host: String,

    /// Name of the workload to run.
    #[arg(short, long)]
    pub workload: String,

    /// Replay result shards left behind by a previous run instead of
    /// re-mapping.
    #[arg(long)]
    pub load_previous: bool,

    /// Auxiliary arguments forwarded to the workload on every invocation.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}
