use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracks_core::{
    list_categories, CancellationToken, Config, EmitOutcome, Emitter, EventCategory, EventFilter,
    NativeExtractor, NoveltySegmenter, ReceiveOutcome, Receiver, TracksError, UdpTransport,
};

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!(error = %err, "cannot install the Ctrl-C handler");
    }

    let result = match cli.command {
        Commands::Emit(args) => run_emit(cli.config.as_deref(), &args, &token),
        Commands::Recv(args) => run_recv(cli.config.as_deref(), &args, &token),
        Commands::ListEvents => {
            run_list_events();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "tracks failed");
            ExitCode::FAILURE
        }
    }
}

fn run_emit(
    config_path: Option<&Path>,
    args: &EmitArgs,
    token: &CancellationToken,
) -> tracks_core::Result<ExitCode> {
    let mut config = load_config(config_path)?;
    args.network.apply(&mut config);
    args.apply(&mut config)?;
    config.validate()?;

    let canonical = std::fs::canonicalize(&args.input)
        .map_err(|err| TracksError::decode(&args.input, err))?;
    let filename = args.input.display().to_string();
    tracing::info!(input = %filename, events = %config.events.enabled, "preparing track");

    let mut extractor = NativeExtractor::new(&config.analysis);
    let timeline = tracks_core::analyze(
        &config,
        &canonical,
        &filename,
        &mut extractor,
        &NoveltySegmenter::default(),
    )?;

    if token.is_cancelled() {
        tracing::info!("interrupted during analysis, nothing emitted");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }

    let mut transport = UdpTransport::open(&config.network)?;
    let outcome = Emitter::new(&mut transport, token.clone())
        .with_preroll(
            canonical.display().to_string(),
            config.transport.prepare_time,
        )
        .run(&timeline);

    Ok(match outcome {
        EmitOutcome::Completed { sent } => {
            tracing::info!(sent, "done");
            ExitCode::SUCCESS
        }
        EmitOutcome::Aborted { at, sent } => {
            tracing::info!(at, sent, "aborted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    })
}

fn run_recv(
    config_path: Option<&Path>,
    args: &RecvArgs,
    token: &CancellationToken,
) -> tracks_core::Result<ExitCode> {
    let mut config = load_config(config_path)?;
    args.network.apply(&mut config);

    let receiver = Receiver::bind(
        config.network.multicast_group,
        config.network.port,
        config.network.interface,
        token.clone(),
    )?;
    println!(
        "listening on {}:{}",
        config.network.multicast_group, config.network.port
    );

    let summary = receiver.run(|event| println!("{event}"))?;
    tracing::info!(
        received = summary.received,
        malformed = summary.malformed,
        "receiver stopped"
    );

    Ok(match summary.outcome {
        ReceiveOutcome::Ended => {
            println!("\nTrack ended.");
            ExitCode::SUCCESS
        }
        ReceiveOutcome::Aborted => {
            println!("\nTrack aborted.");
            ExitCode::SUCCESS
        }
        ReceiveOutcome::Cancelled => ExitCode::from(EXIT_INTERRUPTED),
    })
}

fn run_list_events() {
    let names = list_categories();
    for name in &names {
        let family = EventCategory::from_name(name)
            .map(|category| category.family().name())
            .unwrap_or_default();
        println!("{name:<20} {family}");
    }
    println!("\n{} selectable categories", names.len());
    println!("presets: default, tier1 (primary), tier2, all");
}

fn load_config(path: Option<&Path>) -> tracks_core::Result<Config> {
    match path {
        Some(path) => Config::from_yaml_file(path),
        None => Config::load_default(),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Broadcast timed music analysis events", long_about = None)]
struct Cli {
    /// YAML configuration file; defaults to config/tracks-default.yaml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse an audio file and broadcast its events in real time.
    Emit(EmitArgs),
    /// Print events received from the group until the track ends.
    Recv(RecvArgs),
    /// List every selectable event category.
    ListEvents,
}

#[derive(Args, Debug)]
struct NetworkArgs {
    /// Multicast group (or broadcast address).
    #[arg(long)]
    group: Option<Ipv4Addr>,
    #[arg(short, long)]
    port: Option<u16>,
    /// Local interface address.
    #[arg(long)]
    interface: Option<Ipv4Addr>,
}

impl NetworkArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(group) = self.group {
            config.network.multicast_group = group;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(interface) = self.interface {
            config.network.interface = interface;
        }
    }
}

#[derive(Args, Debug)]
struct EmitArgs {
    /// Audio file to analyse (WAV).
    input: PathBuf,
    #[command(flatten)]
    network: NetworkArgs,
    #[arg(long)]
    ttl: Option<u32>,
    /// Do not loop multicast datagrams back to this host.
    #[arg(long)]
    no_loopback: bool,
    /// Also send every datagram to this address, or `auto` for the gateway.
    #[arg(long)]
    unicast: Option<String>,
    /// Preset name or comma-separated category list.
    #[arg(short, long)]
    events: Option<String>,
    /// Enable the tier1 preset.
    #[arg(long)]
    primary: bool,
    /// Enable every category.
    #[arg(long)]
    all: bool,
    /// Seconds between track.position heartbeats.
    #[arg(long)]
    position_interval: Option<f64>,
    /// Minimum seconds between continuous events of one category.
    #[arg(long)]
    continuous_interval: Option<f64>,
    /// Pre-roll seconds announced with track.prepare.
    #[arg(long)]
    prepare_time: Option<f64>,
    #[arg(long)]
    sample_rate: Option<u32>,
    #[arg(long)]
    frame_size: Option<usize>,
    #[arg(long)]
    hop_size: Option<usize>,
}

impl EmitArgs {
    fn apply(&self, config: &mut Config) -> tracks_core::Result<()> {
        if let Some(ttl) = self.ttl {
            config.network.ttl = ttl;
        }
        if self.no_loopback {
            config.network.loopback = false;
        }
        if let Some(target) = &self.unicast {
            config.network.unicast_target = Some(target.clone());
        }

        if self.all {
            config.events.enabled = EventFilter::all();
        } else if self.primary {
            config.events.enabled = EventFilter::tier1();
        } else if let Some(spec) = &self.events {
            config.events.enabled = EventFilter::from_spec(spec)?;
        }

        if let Some(interval) = self.position_interval {
            config.transport.position_interval = interval;
        }
        if let Some(interval) = self.continuous_interval {
            config.events.continuous_interval = interval;
        }
        if let Some(seconds) = self.prepare_time {
            config.transport.prepare_time = seconds;
        }
        if let Some(rate) = self.sample_rate {
            config.analysis.sample_rate = rate;
        }
        if let Some(size) = self.frame_size {
            config.analysis.frame_size = size;
        }
        if let Some(size) = self.hop_size {
            config.analysis.hop_size = size;
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct RecvArgs {
    #[command(flatten)]
    network: NetworkArgs,
}
