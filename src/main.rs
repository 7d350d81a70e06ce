//! glucowatch - glucose polling and alerting daemon
//!
//! Runs the monitoring engine against a remote site, or performs one-shot
//! queries against the same API.

use std::future::{pending, Future};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use glucowatch::engine::thresholds::RawThresholds;
use glucowatch::source::{DataSource, DeviceStatus};
use glucowatch::{
    start_web_server, DataSourceClient, EngineBuilder, EngineConfig, EngineHandle, JsonFileStore,
    LogNotifier, Reading, SourceConfig, ThresholdConfig, WebConfig, ZeroThresholdPolicy,
    DEFAULT_CRITICAL_HIGH, DEFAULT_CRITICAL_INTERVAL_SECS, DEFAULT_CRITICAL_LOW, DEFAULT_HIGH,
    DEFAULT_LOW, DEFAULT_NORMAL_INTERVAL_SECS, DEFAULT_STATE_FILE, DEFAULT_WEB_PORT,
};
use tokio::task::JoinHandle;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "glucowatch")]
#[command(about = "Glucose polling and alerting engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Polls a remote glucose-monitoring site and raises alarms when values are dangerous or data goes stale")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Site root, e.g. https://cgm.example.com
    #[arg(long, env = "GLUCOWATCH_URL")]
    base_url: Option<String>,

    /// API secret (hashed before it is sent)
    #[arg(long, env = "GLUCOWATCH_SECRET", hide_env_values = true)]
    api_secret: Option<String>,

    /// Urgent low threshold
    #[arg(long, default_value_t = DEFAULT_CRITICAL_LOW)]
    critical_low: i32,

    /// Low threshold
    #[arg(long, default_value_t = DEFAULT_LOW)]
    low: i32,

    /// High threshold
    #[arg(long, default_value_t = DEFAULT_HIGH)]
    high: i32,

    /// Urgent high threshold
    #[arg(long, default_value_t = DEFAULT_CRITICAL_HIGH)]
    critical_high: i32,

    /// How a zero threshold is interpreted
    #[arg(long, value_enum, default_value_t = ZeroPolicyArg::Literal)]
    zero_thresholds: ZeroPolicyArg,

    /// Poll interval in seconds while nothing is urgent
    #[arg(long, default_value_t = DEFAULT_NORMAL_INTERVAL_SECS)]
    normal_interval: u64,

    /// Poll interval in seconds while something is urgent
    #[arg(long, default_value_t = DEFAULT_CRITICAL_INTERVAL_SECS)]
    critical_interval: u64,

    /// Also poll device status and alarm when the loop goes quiet
    #[arg(long)]
    monitor_loop: bool,

    /// Where the last known reading is persisted
    #[arg(long, default_value = DEFAULT_STATE_FILE)]
    state_file: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ZeroPolicyArg {
    Literal,
    UseDefault,
}

impl From<ZeroPolicyArg> for ZeroThresholdPolicy {
    fn from(arg: ZeroPolicyArg) -> Self {
        match arg {
            ZeroPolicyArg::Literal => ZeroThresholdPolicy::Literal,
            ZeroPolicyArg::UseDefault => ZeroThresholdPolicy::UseDefault,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring engine (default)
    Watch(WatchArgs),

    /// Print the newest reading and exit
    Latest(FormatArgs),

    /// Print readings from the last few hours
    History(WindowArgs),

    /// Print treatment events from the last few hours
    Events(WindowArgs),

    /// Print loop device status and the scheduled basal rate
    Device(FormatArgs),

    /// Validate configuration and exit
    CheckConfig,
}

#[derive(Args, Clone)]
struct WatchArgs {
    /// Status API bind address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Status API port
    #[arg(short, long, default_value_t = DEFAULT_WEB_PORT)]
    port: u16,

    /// Do not serve the status API
    #[arg(long)]
    no_api: bool,

    /// Disable CORS headers
    #[arg(long)]
    no_cors: bool,
}

impl Default for WatchArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_WEB_PORT,
            no_api: false,
            no_cors: false,
        }
    }
}

#[derive(Args)]
struct FormatArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

#[derive(Args)]
struct WindowArgs {
    /// How many hours back to look
    #[arg(long, default_value_t = 3)]
    hours: u32,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    match &cli.command {
        Some(Commands::Watch(args)) => watch_command(&cli, args).await,
        Some(Commands::Latest(args)) => latest_command(&cli, args).await,
        Some(Commands::History(args)) => history_command(&cli, args).await,
        Some(Commands::Events(args)) => events_command(&cli, args).await,
        Some(Commands::Device(args)) => device_command(&cli, args).await,
        Some(Commands::CheckConfig) => check_config_command(&cli),
        None => watch_command(&cli, &WatchArgs::default()).await,
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn source_config(cli: &Cli) -> anyhow::Result<SourceConfig> {
    let Some(base_url) = &cli.base_url else {
        bail!("no base URL configured (use --base-url or GLUCOWATCH_URL)");
    };
    let Some(secret) = &cli.api_secret else {
        bail!("no API secret configured (use --api-secret or GLUCOWATCH_SECRET)");
    };
    let config = SourceConfig::new(base_url, secret);
    config.validate()?;
    Ok(config)
}

fn engine_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let thresholds = ThresholdConfig::from_raw(RawThresholds {
        critical_low: cli.critical_low,
        low: cli.low,
        high: cli.high,
        critical_high: cli.critical_high,
        zero_policy: cli.zero_thresholds.into(),
    })?;

    let config = EngineConfig::new(thresholds)
        .with_intervals(cli.normal_interval, cli.critical_interval)
        .with_loop_monitoring(cli.monitor_loop);
    config.validate()?;
    Ok(config)
}

fn client(cli: &Cli) -> anyhow::Result<DataSourceClient> {
    let config = source_config(cli)?;
    DataSourceClient::new(&config).context("failed to build HTTP client")
}

async fn watch_command(cli: &Cli, args: &WatchArgs) -> anyhow::Result<()> {
    let config = engine_config(cli)?;
    let source = Arc::new(client(cli)?);

    info!("Monitoring {}", source.base_url());
    info!("  - Thresholds: {:?}", config.thresholds);
    info!(
        "  - Intervals: {}s normal, {}s critical",
        config.normal_interval_secs, config.critical_interval_secs
    );
    info!("  - Loop monitoring: {}", config.monitor_loop);
    info!("  - State file: {}", cli.state_file);

    let (handle, engine_task) = EngineBuilder::new(config, source)
        .with_store(Arc::new(JsonFileStore::new(&cli.state_file)))
        .with_notifier(Arc::new(LogNotifier))
        .spawn()?;

    let no_api = args.no_api;
    let web_config = WebConfig::new(&args.host, args.port).with_cors(!args.no_cors);
    let api_handle = handle.clone();
    let api = async move {
        if no_api {
            pending::<glucowatch::Result<()>>().await
        } else {
            start_web_server(web_config, api_handle).await
        }
    };

    supervise(&handle, engine_task, api, tokio::signal::ctrl_c()).await
}

/// Run until `stop` resolves. A failed status API or an engine task that
/// ends on its own is an error, so the process exits non-zero.
async fn supervise<A, S>(
    handle: &EngineHandle,
    mut engine_task: JoinHandle<()>,
    api: A,
    stop: S,
) -> anyhow::Result<()>
where
    A: Future<Output = glucowatch::Result<()>>,
    S: Future<Output = std::io::Result<()>>,
{
    let stopped = tokio::select! {
        finished = &mut engine_task => {
            finished.context("engine task panicked")?;
            bail!("engine stopped unexpectedly");
        }
        served = api => match served {
            Ok(()) => Err(anyhow!("status API stopped")),
            Err(e) => {
                error!("Status API failed: {}", e);
                Err(anyhow::Error::new(e).context("status API failed"))
            }
        },
        signal = stop => signal.context("failed to listen for shutdown signal"),
    };

    info!("Shutting down");
    handle.shutdown()?;
    engine_task.await.context("engine task panicked")?;
    stopped
}

async fn latest_command(cli: &Cli, args: &FormatArgs) -> anyhow::Result<()> {
    let config = engine_config(cli)?;
    let reading = client(cli)?.fetch_latest().await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reading)?),
        OutputFormat::Pretty => {
            let now = chrono::Utc::now();
            println!(
                "{}  {:?}  ({} min ago)",
                reading,
                config.thresholds.classify(reading.value),
                reading.minutes_old(now)
            );
        }
    }
    Ok(())
}

async fn history_command(cli: &Cli, args: &WindowArgs) -> anyhow::Result<()> {
    let readings = client(cli)?.fetch_history(args.hours).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&readings)?),
        OutputFormat::Pretty => print_readings(&readings),
    }
    Ok(())
}

async fn events_command(cli: &Cli, args: &WindowArgs) -> anyhow::Result<()> {
    let events = client(cli)?.fetch_events(args.hours).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&events)?),
        OutputFormat::Pretty => {
            if events.is_empty() {
                println!("No events in the last {} hours", args.hours);
            }
            for event in &events {
                let mut line = format!(
                    "{}  {}",
                    event.created_at.format("%Y-%m-%d %H:%M"),
                    event.event_type
                );
                if let Some(insulin) = event.insulin {
                    line.push_str(&format!("  {:.2} U", insulin));
                }
                if let Some(carbs) = event.carbs {
                    line.push_str(&format!("  {:.0} g", carbs));
                }
                if let Some(notes) = &event.notes {
                    line.push_str(&format!("  \"{}\"", notes));
                }
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn device_command(cli: &Cli, args: &FormatArgs) -> anyhow::Result<()> {
    let client = client(cli)?;
    let status = client.fetch_device_status().await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(status.raw())?),
        OutputFormat::Pretty => {
            print_device_status(&status);
            // Profile is optional on many sites.
            match client.fetch_profile().await {
                Ok(profile) => {
                    let now = chrono::Local::now().time();
                    match profile.scheduled_basal(now) {
                        Some(rate) => println!("Scheduled basal: {:.2} U/h ({})", rate, profile.name),
                        None => println!("Scheduled basal: none ({})", profile.name),
                    }
                }
                Err(e) => info!("Profile unavailable: {}", e),
            }
        }
    }
    Ok(())
}

fn check_config_command(cli: &Cli) -> anyhow::Result<()> {
    let source = source_config(cli)?;
    let engine = engine_config(cli)?;

    println!("Configuration OK");
    println!("  Site:        {}", source.base_url);
    println!(
        "  Thresholds:  {} / {} / {} / {}",
        engine.thresholds.critical_low(),
        engine.thresholds.low(),
        engine.thresholds.high(),
        engine.thresholds.critical_high()
    );
    println!(
        "  Intervals:   {}s normal, {}s critical",
        engine.normal_interval_secs, engine.critical_interval_secs
    );
    println!("  Loop:        {}", engine.monitor_loop);
    println!("  State file:  {}", cli.state_file);
    Ok(())
}

fn print_readings(readings: &[Reading]) {
    for reading in readings {
        println!("{}  {}", reading.timestamp.format("%Y-%m-%d %H:%M"), reading);
    }
}

fn print_device_status(status: &DeviceStatus) {
    fn show(label: &str, value: Option<f64>, unit: &str) {
        match value {
            Some(value) => println!("{:<16} {:.1}{}", label, value, unit),
            None => println!("{:<16} n/a", label),
        }
    }

    show("Reservoir:", status.reservoir_units(), " U");
    show("Battery:", status.battery_percent(), "%");
    show("IOB:", status.insulin_on_board(), " U");
    show("COB:", status.carbs_on_board(), " g");
    show("Enacted basal:", status.enacted_basal_rate(), " U/h");
    match status.loop_timestamp() {
        Some(at) => println!("{:<16} {}", "Loop reported:", at.to_rfc3339()),
        None => println!("{:<16} n/a", "Loop reported:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["glucowatch", "--base-url", "https://cgm.example.com", "--api-secret", "s3cret"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_build_valid_config() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());

        let config = engine_config(&cli).unwrap();
        assert_eq!(config.normal_interval_secs, 300);
        assert_eq!(config.critical_interval_secs, 120);
        assert_eq!(config.thresholds, ThresholdConfig::default());
    }

    #[test]
    fn test_unordered_thresholds_fail_fast() {
        let cli = parse(&["--low", "200"]);
        assert!(engine_config(&cli).is_err());
    }

    #[test]
    fn test_zero_threshold_policy_flag() {
        let cli = parse(&["--critical-low", "0", "--zero-thresholds", "use-default"]);
        let config = engine_config(&cli).unwrap();
        assert_eq!(config.thresholds.critical_low(), DEFAULT_CRITICAL_LOW);
    }

    #[test]
    fn test_interval_floor() {
        let cli = parse(&["--critical-interval", "30"]);
        assert!(engine_config(&cli).is_err());
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = parse(&["watch", "--port", "9090", "--no-api"]);
        match cli.command {
            Some(Commands::Watch(args)) => {
                assert_eq!(args.port, 9090);
                assert!(args.no_api);
            }
            _ => panic!("expected watch"),
        }

        let cli = parse(&["history", "--hours", "6", "--format", "json"]);
        match cli.command {
            Some(Commands::History(args)) => {
                assert_eq!(args.hours, 6);
                assert_eq!(args.format, OutputFormat::Json);
            }
            _ => panic!("expected history"),
        }

        assert!(matches!(parse(&["check-config"]).command, Some(Commands::CheckConfig)));
    }

    fn spawn_engine() -> (EngineHandle, JoinHandle<()>) {
        let source = DataSourceClient::new(&SourceConfig::new("http://127.0.0.1:9", "s3cret")).unwrap();
        EngineBuilder::new(EngineConfig::default(), Arc::new(source))
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_supervise_fails_when_status_api_fails() {
        let (handle, task) = spawn_engine();
        let api = async { Err::<(), _>(glucowatch::MonitorError::web_server_error("address in use")) };

        let err = supervise(&handle, task, api, pending()).await.unwrap_err();
        assert!(err.to_string().contains("status API failed"));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_supervise_fails_when_engine_stops() {
        let (handle, task) = spawn_engine();
        handle.shutdown().unwrap();

        let err = supervise(&handle, task, pending(), pending()).await.unwrap_err();
        assert!(err.to_string().contains("engine stopped unexpectedly"));
    }

    #[tokio::test]
    async fn test_supervise_stops_cleanly_on_signal() {
        let (handle, task) = spawn_engine();
        let stop = async { Ok::<(), std::io::Error>(()) };

        assert!(supervise(&handle, task, pending(), stop).await.is_ok());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_source_config_requires_valid_url() {
        let cli = Cli::try_parse_from(["glucowatch", "--base-url", "ftp://nope", "--api-secret", "x"]).unwrap();
        assert!(source_config(&cli).is_err());
    }
}
