//! `vanrakshak` - forest incident reporting from the command line.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use shared::capabilities::{
    FileKeyValueStore, FixedGeolocation, GeoFix, Geolocation, GeolocationError,
    HttpInferenceClient, KeyValueStore, ReqwestTransport, SqliteKeyValueStore,
    UnavailableGeolocation,
};
use shared::config::DEFAULT_USER_AGENT;
use shared::feed::{build_feed, to_geojson};
use shared::voice_intent::ExtractorState;
use shared::{
    Capabilities, IncidentId, IncidentType, IntakeConfig, IntakeEvent, IntakeSession, Location,
    ReporterIdentity, SessionContext,
};

#[derive(Parser, Debug)]
#[command(name = "vanrakshak")]
#[command(about = "Report and review forest incidents")]
#[command(version)]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "VANRAKSHAK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the local incident store
    #[arg(long, env = "VANRAKSHAK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Backend::File)]
    store: Backend,

    /// Remote submission endpoint; remote sync is off when unset
    #[arg(long, env = "VANRAKSHAK_SUBMISSION_URL")]
    submission_url: Option<String>,

    #[arg(long, env = "VANRAKSHAK_INFERENCE_API_KEY", hide_env_values = true)]
    inference_api_key: Option<String>,

    #[arg(long, env = "VANRAKSHAK_REPORTER_NAME", default_value = "")]
    reporter_name: String,

    #[arg(long, env = "VANRAKSHAK_REPORTER_PHONE", default_value = "")]
    reporter_phone: String,

    #[arg(long, env = "VANRAKSHAK_REPORTER_VILLAGE", default_value = "")]
    reporter_village: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    File,
    Sqlite,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture and submit one incident
    Report {
        /// fire, wildlife, illegal or other
        #[arg(long = "type")]
        incident_type: Option<IncidentType>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        photo: PathBuf,

        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,

        /// Spoken report text; may fill in type and description
        #[arg(long)]
        transcript: Option<String>,
    },
    /// Print the incident feed, most recent first
    List {
        #[arg(long, allow_negative_numbers = true, requires = "lon")]
        lat: Option<f64>,

        #[arg(long, allow_negative_numbers = true, requires = "lat")]
        lon: Option<f64>,
    },
    /// Print one incident as JSON
    Show { id: IncidentId },
    /// Print the feed as a GeoJSON FeatureCollection
    ExportGeojson,
    /// End the session and delete every local incident
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vanrakshak=info,shared=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let geolocation: Arc<dyn Geolocation> = match &cli.command {
        Command::Report {
            lat: Some(lat),
            lon: Some(lon),
            ..
        } => Arc::new(FixedGeolocation(GeoFix::new(*lat, *lon))),
        _ => Arc::new(UnavailableGeolocation(GeolocationError::Unavailable {
            reason: "no --lat/--lon given".into(),
        })),
    };
    let caps = capabilities(&cli, &config, geolocation)?;

    let reporter = ReporterIdentity::new(
        cli.reporter_name.trim(),
        cli.reporter_phone.trim(),
        cli.reporter_village.trim(),
    );
    let session = IntakeSession::new(&config, caps, SessionContext::new(reporter))
        .await
        .context("failed to start intake session")?;

    match cli.command {
        Command::Report {
            incident_type,
            description,
            photo,
            transcript,
            ..
        } => {
            if session.context().reporter.name.is_empty() {
                bail!("a reporter name is required (--reporter-name or VANRAKSHAK_REPORTER_NAME)");
            }
            report(&session, &config, incident_type, description, photo, transcript).await?;
        }
        Command::List { lat, lon } => {
            let viewer = lat.zip(lon).map(|(latitude, longitude)| Location {
                latitude,
                longitude,
                area: String::new(),
            });
            let records = session.store().all().await;
            if records.is_empty() {
                println!("No incidents reported yet.");
            }
            for item in build_feed(&records, viewer.as_ref(), Utc::now()) {
                let distance = item.distance.map(|d| format!(" - {d}")).unwrap_or_default();
                println!(
                    "{id}  [{severity}] {label} @ {area} ({ago}{distance})\n    {preview}",
                    id = item.id,
                    severity = item.severity,
                    label = item.type_label,
                    area = item.area,
                    ago = item.time_ago,
                    preview = item.description_preview,
                );
            }
        }
        Command::Show { id } => {
            let record = session
                .store()
                .get(id)
                .await
                .with_context(|| format!("no incident with id {id}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::ExportGeojson => {
            let collection = to_geojson(&session.store().all().await);
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        Command::Clear => {
            session
                .end()
                .await
                .context("failed to clear local incidents")?;
            println!("Local incidents cleared.");
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<IntakeConfig> {
    let mut config = match &cli.config {
        Some(path) => IntakeConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => IntakeConfig::default(),
    };

    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    if let Some(url) = &cli.submission_url {
        config.submission.endpoint = Some(url.clone());
    }
    if let Some(key) = &cli.inference_api_key {
        config.inference.api_key = Some(SecretString::new(key.clone()));
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn capabilities(
    cli: &Cli,
    config: &IntakeConfig,
    geolocation: Arc<dyn Geolocation>,
) -> Result<Capabilities> {
    let user_agent = if config.geocoding.user_agent.is_empty() {
        DEFAULT_USER_AGENT
    } else {
        config.geocoding.user_agent.as_str()
    };
    let http = Arc::new(ReqwestTransport::new(user_agent).context("failed to build HTTP client")?);

    let data_dir = &config.storage.data_dir;
    let kv: Arc<dyn KeyValueStore> = match cli.store {
        Backend::File => Arc::new(
            FileKeyValueStore::open(data_dir)
                .with_context(|| format!("failed to open store at {}", data_dir.display()))?,
        ),
        Backend::Sqlite => {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("failed to create {}", data_dir.display()))?;
            let path = data_dir.join("incidents.sqlite3");
            Arc::new(
                SqliteKeyValueStore::open(&path)
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        }
    };

    let inference = Arc::new(HttpInferenceClient::new(
        http.clone(),
        config.inference_url()?,
        config.inference.model.clone(),
        config.inference.api_key.clone(),
        config.inference_timeout(),
    ));

    Ok(Capabilities {
        geolocation,
        http,
        kv,
        inference,
        speech_supported: true,
    })
}

async fn report(
    session: &IntakeSession,
    config: &IntakeConfig,
    incident_type: Option<IncidentType>,
    description: Option<String>,
    photo: PathBuf,
    transcript: Option<String>,
) -> Result<()> {
    let location = session
        .capture_location()
        .await
        .context("unable to get location")?;
    info!(area = %location.area, "location resolved");

    let captured = session
        .attach_photo_path(&photo)
        .await
        .with_context(|| format!("unable to use photo {}", photo.display()))?;
    debug!(mime = captured.mime_type, width = captured.width, height = captured.height, "photo attached");

    if let Some(transcript) = transcript {
        listen(session, config, &transcript).await;
    }

    // Explicit flags win over whatever the voice extraction filled in
    if incident_type.is_some() {
        session.set_incident_type(incident_type).await;
    }
    if let Some(description) = description {
        session.set_description(description).await;
    }

    let record = session.submit().await.map_err(shared::AppError::from)?;
    println!(
        "Submitted incident {} ({}, {} severity) at {}",
        record.id(),
        record.incident_type().label(),
        record.severity(),
        record.location().area
    );

    session.flush_sync().await;
    Ok(())
}

/// Feeds the transcript through the speech channel and waits for the
/// voice extractor to settle.
async fn listen(session: &IntakeSession, config: &IntakeConfig, transcript: &str) {
    let mut events = session.subscribe();
    if !session.speech().start() || !session.speech().push_segment(transcript) {
        return;
    }

    tokio::time::sleep(config.quiescence() + Duration::from_millis(100)).await;
    let deadline = tokio::time::Instant::now() + config.inference_timeout();
    while session.extractor_state() == ExtractorState::Extracting
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    session.speech().stop();

    while let Ok(event) = events.try_recv() {
        if let IntakeEvent::FormAutofilled { incident_type, .. } = event {
            info!(?incident_type, "form filled from voice report");
        }
    }
}
