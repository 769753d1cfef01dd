use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use phonebank_voice::api::{
    ApiClient, CredentialSource, HttpAudioStore, HttpCredentialSource, HttpDispositionSink,
};
use phonebank_voice::audio::CpalMicrophone;
use phonebank_voice::disposition::{ContactStatus, DispositionForm, DispositionSession, SupportLevel};
use phonebank_voice::settings::{auth_token_from_env, load_settings, settings_path, PhoneSettings};

#[derive(Parser)]
#[command(name = "phonebank-voice", about = "Phone-banking call and recording diagnostics")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and device availability
    Doctor,
    /// Fetch a capability token to check backend access
    Token,
    /// Record a memo from the default microphone and submit a disposition
    Record {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
        #[arg(long)]
        voter: String,
        #[arg(long)]
        status: ContactStatus,
        #[arg(long)]
        support: Option<SupportLevel>,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        call_duration: Option<u64>,
    },
}

fn load(cli: &Cli) -> (Option<std::path::PathBuf>, PhoneSettings) {
    let path = cli.settings.clone().or_else(|| match settings_path() {
        Ok(path) => Some(path),
        Err(e) => {
            log::warn!("Settings: {}", e);
            None
        }
    });
    let settings = path
        .as_deref()
        .map(load_settings)
        .unwrap_or_default()
        .with_env_overrides();
    (path, settings)
}

fn client(settings: &PhoneSettings) -> Result<Arc<ApiClient>, String> {
    ApiClient::from_settings(settings, auth_token_from_env())
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

fn doctor(path: Option<&std::path::Path>, settings: &PhoneSettings) -> Result<(), String> {
    match path {
        Some(path) => println!("Settings file:   {}", path.display()),
        None => println!("Settings file:   (none)"),
    }
    println!("Backend:         {}", settings.api_base_url);
    println!("Edge:            {}", settings.edge);
    println!(
        "Auth token:      {}",
        if auth_token_from_env().is_some() {
            "configured"
        } else {
            "missing (set PHONEBANK_AUTH_TOKEN)"
        }
    );
    match CpalMicrophone::default_device_name() {
        Some(name) => println!("Microphone:      {}", name),
        None => println!("Microphone:      not found"),
    }
    Ok(())
}

async fn token(settings: &PhoneSettings) -> Result<(), String> {
    let source = HttpCredentialSource::new(client(settings)?, settings.credential_path.clone());
    let credential = source.fetch().await.map_err(|e| e.to_string())?;
    println!(
        "Received a capability token ({} characters)",
        credential.expose().len()
    );
    Ok(())
}

struct RecordArgs {
    seconds: u64,
    voter: String,
    form: DispositionForm,
    call_duration: Option<u64>,
}

async fn record(settings: &PhoneSettings, args: RecordArgs) -> Result<(), String> {
    let api = client(settings)?;
    let mut session = DispositionSession::new(
        args.voter,
        Arc::new(CpalMicrophone::new()),
        Arc::new(HttpAudioStore::new(
            api.clone(),
            settings.audio_upload_path.clone(),
        )),
        Arc::new(HttpDispositionSink::new(api, settings.disposition_path.clone())),
    );
    if let Some(secs) = args.call_duration {
        session.set_call_duration(secs);
    }

    // Catch a missing support level before recording
    args.form.validated_support().map_err(|e| e.to_string())?;

    session.start_recording().await.map_err(|e| e.to_string())?;
    println!("Recording for {}s...", args.seconds);
    tokio::time::sleep(Duration::from_secs(args.seconds)).await;
    let captured = session.stop_recording().map_err(|e| e.to_string())?;
    println!(
        "Captured {}s ({} bytes)",
        captured.duration_secs,
        captured.bytes.len()
    );

    let record = session
        .submit(&args.form)
        .await
        .map_err(|e| e.to_string())?;
    println!(
        "Saved {:?} for voter {}{}",
        record.status,
        record.voter_id,
        record
            .audio_file_url
            .map(|url| format!(" (audio: {})", url))
            .unwrap_or_default()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (path, settings) = load(&cli);

    let result = match cli.command {
        Command::Doctor => doctor(path.as_deref(), &settings),
        Command::Token => token(&settings).await,
        Command::Record {
            seconds,
            voter,
            status,
            support,
            notes,
            call_duration,
        } => {
            record(
                &settings,
                RecordArgs {
                    seconds,
                    voter,
                    form: DispositionForm {
                        status,
                        support,
                        notes,
                    },
                    call_duration,
                },
            )
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
