use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wpp_admin::config::{self, Config};
use wpp_admin::dispatch::{self, BulkDispatch, BulkPlan, DispatchEvent, MediaPayload, SendRequest};
use wpp_admin::poller::{self, ConnectionPoller, ConnectionSource, PollerState};
use wpp_admin::recipients::{self, RecipientList};
use wpp_admin::reports::{self, ReportQuery};
use wpp_admin::session::now_ms;
use wpp_admin::types::{MessageKind, NumberRole, PhoneNumber};
use wpp_admin::{App, WppError};

#[derive(Parser)]
#[command(name = "wpp-admin", version, about = "Administration client for the WPP WhatsApp API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, env = "WPP_ADMIN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a login code by e-mail.
    Login {
        #[arg(long)]
        email: String,
    },
    /// Request registration codes by e-mail and WhatsApp.
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        number: String,
    },
    /// Submit the codes for the pending login or registration.
    Verify {
        #[arg(long)]
        email_code: String,
        #[arg(long)]
        number_code: Option<String>,
    },
    /// Send the pending codes again.
    Resend,
    Logout,
    /// Show the current session.
    Whoami,
    /// Manage registered numbers.
    Numbers {
        #[command(subcommand)]
        action: NumbersAction,
    },
    /// Link status of one number, or of every worker when none is given.
    Status {
        number: Option<String>,
        /// Keep polling until interrupted.
        #[arg(long)]
        watch: bool,
        /// Write the pairing QR image here.
        #[arg(long)]
        qr_out: Option<PathBuf>,
    },
    /// Send one message.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "text")]
        kind: MessageKind,
        /// Text body, or caption for media.
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Send to a list of recipients, one at a time.
    Bulk {
        #[arg(long)]
        from: String,
        /// Spreadsheet with numbers and optional messages.
        #[arg(long, conflicts_with = "numbers")]
        list: Option<PathBuf>,
        /// Numbers separated by commas, semicolons or newlines.
        #[arg(long)]
        numbers: Option<String>,
        #[arg(long, default_value = "text")]
        kind: MessageKind,
        /// Default message, or caption for media.
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Seconds between sends; defaults to the configured delay.
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Sends report for a number.
    Report {
        #[arg(long)]
        from: String,
        /// YYYY-MM-DD
        #[arg(long)]
        start: Option<NaiveDate>,
        /// YYYY-MM-DD
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Write an example recipients spreadsheet.
    Template {
        #[arg(default_value = "modelo_contatos.xlsx")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum NumbersAction {
    List,
    Add {
        number: String,
        #[arg(long, default_value = "workers")]
        role: NumberRole,
    },
    Remove {
        number: String,
        #[arg(long, default_value = "workers")]
        role: NumberRole,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(cli).await {
        match err.downcast_ref::<WppError>() {
            Some(WppError::Unauthorized) => {
                eprintln!("session expired, run `wpp-admin login`");
            }
            Some(wpp) => eprintln!("error: {}", wpp.user_message()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}

fn load(cli_path: Option<&Path>) -> Config {
    match cli_path {
        Some(path) => config::load_config_from(path),
        None => {
            config::ensure_config_dir();
            config::load_config()
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = load(cli.config.as_deref());

    // Offline command, no store needed.
    if let Commands::Template { path } = &cli.command {
        recipients::write_template(path)?;
        println!("template written to {}", path.display());
        return Ok(());
    }

    let app = App::connect(cfg).await?;

    match cli.command {
        Commands::Template { .. } => {}
        Commands::Login { email } => {
            app.auth().request_login(&email).await?;
            println!("code sent, run `wpp-admin verify --email-code <CODE>`");
        }
        Commands::Register { email, number } => {
            app.auth().request_registration(&email, &number).await?;
            println!(
                "codes sent, run `wpp-admin verify --email-code <CODE> --number-code <CODE>`"
            );
        }
        Commands::Verify {
            email_code,
            number_code,
        } => {
            let session = app
                .auth()
                .verify(&email_code, number_code.as_deref())
                .await?;
            println!(
                "logged in as {}",
                session.user_email.as_deref().unwrap_or("unknown")
            );
        }
        Commands::Resend => {
            app.auth().resend().await?;
            println!("codes sent again");
        }
        Commands::Logout => {
            app.auth().logout().await?;
            println!("logged out");
        }
        Commands::Whoami => match app.session.info_at(now_ms()).await {
            Some(info) if info.valid => {
                let minutes = info.remaining_ms / 60_000;
                println!(
                    "{} (expires in {minutes} min{})",
                    info.user_email.as_deref().unwrap_or("unknown"),
                    if info.near_expiry { ", renew soon" } else { "" }
                );
            }
            _ => return Err(WppError::Unauthorized.into()),
        },
        Commands::Numbers { action } => numbers_command(&app, action).await?,
        Commands::Status {
            number,
            watch,
            qr_out,
        } => status_command(&app, number, watch, qr_out).await?,
        Commands::Send {
            from,
            to,
            kind,
            message,
            file,
        } => {
            let from = PhoneNumber::parse(&from)?;
            let to = PhoneNumber::parse(&to)?;
            let request = match kind {
                MessageKind::Text => SendRequest::text(from, to, message.unwrap_or_default()),
                kind => {
                    let file = file.context("--file is required for media messages")?;
                    let media = MediaPayload::from_path(&file).await?;
                    SendRequest::media(from, to, kind, media, message)
                }
            };
            dispatch::send_one(app.client.as_ref(), &request).await?;
            println!("message sent");
        }
        Commands::Bulk {
            from,
            list,
            numbers,
            kind,
            message,
            file,
            delay,
        } => {
            let from = PhoneNumber::parse(&from)?;
            let recipients = match (list, numbers) {
                (Some(path), _) => recipients::load_file(&path)?,
                (None, Some(text)) => recipients::parse_text(&text),
                (None, None) => anyhow::bail!("pass --list FILE or --numbers TEXT"),
            };
            report_invalid(&recipients);
            let media = match (kind, file) {
                (MessageKind::Text, _) => None,
                (_, Some(path)) => Some(MediaPayload::from_path(&path).await?),
                (_, None) => None,
            };
            let plan = BulkPlan {
                from_number: from,
                recipients: recipients.recipients,
                fallback: message,
                kind,
                media,
                delay: delay
                    .map(std::time::Duration::from_secs)
                    .unwrap_or_else(|| app.config.dispatch.delay()),
            };
            bulk_command(&app, plan).await?;
        }
        Commands::Report {
            from,
            start,
            end,
            export,
        } => {
            let query = ReportQuery::new(PhoneNumber::parse(&from)?).between(start, end);
            let entries = reports::fetch_reports(&app.client, &query).await?;
            let summary = reports::summarize(&entries);
            println!("{} sends", summary.total);
            for (status, count) in &summary.by_status {
                println!("  {status}: {count}");
            }
            for (day, count) in reports::daily_counts(&entries) {
                println!("  {day}: {count}");
            }
            if let Some(path) = export {
                reports::export_reports(&path, &entries)?;
                println!("exported to {}", path.display());
            }
        }
    }
    Ok(())
}

async fn numbers_command(app: &App, action: NumbersAction) -> anyhow::Result<()> {
    let registry = app.numbers();
    let snapshot = match action {
        NumbersAction::List => registry.refresh().await?,
        NumbersAction::Add { number, role } => registry.add(&number, role).await?,
        NumbersAction::Remove { number, role } => registry.remove(&number, role).await?,
    };
    println!("workers:");
    for number in &snapshot.workers {
        println!("  {number}");
    }
    println!("admins:");
    for number in &snapshot.admins {
        println!("  {number}");
    }
    Ok(())
}

fn print_state(state: &PollerState) {
    let status = state
        .status
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "{}: {}{}",
        state.number,
        if state.connected { "connected" } else { status.as_str() },
        state
            .error()
            .map(|e| format!(" ({e})"))
            .unwrap_or_default()
    );
}

fn write_qr(state: &PollerState, qr_out: Option<&Path>) -> anyhow::Result<()> {
    if let (Some(qr), Some(path)) = (state.qr_code.as_deref(), qr_out) {
        std::fs::write(path, poller::decode_qr(qr)?)?;
        println!("scan the QR code saved at {}", path.display());
    }
    Ok(())
}

async fn status_command(
    app: &App,
    number: Option<String>,
    watch: bool,
    qr_out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source: Arc<dyn ConnectionSource> = app.client.clone();

    let Some(number) = number else {
        let registry = app.numbers();
        let workers = registry.refresh().await?.workers;
        let numbers: Vec<PhoneNumber> = workers
            .iter()
            .filter_map(|n| PhoneNumber::parse(n).ok())
            .collect();
        let report = poller::fleet_status(source.as_ref(), &numbers).await?;
        for entry in &report.entries {
            println!(
                "{}: {:?}{}",
                entry.number,
                entry.status,
                entry
                    .detail
                    .as_deref()
                    .map(|d| format!(" ({d})"))
                    .unwrap_or_default()
            );
        }
        println!(
            "{}/{} connected ({:.0}%), {} errors",
            report.stats.connected,
            report.stats.total,
            report.stats.connected_percent,
            report.stats.errors
        );
        return Ok(());
    };

    let number = PhoneNumber::parse(&number)?;
    if !watch {
        let mut poller = ConnectionPoller::new(source, number);
        poller.tick(true).await?;
        print_state(poller.state());
        write_qr(poller.state(), qr_out.as_deref())?;
        return Ok(());
    }

    let handle = poller::spawn_poller(source, number, app.config.poller.qr_interval());
    let mut states = handle.state();
    let mut last_qr: Option<String> = None;
    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    // The poller only exits on its own when the session is rejected.
                    return Err(WppError::Unauthorized.into());
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
                if state.qr_code != last_qr {
                    write_qr(&state, qr_out.as_deref())?;
                    last_qr = state.qr_code.clone();
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.stop();
    Ok(())
}

fn report_invalid(list: &RecipientList) {
    println!(
        "{} valid recipients ({} personalized, {} default message), {} invalid",
        list.valid_count(),
        list.personalized_count(),
        list.fallback_count(),
        list.invalid_count()
    );
    for entry in &list.invalid {
        println!("  invalid: {}", entry.raw);
    }
}

async fn bulk_command(app: &App, plan: BulkPlan) -> anyhow::Result<()> {
    let mut bulk = BulkDispatch::new(plan)?;
    let cancel = bulk.cancel_handle();
    let mut events = bulk.subscribe();

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DispatchEvent::Attempted { outcome, progress } => {
                    let result = match &outcome.error {
                        None => "ok".to_string(),
                        Some(err) => format!("failed: {err}"),
                    };
                    println!(
                        "[{}/{} {:>3}%] {} {}",
                        progress.attempted,
                        progress.total,
                        progress.percent(),
                        outcome.number,
                        result
                    );
                }
                DispatchEvent::Finished { .. } => break,
            }
        }
    });

    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling after the current send...");
            cancel.cancel();
        }
    });

    let summary = bulk.run(app.client.as_ref()).await;
    interrupt.abort();
    let _ = printer.await;

    println!(
        "{}: {} sent, {} failed ({}/{} attempted)",
        if summary.session_expired {
            "stopped"
        } else if summary.cancelled {
            "cancelled"
        } else {
            "done"
        },
        summary.successes,
        summary.failures,
        summary.attempted,
        summary.total
    );
    if summary.session_expired {
        return Err(WppError::Unauthorized.into());
    }
    Ok(())
}
