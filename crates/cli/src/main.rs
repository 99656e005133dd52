use anyhow::Context;
use clap::{Parser, Subcommand};
use clinic_core::{
    connect_timeout_from_env_value, Appointment, AppointmentDraft, AppointmentId,
    AppointmentStore, ConversationController, LifecycleManager, RestRowStore,
    SessionCallbacks, StoreConfig, WebSocketTransport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic appointment system CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List all appointments, earliest first
    List,
    /// Book a new appointment
    Book {
        /// Patient name
        name: String,
        /// Patient email
        email: String,
        /// Patient phone number
        phone: String,
        /// Date (YYYY-MM-DD)
        date: String,
        /// Time (HH:MM)
        time: String,
        /// Treatment name
        treatment: String,
        /// Free-text notes (optional)
        #[arg(long)]
        notes: Option<String>,
    },
    /// Confirm a pending appointment
    Confirm { id: String },
    /// Mark a confirmed appointment as completed
    Complete { id: String },
    /// Cancel a pending or confirmed appointment
    Cancel { id: String },
    /// Replace the notes on an appointment (an empty string clears them)
    Note { id: String, notes: String },
    /// Talk to the voice agent until Ctrl-C
    Converse {
        /// Agent WebSocket URL
        #[arg(long, env = "CONVERSATION_URL")]
        url: String,
    },
}

fn lifecycle_from_env() -> anyhow::Result<LifecycleManager<RestRowStore>> {
    let url = std::env::var("STORE_URL").context("STORE_URL must be set")?;
    let key = std::env::var("STORE_API_KEY").context("STORE_API_KEY must be set")?;
    let cfg = StoreConfig::new(&url, key, std::env::var("STORE_TABLE").ok())?;
    Ok(LifecycleManager::new(AppointmentStore::new(
        RestRowStore::new(&cfg),
    )))
}

fn print_appointment(a: &Appointment) {
    println!(
        "ID: {}, {} {} [{}] {} <{}>, {}{}",
        a.id,
        a.date,
        a.time,
        a.status,
        a.patient_name,
        a.patient_email,
        a.treatment,
        a.notes
            .as_deref()
            .map(|n| format!(" ({n})"))
            .unwrap_or_default()
    );
}

async fn converse(url: &str) -> anyhow::Result<()> {
    let transport = WebSocketTransport::new(url)?;
    let timeout =
        connect_timeout_from_env_value(std::env::var("CONVERSATION_CONNECT_TIMEOUT_SECS").ok())?;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let on_error_done = done_tx.clone();
    let callbacks = SessionCallbacks::new()
        .on_connect(|| println!("Connected. Press Ctrl-C to end the conversation."))
        .on_message(|text| println!("agent: {text}"))
        .on_disconnect(move |reason| {
            println!("Disconnected ({reason})");
            let _ = done_tx.send(());
        })
        .on_error(move |e| {
            eprintln!("Conversation error: {e}");
            // The session survives transport errors.
            if e.is_connect_failure() {
                let _ = on_error_done.send(());
            }
        });

    let controller = ConversationController::new(transport, callbacks, timeout);
    let trigger = controller.register_trigger("cli");
    trigger.activate();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            controller.end().await;
            // Give the dispatcher a moment to report the disconnect.
            let _ = tokio::time::timeout(Duration::from_secs(1), done_rx.recv()).await;
        }
        _ = done_rx.recv() => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("clinic_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List) => {
            let appointments = lifecycle_from_env()?.list().await?;
            if appointments.is_empty() {
                println!("No appointments found.");
            } else {
                for appointment in &appointments {
                    print_appointment(appointment);
                }
            }
        }
        Some(Commands::Book {
            name,
            email,
            phone,
            date,
            time,
            treatment,
            notes,
        }) => {
            let draft = AppointmentDraft {
                patient_name: name,
                patient_email: email,
                patient_phone: phone,
                date,
                time,
                treatment,
                notes,
            };
            let created = lifecycle_from_env()?
                .create(draft)
                .await
                .context("booking appointment")?;
            println!("Booked appointment with ID: {}", created.id);
        }
        Some(Commands::Confirm { id }) => {
            let a = lifecycle_from_env()?
                .confirm(&AppointmentId::new(id))
                .await
                .context("confirming appointment")?;
            print_appointment(&a);
        }
        Some(Commands::Complete { id }) => {
            let a = lifecycle_from_env()?
                .complete(&AppointmentId::new(id))
                .await
                .context("completing appointment")?;
            print_appointment(&a);
        }
        Some(Commands::Cancel { id }) => {
            let a = lifecycle_from_env()?
                .cancel(&AppointmentId::new(id))
                .await
                .context("cancelling appointment")?;
            print_appointment(&a);
        }
        Some(Commands::Note { id, notes }) => {
            let a = lifecycle_from_env()?
                .update_notes(&AppointmentId::new(id), Some(notes))
                .await
                .context("updating notes")?;
            print_appointment(&a);
        }
        Some(Commands::Converse { url }) => converse(&url).await?,
        None => {
            println!("Use 'clinic --help' for commands");
        }
    }

    Ok(())
}
