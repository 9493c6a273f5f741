use adherence_core::*;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "medtrack")]
#[command(about = "Medication schedule and adherence tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Reference instant (RFC 3339) used instead of the current time
    #[arg(long, global = true, hide = true)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage user records
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Create, edit and list prescriptions
    Prescription {
        #[command(subcommand)]
        command: PrescriptionCommands,
    },

    /// List medication logs
    Logs {
        /// Only logs of this prescription
        #[arg(long)]
        prescription: Option<String>,

        /// Only logs in this status (upcoming, overdue, taken, missed, skipped)
        #[arg(long)]
        status: Option<LogStatus>,
    },

    /// Mark a dose as taken
    Take { log_id: String },

    /// Mark a dose as missed
    Miss { log_id: String },

    /// Mark a dose as skipped
    Skip { log_id: String },

    /// Mark overdue doses and send overdue notifications
    Sweep {
        /// Keep running, sweeping on the configured interval
        #[arg(long)]
        watch: bool,
    },

    /// Export medication logs to CSV
    Export {
        /// Output file
        #[arg(long)]
        out: PathBuf,

        /// Only logs in this status
        #[arg(long)]
        status: Option<LogStatus>,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add or replace a user
    Add {
        id: String,

        #[arg(long, default_value = "")]
        name: String,

        /// patient, doctor or caretaker
        #[arg(long, default_value = "patient")]
        role: UserRole,

        /// Push notification address
        #[arg(long)]
        push_address: Option<String>,

        /// Turn off overdue dose reminders
        #[arg(long)]
        no_reminders: bool,

        /// Start of quiet hours (HH:MM)
        #[arg(long, requires = "quiet_end")]
        quiet_start: Option<ReminderTime>,

        /// End of quiet hours (HH:MM)
        #[arg(long, requires = "quiet_start")]
        quiet_end: Option<ReminderTime>,

        /// Accepted delivery channels, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        channels: Vec<String>,
    },
}

#[derive(Subcommand)]
enum PrescriptionCommands {
    /// Create a prescription and generate its medication logs
    Add {
        #[arg(long)]
        patient: String,

        #[arg(long)]
        medication: String,

        #[arg(long)]
        dosage: String,

        /// onceDaily, twiceDaily, threeTimesDaily, fourTimesDaily, everyOtherDay, weekly, asNeeded
        #[arg(long, default_value = "onceDaily")]
        frequency: String,

        /// Reminder times, comma separated (HH:MM)
        #[arg(long, value_delimiter = ',', required = true)]
        times: Vec<ReminderTime>,

        /// First day of the schedule (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last day of the schedule (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,

        #[arg(long)]
        doctor: Option<String>,

        /// Prescription id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        instructions: Option<String>,
    },

    /// Edit a prescription, regenerating its logs if the schedule changed
    Edit {
        id: String,

        #[arg(long, value_delimiter = ',')]
        times: Option<Vec<ReminderTime>>,

        #[arg(long)]
        frequency: Option<String>,

        #[arg(long)]
        dosage: Option<String>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long, conflicts_with = "clear_end")]
        end: Option<NaiveDate>,

        /// Remove the end date
        #[arg(long)]
        clear_end: bool,

        #[arg(long, action = clap::ArgAction::Set)]
        active: Option<bool>,
    },

    /// List prescriptions
    List,
}

type Service = AdherenceService<FileStore, OutboxNotifier>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    adherence_core::logging::init_with_level(adherence_core::logging::level_for_verbosity(cli.verbose));

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let now = cli.now.unwrap_or_else(Utc::now);
    let svc = open_service(&data_dir, &config)?;

    match cli.command {
        Commands::User { command } => cmd_user(&svc, command),
        Commands::Prescription { command } => cmd_prescription(&svc, command, now),
        Commands::Logs {
            prescription,
            status,
        } => cmd_logs(&svc, prescription, status),
        Commands::Take { log_id } => cmd_action(&svc, &log_id, PatientAction::Take, now),
        Commands::Miss { log_id } => cmd_action(&svc, &log_id, PatientAction::Miss, now),
        Commands::Skip { log_id } => cmd_action(&svc, &log_id, PatientAction::Skip, now),
        Commands::Sweep { watch } => cmd_sweep(&svc, watch, cli.now, &config),
        Commands::Export { out, status } => cmd_export(&svc, &out, status),
    }
}

fn open_service(data_dir: &Path, config: &Config) -> Result<Service> {
    let store = FileStore::new(data_dir.join("store")).with_batch_limit(config.store.batch_limit);
    let outbox = OutboxNotifier::new(data_dir.join("outbox.jsonl"));
    AdherenceService::new(store, outbox, config)
}

fn cmd_user(svc: &Service, command: UserCommands) -> Result<()> {
    match command {
        UserCommands::Add {
            id,
            name,
            role,
            push_address,
            no_reminders,
            quiet_start,
            quiet_end,
            channels,
        } => {
            let user = User {
                id,
                display_name: name,
                role,
                fcm_token: push_address,
                notification_preferences: NotificationPreferences {
                    enable_medication_reminders: !no_reminders,
                    quiet_hours_start: quiet_start,
                    quiet_hours_end: quiet_end,
                    channels,
                },
            };
            svc.repo().put_user(&user)?;
            println!("✓ Saved user {}", user.id);
            Ok(())
        }
    }
}

fn cmd_prescription(svc: &Service, command: PrescriptionCommands, now: DateTime<Utc>) -> Result<()> {
    match command {
        PrescriptionCommands::Add {
            patient,
            medication,
            dosage,
            frequency,
            times,
            start,
            end,
            doctor,
            id,
            instructions,
        } => {
            let prescription = Prescription {
                id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                patient_id: patient,
                doctor_id: doctor,
                medication_name: medication,
                dosage,
                medication_type: None,
                frequency: Frequency::parse(&frequency),
                reminder_times: times,
                start_date: start,
                end_date: end,
                instructions,
                notes: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            prescription.validate()?;
            if let Frequency::Unrecognized(raw) = &prescription.frequency {
                eprintln!("Unknown frequency: {}. Scheduling every day.", raw);
            }

            svc.repo().put_prescription(&prescription)?;
            let logs = svc.prescription_created(&prescription, now)?;

            println!("✓ Created prescription {}", prescription.id);
            println!("  Generated {} medication logs", logs.len());
            Ok(())
        }

        PrescriptionCommands::Edit {
            id,
            times,
            frequency,
            dosage,
            start,
            end,
            clear_end,
            active,
        } => {
            let before = svc.repo().get_prescription(&id)?.ok_or_else(|| Error::NotFound {
                collection: "prescriptions",
                id: id.clone(),
            })?;

            let mut after = before.clone();
            if let Some(times) = times {
                after.reminder_times = times;
            }
            if let Some(frequency) = frequency {
                after.frequency = Frequency::parse(&frequency);
            }
            if let Some(dosage) = dosage {
                after.dosage = dosage;
            }
            if let Some(start) = start {
                after.start_date = start;
            }
            if end.is_some() || clear_end {
                after.end_date = end;
            }
            if let Some(active) = active {
                after.is_active = active;
            }
            after.updated_at = now;
            after.validate()?;

            // Stored only after regeneration commits, so a failed edit can be re-run
            let outcome =
                svc.edit_prescription(&before, &after, now, |p| svc.repo().put_prescription(p))?;

            println!("✓ Updated prescription {}", after.id);
            if outcome.regenerated {
                println!(
                    "  Regenerated schedule: removed {} upcoming logs, created {}",
                    outcome.deleted,
                    outcome.created.len()
                );
            } else {
                println!("  Schedule unchanged");
            }
            Ok(())
        }

        PrescriptionCommands::List => {
            let prescriptions = svc.repo().list_prescriptions()?;
            if prescriptions.is_empty() {
                println!("No prescriptions.");
            }
            for p in prescriptions {
                let times: Vec<String> = p.reminder_times.iter().map(|t| t.to_string()).collect();
                println!(
                    "{}  {} {} ({}) at {}  {}..{}{}",
                    p.id,
                    p.medication_name,
                    p.dosage,
                    p.frequency,
                    times.join(","),
                    p.start_date,
                    p.end_date.map(|d| d.to_string()).unwrap_or_default(),
                    if p.is_active { "" } else { "  [inactive]" }
                );
            }
            Ok(())
        }
    }
}

fn cmd_logs(svc: &Service, prescription: Option<String>, status: Option<LogStatus>) -> Result<()> {
    let query = LogQuery {
        prescription_id: prescription,
        status,
        ..Default::default()
    };
    let logs = svc.repo().query_logs(&query)?;
    if logs.is_empty() {
        println!("No medication logs.");
    }
    for log in logs {
        println!(
            "{}  {}  {:<8}{}",
            log.id,
            log.scheduled_time.to_rfc3339(),
            log.status,
            log.taken_time
                .map(|t| format!("  taken {}", t.to_rfc3339()))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_action(svc: &Service, log_id: &str, action: PatientAction, now: DateTime<Utc>) -> Result<()> {
    let log = svc.record_action(log_id, action, now)?;
    println!("✓ Dose {} marked {}", log.id, log.status);
    Ok(())
}

fn cmd_sweep(
    svc: &Service,
    watch: bool,
    fixed_now: Option<DateTime<Utc>>,
    config: &Config,
) -> Result<()> {
    if !watch {
        let report = svc.sweep(fixed_now.unwrap_or_else(Utc::now))?;
        println!(
            "✓ Marked {} doses overdue ({} notifications sent)",
            report.transitioned.len(),
            report.notified
        );
        return Ok(());
    }

    let interval = config.sweep.interval()?;
    tracing::info!(
        "Sweeping every {} minutes (grace {} minutes)",
        config.sweep.interval_minutes,
        config.sweep.grace_minutes
    );
    loop {
        // A failed run leaves the remaining logs upcoming for the next tick
        match svc.sweep(Utc::now()) {
            Ok(report) => tracing::info!("Sweep marked {} doses overdue", report.transitioned.len()),
            Err(e) => tracing::error!("Sweep failed: {}", e),
        }
        std::thread::sleep(interval);
    }
}

fn cmd_export(svc: &Service, out: &Path, status: Option<LogStatus>) -> Result<()> {
    let query = LogQuery {
        status,
        ..Default::default()
    };
    let count = export_logs(svc.repo(), &query, out)?;
    println!("✓ Exported {} logs to {}", count, out.display());
    Ok(())
}
