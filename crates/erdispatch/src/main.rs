//! `erdctl` - CLI for erdispatch
//!
//! This binary provides the command-line interface for raising emergency
//! calls, answering them from a hospital desk and reviewing past cases.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use erdispatch::ai::{parse_intake_reply, IntakeReply};
use erdispatch::cli::{
    CallCommand, Cli, Command, ConfigCommand, DeskAction, DeskCommand, HistoryCommand,
    HospitalCommand, OutputFormat, RequestCommand,
};
use erdispatch::directory::{find_hospitals, DirectoryFilter};
use erdispatch::model::{Beds, NewHospital};
use erdispatch::store::ChangeKind;
use erdispatch::{
    history, init_logging, CallOutcome, CompletedCase, Config, Dispatcher, EmergencyCall, Error,
    GeminiClient, Hospital, HospitalDesk, Store,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(e) => eprintln!("{}", e.user_message()),
                None => eprintln!("Error: {err:#}"),
            }
            tracing::debug!(error = ?err, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        Command::Hospital(cmd) => handle_hospital(&open_store(&config)?, cmd),
        Command::Call(cmd) => handle_call(&config, cmd).await,
        Command::Desk(cmd) => handle_desk(open_store(&config)?, cmd).await,
        Command::History(cmd) => handle_history(&config, cmd).await,
        Command::Sweep(cmd) => {
            let report = tracker(&config)?.sweep(chrono::Utc::now()).await?;
            if cmd.json {
                let json = serde_json::json!({
                    "examined": report.examined,
                    "rebroadcast": report.rebroadcast,
                    "withdrawn": report.withdrawn,
                    "accepted": report.accepted,
                    "failed": report.failed,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!(
                    "Examined {}: {} re-broadcast, {} withdrawn, {} already accepted, {} failed",
                    report.examined,
                    report.rebroadcast,
                    report.withdrawn,
                    report.accepted,
                    report.failed
                );
            }
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> erdispatch::Result<Store> {
    Ok(Store::open(config.database_path())?.with_poll_interval(config.poll_interval()))
}

/// Dispatcher for following and sweeping calls. Needs no model API key.
fn tracker(config: &Config) -> erdispatch::Result<Dispatcher> {
    Ok(Dispatcher::without_model(
        open_store(config)?,
        config.dispatch.clone(),
    ))
}

fn dispatcher(config: &Config) -> erdispatch::Result<Dispatcher> {
    let model = GeminiClient::from_config(&config.ai)?;
    Ok(Dispatcher::new(
        open_store(config)?,
        Arc::new(model),
        config.dispatch.clone(),
    ))
}

fn handle_hospital(store: &Store, cmd: HospitalCommand) -> anyhow::Result<()> {
    match cmd {
        HospitalCommand::Register {
            admin,
            name,
            address,
            location,
            total_beds,
            available_beds,
            departments,
        } => {
            let location = location
                .point()?
                .ok_or_else(|| Error::invalid_input("--lat and --lon are required"))?;
            let mut hospital = NewHospital::new(name, address, location);
            hospital.beds = Beds::new(total_beds, available_beds)?;
            hospital.available_departments = departments;
            let hospital = store.register_hospital(&admin, &hospital)?;
            println!("Registered {} ({})", hospital.name, hospital.id);
        }
        HospitalCommand::Show { id, format } => {
            let hospital = store
                .get_hospital(&id)?
                .ok_or_else(|| Error::HospitalNotFound(id.clone()))?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&hospital)?);
            } else {
                print_hospital(&hospital);
            }
        }
        HospitalCommand::List {
            department,
            name,
            location,
            format,
        } => {
            let origin = location.point()?;
            let filter = DirectoryFilter { department, name };
            let entries = find_hospitals(store, &filter, origin.as_ref())?;
            match format {
                OutputFormat::Json => {
                    let json: Vec<_> = entries
                        .iter()
                        .map(|e| {
                            serde_json::json!({
                                "hospital": e.hospital,
                                "distance_m": e.distance_m,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Plain | OutputFormat::Table => {
                    if entries.is_empty() {
                        println!("No hospitals found.");
                    }
                    for entry in &entries {
                        println!(
                            "{:<22} {:<24} beds {:>3}/{:<3} {:>10}  {}",
                            entry.hospital.id,
                            entry.hospital.name,
                            entry.hospital.beds.available,
                            entry.hospital.beds.total,
                            entry.distance_label().unwrap_or_default(),
                            department_list(&entry.hospital),
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

async fn handle_call(config: &Config, cmd: CallCommand) -> anyhow::Result<()> {
    match cmd {
        CallCommand::Request(request) => handle_request(config, &request).await?,
        CallCommand::Status { id, format } => {
            let store = open_store(config)?;
            let call = store
                .get_call(&id)?
                .ok_or_else(|| Error::CallNotFound(id.clone()))?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&call)?);
            } else {
                print_call(&call);
            }
        }
        CallCommand::Wait { id } => {
            let outcome = tracker(config)?.await_acceptance(&id).await?;
            print_outcome(&outcome);
        }
        CallCommand::Cancel { id, requester } => {
            open_store(config)?.cancel_call(&id, &requester)?;
            println!("Cancelled {id}");
        }
        CallCommand::Intake { reply } => {
            let reply = match reply {
                Some(reply) => reply,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read reply from stdin")?;
                    buf
                }
            };
            match parse_intake_reply(&reply) {
                IntakeReply::Complete(patient) => {
                    println!("{}", serde_json::to_string_pretty(&patient)?);
                }
                IntakeReply::Continue(text) => println!("{text}"),
            }
        }
    }
    Ok(())
}

async fn handle_request(config: &Config, request: &RequestCommand) -> anyhow::Result<()> {
    let dispatcher = dispatcher(config)?;
    let call = dispatcher
        .request(&request.requester, request.patient(), request.location.point()?)
        .await?;

    let departments: Vec<String> = call
        .recommended_departments
        .iter()
        .map(ToString::to_string)
        .collect();
    println!(
        "Call {} sent to {} hospital(s) for {}",
        call.id,
        call.targeted_hospital_ids.len(),
        departments.join(", ")
    );
    if request.no_wait {
        return Ok(());
    }

    println!("Waiting for a hospital to accept...");
    let outcome = dispatcher.await_acceptance(&call.id).await?;
    print_outcome(&outcome);
    Ok(())
}

async fn handle_desk(store: Store, cmd: DeskCommand) -> anyhow::Result<()> {
    let mut desk = HospitalDesk::for_admin(store, &cmd.admin)?;

    match cmd.action {
        DeskAction::Pending { format } => print_calls(&desk, &desk.pending()?, format)?,
        DeskAction::Accepted { format } => print_calls(&desk, &desk.accepted()?, format)?,
        DeskAction::Watch => {
            let mut pending = desk.watch_pending()?;
            println!("Watching calls for {} (Ctrl-C to stop)", desk.hospital().name);
            loop {
                tokio::select! {
                    change = pending.next() => {
                        let Some(change) = change else { break };
                        let call = &change.call;
                        let label = match change.kind {
                            ChangeKind::Added => "NEW",
                            ChangeKind::Modified => "UPDATED",
                            ChangeKind::Removed => "GONE",
                        };
                        println!(
                            "[{label}] {} {} / {} ({:.1} km)",
                            call.id,
                            call.patient_info.name,
                            call.patient_info.symptom,
                            desk.distance_to(call) / 1000.0
                        );
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            pending.close();
        }
        DeskAction::Accept { id } => {
            let call = desk.accept(&id)?;
            println!("Accepted {} ({})", call.id, call.patient_info.name);
        }
        DeskAction::Reject { id } => {
            desk.reject(&id)?;
            println!("Rejected {id}");
        }
        DeskAction::Complete { id } => {
            let case = desk.complete(&id)?;
            println!("Completed and archived {}", case.call.id);
        }
        DeskAction::Archive { format } => print_cases(&desk.archive()?, format)?,
        DeskAction::Beds { total, available } => {
            let hospital = desk.update_beds(total, available)?;
            println!(
                "{}: {}/{} beds available",
                hospital.name, hospital.beds.available, hospital.beds.total
            );
        }
        DeskAction::AddDepartment { department } => {
            if desk.add_department(department)? {
                println!("Now offering {department}");
            } else {
                println!("{department} was already offered");
            }
        }
        DeskAction::RemoveDepartment { department } => {
            if desk.remove_department(department)? {
                println!("No longer offering {department}");
            } else {
                println!("{department} was not offered");
            }
        }
    }
    Ok(())
}

async fn handle_history(config: &Config, cmd: HistoryCommand) -> anyhow::Result<()> {
    let store = open_store(config)?;
    match cmd {
        HistoryCommand::List { requester, format } => {
            print_cases(&store.completed_cases_for_requester(&requester)?, format)?;
        }
        HistoryCommand::Analyze { requester, format } => {
            let cases = store.completed_cases_for_requester(&requester)?;
            let model = GeminiClient::from_config(&config.ai)?;
            let analysis = history::analyze(&model, &cases).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                println!("[시간대 분석]");
                println!("{}", analysis.time_analysis);
                println!();
                println!("[주요 증상 분석]");
                println!("{}", analysis.symptom_analysis);
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                let mut shown = config.clone();
                shown.ai.api_key = shown.ai.api_key.map(|_| "********".to_string());
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Poll interval (ms): {}", config.storage.poll_interval_ms);
                println!();
                println!("[Dispatch]");
                println!("  Search radii (m):   {:?}", config.dispatch.search_radii_m);
                println!("  Expansion radii (m): {:?}", config.dispatch.expansion_radii_m);
                println!(
                    "  Accept timeout (s): {}",
                    config.dispatch.acceptance_timeout_secs
                );
                println!(
                    "  Max departments:    {}",
                    config.dispatch.max_recommended_departments
                );
                println!();
                println!("[AI]");
                println!("  Endpoint:           {}", config.ai.endpoint);
                println!("  Model:              {}", config.ai.model);
                println!(
                    "  API key:            {}",
                    if config.ai.api_key.is_some() { "set" } else { "not set" }
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn department_list(hospital: &Hospital) -> String {
    hospital
        .available_departments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_hospital(hospital: &Hospital) {
    println!("{} ({})", hospital.name, hospital.id);
    println!("  Address:     {}", hospital.address);
    println!(
        "  Location:    {:.5}, {:.5}",
        hospital.location.latitude, hospital.location.longitude
    );
    println!(
        "  Beds:        {}/{} available",
        hospital.beds.available, hospital.beds.total
    );
    println!("  Departments: {}", department_list(hospital));
}

fn print_call(call: &EmergencyCall) {
    let patient = &call.patient_info;
    println!("Call {} [{}]", call.id, call.status);
    println!(
        "  Patient:     {} ({}, {})",
        patient.name,
        patient.age.map_or_else(|| "?".to_string(), |a| a.to_string()),
        patient.gender
    );
    println!("  Symptom:     {}", patient.symptom);
    if !patient.other_info.is_empty() {
        println!("  Other:       {}", patient.other_info);
    }
    println!(
        "  Departments: {}",
        call.recommended_departments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  Targets:     {} hospital(s), round {}",
        call.targeted_hospital_ids.len(),
        call.broadcast_round
    );
    if let Some(name) = &call.accepted_hospital_name {
        println!("  Accepted by: {name}");
    }
    println!("  Created:     {}", call.created_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_outcome(outcome: &CallOutcome) {
    match outcome {
        CallOutcome::Accepted(call) => println!(
            "Accepted by {}",
            call.accepted_hospital_name.as_deref().unwrap_or("unknown hospital")
        ),
        CallOutcome::Withdrawn => println!("The call was withdrawn."),
    }
}

fn print_calls(
    desk: &HospitalDesk,
    calls: &[EmergencyCall],
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(calls)?),
        OutputFormat::Plain => calls.iter().for_each(print_call),
        OutputFormat::Table => {
            if calls.is_empty() {
                println!("No calls.");
            }
            for call in calls {
                println!(
                    "{:<22} {:<10} {:<10} {:>6.1} km  {}",
                    call.id,
                    call.status,
                    call.patient_info.name,
                    desk.distance_to(call) / 1000.0,
                    call.patient_info.symptom
                );
            }
        }
    }
    Ok(())
}

fn print_cases(cases: &[CompletedCase], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(cases)?),
        OutputFormat::Plain | OutputFormat::Table => {
            if cases.is_empty() {
                println!("No completed cases.");
            }
            for case in cases {
                let completed = case
                    .call
                    .completed_at
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<16} {:<24} {:<10} {}",
                    completed,
                    case.hospital_name(),
                    case.call.patient_info.name,
                    case.call.patient_info.symptom
                );
            }
        }
    }
    Ok(())
}
