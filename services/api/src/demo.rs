use crate::infra::{build_service, engine_settings, load_inventory, sample_applicants, sample_rooms};
use clap::Args;
use hostel_allocation::error::AppError;
use hostel_allocation::workflows::allocation::{
    AllocationServiceError, ApplicantId, AuditEntry, CycleReport, CycleRequest, DecisionOutcome,
    HostelId, OverrideRequest, ReleaseRequest, RoomId,
};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct CycleRunArgs {
    /// Applicant CSV export
    #[arg(long)]
    pub(crate) applicants: PathBuf,
    /// Room inventory CSV export
    #[arg(long)]
    pub(crate) rooms: PathBuf,
    /// Score and match without committing anything
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// Let already-allocated applicants compete for a new room
    #[arg(long)]
    pub(crate) room_change: bool,
    /// Restrict the cycle to these hostels (repeatable)
    #[arg(long)]
    pub(crate) hostel: Vec<String>,
    /// Print the report as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Stop after the allocation cycle
    #[arg(long)]
    pub(crate) skip_manual: bool,
    /// Print cycle reports as JSON
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) fn run_cycle_command(args: CycleRunArgs) -> Result<(), AppError> {
    let (rooms, records) = load_inventory(Some(&args.rooms), Some(&args.applicants))?;
    let (service, _) = build_service(rooms, records, engine_settings()?);

    let hostels = if args.hostel.is_empty() {
        None
    } else {
        Some(args.hostel.into_iter().map(HostelId).collect::<BTreeSet<_>>())
    };
    let report = service.run_cycle_with_retry(CycleRequest {
        dry_run: args.dry_run,
        room_change: args.room_change,
        hostels,
        ..CycleRequest::default()
    })?;

    print_report(&report, args.json)
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let (service, _) = build_service(sample_rooms(), sample_applicants(), engine_settings()?);

    println!("Hostel allocation demo");
    println!("\nDry run (nothing is committed)");
    let preview = service.run_cycle(CycleRequest {
        dry_run: true,
        ..CycleRequest::default()
    })?;
    print_report(&preview, args.json)?;

    println!("\nCommitted cycle");
    let report = service.run_cycle_with_retry(CycleRequest::default())?;
    print_report(&report, args.json)?;

    if args.skip_manual {
        return Ok(());
    }

    println!("\nManual changes");
    let released = service.release(ReleaseRequest {
        applicant_id: ApplicantId("UG-1008".to_string()),
        operator: "registry.demo".to_string(),
        reason: "deferred admission".to_string(),
    })?;
    println!(
        "- released {} ({})",
        released.decision.applicant_id,
        released.decision.rationale
    );

    for room in ["A-101", "K-201"] {
        let outcome = service.manual_override(OverrideRequest {
            applicant_id: ApplicantId("UG-1007".to_string()),
            room_id: RoomId(room.to_string()),
            operator: "warden.demo".to_string(),
            reason: "hardship appeal".to_string(),
        });
        match outcome {
            Ok(receipt) => println!(
                "- override into {room} committed as {} ({})",
                receipt.decision.id,
                describe(&receipt.decision.outcome)
            ),
            Err(AllocationServiceError::Constraint(violation)) => {
                println!("- override into {room} rejected: {violation}")
            }
            Err(err) => return Err(err.into()),
        }
    }

    println!("\nAudit trail for UG-1007");
    let trail = service.audit_for_applicant(&ApplicantId("UG-1007".to_string()))?;
    print_audit(&trail);

    Ok(())
}

fn print_report(report: &CycleReport, json: bool) -> Result<(), AppError> {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => println!("report unavailable as JSON: {err}"),
        }
        return Ok(());
    }

    let counts = &report.counts;
    println!(
        "{} [{}]: processed {} | allocated {} | unallocated {} | ineligible {} | retained {}",
        report.cycle.id,
        report.cycle.status.label(),
        counts.processed,
        counts.allocated,
        counts.unallocated,
        counts.ineligible,
        counts.retained
    );
    if report.audit_incomplete {
        println!("WARNING: audit trail incomplete for this cycle");
    }

    for summary in &report.decisions {
        println!(
            "  #{:<3} {:<10} adjusted {:>6.2} raw {:>6.2}  {}",
            summary.rank,
            summary.applicant_id,
            summary.adjusted_score,
            summary.raw_score,
            describe(&summary.outcome)
        );
    }

    if !report.waiting_list.is_empty() {
        println!("Waiting list");
        for entry in &report.waiting_list {
            let flag = if entry.priority { " (priority)" } else { "" };
            println!(
                "  {}. {} {:.2} {}{}",
                entry.position,
                entry.applicant_id,
                entry.adjusted_score,
                entry.reason.code(),
                flag
            );
        }
    }

    if !report.ineligible.is_empty() {
        println!("Ineligible");
        for exclusion in &report.ineligible {
            println!(
                "  {} {}",
                exclusion.applicant_id,
                exclusion.reason.summary()
            );
        }
    }

    Ok(())
}

fn print_audit(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("  (no entries)");
    }
    for entry in entries {
        println!(
            "  {} {:<19} {:<22} {}",
            entry.cycle_id,
            entry.action.label(),
            entry.actor.label(),
            entry.detail
        );
    }
}

fn describe(outcome: &DecisionOutcome) -> String {
    match outcome {
        DecisionOutcome::Allocated {
            room_id,
            hostel_id,
            bed,
        } => format!("allocated {hostel_id}/{room_id} bed {bed}"),
        DecisionOutcome::Unallocated { reason } => format!("unallocated: {}", reason.summary()),
        DecisionOutcome::Released { room_id, bed } => format!("released {room_id} bed {bed}"),
    }
}
