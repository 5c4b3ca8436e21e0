//! QR verification and staged check-in.
//!
//! Authorization, device and signature checks run once per scan; everything
//! that depends on ticket state is decided inside a store transaction so two
//! scanners can never both consume the same stage. Every attempt, accepted or
//! not, leaves exactly one audit record per ticket it concerned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CheckinRecord, CheckinResult, CheckinStage, CheckinStamp, Event, Seat, Ticket, TicketState,
    TicketStatus,
};
use crate::services::access::{require_staff_or_admin, Caller, DeviceDecision};
use crate::services::audit::{record_checkin, stage_checkin, ScanContext};
use crate::services::qr::{GroupClaims, TokenRejection};
use crate::state::AppState;
use crate::store::{Transaction, TxOperation};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinRequest {
    pub ticket_id: Uuid,
    pub qr_token: String,
    pub scanner_device_id: Option<String>,
    /// Omitted by single-stage scanners.
    pub checkin_stage: Option<CheckinStage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCheckinRequest {
    pub qr_token: String,
    pub scanner_device_id: Option<String>,
    pub checkin_stage: Option<CheckinStage>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckinOutcome {
    pub success: bool,
    pub result: CheckinResult,
    pub message: String,
    pub title: Option<String>,
    pub seat_info: Option<String>,
    pub stage: CheckinStage,
    pub ticket_status: Option<TicketStatus>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCheckinOutcome {
    pub success: bool,
    pub result: CheckinResult,
    pub message: String,
    pub title: Option<String>,
    pub stage: CheckinStage,
    pub order_id: Option<Uuid>,
    /// Tickets advanced by this call.
    pub checked_count: usize,
    pub already_checked_count: usize,
    /// Tickets left untouched for any other reason.
    pub skipped_count: usize,
    pub total_count: usize,
}

fn message_for(result: CheckinResult, stage: CheckinStage) -> &'static str {
    match (result, stage) {
        (CheckinResult::Success, CheckinStage::Entry) => "Entry confirmed",
        (CheckinResult::Success, CheckinStage::Intermission) => "Re-entry confirmed",
        (CheckinResult::Expired, _) => "QR code has expired, ask the holder to refresh it",
        (CheckinResult::InvalidSignature, _) => "QR code could not be verified",
        (CheckinResult::InvalidTicket, _) => "QR code does not match a current ticket",
        (CheckinResult::AlreadyUsed, _) => "Ticket has already been checked in for this stage",
        (CheckinResult::Canceled, _) => "Ticket has been canceled",
        (CheckinResult::MissingEntryCheckin, _) => "Ticket has no entry check-in yet",
        (CheckinResult::NotAllowedDevice, _) => "This scanner is not allowed to check in tickets",
    }
}

impl CheckinOutcome {
    fn rejected(result: CheckinResult, stage: CheckinStage, message: &str) -> Self {
        Self {
            success: false,
            result,
            message: message.to_string(),
            title: None,
            seat_info: None,
            stage,
            ticket_status: None,
        }
    }
}

impl GroupCheckinOutcome {
    fn rejected(result: CheckinResult, stage: CheckinStage, message: &str) -> Self {
        Self {
            success: false,
            result,
            message: message.to_string(),
            title: None,
            stage,
            order_id: None,
            checked_count: 0,
            already_checked_count: 0,
            skipped_count: 0,
            total_count: 0,
        }
    }
}

/// Stages applied by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    Staged(CheckinStage),
    /// Single-stage scanner: entry only when the event has an intermission,
    /// otherwise entry and intermission together.
    Legacy { has_intermission: bool },
}

impl ScanMode {
    fn stages(self) -> &'static [CheckinStage] {
        match self {
            ScanMode::Staged(CheckinStage::Entry)
            | ScanMode::Legacy {
                has_intermission: true,
            } => &[CheckinStage::Entry],
            ScanMode::Staged(CheckinStage::Intermission) => &[CheckinStage::Intermission],
            ScanMode::Legacy {
                has_intermission: false,
            } => &[CheckinStage::Entry, CheckinStage::Intermission],
        }
    }

    fn audit_stage(self) -> CheckinStage {
        match self {
            ScanMode::Staged(stage) => stage,
            ScanMode::Legacy { .. } => CheckinStage::Entry,
        }
    }
}

fn advance(
    state: &TicketState,
    stages: &[CheckinStage],
    stamp: &CheckinStamp,
) -> Result<TicketState, CheckinResult> {
    stages
        .iter()
        .try_fold(state.clone(), |current, stage| current.check_in(*stage, stamp.clone()))
}

/// Seat description for the scanner screen, and the seat itself when the
/// transition finished the ticket and the seat must follow.
async fn resolve_seat(
    tx: &mut Transaction,
    ticket: &Ticket,
) -> Result<(Option<String>, Option<Seat>), AppError> {
    match ticket.seat_id {
        Some(seat_id) => {
            let seat: Option<Seat> = tx.get(&seat_id.to_string()).await?;
            Ok((seat.as_ref().map(Seat::describe), seat))
        }
        None => Ok((ticket.standing_label(), None)),
    }
}

struct CheckInTicket<'a> {
    ticket_id: Uuid,
    qr_version: u32,
    mode: ScanMode,
    ctx: &'a ScanContext,
    title: Option<String>,
}

#[async_trait]
impl TxOperation for CheckInTicket<'_> {
    type Output = CheckinOutcome;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<CheckinOutcome, AppError> {
        let stage = self.mode.audit_stage();
        let ticket: Option<Ticket> = tx.get(&self.ticket_id.to_string()).await?;
        let Some(mut ticket) = ticket.filter(|t| t.qr_version == self.qr_version) else {
            let record = self.ctx.record(
                Some(self.ticket_id),
                CheckinResult::InvalidTicket,
                Some("ticket missing or QR version superseded"),
            );
            stage_checkin(tx, &record)?;
            return Ok(self.finish(CheckinResult::InvalidTicket, None, None));
        };

        let stamp = CheckinStamp {
            at: self.ctx.scanned_at,
            staff_id: self.ctx.staff_id.clone(),
        };
        let mut record = self.ctx.record(Some(ticket.id), CheckinResult::Success, None);
        record.event_id = Some(ticket.event_id);
        record.order_id = Some(ticket.order_id);

        match advance(&ticket.state, self.mode.stages(), &stamp) {
            Ok(next) => {
                let (seat_info, seat) = resolve_seat(tx, &ticket).await?;
                if let (TicketState::Used { .. }, Some(mut seat)) = (&next, seat) {
                    seat.mark_used();
                    tx.put(&seat)?;
                }
                ticket.state = next;
                tx.put(&ticket)?;

                record.seat_info = seat_info.clone();
                stage_checkin(tx, &record)?;
                Ok(self.finish(CheckinResult::Success, seat_info, Some(ticket.state.status())))
            }
            Err(result) => {
                record.result = result;
                record.error_message = Some(message_for(result, stage).to_string());
                stage_checkin(tx, &record)?;
                Ok(self.finish(result, None, Some(ticket.state.status())))
            }
        }
    }
}

impl CheckInTicket<'_> {
    fn finish(
        &self,
        result: CheckinResult,
        seat_info: Option<String>,
        ticket_status: Option<TicketStatus>,
    ) -> CheckinOutcome {
        let stage = self.mode.audit_stage();
        let message = match (result, self.mode) {
            (CheckinResult::Success, ScanMode::Legacy { .. }) => "Check-in confirmed",
            _ => message_for(result, stage),
        };
        CheckinOutcome {
            success: result == CheckinResult::Success,
            result,
            message: message.to_string(),
            title: self.title.clone(),
            seat_info,
            stage,
            ticket_status,
        }
    }
}

/// Verifies a presented ticket code and advances the ticket one stage.
///
/// Only role failures are errors; every other rejection comes back as a
/// [`CheckinOutcome`] with `success: false`.
pub async fn verify_and_check_in(
    state: &AppState,
    caller: &Caller,
    req: CheckinRequest,
) -> Result<CheckinOutcome, AppError> {
    let staff_id = require_staff_or_admin(state.identity.as_ref(), caller).await?;
    let now = state.clock.now();
    let mut ctx = ScanContext {
        staff_id,
        scanner_device_id: req.scanner_device_id.clone(),
        stage: req.checkin_stage.unwrap_or(CheckinStage::Entry),
        scanned_at: now,
    };

    let reject = |ctx: &ScanContext, result: CheckinResult, detail: &str| {
        let outcome = CheckinOutcome::rejected(result, ctx.stage, message_for(result, ctx.stage));
        let record = ctx.record(Some(req.ticket_id), result, Some(detail));
        (outcome, record)
    };

    let decision = state
        .devices
        .check(&state.store, req.scanner_device_id.as_deref(), &ctx.staff_id, now)
        .await?;
    if let DeviceDecision::Rejected(reason) = decision {
        let (mut outcome, record) = reject(&ctx, CheckinResult::NotAllowedDevice, reason);
        outcome.message = reason.to_string();
        record_checkin(&state.store, record).await;
        return Ok(outcome);
    }

    let claims = match state.qr.verify_ticket(&req.qr_token, now) {
        Ok(claims) => claims,
        Err(rejection) => {
            let result = match rejection {
                TokenRejection::Expired => CheckinResult::Expired,
                TokenRejection::InvalidSignature => CheckinResult::InvalidSignature,
            };
            let (outcome, record) = reject(&ctx, result, "token verification failed");
            record_checkin(&state.store, record).await;
            return Ok(outcome);
        }
    };
    if claims.ticket_id != req.ticket_id {
        let (outcome, record) = reject(&ctx, CheckinResult::InvalidTicket, "token issued for another ticket");
        record_checkin(&state.store, record).await;
        return Ok(outcome);
    }

    let event: Option<Event> = state.store.get(&claims.event_id.to_string()).await?;
    let mode = match req.checkin_stage {
        Some(stage) => ScanMode::Staged(stage),
        None => ScanMode::Legacy {
            has_intermission: event.as_ref().is_some_and(|e| e.has_intermission),
        },
    };
    ctx.stage = mode.audit_stage();

    let op = CheckInTicket {
        ticket_id: req.ticket_id,
        qr_version: claims.qr_version,
        mode,
        ctx: &ctx,
        title: event.map(|e| e.display_title().to_string()),
    };
    let outcome = match state.store.run(&op).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let mut record = ctx.record(
                Some(req.ticket_id),
                CheckinResult::InvalidTicket,
                Some("check-in could not be committed"),
            );
            record.event_id = Some(claims.event_id);
            record_checkin(&state.store, record).await;
            return Err(e);
        }
    };

    tracing::info!(
        ticket_id = %req.ticket_id,
        staff_id = %ctx.staff_id,
        stage = ?outcome.stage,
        result = outcome.result.as_str(),
        "Check-in processed"
    );
    Ok(outcome)
}

#[derive(Debug, Default)]
struct GroupTally {
    checked: usize,
    already: usize,
    missing_entry: usize,
    canceled: usize,
    invalid: usize,
}

impl GroupTally {
    fn count(&mut self, result: CheckinResult) {
        match result {
            CheckinResult::Success => self.checked += 1,
            CheckinResult::AlreadyUsed => self.already += 1,
            CheckinResult::MissingEntryCheckin => self.missing_entry += 1,
            CheckinResult::Canceled => self.canceled += 1,
            _ => self.invalid += 1,
        }
    }

    fn overall(&self) -> CheckinResult {
        if self.checked > 0 {
            CheckinResult::Success
        } else if self.already > 0 {
            CheckinResult::AlreadyUsed
        } else if self.missing_entry > 0 {
            CheckinResult::MissingEntryCheckin
        } else if self.canceled > 0 {
            CheckinResult::Canceled
        } else {
            CheckinResult::InvalidTicket
        }
    }
}

struct GroupCheckIn<'a> {
    claims: &'a GroupClaims,
    ctx: &'a ScanContext,
}

#[async_trait]
impl TxOperation for GroupCheckIn<'_> {
    type Output = GroupTally;
    type Error = AppError;

    async fn run(&self, tx: &mut Transaction) -> Result<GroupTally, AppError> {
        let stage = self.ctx.stage;
        let stamp = CheckinStamp {
            at: self.ctx.scanned_at,
            staff_id: self.ctx.staff_id.clone(),
        };
        let mut tally = GroupTally::default();

        for (index, ticket_id) in self.claims.ticket_ids.iter().enumerate() {
            let expected_version = self.claims.qr_versions.get(index).copied();
            let ticket: Option<Ticket> = tx.get(&ticket_id.to_string()).await?;
            let ticket = ticket.filter(|t| {
                t.order_id == self.claims.order_id && Some(t.qr_version) == expected_version
            });

            let mut record = self.ctx.record(Some(*ticket_id), CheckinResult::InvalidTicket, None);
            record.order_id = Some(self.claims.order_id);
            record.event_id = Some(self.claims.event_id);

            let Some(mut ticket) = ticket else {
                record.error_message = Some("ticket missing or QR version superseded".to_string());
                stage_checkin(tx, &record)?;
                tally.count(CheckinResult::InvalidTicket);
                continue;
            };

            match ticket.state.check_in(stage, stamp.clone()) {
                Ok(next) => {
                    let (seat_info, seat) = resolve_seat(tx, &ticket).await?;
                    if let (TicketState::Used { .. }, Some(mut seat)) = (&next, seat) {
                        seat.mark_used();
                        tx.put(&seat)?;
                    }
                    ticket.state = next;
                    tx.put(&ticket)?;
                    record.result = CheckinResult::Success;
                    record.seat_info = seat_info;
                    tally.count(CheckinResult::Success);
                }
                Err(result) => {
                    record.result = result;
                    record.error_message = Some(message_for(result, stage).to_string());
                    tally.count(result);
                }
            }
            stage_checkin(tx, &record)?;
        }
        Ok(tally)
    }
}

/// Checks in every eligible ticket listed in a group code. Tickets that
/// cannot take the stage are counted and skipped, never aborting the batch.
pub async fn verify_and_check_in_group(
    state: &AppState,
    caller: &Caller,
    req: GroupCheckinRequest,
) -> Result<GroupCheckinOutcome, AppError> {
    let staff_id = require_staff_or_admin(state.identity.as_ref(), caller).await?;
    let now = state.clock.now();
    let stage = req.checkin_stage.unwrap_or(CheckinStage::Entry);
    let ctx = ScanContext {
        staff_id,
        scanner_device_id: req.scanner_device_id.clone(),
        stage,
        scanned_at: now,
    };

    let rejected = |result: CheckinResult, order_id: Option<Uuid>, detail: &str| {
        let mut outcome = GroupCheckinOutcome::rejected(result, stage, message_for(result, stage));
        outcome.order_id = order_id;
        let mut record: CheckinRecord = ctx.record(None, result, Some(detail));
        record.order_id = order_id;
        (outcome, record)
    };

    let decision = state
        .devices
        .check(&state.store, req.scanner_device_id.as_deref(), &ctx.staff_id, now)
        .await?;
    if let DeviceDecision::Rejected(reason) = decision {
        let (mut outcome, record) = rejected(CheckinResult::NotAllowedDevice, None, reason);
        outcome.message = reason.to_string();
        record_checkin(&state.store, record).await;
        return Ok(outcome);
    }

    let (wire_order, claims) = match state.qr.verify_group(&req.qr_token, now) {
        Ok(verified) => verified,
        Err(rejection) => {
            let result = match rejection {
                TokenRejection::Expired => CheckinResult::Expired,
                TokenRejection::InvalidSignature => CheckinResult::InvalidSignature,
            };
            let (outcome, record) = rejected(result, None, "group token verification failed");
            record_checkin(&state.store, record).await;
            return Ok(outcome);
        }
    };
    if wire_order.is_some_and(|id| id != claims.order_id) || claims.ticket_ids.is_empty() {
        let (outcome, record) = rejected(
            CheckinResult::InvalidTicket,
            Some(claims.order_id),
            "group token does not match its order",
        );
        record_checkin(&state.store, record).await;
        return Ok(outcome);
    }

    let title = state
        .store
        .get::<Event>(&claims.event_id.to_string())
        .await?
        .map(|e| e.display_title().to_string());

    let op = GroupCheckIn {
        claims: &claims,
        ctx: &ctx,
    };
    let tally = match state.store.run(&op).await {
        Ok(tally) => tally,
        Err(e) => {
            let (_, mut record) = rejected(
                CheckinResult::InvalidTicket,
                Some(claims.order_id),
                "group check-in could not be committed",
            );
            record.event_id = Some(claims.event_id);
            record_checkin(&state.store, record).await;
            return Err(e);
        }
    };

    let result = tally.overall();
    let total = claims.ticket_ids.len();
    tracing::info!(
        order_id = %claims.order_id,
        staff_id = %ctx.staff_id,
        ?stage,
        checked = tally.checked,
        already = tally.already,
        total,
        "Group check-in processed"
    );

    let message = if result == CheckinResult::Success {
        format!("{} of {} tickets checked in", tally.checked, total)
    } else {
        message_for(result, stage).to_string()
    };
    Ok(GroupCheckinOutcome {
        success: result == CheckinResult::Success,
        result,
        message,
        title,
        stage,
        order_id: Some(claims.order_id),
        checked_count: tally.checked,
        already_checked_count: tally.already,
        skipped_count: total - tally.checked - tally.already,
        total_count: total,
    })
}
