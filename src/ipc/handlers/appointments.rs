use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub(super) struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub(super) fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub(super) fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub(super) fn get_required_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub(super) fn user_with_role_exists(
    conn: &Connection,
    user_id: &str,
    role: &str,
) -> Result<(), HandlerErr> {
    let found: Option<String> = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    match found {
        None => Err(HandlerErr::new("not_found", format!("{} not found", role))),
        Some(actual) if actual != role => Err(HandlerErr {
            code: "bad_params",
            message: format!("user is a {}, expected a {}", actual, role),
            details: Some(json!({ "userId": user_id })),
        }),
        Some(_) => Ok(()),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Validate the candidate instant against the scheduling policy and return
/// the canonical slot key.
fn validate_and_key(raw: &str) -> Result<String, HandlerErr> {
    let candidate = policy::parse_instant(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "dateTime must be an RFC 3339 instant".to_string(),
        details: Some(json!({ "dateTime": raw })),
    })?;
    policy::validate_slot(candidate)
        .map_err(|e| HandlerErr::new(e.code(), e.message()))?;
    Ok(policy::slot_key(candidate))
}

fn slot_taken(conn: &Connection, key: &str, exclude: Option<&str>) -> Result<bool, HandlerErr> {
    let taken: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM appointments
             WHERE date_time = ?1 AND status != 'cancelled'
               AND (?2 IS NULL OR id != ?2)",
            (key, exclude),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(taken.is_some())
}

fn slot_taken_err() -> HandlerErr {
    HandlerErr::new("slot_taken", "another appointment already occupies this slot")
}

fn map_write_err(e: rusqlite::Error, code: &'static str) -> HandlerErr {
    // The partial unique index on appointments(date_time) is the
    // authoritative guard; losing the race between the SELECT pre-check and
    // the write surfaces here.
    if let rusqlite::Error::SqliteFailure(f, _) = &e {
        if f.code == rusqlite::ErrorCode::ConstraintViolation {
            return slot_taken_err();
        }
    }
    HandlerErr::new(code, e.to_string())
}

/// Shared booking path for direct bookings, accepted requests, and accepted
/// referrals. Runs the full slot policy, the fast-path availability check,
/// and the insert; the unique index backs the check atomically.
pub(super) fn book_appointment(
    conn: &Connection,
    student_id: &str,
    counselor_id: &str,
    raw_date_time: &str,
    kind: &str,
    reason: Option<&str>,
    notes: Option<&str>,
) -> Result<(String, String), HandlerErr> {
    user_with_role_exists(conn, student_id, "student")?;
    user_with_role_exists(conn, counselor_id, "counselor")?;

    let key = validate_and_key(raw_date_time)?;
    if slot_taken(conn, &key, None)? {
        return Err(slot_taken_err());
    }

    let appointment_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    conn.execute(
        "INSERT INTO appointments(id, student_id, counselor_id, date_time, kind,
                                  status, reason, notes, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?, ?, ?, ?)",
        (
            &appointment_id,
            student_id,
            counselor_id,
            &key,
            kind,
            reason,
            notes,
            &now,
            &now,
        ),
    )
    .map_err(|e| map_write_err(e, "db_insert_failed"))?;

    Ok((appointment_id, key))
}

fn appointment_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_id: String = row.get(1)?;
    let counselor_id: String = row.get(2)?;
    let date_time: String = row.get(3)?;
    let kind: String = row.get(4)?;
    let status: String = row.get(5)?;
    let reason: Option<String> = row.get(6)?;
    let notes: Option<String> = row.get(7)?;
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "counselorId": counselor_id,
        "dateTime": date_time,
        "kind": kind,
        "status": status,
        "reason": reason,
        "notes": notes
    }))
}

fn appointments_book(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let counselor_id = get_required_str(params, "counselorId")?;
    let date_time = get_required_str(params, "dateTime")?;
    let kind = params
        .get("kind")
        .and_then(|v| v.as_str())
        .unwrap_or("self");
    if kind != "self" && kind != "referral" {
        return Err(HandlerErr::new(
            "bad_params",
            "kind must be 'self' or 'referral'",
        ));
    }
    let reason = params.get("reason").and_then(|v| v.as_str());
    let notes = params.get("notes").and_then(|v| v.as_str());

    let (appointment_id, key) =
        book_appointment(conn, &student_id, &counselor_id, &date_time, kind, reason, notes)?;
    tracing::info!(appointment = %appointment_id, slot = %key, "appointment booked");

    Ok(json!({
        "appointmentId": appointment_id,
        "dateTime": key,
        "status": "pending"
    }))
}

fn appointments_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = params.get("studentId").and_then(|v| v.as_str());
    let counselor_id = params.get("counselorId").and_then(|v| v.as_str());
    let status = params.get("status").and_then(|v| v.as_str());

    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, counselor_id, date_time, kind, status, reason, notes
             FROM appointments
             WHERE (?1 IS NULL OR student_id = ?1)
               AND (?2 IS NULL OR counselor_id = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY date_time",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((student_id, counselor_id, status), appointment_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "appointments": rows }))
}

fn load_appointment(
    conn: &Connection,
    appointment_id: &str,
) -> Result<(String, String), HandlerErr> {
    conn.query_row(
        "SELECT student_id, status FROM appointments WHERE id = ?",
        [appointment_id],
        |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "appointment not found"))
}

fn appointments_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appointment_id = get_required_str(params, "appointmentId")?;
    let row = conn
        .query_row(
            "SELECT id, student_id, counselor_id, date_time, kind, status, reason, notes
             FROM appointments WHERE id = ?",
            [&appointment_id],
            appointment_json,
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .ok_or_else(|| HandlerErr::new("not_found", "appointment not found"))?;
    Ok(json!({ "appointment": row }))
}

fn appointments_reschedule(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appointment_id = get_required_str(params, "appointmentId")?;
    let date_time = get_required_str(params, "dateTime")?;

    let (_, status) = load_appointment(conn, &appointment_id)?;
    if status != "pending" && status != "confirmed" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot reschedule a {} appointment", status),
            details: Some(json!({ "status": status })),
        });
    }

    // Same hour rules as booking; the appointment never conflicts with its
    // own current slot.
    let key = validate_and_key(&date_time)?;
    if slot_taken(conn, &key, Some(&appointment_id))? {
        return Err(slot_taken_err());
    }

    conn.execute(
        "UPDATE appointments SET date_time = ?, updated_at = ? WHERE id = ?",
        (&key, &now_rfc3339(), &appointment_id),
    )
    .map_err(|e| map_write_err(e, "db_update_failed"))?;

    Ok(json!({ "appointmentId": appointment_id, "dateTime": key }))
}

fn set_status(
    conn: &Connection,
    appointment_id: &str,
    status: &str,
) -> Result<(), HandlerErr> {
    conn.execute(
        "UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?",
        (status, &now_rfc3339(), appointment_id),
    )
    .map_err(|e| map_write_err(e, "db_update_failed"))?;
    Ok(())
}

fn appointments_confirm(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appointment_id = get_required_str(params, "appointmentId")?;
    let (_, status) = load_appointment(conn, &appointment_id)?;
    if status != "pending" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot confirm a {} appointment", status),
            details: Some(json!({ "status": status })),
        });
    }
    set_status(conn, &appointment_id, "confirmed")?;
    Ok(json!({ "appointmentId": appointment_id, "status": "confirmed" }))
}

fn appointments_cancel(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appointment_id = get_required_str(params, "appointmentId")?;
    let student_id = get_required_str(params, "studentId")?;
    let (owner, status) = load_appointment(conn, &appointment_id)?;
    if owner != student_id {
        return Err(HandlerErr::new(
            "forbidden",
            "only the booking student may cancel",
        ));
    }
    if status != "pending" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot cancel a {} appointment", status),
            details: Some(json!({ "status": status })),
        });
    }
    set_status(conn, &appointment_id, "cancelled")?;
    Ok(json!({ "appointmentId": appointment_id, "status": "cancelled" }))
}

fn appointments_close(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appointment_id = get_required_str(params, "appointmentId")?;
    let (_, status) = load_appointment(conn, &appointment_id)?;
    if status != "pending" && status != "confirmed" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot close a {} appointment", status),
            details: Some(json!({ "status": status })),
        });
    }
    set_status(conn, &appointment_id, "closed")?;
    Ok(json!({ "appointmentId": appointment_id, "status": "closed" }))
}

/// On-demand sweep: pending appointments whose slot passed more than an hour
/// ago are closed. `now` is an explicit parameter so callers (and tests)
/// control the clock; it defaults to the wall clock.
fn appointments_sweep_stale(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now: DateTime<Utc> = match params.get("now").and_then(|v| v.as_str()) {
        Some(raw) => policy::parse_instant(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                HandlerErr::new("bad_params", "now must be an RFC 3339 instant")
            })?,
        None => Utc::now(),
    };
    let cutoff = policy::stale_cutoff(now);

    let closed = conn
        .execute(
            "UPDATE appointments SET status = 'closed', updated_at = ?
             WHERE status = 'pending' AND date_time <= ?",
            (&now.to_rfc3339(), &cutoff),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    if closed > 0 {
        tracing::info!(closed, cutoff = %cutoff, "closed stale pending appointments");
    }
    Ok(json!({ "closed": closed }))
}

fn with_conn(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "appointments.book" => Some(with_conn(state, req, appointments_book)),
        "appointments.list" => Some(with_conn(state, req, appointments_list)),
        "appointments.get" => Some(with_conn(state, req, appointments_get)),
        "appointments.reschedule" => Some(with_conn(state, req, appointments_reschedule)),
        "appointments.confirm" => Some(with_conn(state, req, appointments_confirm)),
        "appointments.cancel" => Some(with_conn(state, req, appointments_cancel)),
        "appointments.close" => Some(with_conn(state, req, appointments_close)),
        "appointments.sweepStale" => Some(with_conn(state, req, appointments_sweep_stale)),
        _ => None,
    }
}
