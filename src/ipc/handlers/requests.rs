use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::appointments::{book_appointment, get_required_str, user_with_role_exists, HandlerErr};

fn requests_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let reason = get_required_str(params, "reason")?;
    if reason.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "reason must not be empty"));
    }
    user_with_role_exists(conn, &student_id, "student")?;

    let urgency = params.get("urgency").and_then(|v| v.as_str());
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
    let notes = params.get("notes").and_then(|v| v.as_str());

    let request_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO appointment_requests(id, student_id, reason, urgency, kind, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &request_id,
            &student_id,
            reason.trim(),
            urgency,
            kind,
            notes,
            &Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "appointment_requests" })),
    })?;

    Ok(json!({ "requestId": request_id }))
}

fn requests_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = params.get("studentId").and_then(|v| v.as_str());

    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.student_id, u.last_name, u.first_name,
                    r.reason, r.urgency, r.kind, r.notes, r.created_at
             FROM appointment_requests r
             JOIN users u ON u.id = r.student_id
             WHERE (?1 IS NULL OR r.student_id = ?1)
             ORDER BY r.created_at",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([student_id], |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            let reason: String = row.get(4)?;
            let urgency: Option<String> = row.get(5)?;
            let kind: String = row.get(6)?;
            let notes: Option<String> = row.get(7)?;
            let created_at: Option<String> = row.get(8)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
                "reason": reason,
                "urgency": urgency,
                "kind": kind,
                "notes": notes,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "requests": rows }))
}

struct RequestRow {
    student_id: String,
    reason: String,
    kind: String,
    notes: Option<String>,
}

fn load_request(conn: &Connection, request_id: &str) -> Result<RequestRow, HandlerErr> {
    conn.query_row(
        "SELECT student_id, reason, kind, notes FROM appointment_requests WHERE id = ?",
        [request_id],
        |r| {
            Ok(RequestRow {
                student_id: r.get(0)?,
                reason: r.get(1)?,
                kind: r.get(2)?,
                notes: r.get(3)?,
            })
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "request not found"))
}

/// Accepting a request books the appointment under the full slot policy and
/// consumes the request row, atomically: a slot conflict leaves the request
/// in place for another try.
fn requests_accept(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let request_id = get_required_str(params, "requestId")?;
    let counselor_id = get_required_str(params, "counselorId")?;
    let date_time = get_required_str(params, "dateTime")?;
    let notes = params.get("notes").and_then(|v| v.as_str());

    let request = load_request(conn, &request_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let booked = book_appointment(
        &tx,
        &request.student_id,
        &counselor_id,
        &date_time,
        &request.kind,
        Some(request.reason.as_str()),
        notes.or(request.notes.as_deref()),
    );
    let (appointment_id, key) = match booked {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return Err(e);
        }
    };

    if let Err(e) = tx.execute(
        "DELETE FROM appointment_requests WHERE id = ?",
        [&request_id],
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "appointment_requests" })),
        });
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "appointmentId": appointment_id, "dateTime": key }))
}

fn requests_reject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let request_id = get_required_str(params, "requestId")?;
    let deleted = conn
        .execute("DELETE FROM appointment_requests WHERE id = ?", [&request_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if deleted == 0 {
        return Err(HandlerErr::new("not_found", "request not found"));
    }
    Ok(json!({ "ok": true }))
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
        "requests.create" => Some(with_conn(state, req, requests_create)),
        "requests.list" => Some(with_conn(state, req, requests_list)),
        "requests.accept" => Some(with_conn(state, req, requests_accept)),
        "requests.reject" => Some(with_conn(state, req, requests_reject)),
        _ => None,
    }
}
