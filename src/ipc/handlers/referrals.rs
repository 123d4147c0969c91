use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::appointments::{book_appointment, get_required_str, user_with_role_exists, HandlerErr};

fn referrals_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let reason = get_required_str(params, "reason")?;
    if reason.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "reason must not be empty"));
    }
    user_with_role_exists(conn, &student_id, "student")?;
    user_with_role_exists(conn, &teacher_id, "teacher")?;
    let notes = params.get("notes").and_then(|v| v.as_str());

    let referral_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO referrals(id, student_id, teacher_id, reason, notes, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'pending', ?)",
        (
            &referral_id,
            &student_id,
            &teacher_id,
            reason.trim(),
            notes,
            &Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "referrals" })),
    })?;

    Ok(json!({ "referralId": referral_id, "status": "pending" }))
}

fn referrals_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let status = params.get("status").and_then(|v| v.as_str());
    let teacher_id = params.get("teacherId").and_then(|v| v.as_str());
    let student_id = params.get("studentId").and_then(|v| v.as_str());

    let mut stmt = conn
        .prepare(
            "SELECT r.id, r.student_id, s.last_name, s.first_name,
                    r.teacher_id, t.last_name, t.first_name,
                    r.counselor_id, r.reason, r.notes, r.status, r.appointment_id
             FROM referrals r
             JOIN users s ON s.id = r.student_id
             JOIN users t ON t.id = r.teacher_id
             WHERE (?1 IS NULL OR r.status = ?1)
               AND (?2 IS NULL OR r.teacher_id = ?2)
               AND (?3 IS NULL OR r.student_id = ?3)
             ORDER BY r.created_at",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((status, teacher_id, student_id), |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let s_last: String = row.get(2)?;
            let s_first: String = row.get(3)?;
            let teacher_id: String = row.get(4)?;
            let t_last: String = row.get(5)?;
            let t_first: String = row.get(6)?;
            let counselor_id: Option<String> = row.get(7)?;
            let reason: String = row.get(8)?;
            let notes: Option<String> = row.get(9)?;
            let status: String = row.get(10)?;
            let appointment_id: Option<String> = row.get(11)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{}, {}", s_last, s_first),
                "teacherId": teacher_id,
                "teacherName": format!("{}, {}", t_last, t_first),
                "counselorId": counselor_id,
                "reason": reason,
                "notes": notes,
                "status": status,
                "appointmentId": appointment_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "referrals": rows }))
}

fn load_referral(conn: &Connection, referral_id: &str) -> Result<(String, String, String), HandlerErr> {
    conn.query_row(
        "SELECT student_id, reason, status FROM referrals WHERE id = ?",
        [referral_id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        },
    )
    .optional()
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
    .ok_or_else(|| HandlerErr::new("not_found", "referral not found"))
}

/// Accepting a referral books a referral-kind appointment, links it, and
/// marks the referral confirmed, in one transaction.
fn referrals_accept(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let referral_id = get_required_str(params, "referralId")?;
    let counselor_id = get_required_str(params, "counselorId")?;
    let date_time = get_required_str(params, "dateTime")?;

    let (student_id, reason, status) = load_referral(conn, &referral_id)?;
    if status != "pending" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot accept a {} referral", status),
            details: Some(json!({ "status": status })),
        });
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let booked = book_appointment(
        &tx,
        &student_id,
        &counselor_id,
        &date_time,
        "referral",
        Some(reason.as_str()),
        None,
    );
    let (appointment_id, key) = match booked {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return Err(e);
        }
    };

    if let Err(e) = tx.execute(
        "UPDATE referrals
         SET status = 'confirmed', counselor_id = ?, appointment_id = ?
         WHERE id = ?",
        (&counselor_id, &appointment_id, &referral_id),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "referrals" })),
        });
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "referralId": referral_id,
        "appointmentId": appointment_id,
        "dateTime": key,
        "status": "confirmed"
    }))
}

fn referrals_reject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let referral_id = get_required_str(params, "referralId")?;
    let (_, _, status) = load_referral(conn, &referral_id)?;
    if status != "pending" {
        return Err(HandlerErr {
            code: "invalid_status",
            message: format!("cannot reject a {} referral", status),
            details: Some(json!({ "status": status })),
        });
    }
    conn.execute(
        "UPDATE referrals SET status = 'rejected' WHERE id = ?",
        [&referral_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "referralId": referral_id, "status": "rejected" }))
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
        "referrals.create" => Some(with_conn(state, req, referrals_create)),
        "referrals.list" => Some(with_conn(state, req, referrals_list)),
        "referrals.accept" => Some(with_conn(state, req, referrals_accept)),
        "referrals.reject" => Some(with_conn(state, req, referrals_reject)),
        _ => None,
    }
}
