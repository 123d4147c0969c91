use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 3] = ["student", "teacher", "counselor"];

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing role", None),
    };
    if !ROLES.contains(&role.as_str()) {
        return err(
            &req.id,
            "bad_params",
            "role must be one of: student, teacher, counselor",
            Some(json!({ "role": role })),
        );
    }
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let user_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO users(id, role, last_name, first_name, email, active, created_at)
         VALUES(?, ?, ?, ?, ?, 1, ?)",
        (&user_id, &role, &last_name, &first_name, &email, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    ok(&req.id, json!({ "userId": user_id, "role": role }))
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "users": [] }));
    };

    let role_filter = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase());
    let active_only = req
        .params
        .get("activeOnly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mut stmt = match conn.prepare(
        "SELECT id, role, last_name, first_name, email, active
         FROM users
         WHERE (?1 IS NULL OR role = ?1)
           AND (?2 = 0 OR active = 1)
         ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&role_filter, active_only as i64), |row| {
            let id: String = row.get(0)?;
            let role: String = row.get(1)?;
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            let email: Option<String> = row.get(4)?;
            let active: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "role": role,
                "lastName": last,
                "firstName": first,
                "displayName": format!("{}, {}", last, first),
                "email": email,
                "active": active != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    if let Some(v) = patch.get("lastName").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE users SET last_name = ? WHERE id = ?",
            (v.trim(), &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("firstName").and_then(|v| v.as_str()) {
        if let Err(e) = conn.execute(
            "UPDATE users SET first_name = ? WHERE id = ?",
            (v.trim(), &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("email") {
        let email = v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        if let Err(e) = conn.execute(
            "UPDATE users SET email = ? WHERE id = ?",
            (&email, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(v) = patch.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE users SET active = ? WHERE id = ?",
            (v as i64, &user_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

/// The only hard-delete path for appointments and appraisals: removing a
/// user removes everything hanging off them, in dependency order, in one
/// transaction (no ON DELETE CASCADE in the schema).
fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "user not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM question_responses
         WHERE appraisal_id IN (SELECT id FROM student_appraisals WHERE student_id = ?)",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "question_responses" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM category_responses
         WHERE appraisal_id IN (SELECT id FROM student_appraisals WHERE student_id = ?)",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "category_responses" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM student_appraisals WHERE student_id = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "student_appraisals" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM legacy_appraisals WHERE student_id = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "legacy_appraisals" })),
        );
    }

    // Templates the user authored stay; they just lose their author link.
    if let Err(e) = tx.execute(
        "UPDATE appraisal_templates SET created_by = NULL WHERE created_by = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "appraisal_templates" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM referrals WHERE student_id = ? OR teacher_id = ?",
        [&user_id, &user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "referrals" })),
        );
    }

    if let Err(e) = tx.execute(
        "UPDATE referrals SET counselor_id = NULL WHERE counselor_id = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "referrals" })),
        );
    }

    // Unlink surviving referrals from appointments about to go away.
    if let Err(e) = tx.execute(
        "UPDATE referrals SET appointment_id = NULL
         WHERE appointment_id IN (
           SELECT id FROM appointments WHERE student_id = ? OR counselor_id = ?
         )",
        [&user_id, &user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "referrals" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM appointments WHERE student_id = ? OR counselor_id = ?",
        [&user_id, &user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "appointments" })),
        );
    }

    if let Err(e) = tx.execute(
        "DELETE FROM appointment_requests WHERE student_id = ?",
        [&user_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "appointment_requests" })),
        );
    }

    if let Err(e) = tx.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.create" => Some(handle_users_create(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        _ => None,
    }
}
