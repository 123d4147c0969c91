use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

use super::appointments::HandlerErr;

fn counts_by(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<HashMap<String, i64>, HandlerErr> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(args, |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows.into_iter().collect())
}

fn appointments_summary(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let from = params.get("from").and_then(|v| v.as_str());
    let to = params.get("to").and_then(|v| v.as_str());

    let by_status = counts_by(
        conn,
        "SELECT status, COUNT(*) FROM appointments
         WHERE (?1 IS NULL OR date_time >= ?1)
           AND (?2 IS NULL OR date_time <= ?2)
         GROUP BY status",
        (from, to),
    )?;
    let by_kind = counts_by(
        conn,
        "SELECT kind, COUNT(*) FROM appointments
         WHERE (?1 IS NULL OR date_time >= ?1)
           AND (?2 IS NULL OR date_time <= ?2)
         GROUP BY kind",
        (from, to),
    )?;

    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let upcoming_pending: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM appointments
             WHERE status = 'pending' AND date_time > ?",
            [&now],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let status_json: serde_json::Value = ["pending", "confirmed", "cancelled", "closed"]
        .iter()
        .map(|s| (s.to_string(), json!(by_status.get(*s).copied().unwrap_or(0))))
        .collect::<serde_json::Map<_, _>>()
        .into();
    let kind_json: serde_json::Value = ["self", "referral"]
        .iter()
        .map(|k| (k.to_string(), json!(by_kind.get(*k).copied().unwrap_or(0))))
        .collect::<serde_json::Map<_, _>>()
        .into();

    Ok(json!({
        "byStatus": status_json,
        "byKind": kind_json,
        "upcomingPending": upcoming_pending
    }))
}

fn appraisal_overview(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               t.id,
               t.title,
               (SELECT COUNT(*) FROM student_appraisals a WHERE a.template_id = t.id)
             FROM appraisal_templates t
             ORDER BY t.title",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let templates: Vec<(String, String, i64)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut cat_stmt = conn
        .prepare(
            "SELECT c.id, c.name, AVG(cr.score), COUNT(cr.id)
             FROM template_categories c
             LEFT JOIN category_responses cr ON cr.category_id = c.id
             WHERE c.template_id = ?
             GROUP BY c.id, c.name
             ORDER BY c.sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut templates_json = Vec::with_capacity(templates.len());
    for (template_id, title, submissions) in &templates {
        let categories: Vec<serde_json::Value> = cat_stmt
            .query_map([template_id], |r| {
                let id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let mean: Option<f64> = r.get(2)?;
                let responses: i64 = r.get(3)?;
                Ok(json!({
                    "categoryId": id,
                    "name": name,
                    "meanScore": mean,
                    "responseCount": responses
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        templates_json.push(json!({
            "templateId": template_id,
            "title": title,
            "submissionCount": submissions,
            "categories": categories
        }));
    }

    let legacy_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM legacy_appraisals", [], |r| r.get(0))
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({
        "templates": templates_json,
        "legacySubmissionCount": legacy_count
    }))
}

fn referral_funnel(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let by_status = counts_by(
        conn,
        "SELECT status, COUNT(*) FROM referrals GROUP BY status",
        [],
    )?;
    let funnel: serde_json::Value = ["pending", "confirmed", "rejected"]
        .iter()
        .map(|s| (s.to_string(), json!(by_status.get(*s).copied().unwrap_or(0))))
        .collect::<serde_json::Map<_, _>>()
        .into();
    Ok(json!({ "byStatus": funnel }))
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
        "reports.appointmentsSummary" => Some(with_conn(state, req, appointments_summary)),
        "reports.appraisalOverview" => Some(with_conn(state, req, appraisal_overview)),
        "reports.referralFunnel" => Some(with_conn(state, req, referral_funnel)),
        _ => None,
    }
}
