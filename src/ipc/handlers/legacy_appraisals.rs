use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rubric::{self, Domain};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::appointments::{get_required_str, user_with_role_exists, HandlerErr};

fn score_err(e: rubric::ScoreError) -> HandlerErr {
    HandlerErr::new(e.code(), e.message())
}

fn required_raw(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

/// Older fixed-rubric flow: three areas each scored 0-100 raw, normalized
/// onto the 0-5 scale via /20, with the overall as their plain mean.
fn legacy_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    user_with_role_exists(conn, &student_id, "student")?;

    let academic_raw = required_raw(params, "academic")?;
    let socio_raw = required_raw(params, "socioEmotional")?;
    let career_raw = required_raw(params, "career")?;

    let academic = rubric::normalize_legacy(academic_raw).map_err(score_err)?;
    let socio_emotional = rubric::normalize_legacy(socio_raw).map_err(score_err)?;
    let career = rubric::normalize_legacy(career_raw).map_err(score_err)?;
    let overall = (academic + socio_emotional + career) / 3.0;

    let appraisal_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO legacy_appraisals(id, student_id,
             academic_raw, socio_emotional_raw, career_raw,
             academic, socio_emotional, career, overall, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &appraisal_id,
            &student_id,
            academic_raw,
            socio_raw,
            career_raw,
            academic,
            socio_emotional,
            career,
            overall,
            &Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "legacy_appraisals" })),
    })?;

    Ok(json!({
        "appraisalId": appraisal_id,
        "scores": {
            "academic": academic,
            "socioEmotional": socio_emotional,
            "career": career,
            "overall": overall
        }
    }))
}

fn domain_evaluation_json(domain: Domain, score: f64) -> serde_json::Value {
    match rubric::evaluate(domain, score) {
        Ok(band) => json!({
            "label": band.label,
            "description": band.description,
            "suggestion": band.suggestion,
            "color": band.color
        }),
        Err(e) => json!({ "error": e.code() }),
    }
}

fn legacy_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appraisal_id = get_required_str(params, "appraisalId")?;

    let row: Option<(String, f64, f64, f64, f64, Option<String>)> = conn
        .query_row(
            "SELECT student_id, academic, socio_emotional, career, overall, submitted_at
             FROM legacy_appraisals WHERE id = ?",
            [&appraisal_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((student_id, academic, socio_emotional, career, overall, submitted_at)) = row else {
        return Err(HandlerErr::new("not_found", "appraisal not found"));
    };

    Ok(json!({
        "appraisal": {
            "id": appraisal_id,
            "studentId": student_id,
            "submittedAt": submitted_at,
            "areas": [
                {
                    "domain": Domain::Academic.as_str(),
                    "score": academic,
                    "evaluation": domain_evaluation_json(Domain::Academic, academic)
                },
                {
                    "domain": Domain::SocioEmotional.as_str(),
                    "score": socio_emotional,
                    "evaluation": domain_evaluation_json(Domain::SocioEmotional, socio_emotional)
                },
                {
                    "domain": Domain::Career.as_str(),
                    "score": career,
                    "evaluation": domain_evaluation_json(Domain::Career, career)
                }
            ],
            "overall": overall
        }
    }))
}

fn legacy_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = params.get("studentId").and_then(|v| v.as_str());

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.student_id, u.last_name, u.first_name,
                    a.academic, a.socio_emotional, a.career, a.overall, a.submitted_at
             FROM legacy_appraisals a
             JOIN users u ON u.id = a.student_id
             WHERE (?1 IS NULL OR a.student_id = ?1)
             ORDER BY a.submitted_at",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([student_id], |row| {
            let id: String = row.get(0)?;
            let student_id: String = row.get(1)?;
            let last: String = row.get(2)?;
            let first: String = row.get(3)?;
            let academic: f64 = row.get(4)?;
            let socio_emotional: f64 = row.get(5)?;
            let career: f64 = row.get(6)?;
            let overall: f64 = row.get(7)?;
            let submitted_at: Option<String> = row.get(8)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
                "academic": academic,
                "socioEmotional": socio_emotional,
                "career": career,
                "overall": overall,
                "submittedAt": submitted_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "appraisals": rows }))
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
        "legacyAppraisals.submit" => Some(with_conn(state, req, legacy_submit)),
        "legacyAppraisals.get" => Some(with_conn(state, req, legacy_get)),
        "legacyAppraisals.list" => Some(with_conn(state, req, legacy_list)),
        _ => None,
    }
}
