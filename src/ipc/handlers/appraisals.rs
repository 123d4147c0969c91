use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rubric::{self, Criterion, Domain};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::appointments::{get_required_str, user_with_role_exists, HandlerErr};

fn score_err(e: rubric::ScoreError) -> HandlerErr {
    HandlerErr::new(e.code(), e.message())
}

struct TemplateQuestion {
    category_id: String,
}

fn load_template_questions(
    conn: &Connection,
    template_id: &str,
) -> Result<HashMap<String, TemplateQuestion>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT q.id, q.category_id
             FROM template_questions q
             JOIN template_categories c ON c.id = q.category_id
             WHERE c.template_id = ?",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows: Vec<(String, String)> = stmt
        .query_map([template_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(rows
        .into_iter()
        .map(|(id, category_id)| (id, TemplateQuestion { category_id }))
        .collect())
}

/// Submit a filled-in appraisal: validate every Likert response, aggregate
/// per category, and persist the appraisal, question rows, and category
/// means in one transaction. The stored category score is always exactly
/// recomputable from the stored question rows.
fn appraisals_submit(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;
    let student_id = get_required_str(params, "studentId")?;
    user_with_role_exists(conn, &student_id, "student")?;

    let template_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM appraisal_templates WHERE id = ?",
            [&template_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if template_exists.is_none() {
        return Err(HandlerErr::new("not_found", "template not found"));
    }

    let Some(raw_responses) = params.get("responses").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing responses"));
    };

    let questions = load_template_questions(conn, &template_id)?;

    let mut seen: HashSet<String> = HashSet::new();
    let mut by_category: HashMap<String, Vec<(String, i64)>> = HashMap::new();
    for entry in raw_responses {
        let Some(question_id) = entry.get("questionId").and_then(|v| v.as_str()) else {
            return Err(HandlerErr::new("bad_params", "response missing questionId"));
        };
        let Some(question) = questions.get(question_id) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "question does not belong to this template".to_string(),
                details: Some(json!({ "questionId": question_id })),
            });
        };
        if !seen.insert(question_id.to_string()) {
            return Err(HandlerErr {
                code: "bad_params",
                message: "duplicate response for question".to_string(),
                details: Some(json!({ "questionId": question_id })),
            });
        }
        // Fractional or out-of-range values never aggregate.
        let Some(response) = entry.get("response").and_then(|v| v.as_i64()) else {
            return Err(score_err(rubric::ScoreError::InvalidResponseValue));
        };
        if !(1..=5).contains(&response) {
            return Err(score_err(rubric::ScoreError::InvalidResponseValue));
        }
        by_category
            .entry(question.category_id.clone())
            .or_default()
            .push((question_id.to_string(), response));
    }

    if seen.len() != questions.len() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "responses must cover every question in the template".to_string(),
            details: Some(json!({
                "expected": questions.len(),
                "received": seen.len()
            })),
        });
    }

    let mut category_scores: Vec<(String, f64)> = Vec::with_capacity(by_category.len());
    for (category_id, entries) in &by_category {
        let values: Vec<i64> = entries.iter().map(|(_, r)| *r).collect();
        let score = rubric::score_category(&values).map_err(score_err)?;
        category_scores.push((category_id.clone(), score));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let appraisal_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO student_appraisals(id, template_id, student_id, submitted_at)
         VALUES(?, ?, ?, ?)",
        (
            &appraisal_id,
            &template_id,
            &student_id,
            &Utc::now().to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "student_appraisals" })),
        });
    }

    for entries in by_category.values() {
        for (question_id, response) in entries {
            if let Err(e) = tx.execute(
                "INSERT INTO question_responses(id, appraisal_id, question_id, response)
                 VALUES(?, ?, ?, ?)",
                (
                    &Uuid::new_v4().to_string(),
                    &appraisal_id,
                    question_id,
                    response,
                ),
            ) {
                let _ = tx.rollback();
                return Err(HandlerErr {
                    code: "db_insert_failed",
                    message: e.to_string(),
                    details: Some(json!({ "table": "question_responses" })),
                });
            }
        }
    }

    for (category_id, score) in &category_scores {
        if let Err(e) = tx.execute(
            "INSERT INTO category_responses(id, appraisal_id, category_id, score)
             VALUES(?, ?, ?, ?)",
            (
                &Uuid::new_v4().to_string(),
                &appraisal_id,
                category_id,
                score,
            ),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "category_responses" })),
            });
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let categories: Vec<serde_json::Value> = category_scores
        .iter()
        .map(|(category_id, score)| json!({ "categoryId": category_id, "score": score }))
        .collect();
    Ok(json!({ "appraisalId": appraisal_id, "categories": categories }))
}

fn load_criteria(conn: &Connection, category_id: &str) -> Result<Vec<Criterion>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT min_score, max_score, label, description, suggestion
             FROM evaluation_criteria
             WHERE category_id = ?
             ORDER BY min_score",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    stmt.query_map([category_id], |r| {
        Ok(Criterion {
            min_score: r.get(0)?,
            max_score: r.get(1)?,
            label: r.get(2)?,
            description: r.get(3)?,
            suggestion: r.get(4)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

/// Pick the evaluation for one stored category score: authored criteria when
/// the counselor wrote any for the category, the fixed domain rubric when
/// the category name maps onto one, nothing otherwise. A gap in authored
/// criteria is reported, not papered over.
fn category_evaluation(
    conn: &Connection,
    category_id: &str,
    category_name: &str,
    score: f64,
) -> Result<serde_json::Value, HandlerErr> {
    let criteria = load_criteria(conn, category_id)?;
    if !criteria.is_empty() {
        return Ok(match rubric::evaluate_with_criteria(&criteria, score) {
            Ok(c) => json!({
                "source": "criteria",
                "label": c.label,
                "description": c.description,
                "suggestion": c.suggestion
            }),
            Err(e) => json!({ "error": e.code() }),
        });
    }
    match Domain::from_category_name(category_name) {
        Some(domain) => Ok(match rubric::evaluate(domain, score) {
            Ok(band) => json!({
                "source": "fixed",
                "domain": domain.as_str(),
                "label": band.label,
                "description": band.description,
                "suggestion": band.suggestion,
                "color": band.color
            }),
            Err(e) => json!({ "error": e.code() }),
        }),
        None => Ok(serde_json::Value::Null),
    }
}

fn appraisals_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let appraisal_id = get_required_str(params, "appraisalId")?;

    let header: Option<(String, String, Option<String>)> = conn
        .query_row(
            "SELECT template_id, student_id, submitted_at
             FROM student_appraisals WHERE id = ?",
            [&appraisal_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((template_id, student_id, submitted_at)) = header else {
        return Err(HandlerErr::new("not_found", "appraisal not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT cr.category_id, c.name, cr.score
             FROM category_responses cr
             JOIN template_categories c ON c.id = cr.category_id
             WHERE cr.appraisal_id = ?
             ORDER BY c.sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let scored: Vec<(String, String, f64)> = stmt
        .query_map([&appraisal_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut resp_stmt = conn
        .prepare(
            "SELECT qr.question_id, qr.response
             FROM question_responses qr
             JOIN template_questions q ON q.id = qr.question_id
             WHERE qr.appraisal_id = ? AND q.category_id = ?
             ORDER BY q.sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut categories = Vec::with_capacity(scored.len());
    let mut sum = 0.0;
    for (category_id, name, score) in &scored {
        let evaluation = category_evaluation(conn, category_id, name, *score)?;
        let responses: Vec<serde_json::Value> = resp_stmt
            .query_map((&appraisal_id, category_id), |r| {
                let question_id: String = r.get(0)?;
                let response: i64 = r.get(1)?;
                Ok(json!({ "questionId": question_id, "response": response }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        sum += score;
        categories.push(json!({
            "categoryId": category_id,
            "name": name,
            "score": score,
            "responses": responses,
            "evaluation": evaluation
        }));
    }
    let overall = if scored.is_empty() {
        serde_json::Value::Null
    } else {
        json!(sum / scored.len() as f64)
    };

    Ok(json!({
        "appraisal": {
            "id": appraisal_id,
            "templateId": template_id,
            "studentId": student_id,
            "submittedAt": submitted_at,
            "categories": categories,
            "overall": overall
        }
    }))
}

fn appraisals_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = params.get("studentId").and_then(|v| v.as_str());
    let template_id = params.get("templateId").and_then(|v| v.as_str());

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.template_id, t.title, a.student_id,
                    u.last_name, u.first_name, a.submitted_at
             FROM student_appraisals a
             JOIN appraisal_templates t ON t.id = a.template_id
             JOIN users u ON u.id = a.student_id
             WHERE (?1 IS NULL OR a.student_id = ?1)
               AND (?2 IS NULL OR a.template_id = ?2)
             ORDER BY a.submitted_at",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((student_id, template_id), |row| {
            let id: String = row.get(0)?;
            let template_id: String = row.get(1)?;
            let title: String = row.get(2)?;
            let student_id: String = row.get(3)?;
            let last: String = row.get(4)?;
            let first: String = row.get(5)?;
            let submitted_at: Option<String> = row.get(6)?;
            Ok(json!({
                "id": id,
                "templateId": template_id,
                "templateTitle": title,
                "studentId": student_id,
                "studentName": format!("{}, {}", last, first),
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
        "appraisals.submit" => Some(with_conn(state, req, appraisals_submit)),
        "appraisals.get" => Some(with_conn(state, req, appraisals_get)),
        "appraisals.list" => Some(with_conn(state, req, appraisals_list)),
        _ => None,
    }
}
