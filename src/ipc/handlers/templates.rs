use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::appointments::{get_required_str, HandlerErr};

fn table_err(e: rusqlite::Error, code: &'static str, table: &str) -> HandlerErr {
    HandlerErr {
        code,
        message: e.to_string(),
        details: Some(json!({ "table": table })),
    }
}

/// Create the whole rubric tree in one transaction: template, categories,
/// questions, and optional per-category evaluation criteria.
fn templates_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    let description = params.get("description").and_then(|v| v.as_str());
    let created_by = params.get("createdBy").and_then(|v| v.as_str());
    let Some(categories) = params.get("categories").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing categories"));
    };
    if categories.is_empty() {
        return Err(HandlerErr::new(
            "bad_params",
            "a template needs at least one category",
        ));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let template_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO appraisal_templates(id, title, description, created_by, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &template_id,
            title.trim(),
            description,
            created_by,
            &Utc::now().to_rfc3339(),
        ),
    ) {
        let _ = tx.rollback();
        return Err(table_err(e, "db_insert_failed", "appraisal_templates"));
    }

    for (cat_idx, cat) in categories.iter().enumerate() {
        let Some(name) = cat.get("name").and_then(|v| v.as_str()).map(str::trim) else {
            let _ = tx.rollback();
            return Err(HandlerErr::new("bad_params", "category missing name"));
        };
        if name.is_empty() {
            let _ = tx.rollback();
            return Err(HandlerErr::new("bad_params", "category name must not be empty"));
        }
        let Some(questions) = cat.get("questions").and_then(|v| v.as_array()) else {
            let _ = tx.rollback();
            return Err(HandlerErr::new(
                "bad_params",
                format!("category '{}' missing questions", name),
            ));
        };
        if questions.is_empty() {
            let _ = tx.rollback();
            return Err(HandlerErr::new(
                "bad_params",
                format!("category '{}' needs at least one question", name),
            ));
        }

        let category_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO template_categories(id, template_id, name, sort_order)
             VALUES(?, ?, ?, ?)",
            (&category_id, &template_id, name, cat_idx as i64),
        ) {
            let _ = tx.rollback();
            return Err(table_err(e, "db_insert_failed", "template_categories"));
        }

        for (q_idx, q) in questions.iter().enumerate() {
            let Some(prompt) = q.as_str().map(str::trim).filter(|p| !p.is_empty()) else {
                let _ = tx.rollback();
                return Err(HandlerErr::new(
                    "bad_params",
                    format!("category '{}' has an empty question prompt", name),
                ));
            };
            if let Err(e) = tx.execute(
                "INSERT INTO template_questions(id, category_id, prompt, sort_order)
                 VALUES(?, ?, ?, ?)",
                (
                    &Uuid::new_v4().to_string(),
                    &category_id,
                    prompt,
                    q_idx as i64,
                ),
            ) {
                let _ = tx.rollback();
                return Err(table_err(e, "db_insert_failed", "template_questions"));
            }
        }

        if let Some(criteria) = cat.get("criteria").and_then(|v| v.as_array()) {
            for c in criteria {
                let (Some(min_score), Some(max_score)) = (
                    c.get("minScore").and_then(|v| v.as_f64()),
                    c.get("maxScore").and_then(|v| v.as_f64()),
                ) else {
                    let _ = tx.rollback();
                    return Err(HandlerErr::new(
                        "bad_params",
                        "criteria rows need numeric minScore and maxScore",
                    ));
                };
                if min_score > max_score {
                    let _ = tx.rollback();
                    return Err(HandlerErr::new(
                        "bad_params",
                        "criteria minScore must not exceed maxScore",
                    ));
                }
                let Some(label) = c.get("label").and_then(|v| v.as_str()).map(str::trim) else {
                    let _ = tx.rollback();
                    return Err(HandlerErr::new("bad_params", "criteria row missing label"));
                };
                if let Err(e) = tx.execute(
                    "INSERT INTO evaluation_criteria(id, category_id, min_score, max_score,
                                                     label, description, suggestion)
                     VALUES(?, ?, ?, ?, ?, ?, ?)",
                    (
                        &Uuid::new_v4().to_string(),
                        &category_id,
                        min_score,
                        max_score,
                        label,
                        c.get("description").and_then(|v| v.as_str()),
                        c.get("suggestion").and_then(|v| v.as_str()),
                    ),
                ) {
                    let _ = tx.rollback();
                    return Err(table_err(e, "db_insert_failed", "evaluation_criteria"));
                }
            }
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "templateId": template_id }))
}

fn templates_list(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               t.id,
               t.title,
               t.description,
               (SELECT COUNT(*) FROM template_categories c WHERE c.template_id = t.id),
               (SELECT COUNT(*) FROM student_appraisals a WHERE a.template_id = t.id)
             FROM appraisal_templates t
             ORDER BY t.title",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let category_count: i64 = row.get(3)?;
            let submission_count: i64 = row.get(4)?;
            Ok(json!({
                "id": id,
                "title": title,
                "description": description,
                "categoryCount": category_count,
                "submissionCount": submission_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    Ok(json!({ "templates": rows }))
}

fn templates_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;

    let header: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT title, description FROM appraisal_templates WHERE id = ?",
            [&template_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let Some((title, description)) = header else {
        return Err(HandlerErr::new("not_found", "template not found"));
    };

    let mut cat_stmt = conn
        .prepare(
            "SELECT id, name FROM template_categories
             WHERE template_id = ? ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let categories: Vec<(String, String)> = cat_stmt
        .query_map([&template_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut q_stmt = conn
        .prepare(
            "SELECT id, prompt FROM template_questions
             WHERE category_id = ? ORDER BY sort_order",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    let mut c_stmt = conn
        .prepare(
            "SELECT min_score, max_score, label, description, suggestion
             FROM evaluation_criteria
             WHERE category_id = ? ORDER BY min_score",
        )
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;

    let mut categories_json = Vec::with_capacity(categories.len());
    for (category_id, name) in &categories {
        let questions: Vec<serde_json::Value> = q_stmt
            .query_map([category_id], |r| {
                let id: String = r.get(0)?;
                let prompt: String = r.get(1)?;
                Ok(json!({ "id": id, "prompt": prompt }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        let criteria: Vec<serde_json::Value> = c_stmt
            .query_map([category_id], |r| {
                let min_score: f64 = r.get(0)?;
                let max_score: f64 = r.get(1)?;
                let label: String = r.get(2)?;
                let description: Option<String> = r.get(3)?;
                let suggestion: Option<String> = r.get(4)?;
                Ok(json!({
                    "minScore": min_score,
                    "maxScore": max_score,
                    "label": label,
                    "description": description,
                    "suggestion": suggestion
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        categories_json.push(json!({
            "id": category_id,
            "name": name,
            "questions": questions,
            "criteria": criteria
        }));
    }

    Ok(json!({
        "template": {
            "id": template_id,
            "title": title,
            "description": description,
            "categories": categories_json
        }
    }))
}

fn templates_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;

    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM appraisal_templates WHERE id = ?",
            [&template_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "template not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Submissions against the template go with it; dependency order matters.
    let steps: [(&str, &str); 7] = [
        (
            "DELETE FROM question_responses
             WHERE appraisal_id IN (SELECT id FROM student_appraisals WHERE template_id = ?)",
            "question_responses",
        ),
        (
            "DELETE FROM category_responses
             WHERE appraisal_id IN (SELECT id FROM student_appraisals WHERE template_id = ?)",
            "category_responses",
        ),
        (
            "DELETE FROM student_appraisals WHERE template_id = ?",
            "student_appraisals",
        ),
        (
            "DELETE FROM evaluation_criteria
             WHERE category_id IN (SELECT id FROM template_categories WHERE template_id = ?)",
            "evaluation_criteria",
        ),
        (
            "DELETE FROM template_questions
             WHERE category_id IN (SELECT id FROM template_categories WHERE template_id = ?)",
            "template_questions",
        ),
        (
            "DELETE FROM template_categories WHERE template_id = ?",
            "template_categories",
        ),
        (
            "DELETE FROM appraisal_templates WHERE id = ?",
            "appraisal_templates",
        ),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&template_id]) {
            let _ = tx.rollback();
            return Err(table_err(e, "db_delete_failed", table));
        }
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

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
        "templates.create" => Some(with_conn(state, req, templates_create)),
        "templates.list" => Some(with_conn(state, req, templates_list)),
        "templates.get" => Some(with_conn(state, req, templates_get)),
        "templates.delete" => Some(with_conn(state, req, templates_delete)),
        _ => None,
    }
}
