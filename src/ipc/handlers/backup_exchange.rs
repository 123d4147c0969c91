use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let workspace = match req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
    {
        Some(p) => p,
        None => return err(&req.id, "bad_params", "missing workspacePath", None),
    };
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "outPath": out_path.to_string_lossy()
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:?}"), None),
    }
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = req
        .params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing workspacePath", None);
    };
    let Some(in_path) = req
        .params
        .get("inPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "backup_import_failed", format!("{e:?}"), None),
    };

    // If the restored workspace is the open one, swap the connection over to
    // the imported database.
    if state.workspace.as_deref() == Some(workspace.as_path()) {
        match db::open_db(&workspace) {
            Ok(conn) => state.db = Some(conn),
            Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
        }
    }

    ok(
        &req.id,
        json!({ "bundleFormatDetected": summary.bundle_format_detected }),
    )
}

fn handle_export_appointments_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(out_path) = req
        .params
        .get("outPath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing outPath", None);
    };
    let from = req.params.get("from").and_then(|v| v.as_str());
    let to = req.params.get("to").and_then(|v| v.as_str());

    let mut stmt = match conn.prepare(
        "SELECT a.id, s.last_name || ', ' || s.first_name,
                c.last_name || ', ' || c.first_name,
                a.date_time, a.kind, a.status, COALESCE(a.reason, '')
         FROM appointments a
         JOIN users s ON s.id = a.student_id
         JOIN users c ON c.id = a.counselor_id
         WHERE (?1 IS NULL OR a.date_time >= ?1)
           AND (?2 IS NULL OR a.date_time <= ?2)
         ORDER BY a.date_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<[String; 7]>, _> = stmt
        .query_map((from, to), |r| {
            Ok([
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
            ])
        })
        .and_then(|it| it.collect());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut csv = String::from("id,student,counselor,dateTime,kind,status,reason\n");
    for row in &rows {
        let fields: Vec<String> = row.iter().map(|f| csv_quote(f)).collect();
        csv.push_str(&fields.join(","));
        csv.push('\n');
    }

    if let Err(e) = std::fs::write(&out_path, csv) {
        return err(&req.id, "export_write_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "rows": rows.len(), "outPath": out_path.to_string_lossy() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(handle_export_bundle(state, req)),
        "backup.importWorkspaceBundle" => Some(handle_import_bundle(state, req)),
        "exchange.exportAppointmentsCsv" => Some(handle_export_appointments_csv(state, req)),
        _ => None,
    }
}
