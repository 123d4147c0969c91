use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rubric::{self, Domain};
use serde_json::json;

// Read-only rubric rendering for the chat-assistant surface. No storage
// involved; these answer straight from the fixed tables.

fn handle_overall_evaluation(req: &Request) -> serde_json::Value {
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric score", None);
    };
    match rubric::overall_evaluation(score) {
        Ok(band) => ok(
            &req.id,
            json!({
                "score": score,
                "evaluation": {
                    "label": band.label,
                    "description": band.description,
                    "suggestion": band.suggestion,
                    "color": band.color
                }
            }),
        ),
        Err(e) => err(
            &req.id,
            e.code(),
            e.message(),
            Some(json!({ "score": score })),
        ),
    }
}

fn handle_domain_evaluation(req: &Request) -> serde_json::Value {
    let Some(raw_domain) = req.params.get("domain").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing domain", None);
    };
    let Some(domain) = Domain::parse(raw_domain) else {
        return err(
            &req.id,
            "bad_params",
            "domain must be one of: academic, socioEmotional, career",
            Some(json!({ "domain": raw_domain })),
        );
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numeric score", None);
    };
    match rubric::evaluate(domain, score) {
        Ok(band) => ok(
            &req.id,
            json!({
                "domain": domain.as_str(),
                "score": score,
                "evaluation": {
                    "label": band.label,
                    "description": band.description,
                    "suggestion": band.suggestion,
                    "color": band.color
                }
            }),
        ),
        Err(e) => err(
            &req.id,
            e.code(),
            e.message(),
            Some(json!({ "domain": domain.as_str(), "score": score })),
        ),
    }
}

pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assistant.overallEvaluation" => Some(handle_overall_evaluation(req)),
        "assistant.domainEvaluation" => Some(handle_domain_evaluation(req)),
        _ => None,
    }
}
