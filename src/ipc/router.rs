use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::appointments::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::requests::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::referrals::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::templates::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::appraisals::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::legacy_appraisals::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::assistant::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
