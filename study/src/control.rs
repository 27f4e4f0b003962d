//! Control channel: parse s-expression messages and route them to the study.
//!
//! Advance commands act on the protocol immediately.  Recognition messages
//! are queued into the current frame's static events so they go through the
//! tracker and the fixed per-frame ordering of [`Study::step`].

use std::time::Duration;

use lexpr::Value;
use tracing::{debug, warn};

use crate::gesture::GestureId;
use crate::session::{Study, StudyHost};

/// Parse a control message and dispatch it.
/// Returns the response s-expression.
pub fn handle_message<H: StudyHost>(
    study: &mut Study,
    host: &mut H,
    now: Duration,
    pending: &mut Vec<GestureId>,
    raw: &str,
) -> String {
    let value = match lexpr::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed s-expression: {}", e);
            return error_response(0, &format!("malformed s-expression: {e}"));
        }
    };

    let msg_type = get_keyword(&value, "type");
    let msg_id = get_int(&value, "id").unwrap_or(0);
    debug!(msg_id, "control message {:?} at {:.3}s", msg_type, now.as_secs_f64());

    match msg_type.as_deref() {
        Some("advance-show") => {
            let accepted = study.protocol_mut().advance_to_show(now);
            advance_response(study, msg_id, "advance-show", accepted)
        }
        Some("advance-try") => {
            let accepted = study.protocol_mut().advance_to_try(now, host);
            advance_response(study, msg_id, "advance-try", accepted)
        }
        Some("advance-repeat") => {
            let accepted = study.protocol_mut().advance_to_repeat(now);
            advance_response(study, msg_id, "advance-repeat", accepted)
        }
        Some("recognize") => handle_recognize(pending, msg_id, &value),
        Some("status") => format!(
            "(:type :response :id {} :status :ok :study {})",
            msg_id,
            study.status_sexp(now)
        ),
        Some("tracker-status") => format!(
            "(:type :response :id {} :status :ok :tracker {})",
            msg_id,
            study.tracker().status_sexp()
        ),
        Some("config") => format!(
            "(:type :response :id {} :status :ok :config {})",
            msg_id,
            study.protocol().config().config_sexp()
        ),
        Some(other) => {
            warn!("unknown message type: {}", other);
            error_response(msg_id, &format!("unknown message type: {other}"))
        }
        None => error_response(msg_id, "missing :type"),
    }
}

fn advance_response(study: &Study, msg_id: i64, command: &str, accepted: bool) -> String {
    let phase = study.protocol().phase().as_str();
    if accepted {
        format!("(:type :response :id {} :status :ok :phase :{})", msg_id, phase)
    } else {
        error_response(msg_id, &format!("{command} not valid in phase {phase}"))
    }
}

fn handle_recognize(pending: &mut Vec<GestureId>, msg_id: i64, value: &Value) -> String {
    let Some(name) = get_keyword(value, "gesture").filter(|s| !s.is_empty()) else {
        return error_response(msg_id, "missing :gesture");
    };
    pending.push(GestureId::new(name));
    ok_response(msg_id)
}

// ── Helpers ────────────────────────────────────────────────

fn ok_response(id: i64) -> String {
    format!("(:type :response :id {} :status :ok)", id)
}

fn error_response(id: i64, reason: &str) -> String {
    format!(
        "(:type :response :id {} :status :error :reason \"{}\")",
        id,
        escape_string(reason)
    )
}

/// Escape a string for s-expression output.
fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Extract a keyword value from an s-expression plist.
/// Handles both `Value::Keyword("key")` and `Value::Symbol(":key")` forms.
pub(crate) fn get_keyword(value: &Value, key: &str) -> Option<String> {
    let prefixed = format!(":{}", key);
    let mut current = value;
    while let Value::Cons(pair) = current {
        let is_key = match pair.car() {
            Value::Keyword(k) => k.as_ref() == key,
            Value::Symbol(s) => s.as_ref() == prefixed,
            _ => false,
        };
        if !is_key {
            current = pair.cdr();
            continue;
        }
        let Value::Cons(next) = pair.cdr() else {
            return None;
        };
        let val = next.car();
        return Some(match val {
            Value::Keyword(v) => v.to_string(),
            Value::Symbol(v) => {
                let s = v.to_string();
                s.strip_prefix(':').unwrap_or(&s).to_string()
            }
            Value::String(v) => v.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => (if *b { "t" } else { "nil" }).to_string(),
            Value::Null => "nil".to_string(),
            _ => val.to_string(),
        });
    }
    None
}

fn get_int(value: &Value, key: &str) -> Option<i64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}

/// Extract a floating-point value from an s-expression plist.
pub(crate) fn get_float(value: &Value, key: &str) -> Option<f64> {
    get_keyword(value, key).and_then(|s| s.parse().ok())
}
