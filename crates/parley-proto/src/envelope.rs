//! JSON response envelope helpers.
//!
//! Every handler response carries at least `{success, code}` plus an
//! optional human message; the `type` field mirrors the frame type for
//! client convenience.

use serde_json::{Value, json};

/// A bare success envelope.
pub fn ok_body(msg_type: u16) -> Value {
    json!({
        "type": msg_type,
        "success": true,
        "code": 200,
    })
}

/// An error envelope with a human-readable message.
pub fn error_body(msg_type: u16, code: i64, message: &str) -> Value {
    json!({
        "type": msg_type,
        "success": false,
        "code": code,
        "message": message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_carry_required_fields() {
        let ok = ok_body(1015);
        assert_eq!(ok["success"], true);
        assert_eq!(ok["code"], 200);
        assert_eq!(ok["type"], 1015);

        let err = error_body(1015, 400, "message content required");
        assert_eq!(err["success"], false);
        assert_eq!(err["code"], 400);
        assert_eq!(err["message"], "message content required");
    }
}
