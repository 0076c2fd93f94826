//! Cross-window handoff messages.
//!
//! These shapes travel between a popup's callback page and the window that
//! opened it — over a direct window message for login, over the shared
//! payment channel for payments. They exist only on the wire.

use serde::{Deserialize, Serialize};

/// Login result relayed to the opener. The storefront treats it as opaque;
/// only the backend session layer interprets it.
pub type LoginPayload = serde_json::Value;

/// Confirmed payment parameters the opener needs to finish the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentApproval {
    pub payment_key: String,
    pub order_id: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailure {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// One message on the popup-to-opener wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandoffMessage {
    #[serde(rename = "OAUTH_SUCCESS")]
    OauthSuccess { data: LoginPayload },
    #[serde(rename = "OAUTH_ERROR")]
    OauthError { error: String },
    #[serde(rename = "PAYMENT_SUCCESS")]
    PaymentSuccess { data: PaymentApproval },
    #[serde(rename = "PAYMENT_FAIL")]
    PaymentFail { error: PaymentFailure },
    #[serde(rename = "PAYMENT_ACK")]
    PaymentAck,
}

impl HandoffMessage {
    /// True for messages that settle a payment handoff (the ack does not).
    pub fn is_payment_terminal(&self) -> bool {
        matches!(
            self,
            HandoffMessage::PaymentSuccess { .. } | HandoffMessage::PaymentFail { .. }
        )
    }

    /// True for messages that settle a login handoff.
    pub fn is_oauth_terminal(&self) -> bool {
        matches!(
            self,
            HandoffMessage::OauthSuccess { .. } | HandoffMessage::OauthError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oauth_messages_use_the_documented_tags() {
        let success = HandoffMessage::OauthSuccess {
            data: json!({"sessionId": "s-1"}),
        };
        assert_eq!(
            serde_json::to_value(&success).expect("encode"),
            json!({"type": "OAUTH_SUCCESS", "data": {"sessionId": "s-1"}})
        );

        let error: HandoffMessage =
            serde_json::from_value(json!({"type": "OAUTH_ERROR", "error": "denied"}))
                .expect("decode");
        assert_eq!(
            error,
            HandoffMessage::OauthError {
                error: "denied".into()
            }
        );
    }

    #[test]
    fn payment_messages_round_trip_with_camel_case_fields() {
        let success = HandoffMessage::PaymentSuccess {
            data: PaymentApproval {
                payment_key: "pk_1".into(),
                order_id: "ord_1".into(),
                amount: 10_000,
            },
        };
        let value = serde_json::to_value(&success).expect("encode");
        assert_eq!(
            value,
            json!({
                "type": "PAYMENT_SUCCESS",
                "data": {"paymentKey": "pk_1", "orderId": "ord_1", "amount": 10_000}
            })
        );

        let fail: HandoffMessage = serde_json::from_value(json!({
            "type": "PAYMENT_FAIL",
            "error": {"code": "PAY_CANCEL", "message": "user backed out"}
        }))
        .expect("decode");
        match fail {
            HandoffMessage::PaymentFail { error } => {
                assert_eq!(error.code, "PAY_CANCEL");
                assert_eq!(error.order_id, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn ack_is_a_bare_tag() {
        assert_eq!(
            serde_json::to_value(HandoffMessage::PaymentAck).expect("encode"),
            json!({"type": "PAYMENT_ACK"})
        );
    }

    #[test]
    fn terminal_classification() {
        assert!(!HandoffMessage::PaymentAck.is_payment_terminal());
        assert!(HandoffMessage::PaymentFail {
            error: PaymentFailure {
                code: "X".into(),
                message: "m".into(),
                order_id: None
            }
        }
        .is_payment_terminal());
        assert!(HandoffMessage::OauthError { error: "e".into() }.is_oauth_terminal());
    }
}
