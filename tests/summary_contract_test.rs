//! Public JSON contract of the payments summary

use payment_broker::services::summary::{PaymentsSummary, ProcessorSummary};

#[test]
fn summary_json_shape_matches_public_contract() {
    let summary = PaymentsSummary {
        default: ProcessorSummary {
            total_requests: 1,
            total_amount: 10.0,
        },
        fallback: ProcessorSummary {
            total_requests: 0,
            total_amount: 0.0,
        },
    };

    let json = serde_json::to_string(&summary).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(
        value,
        serde_json::json!({
            "default": {"totalRequests": 1, "totalAmount": 10.0},
            "fallback": {"totalRequests": 0, "totalAmount": 0.0}
        })
    );
}

#[test]
fn default_summary_is_zero_filled() {
    let value = serde_json::to_value(PaymentsSummary::default()).unwrap();

    assert_eq!(value["default"]["totalRequests"], 0);
    assert_eq!(value["default"]["totalAmount"], 0.0);
    assert_eq!(value["fallback"]["totalRequests"], 0);
    assert_eq!(value["fallback"]["totalAmount"], 0.0);
}

#[test]
fn fractional_amounts_survive_the_round_trip() {
    let summary = PaymentsSummary {
        default: ProcessorSummary {
            total_requests: 2,
            total_amount: 5.5,
        },
        fallback: ProcessorSummary {
            total_requests: 1,
            total_amount: 0.05,
        },
    };

    let parsed: PaymentsSummary =
        serde_json::from_str(&serde_json::to_string(&summary).unwrap()).unwrap();
    assert_eq!(parsed, summary);
}
