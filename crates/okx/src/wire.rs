//! Raw OKX v5 payloads. Every response shares the `{code, msg, data}`
//! envelope; numeric values arrive as strings.

use alphaark_core::{ExchangeError, PositionFields, PositionHistoryFields};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::transport::{HttpRequest, HttpTransport};

/// Success code of the envelope.
pub const OK_CODE: &str = "0";

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Decode an envelope and surface a non-zero `code` as `ExchangeError::Api`.
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<Vec<T>, ExchangeError> {
    let envelope: Envelope<T> = serde_json::from_str(body).map_err(|e| {
        ExchangeError::Decode(format!("HTTP {}: unreadable envelope: {}", status, e))
    })?;
    if envelope.code != OK_CODE {
        return Err(ExchangeError::Api {
            code: envelope.code,
            message: envelope.msg,
        });
    }
    Ok(envelope.data)
}

/// Unsigned GET against a public endpoint.
pub async fn fetch_public<T: DeserializeOwned>(
    transport: &dyn HttpTransport,
    request: HttpRequest,
) -> Result<Vec<T>, ExchangeError> {
    let response = transport.send(request).await?;
    decode_envelope(response.status, &response.body)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServerTime {
    #[serde(default)]
    pub ts: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTicker {
    pub inst_id: String,
    pub last: String,
    pub open24h: String,
    pub high24h: String,
    pub low24h: String,
    pub vol24h: String,
    pub ts: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAccountBalance {
    pub total_eq: String,
    pub u_time: String,
    pub details: Vec<RawBalanceDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawBalanceDetail {
    pub ccy: String,
    pub bal: String,
    pub avail_bal: String,
    pub frozen_bal: String,
}

impl RawBalanceDetail {
    /// Lines the exchange reports for currencies the account never held.
    pub fn is_empty_line(&self) -> bool {
        self.bal == "0" && self.avail_bal == "0"
    }
}

pub type RawPosition = PositionFields;
pub type RawPositionHistory = PositionHistoryFields;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_envelope_success() {
        let body = r#"{"code":"0","msg":"","data":[{"ts":"1700000000123"}]}"#;
        let rows: Vec<RawServerTime> = decode_envelope(200, body).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts, "1700000000123");
    }

    #[test]
    fn test_decode_envelope_api_error() {
        let body = r#"{"code":"50102","msg":"Timestamp request expired","data":[]}"#;
        let err = decode_envelope::<RawServerTime>(401, body).unwrap_err();
        match err {
            ExchangeError::Api { code, message } => {
                assert_eq!(code, "50102");
                assert_eq!(message, "Timestamp request expired");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_envelope_garbage_is_decode_error() {
        let err = decode_envelope::<RawServerTime>(502, "<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, ExchangeError::Decode(msg) if msg.contains("HTTP 502")));
    }

    #[test]
    fn test_raw_position_tolerates_missing_fields() {
        let body = r#"{"code":"0","msg":"","data":[{"instId":"BTC-USDT-SWAP","posId":"42","deltaBS":"0.1","closeOrderAlgo":[{"algoId":"7","slTriggerPx":"40000"}]}]}"#;
        let rows: Vec<RawPosition> = decode_envelope(200, body).unwrap();
        assert_eq!(rows[0].inst_id, "BTC-USDT-SWAP");
        assert_eq!(rows[0].delta_bs, "0.1");
        assert_eq!(rows[0].close_order_algo[0].sl_trigger_px, "40000");
        assert!(rows[0].u_time.is_empty());
    }

    #[test]
    fn test_empty_balance_line_detection() {
        let line = RawBalanceDetail {
            ccy: "ETH".into(),
            bal: "0".into(),
            avail_bal: "0".into(),
            frozen_bal: "0".into(),
        };
        assert!(line.is_empty_line());
        let held = RawBalanceDetail { bal: "0.5".into(), ..line };
        assert!(!held.is_empty_line());
    }
}
