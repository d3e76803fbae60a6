use super::*;

/// JSON-RPC id. Miners send numbers, strings, or null; whatever arrives is
/// echoed back verbatim.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
#[serde(untagged)]
pub enum Id {
    Null,
    Number(u64),
    String(String),
}

/// One inbound line: `{"id": .., "method": .., "params": ..}`.
#[derive(Debug, Deserialize, PartialEq)]
pub struct Request {
    pub id: Id,
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Response {
    pub id: Id,
    pub jsonrpc: &'static str,
    pub error: Option<RpcError>,
    pub result: Option<Value>,
}

impl Response {
    pub fn ok(id: Id, result: Value) -> Self {
        Self {
            id,
            jsonrpc: "2.0",
            error: None,
            result: Some(result),
        }
    }

    pub fn error(id: Id, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: "2.0",
            error: Some(RpcError {
                code: -1,
                message: message.into(),
            }),
            result: None,
        }
    }
}

/// Server-initiated push, e.g. `{"jsonrpc":"2.0","method":"job","params":..}`.
#[derive(Debug, Serialize, PartialEq)]
pub struct Push {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl Push {
    pub fn job(payload: &JobPayload) -> Result<Self> {
        Ok(Self {
            jsonrpc: "2.0",
            method: "job",
            params: serde_json::to_value(payload)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoginParams {
    pub login: Option<String>,
    pub pass: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SubmitParams {
    pub id: String,
    pub job_id: String,
    pub nonce: String,
    pub result: String,
}

/// The job object handed to miners, both as the `login`/`getjob` result and
/// in `job` pushes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobPayload {
    pub blob: String,
    pub job_id: String,
    pub target: String,
    pub id: String,
}

/// A miner-supplied nonce: exactly eight lowercase hex digits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeFromStr, SerializeDisplay)]
pub struct Nonce(u32);

impl Nonce {
    /// Parses a submitted nonce the way the wire contract defines it: the
    /// value is truncated to its first eight characters, lowercased, and
    /// must then be pure hex.
    pub fn from_wire(s: &str) -> Option<Self> {
        let s = s.get(..8)?.to_lowercase();

        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        u32::from_str_radix(&s, 16).ok().map(Nonce)
    }
}

impl FromStr for Nonce {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Nonce::from_wire(s).ok_or_else(|| anyhow!("invalid nonce hex string '{s}'"))
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for Nonce {
    fn from(n: u32) -> Nonce {
        Nonce(n)
    }
}

impl From<Nonce> for u32 {
    fn from(n: Nonce) -> u32 {
        n.0
    }
}

/// Reject reasons sent back to miners. The display strings are the wire
/// contract; clients match on them.
#[derive(Debug, Snafu, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[snafu(display("Invalid job id"))]
    InvalidJobId,
    #[snafu(display("Duplicate share"))]
    DuplicateShare,
    #[snafu(display("Malformed nonce"))]
    MalformedNonce,
    #[snafu(display("Block expired"))]
    BlockExpired,
    #[snafu(display("Low difficulty share"))]
    LowDifficulty,
    #[snafu(display("Unauthenticated"))]
    Unauthenticated,
    #[snafu(display("IP Address currently banned"))]
    BannedIp,
}

#[cfg(test)]
mod tests {
    use {super::*, pretty_assertions::assert_eq};

    #[track_caller]
    fn request_case(s: &str, expected: Request) {
        let actual = serde_json::from_str::<Request>(s).unwrap();
        assert_eq!(actual, expected, "deserialize Request from str");
    }

    #[test]
    fn request_with_number_id() {
        request_case(
            r#"{"id":1,"method":"getjob","params":{}}"#,
            Request {
                id: Id::Number(1),
                method: "getjob".into(),
                params: json!({}),
            },
        );
    }

    #[test]
    fn request_with_string_and_null_ids() {
        request_case(
            r#"{"id":"a","method":"keepalived","params":{}}"#,
            Request {
                id: Id::String("a".into()),
                method: "keepalived".into(),
                params: json!({}),
            },
        );

        request_case(
            r#"{"id":null,"method":"keepalived","params":{}}"#,
            Request {
                id: Id::Null,
                method: "keepalived".into(),
                params: json!({}),
            },
        );
    }

    #[test]
    fn request_missing_fields_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"id":1,"params":{}}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"method":"getjob","params":{}}"#).is_err());
        assert!(serde_json::from_str::<Request>(r#"{"id":1,"method":"getjob"}"#).is_err());
    }

    #[test]
    fn response_ok_wire_format() {
        let response = Response::ok(Id::Number(7), json!({"status": "OK"}));

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"id": 7, "jsonrpc": "2.0", "error": null, "result": {"status": "OK"}}),
        );
    }

    #[test]
    fn response_error_wire_format() {
        let response = Response::error(Id::Number(7), RejectReason::InvalidJobId.to_string());

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "id": 7,
                "jsonrpc": "2.0",
                "error": {"code": -1, "message": "Invalid job id"},
                "result": null,
            }),
        );
    }

    #[test]
    fn job_push_wire_format() {
        let payload = JobPayload {
            blob: "ab".into(),
            job_id: "deadbeef".into(),
            target: "ffffffff".into(),
            id: "session".into(),
        };

        assert_eq!(
            serde_json::to_value(Push::job(&payload).unwrap()).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "method": "job",
                "params": {"blob": "ab", "job_id": "deadbeef", "target": "ffffffff", "id": "session"},
            }),
        );
    }

    #[test]
    fn login_params() {
        let params: LoginParams =
            serde_json::from_value(json!({"login": "addr", "pass": "x", "agent": "XMRig/6.0"}))
                .unwrap();

        assert_eq!(params.login.as_deref(), Some("addr"));
        assert_eq!(params.pass.as_deref(), Some("x"));
        assert_eq!(params.agent.as_deref(), Some("XMRig/6.0"));

        let bare: LoginParams = serde_json::from_value(json!({})).unwrap();
        assert!(bare.login.is_none());
    }

    #[test]
    fn submit_params_tolerate_missing_fields() {
        let params: SubmitParams = serde_json::from_value(json!({"job_id": "j"})).unwrap();

        assert_eq!(params.job_id, "j");
        assert_eq!(params.nonce, "");
        assert_eq!(params.result, "");
    }

    #[test]
    fn nonce_from_wire() {
        assert_eq!(Nonce::from_wire("0000abcd"), Some(Nonce(0xabcd)));
        assert_eq!(Nonce::from_wire("FFFFFFFF"), Some(Nonce(u32::MAX)));

        // Truncated to eight characters, matching the wire contract.
        assert_eq!(Nonce::from_wire("deadbeef00"), Some(Nonce(0xdeadbeef)));

        assert_eq!(Nonce::from_wire(""), None);
        assert_eq!(Nonce::from_wire("1234567"), None);
        assert_eq!(Nonce::from_wire("xyzzy123"), None);
    }

    #[test]
    fn nonce_display_zero_padded() {
        assert_eq!(Nonce(0xabcd).to_string(), "0000abcd");
        assert_eq!(Nonce(0).to_string(), "00000000");
    }

    #[test]
    fn reject_reason_strings_are_the_wire_contract() {
        assert_eq!(RejectReason::InvalidJobId.to_string(), "Invalid job id");
        assert_eq!(RejectReason::DuplicateShare.to_string(), "Duplicate share");
        assert_eq!(RejectReason::BlockExpired.to_string(), "Block expired");
        assert_eq!(
            RejectReason::LowDifficulty.to_string(),
            "Low difficulty share"
        );
    }
}
